/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Per-job cgroup v2 leaves under `/sys/fs/cgroup/tasker/`.
//!
//! Limits are realized by writing the controller files directly; the leaf
//! directory fd is handed to `clone3` so the child starts its first
//! instruction already inside the cgroup.

use std::fs;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::libc;
use nix::sys::stat::{major, minor, SFlag};

use super::error::{CgroupsError, Result};
use super::Limits;

/// Parent cgroup directory for all job cgroups.
const TASKER_CGROUP_DIR: &str = "/sys/fs/cgroup/tasker";

/// Controllers delegated to job cgroups.
const CONTROLLERS: [&str; 4] = ["cpu", "memory", "io", "pids"];

/// CPU period in microseconds; quotas are expressed against it.
const CPU_PERIOD: u64 = 100_000;

/// Maximum number of concurrent processes per job.
const MAX_PIDS: u32 = 1000;

/// Creates the tasker parent cgroup and enables controllers.
///
/// Runs once at server startup. Re-enabling an already enabled controller
/// is a no-op, so repeated runs succeed.
pub fn init() -> Result<()> {
    // Enable controllers at the root so they can be delegated to the
    // tasker subtree.
    let root_subtree_control =
        Path::new("/sys/fs/cgroup").join("cgroup.subtree_control");
    for controller in CONTROLLERS {
        fs::write(&root_subtree_control, format!("+{controller}")).map_err(
            |source| CgroupsError::EnableController { controller, source },
        )?;
    }

    fs::create_dir_all(TASKER_CGROUP_DIR)
        .map_err(|source| CgroupsError::CreateParent { source })?;

    // Enable controllers in the tasker subtree for job cgroups.
    let subtree_control =
        Path::new(TASKER_CGROUP_DIR).join("cgroup.subtree_control");
    for controller in CONTROLLERS {
        fs::write(&subtree_control, format!("+{controller}")).map_err(
            |source| CgroupsError::EnableController { controller, source },
        )?;
    }

    Ok(())
}

/// A job's cgroup leaf directory.
#[derive(Debug)]
pub struct Cgroup {
    dir: PathBuf,
}

impl Cgroup {
    /// Creates the leaf for a job, applies its resource limits, and opens
    /// the directory fd used to place the child at clone time.
    ///
    /// Any failure after the directory is created removes it again.
    pub fn create(id: &str, limits: &Limits) -> Result<(Self, OwnedFd)> {
        let dir = Path::new(TASKER_CGROUP_DIR).join(id);
        fs::create_dir(&dir)
            .map_err(|source| CgroupsError::CreateCgroup { source })?;

        let cgroup = Self { dir };
        match cgroup.apply(limits) {
            Ok(fd) => Ok((cgroup, fd)),
            Err(err) => {
                let _ = fs::remove_dir(&cgroup.dir);
                Err(err)
            }
        }
    }

    fn apply(&self, limits: &Limits) -> Result<OwnedFd> {
        if let Some(cores) = limits.cpu {
            self.write_controller("cpu.max", &cpu_max(cores))?;
        }

        if let Some(memory) = limits.memory {
            self.write_controller("memory.max", &mb_to_bytes(memory))?;
        }

        if let Some(io_limits) = &limits.io {
            let device = lookup_block_device(&io_limits.device)?;
            self.write_controller(
                "io.max",
                &io_max(&device, io_limits.read, io_limits.write),
            )?;
        }

        self.write_controller("pids.max", &MAX_PIDS.to_string())?;

        let fd = fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
            .open(&self.dir)
            .map_err(|source| CgroupsError::OpenCgroup { source })?;

        Ok(fd.into())
    }

    fn write_controller(&self, file: &'static str, data: &str) -> Result<()> {
        fs::write(self.dir.join(file), data)
            .map_err(|source| CgroupsError::WriteController { file, source })
    }

    /// Hard kills every process in the cgroup through the kernel's
    /// `cgroup.kill` interface. Tolerates an already removed cgroup.
    pub fn kill(&self) -> Result<()> {
        match fs::write(self.dir.join("cgroup.kill"), "1") {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CgroupsError::KillCgroup { source }),
        }
    }

    /// Removes the leaf directory. Tolerates an already removed cgroup.
    ///
    /// `cgroup.kill` delivery is asynchronous, so removal briefly retries
    /// while the kernel still counts dying processes against the leaf.
    pub fn remove(&self) -> Result<()> {
        let mut attempts = 0;
        loop {
            match fs::remove_dir(&self.dir) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e)
                    if e.raw_os_error() == Some(libc::EBUSY)
                        && attempts < 10 =>
                {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(source) => {
                    return Err(CgroupsError::RemoveCgroup { source })
                }
            }
        }
    }

    /// Whether the leaf for the given job id exists on the host.
    pub fn exists(id: &str) -> bool {
        Path::new(TASKER_CGROUP_DIR).join(id).exists()
    }
}

fn cpu_max(cores: f32) -> String {
    // quota = cores * period; max = "<quota> <period>"
    let quota = (f64::from(cores) * CPU_PERIOD as f64).round() as u64;
    format!("{quota} {CPU_PERIOD}")
}

fn mb_to_bytes(mb: u32) -> String {
    (u64::from(mb) * 1024 * 1024).to_string()
}

fn io_max(device: &str, read: Option<u32>, write: Option<u32>) -> String {
    let rbps = read.map_or_else(|| String::from("max"), mb_to_bytes);
    let wbps = write.map_or_else(|| String::from("max"), mb_to_bytes);
    format!("{device} rbps={rbps} wbps={wbps}")
}

/// Looks up a device's `MAJ:MIN` pair.
///
/// If the path is a partition, the parent whole disk's pair is returned
/// because cgroup `io.max` only accepts whole disk device numbers.
fn lookup_block_device(device: &str) -> Result<String> {
    let stat = nix::sys::stat::stat(device).map_err(|errno| {
        CgroupsError::StatDevice {
            device: device.to_owned(),
            source: errno.into(),
        }
    })?;

    if stat.st_mode & SFlag::S_IFMT.bits() != SFlag::S_IFBLK.bits() {
        return Err(CgroupsError::NotABlockDevice {
            device: device.to_owned(),
        });
    }

    let device_num = format!("{}:{}", major(stat.st_rdev), minor(stat.st_rdev));
    let sys_path = PathBuf::from(format!("/sys/dev/block/{device_num}"));
    if !sys_path.join("partition").exists() {
        return Ok(device_num);
    }

    let parent = fs::read_to_string(sys_path.join("..").join("dev"))
        .map_err(|source| CgroupsError::ReadParentDevice { source })?;

    Ok(parent.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_max_half_core() {
        assert_eq!(cpu_max(0.5), "50000 100000");
    }

    #[test]
    fn test_cpu_max_multiple_cores() {
        assert_eq!(cpu_max(1.5), "150000 100000");
        assert_eq!(cpu_max(4.0), "400000 100000");
    }

    #[test]
    fn test_mb_to_bytes() {
        assert_eq!(mb_to_bytes(512), "536870912");
        assert_eq!(mb_to_bytes(1), "1048576");
    }

    #[test]
    fn test_io_max_both_directions() {
        assert_eq!(
            io_max("8:0", Some(100), Some(50)),
            "8:0 rbps=104857600 wbps=52428800"
        );
    }

    #[test]
    fn test_io_max_unset_direction_is_max() {
        assert_eq!(io_max("8:0", None, Some(50)), "8:0 rbps=max wbps=52428800");
        assert_eq!(io_max("8:0", Some(100), None), "8:0 rbps=104857600 wbps=max");
        assert_eq!(io_max("8:0", None, None), "8:0 rbps=max wbps=max");
    }

    #[test]
    fn test_lookup_block_device_rejects_char_device() {
        assert!(matches!(
            lookup_block_device("/dev/null"),
            Err(CgroupsError::NotABlockDevice { .. })
        ));
    }

    #[test]
    fn test_lookup_block_device_missing_path() {
        assert!(matches!(
            lookup_block_device("/dev/does-not-exist"),
            Err(CgroupsError::StatDevice { .. })
        ));
    }
}
