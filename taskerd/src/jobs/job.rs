/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! A managed process bound to a cgroup and an output buffer.
//!
//! The child is cloned directly into its cgroup leaf, so limits apply from
//! its first instruction, and is made the leader of its own process group,
//! so a graceful stop can signal the whole tree.

use std::io::Read;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cgroups::{Cgroup, CgroupsError, Limits};
use super::output::{OutputBuffer, OutputReader};

#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("spawn: {0}")]
    Spawn(String),
    #[error("process exited with status {0}")]
    Exit(i32),
    #[error("process terminated by signal {0}")]
    Signaled(i32),
    #[error("wait: {0}")]
    Wait(String),
    #[error("cgroup: {0}")]
    Cgroup(String),
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Joined(Vec<JobError>),
}

impl From<CgroupsError> for JobError {
    fn from(err: CgroupsError) -> Self {
        JobError::Cgroup(err.to_string())
    }
}

impl JobError {
    fn join(mut errors: Vec<JobError>) -> Option<JobError> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => Some(JobError::Joined(errors)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StopError {
    #[error("job did not stop before the deadline")]
    DeadlineExceeded,
}

/// The lifecycle phase of a job.
///
/// `Running` is the unique initial phase; `Stopped` (intentional stop) and
/// `Completed` (natural exit) are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Stopped,
    Completed,
}

#[derive(Debug)]
struct JobState {
    phase: Phase,
    exit_error: Option<JobError>,
}

/// A process running in its own cgroup, identified by a UUIDv7.
#[derive(Debug)]
pub struct Job {
    id: String,
    command: String,
    args: Vec<String>,
    owner: String,
    limits: Limits,
    pid: Pid,
    cgroup: Cgroup,
    output: Arc<OutputBuffer>,
    state: Mutex<JobState>,
    done: watch::Sender<bool>,
}

impl Job {
    /// Creates the cgroup, spawns the child into it, and starts the
    /// background waiter that owns cleanup.
    ///
    /// On any failure nothing is left behind: the cgroup is removed and no
    /// job is returned.
    pub fn start(
        command: String,
        args: Vec<String>,
        owner: String,
        limits: Limits,
    ) -> Result<Arc<Self>, JobError> {
        let id = uuid::Uuid::now_v7().to_string();

        let (cgroup, cgroup_fd) = Cgroup::create(&id, &limits)?;

        let output = Arc::new(OutputBuffer::new());

        // One pipe carries both stdout and stderr, in write order.
        let (pipe_reader, pipe_writer) =
            nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
                .map_err(|errno| JobError::Spawn(errno.to_string()))?;
        let pipe_reader = unsafe { OwnedFd::from_raw_fd(pipe_reader) };
        let pipe_writer = unsafe { OwnedFd::from_raw_fd(pipe_writer) };
        let stderr_writer = pipe_writer
            .try_clone()
            .map_err(|e| JobError::Spawn(e.to_string()))?;

        let mut child = Command::new(&command);
        let _ = child
            .args(&args)
            .current_dir("/")
            .stdin(Stdio::null())
            .stdout(Stdio::from(pipe_writer))
            .stderr(Stdio::from(stderr_writer))
            .process_group(0);

        let clone_result = {
            let mut clone = clone3::Clone3::default();
            let _ = clone.flag_into_cgroup(&cgroup_fd);
            let _ = clone.exit_signal(libc::SIGCHLD as u64);
            unsafe { clone.call() }
        };

        let pid = match clone_result {
            Ok(0) => {
                // Child: exec never returns on success. Everything else the
                // child needs (stdio wiring, its own process group) is
                // applied by exec itself.
                let _ = child.exec();
                unsafe { libc::exit(1) }
            }
            Ok(pid) => Pid::from_raw(pid),
            Err(e) => {
                let _ = cgroup.kill();
                let _ = cgroup.remove();
                return Err(JobError::Spawn(
                    std::io::Error::from_raw_os_error(e.0).to_string(),
                ));
            }
        };

        // The fd was only needed to place the child in the cgroup, and the
        // parent's copies of the pipe write ends must close so the pump
        // sees EOF when the job's process group exits.
        drop(cgroup_fd);
        drop(child);

        let output_pump = spawn_output_pump(
            std::fs::File::from(pipe_reader),
            Arc::clone(&output),
        );

        let (done, _) = watch::channel(false);
        let job = Arc::new(Self {
            id,
            command,
            args,
            owner,
            limits,
            pid,
            cgroup,
            output,
            state: Mutex::new(JobState {
                phase: Phase::Running,
                exit_error: None,
            }),
            done,
        });

        let _ = tokio::spawn(Arc::clone(&job).wait(output_pump));

        Ok(job)
    }

    /// Blocks until the child is reaped, then runs the terminal sequence
    /// exactly once.
    async fn wait(self: Arc<Self>, output_pump: JoinHandle<()>) {
        let pid = self.pid;
        let wait_result =
            tokio::task::spawn_blocking(move || waitpid(pid, None)).await;

        let mut wait_err = match wait_result {
            Ok(Ok(WaitStatus::Exited(_, 0))) => None,
            Ok(Ok(WaitStatus::Exited(_, code))) => Some(JobError::Exit(code)),
            Ok(Ok(WaitStatus::Signaled(_, sig, _))) => {
                Some(JobError::Signaled(sig as i32))
            }
            Ok(Ok(status)) => {
                Some(JobError::Wait(format!("unexpected status {status:?}")))
            }
            Ok(Err(errno)) => Some(JobError::Wait(errno.to_string())),
            Err(e) => Some(JobError::Wait(e.to_string())),
        };

        {
            let mut state = self.state.lock().expect("job state lock");
            match state.phase {
                Phase::Running => state.phase = Phase::Completed,
                // Exit error is expected when stopped
                Phase::Stopped => wait_err = None,
                Phase::Completed => {}
            }
        }

        let mut errors = Vec::new();
        if let Some(err) = wait_err {
            errors.push(err);
        }

        // Kill stragglers that outlived the tracked child, then tear down.
        // The pump drains once every write end of the pipe is closed, which
        // the cgroup kill guarantees.
        if let Err(e) = self.cgroup.kill() {
            errors.push(e.into());
        }
        let _ = output_pump.await;
        if let Err(e) = self.cgroup.remove() {
            errors.push(e.into());
        }
        self.output.close();

        self.state.lock().expect("job state lock").exit_error =
            JobError::join(errors);

        let _ = self.done.send(true);
    }

    /// Stops the job: SIGTERM to the process group, then a cgroup kill if
    /// the deadline passes first.
    ///
    /// Stopping a job that is no longer running is a success no-op.
    pub async fn stop(&self, timeout: Duration) -> Result<(), StopError> {
        {
            let mut state = self.state.lock().expect("job state lock");
            if state.phase != Phase::Running {
                return Ok(());
            }
            state.phase = Phase::Stopped;
        }

        // SIGTERM the process group so shells and supervisors get a chance
        // to clean up.
        let _ = signal::kill(
            Pid::from_raw(-self.pid.as_raw()),
            Signal::SIGTERM,
        );

        let mut done = self.done.subscribe();
        let timed_out =
            tokio::time::timeout(timeout, done.wait_for(|done| *done))
                .await
                .is_err();
        if timed_out {
            // Escalate: the kernel enumerates every pid in the cgroup,
            // not just the ones this process knows about.
            let _ = self.cgroup.kill();
            let _ = done.wait_for(|done| *done).await;
            Err(StopError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Returns a reader over the job's output from the beginning.
    pub fn output_reader(&self, cancel: CancellationToken) -> OutputReader {
        self.output.reader(cancel)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().expect("job state lock").phase
    }

    /// The job's error after it has reached a terminal phase.
    pub fn exit_error(&self) -> Option<JobError> {
        self.state.lock().expect("job state lock").exit_error.clone()
    }
}

/// Copies the child's combined output into the buffer until EOF.
fn spawn_output_pump(
    mut pipe: std::fs::File,
    output: Arc<OutputBuffer>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => {
                    if output.write(&chunk[..count]).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    })
}
