/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CgroupsError>;

#[derive(Debug, Error)]
pub enum CgroupsError {
    #[error("enable controller (controller={controller}): {source}")]
    EnableController { controller: &'static str, source: io::Error },
    #[error("create tasker cgroup: {source}")]
    CreateParent { source: io::Error },
    #[error("create job cgroup: {source}")]
    CreateCgroup { source: io::Error },
    #[error("set {file}: {source}")]
    WriteController { file: &'static str, source: io::Error },
    #[error("open job cgroup: {source}")]
    OpenCgroup { source: io::Error },
    #[error("stat (device={device}): {source}")]
    StatDevice { device: String, source: io::Error },
    #[error("not a block device (device={device})")]
    NotABlockDevice { device: String },
    #[error("read parent disk device number: {source}")]
    ReadParentDevice { source: io::Error },
    #[error("kill cgroup: {source}")]
    KillCgroup { source: io::Error },
    #[error("remove job cgroup: {source}")]
    RemoveCgroup { source: io::Error },
}
