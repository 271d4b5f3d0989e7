/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

pub use cgroup::{init, Cgroup};
pub use error::{CgroupsError, Result};

mod cgroup;
mod error;

/// Resource limits for one job. Absent fields mean unlimited for that
/// dimension.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    /// CPU limit in cores (e.g. 0.5).
    pub cpu: Option<f32>,
    /// Memory limit in MB.
    pub memory: Option<u32>,
    /// IO throttle for one block device.
    pub io: Option<IoLimits>,
}

/// IO throttle limits for a block device, in MB/s.
#[derive(Debug, Clone)]
pub struct IoLimits {
    pub device: String,
    pub read: Option<u32>,
    pub write: Option<u32>,
}
