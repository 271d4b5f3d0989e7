/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! The job execution engine and its gRPC surface.

pub mod cgroups;

mod error;
mod job;
mod job_service;
mod jobs;
mod output;
mod validation;

pub use cgroups::{IoLimits, Limits};
pub use job::{Job, JobError, Phase, StopError};
pub use job_service::JobService;
pub use output::{OutputBuffer, OutputError, OutputReader};
pub use validation::{ValidatedStartJobRequest, ValidationError};
