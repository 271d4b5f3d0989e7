/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use thiserror::Error;
use tonic::Status;
use tracing::error;

use super::job::{JobError, StopError};
use super::validation::ValidationError;

pub(crate) type Result<T> = std::result::Result<T, JobsServiceError>;

#[derive(Debug, Error)]
pub(crate) enum JobsServiceError {
    #[error(transparent)]
    InvalidRequest(#[from] ValidationError),
    #[error("no identity in request")]
    MissingIdentity,
    #[error("job not found (id={id})")]
    JobNotFound { id: String },
    #[error("user {name} cannot manage job owned by {owner}")]
    PermissionDenied { name: String, owner: String },
    #[error("start failed: {source}")]
    FailedToStartJob { source: JobError },
    #[error(transparent)]
    FailedToStopJob(#[from] StopError),
}

impl From<JobsServiceError> for Status {
    fn from(err: JobsServiceError) -> Self {
        let msg = err.to_string();
        error!("{msg}");
        match err {
            JobsServiceError::InvalidRequest(_) => {
                Status::invalid_argument(msg)
            }
            JobsServiceError::MissingIdentity => Status::unauthenticated(msg),
            JobsServiceError::JobNotFound { .. } => Status::not_found(msg),
            JobsServiceError::PermissionDenied { .. } => {
                Status::permission_denied(msg)
            }
            JobsServiceError::FailedToStartJob { .. } => Status::internal(msg),
            JobsServiceError::FailedToStopJob(StopError::DeadlineExceeded) => {
                Status::deadline_exceeded(msg)
            }
        }
    }
}
