/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use std::sync::Arc;
use std::time::Duration;

use client::identity::{Identity, Role};
use proto::tasker::tasker_service_server::TaskerService;
use proto::tasker::{
    AttachJobRequest, AttachJobResponse, GetJobRequest, GetJobResponse,
    IoLimits, JobPhase, ResourceLimits, StartJobRequest, StartJobResponse,
    StopJobRequest, StopJobResponse,
};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use super::error::{JobsServiceError, Result};
use super::job::{Job, Phase};
use super::jobs::Jobs;
use super::output::OutputError;
use super::validation::ValidatedStartJobRequest;

/// Output is streamed to attached clients in chunks of at most this size.
const ATTACH_CHUNK_SIZE: usize = 4096;

/// How long a job gets to exit after SIGTERM before escalating to a
/// cgroup kill.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// The gRPC surface for managing jobs.
#[derive(Debug, Clone)]
pub struct JobService {
    jobs: Arc<RwLock<Jobs>>,
    shutdown: CancellationToken,
}

impl JobService {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { jobs: Arc::new(RwLock::new(Jobs::default())), shutdown }
    }

    /// Stops every running job concurrently, each with its own deadline.
    /// Called once during server shutdown.
    pub(crate) async fn stop_all(&self) {
        let jobs = self.jobs.read().await.all();

        let mut stops = JoinSet::new();
        for job in jobs {
            if job.phase() != Phase::Running {
                continue;
            }

            let _ = stops.spawn(async move {
                match job.stop(STOP_TIMEOUT).await {
                    Ok(()) => info!(id = %job.id(), "job stopped"),
                    Err(e) => {
                        warn!(id = %job.id(), "job force killed: {e}")
                    }
                }
            });
        }

        while stops.join_next().await.is_some() {}
    }

    async fn job(&self, id: &str) -> Result<Arc<Job>> {
        self.jobs.read().await.get(id).ok_or_else(|| {
            JobsServiceError::JobNotFound { id: id.to_owned() }
        })
    }
}

#[tonic::async_trait]
impl TaskerService for JobService {
    async fn start_job(
        &self,
        request: Request<StartJobRequest>,
    ) -> std::result::Result<Response<StartJobResponse>, Status> {
        let identity = identity(&request)?;
        let request = ValidatedStartJobRequest::validate(request.into_inner())
            .map_err(JobsServiceError::from)?;

        let job = Job::start(
            request.command,
            request.args,
            identity.name,
            request.limits,
        )
        .map_err(|source| JobsServiceError::FailedToStartJob { source })?;

        self.jobs.write().await.insert(Arc::clone(&job));

        info!(
            id = %job.id(),
            owner = %job.owner(),
            command = %job.command(),
            "job started"
        );

        Ok(Response::new(StartJobResponse { job: Some(job_to_proto(&job)) }))
    }

    async fn stop_job(
        &self,
        request: Request<StopJobRequest>,
    ) -> std::result::Result<Response<StopJobResponse>, Status> {
        let identity = identity(&request)?;
        let request = request.into_inner();

        let job = self.job(&request.id).await?;
        check_job_access(&identity, job.owner())?;

        if let Err(e) = job.stop(STOP_TIMEOUT).await {
            warn!(id = %job.id(), user = %identity.name, "job force killed: {e}");
            return Err(JobsServiceError::from(e).into());
        }

        info!(id = %job.id(), user = %identity.name, "job stopped");

        Ok(Response::new(StopJobResponse { job: Some(job_to_proto(&job)) }))
    }

    async fn get_job(
        &self,
        request: Request<GetJobRequest>,
    ) -> std::result::Result<Response<GetJobResponse>, Status> {
        let identity = identity(&request)?;
        let request = request.into_inner();

        let job = self.job(&request.id).await?;
        check_job_access(&identity, job.owner())?;

        Ok(Response::new(GetJobResponse { job: Some(job_to_proto(&job)) }))
    }

    type AttachJobStream =
        ReceiverStream<std::result::Result<AttachJobResponse, Status>>;

    async fn attach_job(
        &self,
        request: Request<AttachJobRequest>,
    ) -> std::result::Result<Response<Self::AttachJobStream>, Status> {
        let identity = identity(&request)?;
        let request = request.into_inner();

        let job = self.job(&request.id).await?;
        check_job_access(&identity, job.owner())?;

        // The follower unwinds when the client goes away or the server
        // shuts down; neither affects the job.
        let mut reader = job.output_reader(self.shutdown.child_token());
        let (tx, rx) = mpsc::channel(4);

        let _ignored = tokio::spawn(async move {
            let mut chunk = [0u8; ATTACH_CHUNK_SIZE];
            loop {
                tokio::select! {
                    read = reader.read(&mut chunk) => match read {
                        // end of stream
                        Ok(0) => break,
                        Ok(count) => {
                            let data = chunk[..count].to_vec();
                            let response = AttachJobResponse { data };
                            if tx.send(Ok(response)).await.is_err() {
                                // receiver is gone
                                break;
                            }
                        }
                        Err(OutputError::Cancelled) => break,
                        Err(e) => {
                            let status = Status::internal(e.to_string());
                            let _ = tx.send(Err(status)).await;
                            break;
                        }
                    },
                    () = tx.closed() => break,
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Extracts the identity the auth interceptor attached to the request.
fn identity<T>(request: &Request<T>) -> Result<Identity> {
    request
        .extensions()
        .get::<Identity>()
        .cloned()
        .ok_or(JobsServiceError::MissingIdentity)
}

/// Verifies the identity can manage the given job.
///
/// Admins can manage any job; users can only manage their own.
fn check_job_access(identity: &Identity, owner: &str) -> Result<()> {
    if identity.role == Role::Admin {
        return Ok(());
    }

    if owner != identity.name {
        return Err(JobsServiceError::PermissionDenied {
            name: identity.name.clone(),
            owner: owner.to_owned(),
        });
    }

    Ok(())
}

/// Builds a wire snapshot of a job.
fn job_to_proto(job: &Job) -> proto::tasker::Job {
    let phase = match job.phase() {
        Phase::Running => JobPhase::Running,
        Phase::Stopped => JobPhase::Stopped,
        Phase::Completed => JobPhase::Completed,
    };

    let limits = job.limits();
    let limits = (limits.cpu.is_some()
        || limits.memory.is_some()
        || limits.io.is_some())
    .then(|| ResourceLimits {
        cpu: limits.cpu,
        memory: limits.memory,
        io: limits.io.clone().map(|io| IoLimits {
            device: io.device,
            read: io.read,
            write: io.write,
        }),
    });

    proto::tasker::Job {
        id: job.id().to_owned(),
        owner: job.owner().to_owned(),
        command: job.command().to_owned(),
        args: job.args().to_vec(),
        phase: phase as i32,
        limits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Identity {
        Identity { name: "wolf".into(), role: Role::Admin }
    }

    fn user(name: &str) -> Identity {
        Identity { name: name.into(), role: Role::User }
    }

    #[test]
    fn test_admin_can_access_any_job() {
        assert!(check_job_access(&admin(), "wolfjr").is_ok());
        assert!(check_job_access(&admin(), "wolf").is_ok());
    }

    #[test]
    fn test_user_can_access_own_job() {
        assert!(check_job_access(&user("wolfjr"), "wolfjr").is_ok());
    }

    #[test]
    fn test_user_cannot_access_foreign_job() {
        assert!(matches!(
            check_job_access(&user("wolfjr"), "wolf"),
            Err(JobsServiceError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_identity_from_request_extensions() {
        let mut request = Request::new(());
        let _ = request.extensions_mut().insert(user("wolfjr"));

        let identity = identity(&request).expect("identity");
        assert_eq!(identity.name, "wolfjr");
        assert_eq!(identity.role, Role::User);
    }

    #[test]
    fn test_identity_missing_from_request() {
        let request = Request::new(());
        assert!(matches!(
            identity(&request),
            Err(JobsServiceError::MissingIdentity)
        ));
    }
}
