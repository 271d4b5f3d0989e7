/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tonic_health::server::HealthReporter;
use tracing::info;

use crate::jobs::JobService;
use proto::tasker::tasker_service_server::TaskerServiceServer;

pub(crate) struct GracefulShutdown {
    health_reporter: HealthReporter,
    job_service: JobService,
    shutdown: CancellationToken,
}

impl GracefulShutdown {
    pub fn new(
        health_reporter: HealthReporter,
        job_service: JobService,
        shutdown: CancellationToken,
    ) -> Self {
        Self { health_reporter, job_service, shutdown }
    }

    /// Waits for a signal and then...
    /// * flips the health service to NOT_SERVING
    /// * cancels the shutdown token, which stops the listener and unwinds
    ///   in-flight attach streams
    /// * stops every running job, each with its own deadline
    /// ---
    /// Signals:
    /// * [SIGTERM]
    /// * [SIGINT]
    /// ---
    /// Returns after processing the first received signal.
    pub async fn wait(mut self) {
        tokio::select! {
            () = wait_for_sigterm() => {},
            () = wait_for_sigint() => {},
        }

        info!("shutting down");

        self.health_reporter
            .set_not_serving::<TaskerServiceServer<JobService>>()
            .await;

        self.shutdown.cancel();

        self.job_service.stop_all().await;
    }
}

pub async fn wait_for_sigterm() {
    let mut stream = tokio::signal::unix::signal(SignalKind::terminate())
        .expect("failed to listen for SIGTERM");

    let _ = stream.recv().await;
}

pub async fn wait_for_sigint() {
    let mut stream = tokio::signal::unix::signal(SignalKind::interrupt())
        .expect("failed to listen for SIGINT");

    let _ = stream.recv().await;
}
