/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! The Tasker daemon.
//!
//! Serves the Tasker API over an mTLS backed gRPC server and owns the
//! lifecycle of every job started on this machine: a cgroup v2 leaf per
//! job, the child process cloned directly into it, and a fan-out output
//! buffer any number of clients can follow.

// Lint groups: https://doc.rust-lang.org/rustc/lints/groups.html
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
#![warn(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use client::config::CertMaterial;
use proto::tasker::tasker_service_server::TaskerServiceServer;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::{error, info};

pub mod auth;
pub mod jobs;

mod graceful_shutdown;

/// Settings for one Tasker daemon instance.
///
/// The fields are file paths and a listen address, not authentication
/// material; the TLS material is read from disk at startup.
#[derive(Debug)]
pub struct TaskerdRuntime {
    /// Directory holding `ca.crt` and `server/<name>.{crt,key}`.
    pub certs_dir: PathBuf,
    /// Server name; selects the keypair inside the certs directory.
    pub name: String,
    /// TCP listen address.
    pub addr: SocketAddr,
}

impl TaskerdRuntime {
    /// Initializes cgroups, serves gRPC requests, and owns the lifecycle of
    /// all jobs. Returns after a graceful shutdown completes.
    pub async fn run(self) -> anyhow::Result<()> {
        jobs::cgroups::init().context("init cgroup")?;

        let material = CertMaterial::for_server(&self.certs_dir, &self.name)
            .await
            .context("load server TLS material")?;

        let identity = Identity::from_pem(&material.cert, &material.key);
        let tls = ServerTlsConfig::new()
            .identity(identity)
            .client_ca_root(Certificate::from_pem(&material.ca_cert));

        let (mut health_reporter, health_service) =
            tonic_health::server::health_reporter();

        let shutdown = CancellationToken::new();
        let job_service = jobs::JobService::new(shutdown.clone());
        health_reporter
            .set_serving::<TaskerServiceServer<jobs::JobService>>()
            .await;

        let service = TaskerServiceServer::with_interceptor(
            job_service.clone(),
            auth::AuthInterceptor,
        );

        let graceful_shutdown = graceful_shutdown::GracefulShutdown::new(
            health_reporter,
            job_service,
            shutdown.clone(),
        );

        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("listen on {}", self.addr))?;
        let incoming = TcpListenerStream::new(listener);

        info!(addr = %self.addr, name = %self.name, "starting tasker daemon");

        let server_handle = tokio::spawn(async move {
            Server::builder()
                .tls_config(tls)?
                .add_service(health_service)
                .add_service(service)
                .serve_with_incoming_shutdown(incoming, async move {
                    shutdown.cancelled().await;
                    info!("gRPC server received shutdown signal");
                })
                .await?;

            info!("gRPC server exited successfully");

            Ok::<_, tonic::transport::Error>(())
        });

        let shutdown_handle = tokio::spawn(graceful_shutdown.wait());

        let (server_result, ()) =
            tokio::try_join!(server_handle, shutdown_handle)?;

        if let Err(e) = server_result {
            error!("gRPC server exited with error: {e}");
            return Err(e.into());
        }

        info!("server stopped");

        Ok(())
    }
}
