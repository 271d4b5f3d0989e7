/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Per-call admission: every RPC runs with a validated peer identity.

use client::identity::{Identity, Role};
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Validates the TLS peer's identity and injects it into the request
/// before any handler runs.
///
/// The transport already verified the certificate chain against the CA;
/// this layer checks the Tasker subject fields and admits only clients
/// with the `admin` or `user` role.
#[derive(Debug, Clone)]
pub struct AuthInterceptor;

impl Interceptor for AuthInterceptor {
    fn call(
        &mut self,
        mut request: Request<()>,
    ) -> Result<Request<()>, Status> {
        let certs = request
            .peer_certs()
            .ok_or_else(|| Status::unauthenticated("no peer certificates"))?;

        let leaf = certs.first().ok_or_else(|| {
            Status::unauthenticated("missing peer certificate")
        })?;

        let identity = Identity::from_der(leaf.as_ref())
            .map_err(|e| Status::unauthenticated(format!("validate peer: {e}")))?;

        if !matches!(identity.role, Role::Admin | Role::User) {
            return Err(Status::unauthenticated(format!(
                "invalid role ({})",
                identity.role
            )));
        }

        let _ = request.extensions_mut().insert(identity);

        Ok(request)
    }
}
