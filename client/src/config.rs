/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Certificate material loaded from the certs directory.
//!
//! The directory layout is shared by every Tasker component:
//!
//! ```text
//! <certs-dir>/ca.crt
//! <certs-dir>/server/<name>.{crt,key}
//! <certs-dir>/client/<user>.{crt,key}
//! ```

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read CA certificate '{path}': {source}")]
    ReadCaCert { path: PathBuf, source: io::Error },
    #[error("read certificate '{path}': {source}")]
    ReadCert { path: PathBuf, source: io::Error },
    #[error("read key '{path}': {source}")]
    ReadKey { path: PathBuf, source: io::Error },
}

/// PEM encoded authentication material for one side of a connection.
pub struct CertMaterial {
    pub ca_cert: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for CertMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of debug output
        f.debug_struct("CertMaterial").finish_non_exhaustive()
    }
}

impl CertMaterial {
    /// Loads the CA certificate and the keypair of the named client user.
    pub async fn for_client(certs_dir: &Path, user: &str) -> Result<Self> {
        let client_dir = certs_dir.join("client");
        Self::load(
            certs_dir.join("ca.crt"),
            client_dir.join(format!("{user}.crt")),
            client_dir.join(format!("{user}.key")),
        )
        .await
    }

    /// Loads the CA certificate and the keypair of the named server.
    pub async fn for_server(certs_dir: &Path, name: &str) -> Result<Self> {
        let server_dir = certs_dir.join("server");
        Self::load(
            certs_dir.join("ca.crt"),
            server_dir.join(format!("{name}.crt")),
            server_dir.join(format!("{name}.key")),
        )
        .await
    }

    async fn load(
        ca_cert: PathBuf,
        cert: PathBuf,
        key: PathBuf,
    ) -> Result<Self> {
        let ca_cert = tokio::fs::read(&ca_cert)
            .await
            .map_err(|source| ConfigError::ReadCaCert { path: ca_cert, source })?;

        let cert = tokio::fs::read(&cert)
            .await
            .map_err(|source| ConfigError::ReadCert { path: cert, source })?;

        let key = tokio::fs::read(&key)
            .await
            .map_err(|source| ConfigError::ReadKey { path: key, source })?;

        Ok(Self { ca_cert, cert, key })
    }
}
