/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use std::io;
use std::path::Path;
use std::sync::Arc;

use proto::tasker::tasker_service_client::TaskerServiceClient;
use proto::tasker::{
    AttachJobRequest, GetJobRequest, Job, StartJobRequest, StopJobRequest,
};
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Uri};
use tonic::Streaming;
use tower::service_fn;

use crate::config::{CertMaterial, ConfigError};
use crate::identity::{Identity, Role};

// The connector below dials the real address; the endpoint URI is never used.
const IGNORED_ENDPOINT: &str = "http://ignored";

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("read PEM: {0}")]
    InvalidPem(#[from] io::Error),
    #[error(transparent)]
    Tls(#[from] rustls::Error),
    #[error("invalid server address '{0}'")]
    InvalidAddress(String),
    #[error(transparent)]
    Connection(#[from] tonic::transport::Error),
    #[error(transparent)]
    Rpc(#[from] tonic::Status),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("malformed response: missing job")]
    MissingJob,
}

/// A connection to a Tasker server authenticated with mutual TLS.
#[derive(Debug, Clone)]
pub struct TaskerClient {
    tasker: TaskerServiceClient<Channel>,
}

impl TaskerClient {
    /// Dials the given server address with mutual TLS.
    ///
    /// The server must present a certificate signed by the CA in the certs
    /// directory and carrying the `server` role; any other peer is rejected
    /// during connection establishment.
    pub async fn connect(
        certs_dir: &Path,
        user: &str,
        addr: &str,
    ) -> Result<Self> {
        let material = CertMaterial::for_client(certs_dir, user).await?;
        let tls = tls_config(&material)?;
        let server_name = server_name_for(addr)?;

        let connector = TlsConnector::from(tls);
        let addr = addr.to_owned();

        let channel = Channel::from_static(IGNORED_ENDPOINT)
            .connect_with_connector(service_fn(move |_: Uri| {
                let connector = connector.clone();
                let server_name = server_name.clone();
                let addr = addr.clone();
                async move {
                    let tcp = TcpStream::connect(&addr).await?;
                    let stream = connector.connect(server_name, tcp).await?;
                    validate_server_identity(&stream)?;
                    Ok::<_, io::Error>(stream)
                }
            }))
            .await?;

        Ok(Self { tasker: TaskerServiceClient::new(channel) })
    }

    /// Creates and starts a new job.
    pub async fn start_job(&mut self, request: StartJobRequest) -> Result<Job> {
        if request.command.is_empty() {
            return Err(ClientError::MissingField("command"));
        }

        let response = self.tasker.start_job(request).await?;
        response.into_inner().job.ok_or(ClientError::MissingJob)
    }

    /// Stops a running job.
    pub async fn stop_job(&mut self, id: &str) -> Result<Job> {
        if id.is_empty() {
            return Err(ClientError::MissingField("job id"));
        }

        let response =
            self.tasker.stop_job(StopJobRequest { id: id.to_owned() }).await?;
        response.into_inner().job.ok_or(ClientError::MissingJob)
    }

    /// Retrieves a job's current state.
    pub async fn get_job(&mut self, id: &str) -> Result<Job> {
        if id.is_empty() {
            return Err(ClientError::MissingField("job id"));
        }

        let response =
            self.tasker.get_job(GetJobRequest { id: id.to_owned() }).await?;
        response.into_inner().job.ok_or(ClientError::MissingJob)
    }

    /// Opens a stream of the job's output from the beginning.
    pub async fn attach_job(
        &mut self,
        id: &str,
    ) -> Result<Streaming<proto::tasker::AttachJobResponse>> {
        if id.is_empty() {
            return Err(ClientError::MissingField("job id"));
        }

        let response = self
            .tasker
            .attach_job(AttachJobRequest { id: id.to_owned() })
            .await?;
        Ok(response.into_inner())
    }
}

/// Builds a TLS 1.3 client config presenting the user's certificate and
/// trusting only the Tasker CA.
fn tls_config(material: &CertMaterial) -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut material.ca_cert.as_slice()) {
        roots.add(cert?)?;
    }

    let certs = rustls_pemfile::certs(&mut material.cert.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut material.key.as_slice())?
        .ok_or(ClientError::MissingField("private key"))?;

    let mut config = rustls::ClientConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
    ])
    .with_root_certificates(roots)
    .with_client_auth_cert(certs, key)?;

    // The server side negotiates HTTP/2 via ALPN
    config.alpn_protocols = vec![b"h2".to_vec()];

    Ok(Arc::new(config))
}

fn server_name_for(addr: &str) -> Result<ServerName<'static>> {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_owned())
        .map_err(|_| ClientError::InvalidAddress(addr.to_owned()))
}

/// Verifies the server presented a Tasker certificate with the `server`
/// role. CA trust was already checked during the handshake.
fn validate_server_identity(stream: &TlsStream<TcpStream>) -> io::Result<()> {
    let (_, session) = stream.get_ref();

    let leaf = session
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| invalid_peer("missing peer certificate"))?;

    let identity = Identity::from_der(leaf.as_ref())
        .map_err(|e| invalid_peer(format!("validate peer: {e}")))?;

    if identity.role != Role::Server {
        return Err(invalid_peer(format!(
            "invalid role ({})",
            identity.role
        )));
    }

    Ok(())
}

fn invalid_peer(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_for_hostname() {
        assert!(server_name_for("localhost:50051").is_ok());
    }

    #[test]
    fn test_server_name_for_ip() {
        assert!(server_name_for("127.0.0.1:50051").is_ok());
        assert!(server_name_for("[::1]:50051").is_ok());
    }

    #[test]
    fn test_server_name_for_invalid() {
        assert!(matches!(
            server_name_for("spaces are not hosts:1"),
            Err(ClientError::InvalidAddress(_))
        ));
    }
}
