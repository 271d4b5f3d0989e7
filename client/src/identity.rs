/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Peer identity derived from an X.509 certificate.
//!
//! Every Tasker certificate carries the organization in `O`, the peer name
//! in `CN`, and the peer role in `OU`. Both sides of a connection derive the
//! other side's [Identity] from the leaf certificate presented during the
//! TLS handshake.

use std::fmt;
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

/// The expected `Subject.Organization` in all Tasker certificates.
pub const ORGANIZATION: &str = "Tasker";

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing peer certificate")]
    MissingCertificate,
    #[error("parse certificate: {0}")]
    ParseCertificate(String),
    #[error("invalid organization ({0:?})")]
    InvalidOrganization(Vec<String>),
    #[error("missing CN")]
    MissingCommonName,
    #[error("missing role")]
    MissingRole,
}

/// A certificate role stored in the `OU` field.
///
/// Unknown roles parse successfully but fail admission everywhere a
/// specific role is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
    Server,
    Unknown(String),
}

impl From<&str> for Role {
    fn from(role: &str) -> Self {
        match role {
            "admin" => Role::Admin,
            "user" => Role::User,
            "server" => Role::Server,
            other => Role::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::User => write!(f, "user"),
            Role::Server => write!(f, "server"),
            Role::Unknown(role) => write!(f, "{role}"),
        }
    }
}

/// The authenticated peer's name and role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub role: Role,
}

impl Identity {
    /// Derives an [Identity] from a DER encoded X.509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| IdentityError::ParseCertificate(e.to_string()))?;

        let subject = cert.subject();

        let organizations: Vec<String> = subject
            .iter_organization()
            .filter_map(|o| o.as_str().ok())
            .map(ToOwned::to_owned)
            .collect();
        if organizations.first().map(String::as_str) != Some(ORGANIZATION) {
            return Err(IdentityError::InvalidOrganization(organizations));
        }

        let name = subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default();
        if name.is_empty() {
            return Err(IdentityError::MissingCommonName);
        }

        let role = subject
            .iter_organizational_unit()
            .next()
            .and_then(|ou| ou.as_str().ok())
            .ok_or(IdentityError::MissingRole)?;

        Ok(Identity { name: name.to_owned(), role: Role::from(role) })
    }

    /// Derives an [Identity] from a PEM encoded X.509 certificate.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| IdentityError::ParseCertificate(e.to_string()))?;
        Self::from_der(&pem.contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::x509::{X509, X509NameBuilder};

    fn test_cert(
        organization: Option<&str>,
        common_name: Option<&str>,
        unit: Option<&str>,
    ) -> Vec<u8> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
            .expect("ec group");
        let key = EcKey::generate(&group).expect("generate key");
        let key = PKey::from_ec_key(key).expect("pkey");

        let mut name = X509NameBuilder::new().expect("name builder");
        if let Some(organization) = organization {
            name.append_entry_by_text("O", organization).expect("O");
        }
        if let Some(common_name) = common_name {
            name.append_entry_by_text("CN", common_name).expect("CN");
        }
        if let Some(unit) = unit {
            name.append_entry_by_text("OU", unit).expect("OU");
        }
        let name = name.build();

        let mut builder = X509::builder().expect("cert builder");
        builder.set_version(2).expect("version");

        let mut serial = BigNum::new().expect("serial");
        serial.rand(127, MsbOption::MAYBE_ZERO, false).expect("rand");
        builder
            .set_serial_number(&serial.to_asn1_integer().expect("asn1"))
            .expect("serial number");

        builder.set_subject_name(&name).expect("subject");
        builder.set_issuer_name(&name).expect("issuer");
        builder.set_pubkey(&key).expect("pubkey");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
            .expect("not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(1).expect("not after"))
            .expect("not after");
        builder.sign(&key, MessageDigest::sha256()).expect("sign");

        builder.build().to_pem().expect("pem")
    }

    #[test]
    fn test_valid_admin() {
        let pem = test_cert(Some(ORGANIZATION), Some("wolf"), Some("admin"));
        let identity = Identity::from_pem(&pem).expect("valid identity");
        assert_eq!(
            identity,
            Identity { name: "wolf".into(), role: Role::Admin }
        );
    }

    #[test]
    fn test_valid_user() {
        let pem = test_cert(Some(ORGANIZATION), Some("wolfjr"), Some("user"));
        let identity = Identity::from_pem(&pem).expect("valid identity");
        assert_eq!(
            identity,
            Identity { name: "wolfjr".into(), role: Role::User }
        );
    }

    #[test]
    fn test_valid_server() {
        let pem =
            test_cert(Some(ORGANIZATION), Some("wolfpack1"), Some("server"));
        let identity = Identity::from_pem(&pem).expect("valid identity");
        assert_eq!(identity.role, Role::Server);
    }

    #[test]
    fn test_unknown_role_is_preserved() {
        let pem = test_cert(Some(ORGANIZATION), Some("wolf"), Some("wizard"));
        let identity = Identity::from_pem(&pem).expect("valid identity");
        assert_eq!(identity.role, Role::Unknown("wizard".into()));
    }

    #[test]
    fn test_wrong_organization() {
        let pem = test_cert(Some("Wrong"), Some("wolf"), Some("admin"));
        assert!(matches!(
            Identity::from_pem(&pem),
            Err(IdentityError::InvalidOrganization(_))
        ));
    }

    #[test]
    fn test_missing_organization() {
        let pem = test_cert(None, Some("wolf"), Some("admin"));
        assert!(matches!(
            Identity::from_pem(&pem),
            Err(IdentityError::InvalidOrganization(_))
        ));
    }

    #[test]
    fn test_missing_common_name() {
        let pem = test_cert(Some(ORGANIZATION), None, Some("admin"));
        assert!(matches!(
            Identity::from_pem(&pem),
            Err(IdentityError::MissingCommonName)
        ));
    }

    #[test]
    fn test_missing_role() {
        let pem = test_cert(Some(ORGANIZATION), Some("wolf"), None);
        assert!(matches!(
            Identity::from_pem(&pem),
            Err(IdentityError::MissingRole)
        ));
    }

    #[test]
    fn test_garbage_input() {
        assert!(matches!(
            Identity::from_pem(b"not a certificate"),
            Err(IdentityError::ParseCertificate(_))
        ));
    }
}
