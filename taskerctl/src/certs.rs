/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Generation of the Tasker PKI: one CA plus server and client leaves.
//!
//! All certificates are ECDSA P-256 with PKCS#8 keys and carry
//! `O=Tasker`; leaves put their role in `OU` and their name in `CN`.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use client::identity::{Role, ORGANIZATION};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509, X509Builder, X509Name, X509NameBuilder};
use thiserror::Error;

/// CA lifetime in days. CRLs are out of scope; there is no intermediate CA.
const CA_DAYS: u32 = 3650;

/// Leaf certificate lifetime in days.
const LEAF_DAYS: u32 = 365;

pub type Result<T> = std::result::Result<T, CertsError>;

#[derive(Debug, Error)]
pub enum CertsError {
    #[error("name is required")]
    NameRequired,
    #[error("at least one host is required")]
    HostRequired,
    #[error("role must be 'admin' or 'user' (role={0})")]
    InvalidRole(Role),
    #[error("certificate already exists (path={0})")]
    AlreadyExists(PathBuf),
    #[error("create directory '{path}': {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
    #[error("write '{path}': {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("load CA: {0}")]
    LoadCa(String),
    #[error(transparent)]
    Openssl(#[from] ErrorStack),
}

/// Creates a new CA certificate and private key in `dir`.
///
/// Refuses to overwrite existing material.
pub fn generate_ca(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|source| CertsError::CreateDir { path: dir.into(), source })?;

    let cert_path = dir.join("ca.crt");
    let key_path = dir.join("ca.key");
    refuse_existing(&cert_path)?;
    refuse_existing(&key_path)?;

    let key = generate_key()?;

    let mut builder = new_cert_builder(&key)?;
    let ca_name = subject_name("Tasker CA", None)?;
    builder.set_subject_name(&ca_name)?;
    builder.set_issuer_name(&ca_name)?;
    let not_after = Asn1Time::days_from_now(CA_DAYS)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new().critical().key_cert_sign().crl_sign().build()?,
    )?;

    builder.sign(&key, MessageDigest::sha256())?;

    write_cert_and_key(&cert_path, &key_path, &builder.build(), &key)
}

/// Creates a new server certificate signed by the CA in `dir`.
///
/// The keypair lands in `<dir>/server/<name>.{crt,key}` with a SAN entry
/// for every host.
pub fn generate_server(dir: &Path, name: &str, hosts: &[String]) -> Result<()> {
    if name.is_empty() {
        return Err(CertsError::NameRequired);
    }
    if hosts.is_empty() {
        return Err(CertsError::HostRequired);
    }

    let (ca_cert, ca_key) = load_ca(dir)?;

    let server_dir = dir.join("server");
    fs::create_dir_all(&server_dir).map_err(|source| CertsError::CreateDir {
        path: server_dir.clone(),
        source,
    })?;

    let cert_path = server_dir.join(format!("{name}.crt"));
    let key_path = server_dir.join(format!("{name}.key"));
    refuse_existing(&cert_path)?;
    refuse_existing(&key_path)?;

    let key = generate_key()?;

    let mut builder = new_cert_builder(&key)?;
    let leaf_name = subject_name(name, Some(&Role::Server))?;
    builder.set_subject_name(&leaf_name)?;
    builder.set_issuer_name(ca_cert.subject_name())?;
    let not_after = Asn1Time::days_from_now(LEAF_DAYS)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().build()?)?;
    builder.append_extension(KeyUsage::new().digital_signature().build()?)?;
    builder
        .append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;

    // Hosts may be IPs or DNS names
    let mut san = SubjectAlternativeName::new();
    for host in hosts {
        if host.parse::<IpAddr>().is_ok() {
            let _ = san.ip(host);
        } else {
            let _ = san.dns(host);
        }
    }
    let san = san.build(&builder.x509v3_context(Some(&ca_cert), None))?;
    builder.append_extension(san)?;

    builder.sign(&ca_key, MessageDigest::sha256())?;

    write_cert_and_key(&cert_path, &key_path, &builder.build(), &key)
}

/// Creates a new client certificate signed by the CA in `dir`.
///
/// The keypair lands in `<dir>/client/<user>.{crt,key}` with the role in
/// the certificate's `OU`.
pub fn generate_client(dir: &Path, user: &str, role: &Role) -> Result<()> {
    if user.is_empty() {
        return Err(CertsError::NameRequired);
    }
    if !matches!(role, Role::Admin | Role::User) {
        return Err(CertsError::InvalidRole(role.clone()));
    }

    let (ca_cert, ca_key) = load_ca(dir)?;

    let client_dir = dir.join("client");
    fs::create_dir_all(&client_dir).map_err(|source| CertsError::CreateDir {
        path: client_dir.clone(),
        source,
    })?;

    let cert_path = client_dir.join(format!("{user}.crt"));
    let key_path = client_dir.join(format!("{user}.key"));
    refuse_existing(&cert_path)?;
    refuse_existing(&key_path)?;

    let key = generate_key()?;

    let mut builder = new_cert_builder(&key)?;
    let leaf_name = subject_name(user, Some(role))?;
    builder.set_subject_name(&leaf_name)?;
    builder.set_issuer_name(ca_cert.subject_name())?;
    let not_after = Asn1Time::days_from_now(LEAF_DAYS)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().build()?)?;
    builder.append_extension(KeyUsage::new().digital_signature().build()?)?;
    builder
        .append_extension(ExtendedKeyUsage::new().client_auth().build()?)?;

    builder.sign(&ca_key, MessageDigest::sha256())?;

    write_cert_and_key(&cert_path, &key_path, &builder.build(), &key)
}

fn generate_key() -> Result<PKey<Private>> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = EcKey::generate(&group)?;
    Ok(PKey::from_ec_key(key)?)
}

/// Starts a v3 certificate builder with a fresh UUIDv7-derived serial
/// number, the given public key, and a not-before of now.
fn new_cert_builder(key: &PKey<Private>) -> Result<X509Builder> {
    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let serial_number = generate_serial_number()?;
    builder.set_serial_number(&serial_number)?;
    builder.set_pubkey(key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    Ok(builder)
}

fn subject_name(common_name: &str, role: Option<&Role>) -> Result<X509Name> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", common_name)?;
    name.append_entry_by_text("O", ORGANIZATION)?;
    if let Some(role) = role {
        name.append_entry_by_text("OU", &role.to_string())?;
    }
    Ok(name.build())
}

/// Generates a 128 bit serial number from a UUIDv7.
fn generate_serial_number() -> Result<Asn1Integer> {
    let id = uuid::Uuid::now_v7();
    let serial = BigNum::from_slice(id.as_bytes())?;
    Ok(serial.to_asn1_integer()?)
}

fn load_ca(dir: &Path) -> Result<(X509, PKey<Private>)> {
    let cert = fs::read(dir.join("ca.crt"))
        .map_err(|e| CertsError::LoadCa(e.to_string()))?;
    let cert = X509::from_pem(&cert)
        .map_err(|e| CertsError::LoadCa(e.to_string()))?;

    let key = fs::read(dir.join("ca.key"))
        .map_err(|e| CertsError::LoadCa(e.to_string()))?;
    let key = PKey::private_key_from_pem(&key)
        .map_err(|e| CertsError::LoadCa(e.to_string()))?;

    Ok((cert, key))
}

fn refuse_existing(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(CertsError::AlreadyExists(path.into()));
    }
    Ok(())
}

/// Writes a certificate and its private key as PEM `.crt` and `.key`
/// files. The key is PKCS#8.
fn write_cert_and_key(
    cert_path: &Path,
    key_path: &Path,
    cert: &X509,
    key: &PKey<Private>,
) -> Result<()> {
    let cert_pem = cert.to_pem()?;
    fs::write(cert_path, cert_pem).map_err(|source| CertsError::Write {
        path: cert_path.into(),
        source,
    })?;

    let key_pem = key.private_key_to_pem_pkcs8()?;
    if let Err(source) = fs::write(key_path, key_pem) {
        let _ = fs::remove_file(cert_path);
        return Err(CertsError::Write { path: key_path.into(), source });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::identity::Identity;

    #[test]
    fn test_generate_ca_and_leaves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dir = dir.path();

        generate_ca(dir).expect("generate CA");
        assert!(dir.join("ca.crt").exists());
        assert!(dir.join("ca.key").exists());

        generate_server(dir, "wolfpack1", &["localhost".into(), "127.0.0.1".into()])
            .expect("generate server cert");
        generate_client(dir, "wolf", &Role::Admin)
            .expect("generate admin cert");
        generate_client(dir, "wolfjr", &Role::User)
            .expect("generate user cert");

        // The generated leaves round-trip through identity validation
        let server = fs::read(dir.join("server/wolfpack1.crt")).expect("read");
        let identity = Identity::from_pem(&server).expect("server identity");
        assert_eq!(identity.name, "wolfpack1");
        assert_eq!(identity.role, Role::Server);

        let admin = fs::read(dir.join("client/wolf.crt")).expect("read");
        let identity = Identity::from_pem(&admin).expect("admin identity");
        assert_eq!(identity.name, "wolf");
        assert_eq!(identity.role, Role::Admin);

        let user = fs::read(dir.join("client/wolfjr.crt")).expect("read");
        let identity = Identity::from_pem(&user).expect("user identity");
        assert_eq!(identity.name, "wolfjr");
        assert_eq!(identity.role, Role::User);
    }

    #[test]
    fn test_generate_ca_refuses_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");

        generate_ca(dir.path()).expect("generate CA");
        assert!(matches!(
            generate_ca(dir.path()),
            Err(CertsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_generate_client_rejects_server_role() {
        let dir = tempfile::tempdir().expect("tempdir");
        generate_ca(dir.path()).expect("generate CA");

        assert!(matches!(
            generate_client(dir.path(), "sneaky", &Role::Server),
            Err(CertsError::InvalidRole(_))
        ));
    }

    #[test]
    fn test_generate_server_requires_hosts() {
        let dir = tempfile::tempdir().expect("tempdir");
        generate_ca(dir.path()).expect("generate CA");

        assert!(matches!(
            generate_server(dir.path(), "wolfpack1", &[]),
            Err(CertsError::HostRequired)
        ));
    }

    #[test]
    fn test_leaf_is_signed_by_ca() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dir = dir.path();

        generate_ca(dir).expect("generate CA");
        generate_client(dir, "wolf", &Role::Admin).expect("generate client");

        let ca = X509::from_pem(&fs::read(dir.join("ca.crt")).expect("read"))
            .expect("parse CA");
        let leaf =
            X509::from_pem(&fs::read(dir.join("client/wolf.crt")).expect("read"))
                .expect("parse leaf");

        let ca_key = ca.public_key().expect("CA public key");
        assert!(leaf.verify(&ca_key).expect("verify"));
    }
}
