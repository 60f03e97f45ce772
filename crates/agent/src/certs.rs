//! Self-signed loopback credential store
//!
//! A P-256 certificate for `localhost` / 127.0.0.1, valid for a year,
//! regenerated whenever it cannot be parsed or expires within the 30-day
//! renewal window. Files live under the user config directory with
//! conservative modes; nothing else is persisted there besides them.

use std::fs;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use rcgen::{CertificateParams, DnType, KeyPair, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use time::{Duration, OffsetDateTime};
use tracing::info;

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";
/// Certificate lifetime
const VALIDITY: Duration = Duration::days(365);
/// Regenerate when expiry is this close
const RENEWAL_WINDOW: Duration = Duration::days(30);

/// The certs directory under the user config directory
pub fn default_certs_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nfc-agent").join("certs"))
}

/// Load the stored credential or generate a fresh one, returning a rustls
/// server configuration for the secured pipeline.
pub fn load_or_generate(certs_dir: &Path) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let cert_path = certs_dir.join(CERT_FILE);
    let key_path = certs_dir.join(KEY_FILE);

    if cert_path.exists() && key_path.exists() && !needs_renewal(&cert_path) {
        match build_server_config(&cert_path, &key_path) {
            Ok(config) => return Ok(config),
            Err(e) => {
                info!(error = %e, "stored credential unusable, regenerating");
            }
        }
    }

    generate_and_save(certs_dir, &cert_path, &key_path)?;
    build_server_config(&cert_path, &key_path)
}

/// Whether the stored certificate is unparseable or expires within the
/// renewal window.
fn needs_renewal(cert_path: &Path) -> bool {
    let Ok(pem) = fs::read(cert_path) else {
        return true;
    };
    let mut reader = BufReader::new(pem.as_slice());
    let Some(Ok(der)) = rustls_pemfile::certs(&mut reader).next() else {
        return true;
    };
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(&der) else {
        return true;
    };

    let not_after = cert.validity().not_after.timestamp();
    let threshold = (OffsetDateTime::now_utc() + RENEWAL_WINDOW).unix_timestamp();
    not_after < threshold
}

fn generate_and_save(certs_dir: &Path, cert_path: &Path, key_path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(certs_dir).context("failed to create certs directory")?;
    set_mode(certs_dir, 0o700)?;

    let mut params = CertificateParams::new(vec!["localhost".to_string()])
        .context("failed to build certificate parameters")?;
    params
        .distinguished_name
        .push(DnType::OrganizationName, "NFC Agent");
    params.distinguished_name.push(DnType::CommonName, "localhost");
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = params.not_before + VALIDITY;

    let key_pair = KeyPair::generate().context("failed to generate private key")?;
    let cert = params
        .self_signed(&key_pair)
        .context("failed to self-sign certificate")?;

    fs::write(cert_path, cert.pem()).context("failed to save certificate")?;
    set_mode(cert_path, 0o644)?;
    fs::write(key_path, key_pair.serialize_pem()).context("failed to save private key")?;
    set_mode(key_path, 0o600)?;

    info!(path = %cert_path.display(), "generated self-signed loopback credential");
    Ok(())
}

fn build_server_config(
    cert_path: &Path,
    key_path: &Path,
) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let cert_pem = fs::read(cert_path).context("failed to read certificate")?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_slice()))
            .collect::<Result<_, _>>()
            .context("failed to parse certificate")?;

    let key_pem = fs::read(key_path).context("failed to read private key")?;
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_slice()))
            .context("failed to parse private key")?
            .context("no private key in key file")?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed to build TLS configuration")?;
    Ok(Arc::new(config))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set mode on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nfc-agent-certs-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn generates_then_reuses_credential() {
        let dir = scratch_dir("reuse");
        load_or_generate(&dir).unwrap();

        let cert_path = dir.join(CERT_FILE);
        assert!(cert_path.exists());
        assert!(dir.join(KEY_FILE).exists());
        let first = fs::read(&cert_path).unwrap();

        // A fresh credential is well within the renewal window.
        assert!(!needs_renewal(&cert_path));

        load_or_generate(&dir).unwrap();
        assert_eq!(fs::read(&cert_path).unwrap(), first);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn garbage_certificate_needs_renewal() {
        let dir = scratch_dir("garbage");
        fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join(CERT_FILE);
        fs::write(&cert_path, b"not a pem").unwrap();
        assert!(needs_renewal(&cert_path));
        assert!(needs_renewal(&dir.join("missing.pem")));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn short_lived_certificate_needs_renewal() {
        let dir = scratch_dir("short");
        fs::create_dir_all(&dir).unwrap();

        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.not_before = OffsetDateTime::now_utc();
        // Inside the 30-day window.
        params.not_after = params.not_before + Duration::days(5);
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        let cert_path = dir.join(CERT_FILE);
        fs::write(&cert_path, cert.pem()).unwrap();
        assert!(needs_renewal(&cert_path));

        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = scratch_dir("modes");
        load_or_generate(&dir).unwrap();

        let key_mode = fs::metadata(dir.join(KEY_FILE)).unwrap().permissions().mode();
        assert_eq!(key_mode & 0o777, 0o600);
        let dir_mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let _ = fs::remove_dir_all(&dir);
    }
}
