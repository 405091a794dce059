//! rustls backend for [`TransportStartStrategy::configure_security`].
//!
//! [`TransportStartStrategy::configure_security`]: crate::application::security::TransportStartStrategy::configure_security

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedCipherSuite};
use tracing::{debug, info};

use crate::application::security::{CertificateMaterial, SecurityBuilder};
use crate::shared::errors::SecurityError;

/// Builds a rustls `ServerConfig` on the ring provider.
#[derive(Debug, Default)]
pub struct RustlsSecurityBuilder {
    suites: Vec<String>,
    client_auth: bool,
    material: Option<CertificateMaterial>,
}

impl RustlsSecurityBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecurityBuilder for RustlsSecurityBuilder {
    type Output = Arc<ServerConfig>;

    fn cipher_suites(&mut self, suites: &[String]) {
        self.suites = suites.to_vec();
    }

    fn require_client_certificate(&mut self, required: bool) {
        self.client_auth = required;
    }

    fn certificate(&mut self, material: &CertificateMaterial) {
        self.material = Some(material.clone());
    }

    fn build(self) -> Result<Self::Output, SecurityError> {
        let material = self.material.ok_or(SecurityError::NoCertificates(PathBuf::new()))?;

        let mut provider = rustls::crypto::ring::default_provider();
        if !self.suites.is_empty() {
            provider.cipher_suites = select_suites(&provider.cipher_suites, &self.suites)?;
        }
        let provider = Arc::new(provider);

        let certs = load_certs(&material.cert_chain)?;
        let key = load_private_key(&material.private_key)?;

        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let config = if self.client_auth {
            let ca_path = material.client_ca.as_ref().ok_or(SecurityError::MissingClientCa)?;
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| SecurityError::ClientVerifier(e.to_string()))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        } else {
            builder.with_no_client_auth().with_single_cert(certs, key)?
        };

        info!(
            client_auth = self.client_auth,
            suites = config.crypto_provider().cipher_suites.len(),
            "TLS configuration built"
        );
        Ok(Arc::new(config))
    }
}

fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

/// Keep the configured order. Unknown names are an error.
fn select_suites(
    available: &[SupportedCipherSuite],
    wanted: &[String],
) -> Result<Vec<SupportedCipherSuite>, SecurityError> {
    wanted
        .iter()
        .map(|name| {
            available
                .iter()
                .find(|suite| suite_name(suite).eq_ignore_ascii_case(name.trim()))
                .copied()
                .ok_or_else(|| SecurityError::UnknownCipher(name.clone()))
        })
        .collect()
}

/// Names the ring provider offers, for diagnostics.
pub fn available_cipher_suites() -> Vec<String> {
    let provider: CryptoProvider = rustls::crypto::ring::default_provider();
    provider.cipher_suites.iter().map(suite_name).collect()
}

fn read_pem(path: &Path) -> Result<Vec<u8>, SecurityError> {
    std::fs::read(path).map_err(|source| SecurityError::Pem {
        path: path.to_path_buf(),
        source,
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SecurityError> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| SecurityError::Pem {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(SecurityError::NoCertificates(path.to_path_buf()));
    }
    debug!(path = %path.display(), count = certs.len(), "Loaded certificates");
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, SecurityError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|source| SecurityError::Pem {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| SecurityError::NoPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::security::{TlsPolicy, TransportStartStrategy};

    fn policy(dir: &Path, client_auth: bool) -> TlsPolicy {
        TlsPolicy {
            cipher_suites: vec![
                "TLS13_AES_256_GCM_SHA384".into(),
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".into(),
            ],
            require_client_certificate: client_auth,
            certificate: CertificateMaterial {
                cert_chain: dir.join("chain.pem"),
                private_key: dir.join("key.pem"),
                client_ca: Some(dir.join("ca.pem")),
            },
        }
    }

    #[test]
    fn suite_selection_keeps_order_and_rejects_unknown() {
        let available = rustls::crypto::ring::default_provider().cipher_suites;
        let selected = select_suites(
            &available,
            &[
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".into(),
                "tls13_aes_256_gcm_sha384".into(),
            ],
        )
        .unwrap();
        assert_eq!(
            selected.iter().map(suite_name).collect::<Vec<_>>(),
            vec![
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
                "TLS13_AES_256_GCM_SHA384"
            ]
        );

        assert!(matches!(
            select_suites(&available, &["TLS_RSA_WITH_RC4_128_MD5".into()]),
            Err(SecurityError::UnknownCipher(_))
        ));
        assert!(available_cipher_suites().contains(&"TLS13_AES_128_GCM_SHA256".to_string()));
    }

    fn write_self_signed(dir: &Path) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        std::fs::write(dir.join("chain.pem"), certified.cert.pem()).unwrap();
        std::fs::write(dir.join("ca.pem"), certified.cert.pem()).unwrap();
        std::fs::write(dir.join("key.pem"), certified.key_pair.serialize_pem()).unwrap();
    }

    #[test]
    fn rustls_builder_accepts_valid_material() {
        let dir = tempfile::tempdir().unwrap();
        write_self_signed(dir.path());

        for client_auth in [false, true] {
            let strategy = TransportStartStrategy::decide(Some(policy(dir.path(), client_auth)));
            let config = strategy
                .configure_security(RustlsSecurityBuilder::new())
                .unwrap()
                .unwrap();
            assert_eq!(config.crypto_provider().cipher_suites.len(), 2);
        }
    }

    #[test]
    fn rustls_builder_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = TransportStartStrategy::decide(Some(policy(dir.path(), false)));
        assert!(matches!(
            strategy.configure_security(RustlsSecurityBuilder::new()),
            Err(SecurityError::Pem { .. })
        ));
    }

    #[test]
    fn client_auth_without_ca_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_self_signed(dir.path());
        let mut policy = policy(dir.path(), true);
        policy.certificate.client_ca = None;
        assert!(matches!(
            TransportStartStrategy::Tls(policy).configure_security(RustlsSecurityBuilder::new()),
            Err(SecurityError::MissingClientCa)
        ));
    }
}
