//! Transport security selection: plain `ws://` or TLS-wrapped `wss://`.
//!
//! The policy is transport-neutral; a [`SecurityBuilder`] turns it into
//! whatever the transport needs.

use std::path::PathBuf;

use crate::shared::errors::SecurityError;

/// PEM files backing a TLS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub cert_chain: PathBuf,
    pub private_key: PathBuf,
    /// Trust anchors for client certificates.
    pub client_ca: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Suite names as rustls prints them, e.g.
    /// `TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`. Empty keeps provider defaults.
    pub cipher_suites: Vec<String>,
    pub require_client_certificate: bool,
    pub certificate: CertificateMaterial,
}

/// Receives the TLS policy piece by piece and produces the transport's
/// security configuration.
pub trait SecurityBuilder {
    type Output;

    fn cipher_suites(&mut self, suites: &[String]);
    fn require_client_certificate(&mut self, required: bool);
    fn certificate(&mut self, material: &CertificateMaterial);
    fn build(self) -> Result<Self::Output, SecurityError>;
}

/// Fixed for the lifetime of one server start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStartStrategy {
    Plain,
    Tls(TlsPolicy),
}

impl TransportStartStrategy {
    pub fn decide(policy: Option<TlsPolicy>) -> Self {
        match policy {
            Some(policy) => Self::Tls(policy),
            None => Self::Plain,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub fn scheme(&self) -> &'static str {
        if self.is_tls() {
            "wss"
        } else {
            "ws"
        }
    }

    /// Thread the policy into `builder`. Plain strategies build nothing.
    pub fn configure_security<B: SecurityBuilder>(
        &self,
        mut builder: B,
    ) -> Result<Option<B::Output>, SecurityError> {
        let Self::Tls(policy) = self else {
            return Ok(None);
        };
        builder.cipher_suites(&policy.cipher_suites);
        builder.require_client_certificate(policy.require_client_certificate);
        builder.certificate(&policy.certificate);
        builder.build().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[derive(Debug, Default, PartialEq)]
    struct RecordingBuilder {
        suites: Vec<String>,
        client_auth: Option<bool>,
        material: Option<CertificateMaterial>,
    }

    impl SecurityBuilder for RecordingBuilder {
        type Output = RecordingBuilder;

        fn cipher_suites(&mut self, suites: &[String]) {
            self.suites = suites.to_vec();
        }

        fn require_client_certificate(&mut self, required: bool) {
            self.client_auth = Some(required);
        }

        fn certificate(&mut self, material: &CertificateMaterial) {
            self.material = Some(material.clone());
        }

        fn build(self) -> Result<Self::Output, SecurityError> {
            Ok(self)
        }
    }

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
    fn absent_policy_is_plain() {
        let strategy = TransportStartStrategy::decide(None);
        assert_eq!(strategy, TransportStartStrategy::Plain);
        assert_eq!(strategy.scheme(), "ws");
        assert_eq!(
            strategy.configure_security(RecordingBuilder::default()).unwrap(),
            None
        );
    }

    #[test]
    fn policy_reaches_builder_unchanged() {
        let policy = policy(Path::new("/etc/ocpp"), true);
        let strategy = TransportStartStrategy::decide(Some(policy.clone()));
        assert_eq!(strategy.scheme(), "wss");

        let built = strategy
            .configure_security(RecordingBuilder::default())
            .unwrap()
            .unwrap();
        assert_eq!(
            built,
            RecordingBuilder {
                suites: vec![
                    "TLS13_AES_256_GCM_SHA384".to_string(),
                    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string(),
                ],
                client_auth: Some(true),
                material: Some(CertificateMaterial {
                    cert_chain: PathBuf::from("/etc/ocpp/chain.pem"),
                    private_key: PathBuf::from("/etc/ocpp/key.pem"),
                    client_ca: Some(PathBuf::from("/etc/ocpp/ca.pem")),
                }),
            }
        );
    }
}
