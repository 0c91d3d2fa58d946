use crate::gate::{AuthorizationGate, ClaimType, TrustPolicy, X509_AUTHENTICATION_METHOD};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

mod error;

pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub server: ServerConfig,
    #[serde(default)]
    pub trust_policy: TrustPolicyConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
    #[serde(default = "ServerConfig::default_worker_threads")]
    pub worker_threads: usize,
    pub tls: Option<ServerTlsConfig>,
}

impl ServerConfig {
    fn default_port() -> u16 {
        8000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }

    fn default_worker_threads() -> usize {
        4
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerTlsConfig {
    pub server_certificate_bundle: String,
    pub server_private_key: String,
    /// When set, presented client certificates must chain to one of these CAs.
    pub client_ca_bundle: Option<String>,
    #[serde(default)]
    pub client_certificate: ClientCertificateMode,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientCertificateMode {
    Disabled,
    #[default]
    Optional,
    Required,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrustPolicyConfig {
    #[default]
    NoValidation,
    IssuerAllowList { issuers: Vec<String> },
}

impl From<&TrustPolicyConfig> for TrustPolicy {
    fn from(config: &TrustPolicyConfig) -> Self {
        match config {
            TrustPolicyConfig::NoValidation => TrustPolicy::NoValidation,
            TrustPolicyConfig::IssuerAllowList { issuers } => {
                TrustPolicy::issuer_allow_list(issuers)
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default = "AuthorizationConfig::default_authentication_method")]
    pub authentication_method: String,
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl AuthorizationConfig {
    fn default_authentication_method() -> String {
        X509_AUTHENTICATION_METHOD.to_string()
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            authentication_method: Self::default_authentication_method(),
            policy: PolicyConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    #[default]
    AllowAuthenticated,
    RequireClaim {
        claim_type: ClaimType,
        value: String,
        issuer: String,
    },
    Cel {
        #[serde(default)]
        default_allow: bool,
        #[serde(default)]
        rules: Vec<String>,
    },
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice)?;

        if config.server.worker_threads == 0 {
            return Err(Error::ConfigurationFileFormat(
                "worker_threads must be at least 1".to_string(),
            ));
        }

        if let Some(tls) = &config.server.tls {
            if tls.client_certificate == ClientCertificateMode::Disabled
                && tls.client_ca_bundle.is_some()
            {
                return Err(Error::ConflictingTLSSettings(
                    "client_ca_bundle is set but client certificates are disabled".to_string(),
                ));
            }
        }

        if let TrustPolicyConfig::IssuerAllowList { issuers } = &config.trust_policy {
            if issuers.is_empty() {
                return Err(Error::TrustPolicy(
                    "issuer allow-list must name at least one issuer".to_string(),
                ));
            }

            let unique = issuers.iter().collect::<BTreeSet<_>>();
            if unique.len() != issuers.len() {
                tracing::warn!("Issuer allow-list contains duplicate entries");
            }

            // Issuer names are only meaningful once the handshake has verified the chain.
            let unverified_chains = config.server.tls.as_ref().is_some_and(|tls| {
                tls.client_certificate != ClientCertificateMode::Disabled
                    && tls.client_ca_bundle.is_none()
            });
            if unverified_chains {
                return Err(Error::TrustPolicy(
                    "issuer allow-list requires server.tls.client_ca_bundle".to_string(),
                ));
            }
        }

        AuthorizationGate::new(&config.authorization)?;

        if let Some(ObservabilityConfig {
            tracing: Some(tracing_config),
        }) = &config.observability
        {
            if !(0.0..=1.0).contains(&tracing_config.sampling_rate) {
                return Err(Error::ConfigurationFileFormat(format!(
                    "sampling_rate must be between 0 and 1, got {}",
                    tracing_config.sampling_rate
                )));
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_minimal_config() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"
        "#;

        let config = Configuration::load_from_str(config).unwrap();

        let bind_address = config.server.bind_address.to_string();
        assert_eq!(bind_address, "0.0.0.0".to_string());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.query_timeout, 3600);
        assert_eq!(config.server.query_timeout_grace_period, 60);
        assert_eq!(config.server.worker_threads, 4);
        assert!(config.server.tls.is_none());

        assert_eq!(config.trust_policy, TrustPolicyConfig::NoValidation);
        assert_eq!(
            config.authorization.authentication_method,
            X509_AUTHENTICATION_METHOD
        );
        assert_eq!(config.authorization.policy, PolicyConfig::AllowAuthenticated);
        assert!(config.observability.is_none());
    }

    #[test]
    fn test_load_demo_config() {
        let config = r#"
        [server]
        bind_address = "127.0.0.1"
        port = 8443

        [server.tls]
        server_certificate_bundle = "server.pem"
        server_private_key = "server.key"
        client_ca_bundle = "demo-ca.pem"
        client_certificate = "required"

        [trust_policy]
        mode = "issuer_allow_list"
        issuers = ["CN=Demo Certification Authority, O=Web API Book"]

        [authorization.policy]
        kind = "require_claim"
        claim_type = "email"
        value = "bob@webapibook.net"
        issuer = "CN=Demo Certification Authority, O=Web API Book"
        "#;

        let config = Configuration::load_from_str(config).unwrap();

        let tls = config.server.tls.unwrap();
        assert_eq!(tls.client_certificate, ClientCertificateMode::Required);
        assert_eq!(tls.client_ca_bundle.as_deref(), Some("demo-ca.pem"));

        assert_eq!(
            config.trust_policy,
            TrustPolicyConfig::IssuerAllowList {
                issuers: vec!["CN=Demo Certification Authority, O=Web API Book".to_string()]
            }
        );
        assert_eq!(
            config.authorization.policy,
            PolicyConfig::RequireClaim {
                claim_type: ClaimType::Email,
                value: "bob@webapibook.net".to_string(),
                issuer: "CN=Demo Certification Authority, O=Web API Book".to_string(),
            }
        );
    }

    #[test]
    fn test_load_cel_policy() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [authorization]
        authentication_method = "urn:example:x509"

        [authorization.policy]
        kind = "cel"
        rules = ["'bob@webapibook.net' in identity.emails"]
        "#;

        let config = Configuration::load_from_str(config).unwrap();

        assert_eq!(config.authorization.authentication_method, "urn:example:x509");
        assert_eq!(
            config.authorization.policy,
            PolicyConfig::Cel {
                default_allow: false,
                rules: vec!["'bob@webapibook.net' in identity.emails".to_string()],
            }
        );
    }

    #[test]
    fn test_trust_policy_conversion_normalizes_issuers() {
        let config = TrustPolicyConfig::IssuerAllowList {
            issuers: vec!["cn=Demo CA,o=Example".to_string()],
        };

        let policy = TrustPolicy::from(&config);
        assert_eq!(
            policy,
            TrustPolicy::IssuerAllowList(BTreeSet::from(["CN=Demo CA, O=Example".to_string()]))
        );
    }

    #[test]
    fn test_empty_allow_list_is_rejected() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [trust_policy]
        mode = "issuer_allow_list"
        issuers = []
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::TrustPolicy(_))));
    }

    #[test]
    fn test_ca_bundle_with_disabled_client_certificates_is_rejected() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [server.tls]
        server_certificate_bundle = "server.pem"
        server_private_key = "server.key"
        client_ca_bundle = "ca.pem"
        client_certificate = "disabled"
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::ConflictingTLSSettings(_))));
    }

    #[test]
    fn test_allow_list_without_client_ca_bundle_is_rejected() {
        for mode in ["optional", "required"] {
            let config = format!(
                r#"
                [server]
                bind_address = "0.0.0.0"

                [server.tls]
                server_certificate_bundle = "server.pem"
                server_private_key = "server.key"
                client_certificate = "{mode}"

                [trust_policy]
                mode = "issuer_allow_list"
                issuers = ["CN=Demo Certification Authority, O=Web API Book"]
                "#
            );

            let result = Configuration::load_from_str(&config);
            assert!(matches!(result, Err(Error::TrustPolicy(_))), "mode {mode}");
        }
    }

    #[test]
    fn test_no_validation_without_client_ca_bundle_is_accepted() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [server.tls]
        server_certificate_bundle = "server.pem"
        server_private_key = "server.key"
        client_certificate = "optional"
        "#;

        assert!(Configuration::load_from_str(config).is_ok());
    }

    #[test]
    fn test_zero_worker_threads_is_rejected() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"
        worker_threads = 0
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::ConfigurationFileFormat(ref s)) if s.contains("worker_threads")));
    }

    #[test]
    fn test_invalid_cel_rule_is_rejected_on_load() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [authorization.policy]
        kind = "cel"
        rules = ["true", "identity.subject =="]
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::PolicyCompilation(ref s)) if s.contains("#2")));
    }

    #[test]
    fn test_invalid_sampling_rate_is_rejected() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [observability.tracing]
        endpoint = "http://localhost:4317"
        sampling_rate = 2.0
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::ConfigurationFileFormat(_))));
    }

    #[test]
    fn test_unknown_trust_policy_mode_is_rejected() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [trust_policy]
        mode = "chain_only"
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::ConfigurationFileFormat(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            bind_address = "::1"
            port = 9443
            "#
        )
        .unwrap();

        let config = Configuration::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9443);
        assert!(config.server.bind_address.is_ipv6());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Configuration::load("/nonexistent/mtls-gate.toml");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
