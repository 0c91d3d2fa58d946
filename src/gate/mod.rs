//! Mutual-TLS authentication gate.
//!
//! A request flows through three pure stages, composed by [`Gate::evaluate`]:
//! the trust policy accepts or rejects the peer certificate ([`validate`]), an accepted
//! certificate is mapped to identity claims ([`derive_claims`]), and the
//! [`AuthorizationGate`] decides whether those claims may reach the application.

pub mod authorizer;
pub mod certificate;
mod error;
pub mod identity;
pub mod validator;

use crate::configuration::{Configuration, Error as ConfigError};
use crate::metrics_provider::METRICS_PROVIDER;
use hyper::StatusCode;
use serde::Serialize;
use tracing::{info, instrument, warn};

pub use authorizer::{AuthorizationGate, ClientRequest, Decision};
pub use certificate::ClientCertificate;
pub use error::Error;
pub use identity::{derive_claims, AuthenticatedIdentity, ClaimType, IdentityClaim};
pub use validator::{validate, AcceptedCertificate, Rejection, TrustPolicy, Validation};

/// Authentication method identifier attached to certificate-derived identities.
pub const X509_AUTHENTICATION_METHOD: &str =
    "http://schemas.microsoft.com/ws/2008/06/identity/authenticationmethod/x509";

/// Result of running a request through the whole gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The certificate was refused by the trust policy; no claims were derived.
    Rejected { rejection: Rejection },
    Denied { identity: AuthenticatedIdentity },
    Allowed { identity: AuthenticatedIdentity },
}

impl Outcome {
    pub fn status(&self) -> StatusCode {
        self.decision().status()
    }

    pub fn decision(&self) -> Decision {
        match self {
            Outcome::Allowed { .. } => Decision::Allow,
            Outcome::Rejected { .. } | Outcome::Denied { .. } => Decision::Deny,
        }
    }

    pub fn identity(&self) -> Option<&AuthenticatedIdentity> {
        match self {
            Outcome::Rejected { .. } => None,
            Outcome::Denied { identity } | Outcome::Allowed { identity } => Some(identity),
        }
    }
}

/// Trust policy and authorization gate, fixed for the lifetime of the process.
#[derive(Clone)]
pub struct Gate {
    trust_policy: TrustPolicy,
    authorization: AuthorizationGate,
}

impl Gate {
    pub fn new(config: &Configuration) -> Result<Self, ConfigError> {
        Ok(Self::with_parts(
            TrustPolicy::from(&config.trust_policy),
            AuthorizationGate::new(&config.authorization)?,
        ))
    }

    pub fn with_parts(trust_policy: TrustPolicy, authorization: AuthorizationGate) -> Self {
        Self {
            trust_policy,
            authorization,
        }
    }

    /// Validates a decoded certificate and derives its identity.
    ///
    /// Returns the anonymous identity when no certificate was presented and the trust
    /// policy accepts that.
    pub fn authenticate(
        &self,
        cert: Option<&ClientCertificate>,
    ) -> Result<AuthenticatedIdentity, Rejection> {
        match validate(cert, &self.trust_policy) {
            Validation::Accepted(Some(accepted)) => Ok(derive_claims(
                &accepted,
                self.authorization.authentication_method(),
            )),
            Validation::Accepted(None) => Ok(AuthenticatedIdentity::anonymous()),
            Validation::Rejected(rejection) => Err(rejection),
        }
    }

    /// Runs the full pipeline for one request, starting from the DER bytes of the
    /// peer certificate.
    #[instrument(skip(self, peer_certificate), fields(presented = peer_certificate.is_some()))]
    pub fn evaluate(&self, request: &ClientRequest, peer_certificate: Option<&[u8]>) -> Outcome {
        let cert = match peer_certificate.map(ClientCertificate::from_der).transpose() {
            Ok(cert) => cert,
            Err(error) => {
                warn!("Rejecting malformed client certificate: {error}");
                METRICS_PROVIDER
                    .metric_gate_decisions
                    .with_label_values(&["validation", "malformed"])
                    .inc();
                let Error::Malformed(detail) = error;
                return Outcome::Rejected {
                    rejection: Rejection::Malformed(detail),
                };
            }
        };

        self.evaluate_certificate(request, cert.as_ref())
    }

    /// Same as [`Gate::evaluate`] for an already decoded certificate.
    pub fn evaluate_certificate(
        &self,
        request: &ClientRequest,
        cert: Option<&ClientCertificate>,
    ) -> Outcome {
        let identity = match self.authenticate(cert) {
            Ok(identity) => {
                METRICS_PROVIDER
                    .metric_gate_decisions
                    .with_label_values(&["validation", "accepted"])
                    .inc();
                identity
            }
            Err(rejection) => {
                info!("Client certificate rejected: {rejection}");
                METRICS_PROVIDER
                    .metric_gate_decisions
                    .with_label_values(&["validation", "rejected"])
                    .inc();
                return Outcome::Rejected { rejection };
            }
        };

        match self.authorization.authorize(request, &identity) {
            Decision::Allow => {
                METRICS_PROVIDER
                    .metric_gate_decisions
                    .with_label_values(&["authorization", "allow"])
                    .inc();
                Outcome::Allowed { identity }
            }
            Decision::Deny => {
                info!(
                    subject = identity.subject().unwrap_or("anonymous"),
                    "Access denied"
                );
                METRICS_PROVIDER
                    .metric_gate_decisions
                    .with_label_values(&["authorization", "deny"])
                    .inc();
                Outcome::Denied { identity }
            }
        }
    }
}
