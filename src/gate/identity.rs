use crate::gate::AcceptedCertificate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, instrument};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Subject,
    Email,
    CommonName,
    Dns,
    Thumbprint,
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimType::Subject => "subject",
            ClaimType::Email => "email",
            ClaimType::CommonName => "common_name",
            ClaimType::Dns => "dns",
            ClaimType::Thumbprint => "thumbprint",
        };
        write!(f, "{name}")
    }
}

/// A typed assertion about the client, vouched for by `issuer`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdentityClaim {
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    pub value: String,
    pub issuer: String,
}

impl IdentityClaim {
    pub fn new(claim_type: ClaimType, value: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            claim_type,
            value: value.into(),
            issuer: issuer.into(),
        }
    }
}

/// Claims established for one request, together with the mechanism that produced them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    pub authentication_method: Option<String>,
    pub claims: BTreeSet<IdentityClaim>,
}

impl AuthenticatedIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authentication_method.is_some() && !self.claims.is_empty()
    }

    pub fn claim(&self, claim_type: ClaimType) -> Option<&IdentityClaim> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type == claim_type)
    }

    pub fn subject(&self) -> Option<&str> {
        self.claim(ClaimType::Subject)
            .map(|claim| claim.value.as_str())
    }
}

/// Maps an accepted certificate to the claims it establishes.
#[instrument(skip(cert), fields(subject = %cert.certificate().subject_name))]
pub fn derive_claims(cert: &AcceptedCertificate, authentication_method: &str) -> AuthenticatedIdentity {
    let cert = cert.certificate();
    let issuer = cert.issuer_name.as_str();

    let mut claims = BTreeSet::new();
    claims.insert(IdentityClaim::new(
        ClaimType::Subject,
        &cert.subject_name,
        issuer,
    ));

    if let Some(email) = &cert.email_address {
        claims.insert(IdentityClaim::new(ClaimType::Email, email, issuer));
    }
    if let Some(common_name) = &cert.common_name {
        claims.insert(IdentityClaim::new(ClaimType::CommonName, common_name, issuer));
    }
    for dns in &cert.dns_names {
        claims.insert(IdentityClaim::new(ClaimType::Dns, dns, issuer));
    }
    let thumbprint = cert.thumbprint();
    if !thumbprint.is_empty() {
        claims.insert(IdentityClaim::new(ClaimType::Thumbprint, thumbprint, issuer));
    }

    debug!(count = claims.len(), "Derived identity claims");

    AuthenticatedIdentity {
        authentication_method: Some(authentication_method.to_string()),
        claims,
    }
}
