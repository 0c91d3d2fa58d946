use crate::gate::certificate::normalize_distinguished_name;
use crate::gate::ClientCertificate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, instrument};

/// Process-wide trust policy applied to every presented client certificate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Any certificate (or none) is accepted; authentication is advisory.
    #[default]
    NoValidation,
    /// Only certificates issued by one of these issuers are accepted.
    IssuerAllowList(BTreeSet<String>),
}

impl TrustPolicy {
    pub fn issuer_allow_list<I, S>(issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        TrustPolicy::IssuerAllowList(
            issuers
                .into_iter()
                .map(|issuer| normalize_distinguished_name(issuer.as_ref()))
                .collect(),
        )
    }
}

/// A certificate that passed the trust policy.
///
/// Only [`validate`] constructs this type, so identity claims cannot be derived from a
/// certificate the policy did not accept.
#[derive(Clone, Copy, Debug)]
pub struct AcceptedCertificate<'a>(&'a ClientCertificate);

impl<'a> AcceptedCertificate<'a> {
    pub fn certificate(&self) -> &'a ClientCertificate {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Rejection {
    MissingCertificate,
    UntrustedIssuer(String),
    Malformed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingCertificate => write!(f, "no client certificate presented"),
            Rejection::UntrustedIssuer(issuer) => write!(f, "untrusted issuer: {issuer}"),
            Rejection::Malformed(s) => write!(f, "malformed client certificate: {s}"),
        }
    }
}

#[derive(Debug)]
pub enum Validation<'a> {
    /// `None` when no certificate was presented and the policy does not require one.
    Accepted(Option<AcceptedCertificate<'a>>),
    Rejected(Rejection),
}

/// Checks a presented certificate (or its absence) against the trust policy.
#[instrument(skip_all)]
pub fn validate<'a>(cert: Option<&'a ClientCertificate>, policy: &TrustPolicy) -> Validation<'a> {
    match policy {
        TrustPolicy::NoValidation => {
            debug!(present = cert.is_some(), "Trust policy disabled, accepting");
            Validation::Accepted(cert.map(AcceptedCertificate))
        }
        TrustPolicy::IssuerAllowList(issuers) => {
            let Some(cert) = cert else {
                debug!("No client certificate presented");
                return Validation::Rejected(Rejection::MissingCertificate);
            };

            if issuers.contains(&normalize_distinguished_name(&cert.issuer_name)) {
                debug!(issuer = %cert.issuer_name, "Issuer is allowed");
                Validation::Accepted(Some(AcceptedCertificate(cert)))
            } else {
                debug!(issuer = %cert.issuer_name, "Issuer is not in the allow-list");
                Validation::Rejected(Rejection::UntrustedIssuer(cert.issuer_name.clone()))
            }
        }
    }
}
