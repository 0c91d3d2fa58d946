//! Request-level authorization over certificate-derived claims.
//!
//! The gate first decides whether the request is authenticated at all: it needs at least
//! one claim, produced by the authentication method the gate was configured for. Only then
//! is the authorization predicate consulted.
//!
//! # CEL predicates
//!
//! CEL expressions have access to:
//! - `request`: `method` and `path`
//! - `claims`: list of `{type, value, issuer}` maps
//! - `identity`: `authentication_method`, `subject`, `common_name`, `emails`

use crate::configuration::{AuthorizationConfig, Error as ConfigError, PolicyConfig};
use crate::gate::certificate::normalize_distinguished_name;
use crate::gate::{AuthenticatedIdentity, ClaimType, IdentityClaim};
use cel_interpreter::{Context, Program, Value};
use hyper::StatusCode;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn status(self) -> StatusCode {
        match self {
            Decision::Allow => StatusCode::OK,
            Decision::Deny => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Request facts available to authorization predicates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClientRequest {
    pub method: String,
    pub path: String,
}

impl ClientRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait AuthorizationPredicate: Send + Sync {
    fn evaluate(&self, request: &ClientRequest, claims: &BTreeSet<IdentityClaim>) -> bool;
}

impl<F> AuthorizationPredicate for F
where
    F: Fn(&ClientRequest, &BTreeSet<IdentityClaim>) -> bool + Send + Sync,
{
    fn evaluate(&self, request: &ClientRequest, claims: &BTreeSet<IdentityClaim>) -> bool {
        self(request, claims)
    }
}

/// Passes any authenticated identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAuthenticated;

impl AuthorizationPredicate for AllowAuthenticated {
    fn evaluate(&self, _request: &ClientRequest, _claims: &BTreeSet<IdentityClaim>) -> bool {
        true
    }
}

/// Passes when a claim with this type and value, vouched for by this issuer, is present.
///
/// Issuers are compared the same way the trust policy compares them, so
/// `CN=Demo CA,O=Acme` and `cn=Demo CA, o=Acme` name the same issuer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequireClaim {
    claim_type: ClaimType,
    value: String,
    issuer: String,
}

impl RequireClaim {
    pub fn new(claim_type: ClaimType, value: impl Into<String>, issuer: &str) -> Self {
        Self {
            claim_type,
            value: value.into(),
            issuer: normalize_distinguished_name(issuer),
        }
    }
}

impl AuthorizationPredicate for RequireClaim {
    fn evaluate(&self, _request: &ClientRequest, claims: &BTreeSet<IdentityClaim>) -> bool {
        claims.iter().any(|claim| {
            claim.claim_type == self.claim_type
                && claim.value == self.value
                && normalize_distinguished_name(&claim.issuer) == self.issuer
        })
    }
}

#[derive(Serialize)]
struct CelIdentity<'a> {
    authentication_method: Option<&'a str>,
    subject: Option<&'a str>,
    common_name: Option<&'a str>,
    emails: Vec<&'a str>,
}

impl<'a> CelIdentity<'a> {
    fn new(claims: &'a BTreeSet<IdentityClaim>, authentication_method: Option<&'a str>) -> Self {
        let first = |claim_type| {
            claims
                .iter()
                .find(|claim| claim.claim_type == claim_type)
                .map(|claim| claim.value.as_str())
        };

        Self {
            authentication_method,
            subject: first(ClaimType::Subject),
            common_name: first(ClaimType::CommonName),
            emails: claims
                .iter()
                .filter(|claim| claim.claim_type == ClaimType::Email)
                .map(|claim| claim.value.as_str())
                .collect(),
        }
    }
}

/// CEL rule set, pre-compiled when the configuration is loaded.
///
/// With `default_allow = false` any rule evaluating to `true` allows the request; with
/// `default_allow = true` any rule evaluating to `true` denies it. Rules that fail or
/// return a non-boolean value are skipped.
pub struct CelPredicate {
    default_allow: bool,
    authentication_method: Option<String>,
    rules: Vec<Program>,
}

impl CelPredicate {
    pub fn new(
        default_allow: bool,
        rules: &[String],
        authentication_method: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut compiled_rules = Vec::new();

        for (index, rule) in rules.iter().enumerate() {
            match Program::compile(rule) {
                Ok(program) => compiled_rules.push(program),
                Err(e) => {
                    return Err(ConfigError::PolicyCompilation(format!(
                        "Failed to compile authorization rule #{} '{}': {}",
                        index + 1,
                        rule,
                        e
                    )));
                }
            }
        }

        Ok(Self {
            default_allow,
            authentication_method,
            rules: compiled_rules,
        })
    }

    fn build_context<'a>(
        &'a self,
        request: &'a ClientRequest,
        claims: &'a BTreeSet<IdentityClaim>,
    ) -> Result<Context<'a>, String> {
        let identity = CelIdentity::new(claims, self.authentication_method.as_deref());

        let mut context = Context::default();
        context
            .add_variable("request", request)
            .map_err(|e| e.to_string())?;
        context
            .add_variable("claims", claims)
            .map_err(|e| e.to_string())?;
        context
            .add_variable("identity", &identity)
            .map_err(|e| e.to_string())?;
        Ok(context)
    }
}

impl AuthorizationPredicate for CelPredicate {
    fn evaluate(&self, request: &ClientRequest, claims: &BTreeSet<IdentityClaim>) -> bool {
        if self.rules.is_empty() {
            return self.default_allow;
        }

        let context = match self.build_context(request, claims) {
            Ok(context) => context,
            Err(e) => {
                warn!("Unable to build authorization context: {e}, denying");
                return false;
            }
        };

        for (index, rule) in self.rules.iter().enumerate() {
            let rule_index = index + 1;
            match rule.execute(&context) {
                Ok(Value::Bool(true)) => {
                    debug!("Authorization rule #{rule_index} matched");
                    return !self.default_allow;
                }
                Ok(Value::Bool(false)) => {}
                Ok(value) => {
                    warn!("Authorization rule #{rule_index} returned non-boolean value: {value:?}, skipping rule");
                }
                Err(e) => {
                    warn!("Authorization rule #{rule_index} evaluation failed: {e}, skipping rule");
                }
            }
        }

        self.default_allow
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Unauthenticated,
    AuthenticatedNoMatch,
    AuthenticatedMatch,
}

impl From<GateState> for Decision {
    fn from(state: GateState) -> Self {
        match state {
            GateState::AuthenticatedMatch => Decision::Allow,
            GateState::Unauthenticated | GateState::AuthenticatedNoMatch => Decision::Deny,
        }
    }
}

/// Evaluates the authorization predicate for identities produced by one authentication method.
#[derive(Clone)]
pub struct AuthorizationGate {
    authentication_method: String,
    predicate: Arc<dyn AuthorizationPredicate>,
}

impl AuthorizationGate {
    pub fn new(config: &AuthorizationConfig) -> Result<Self, ConfigError> {
        let predicate: Arc<dyn AuthorizationPredicate> = match &config.policy {
            PolicyConfig::AllowAuthenticated => Arc::new(AllowAuthenticated),
            PolicyConfig::RequireClaim {
                claim_type,
                value,
                issuer,
            } => Arc::new(RequireClaim::new(*claim_type, value.as_str(), issuer)),
            PolicyConfig::Cel {
                default_allow,
                rules,
            } => Arc::new(CelPredicate::new(
                *default_allow,
                rules,
                Some(config.authentication_method.clone()),
            )?),
        };

        Ok(Self::with_predicate(
            config.authentication_method.clone(),
            predicate,
        ))
    }

    pub fn with_predicate(
        authentication_method: impl Into<String>,
        predicate: Arc<dyn AuthorizationPredicate>,
    ) -> Self {
        Self {
            authentication_method: authentication_method.into(),
            predicate,
        }
    }

    pub fn authentication_method(&self) -> &str {
        &self.authentication_method
    }

    pub fn evaluate_state(
        &self,
        request: &ClientRequest,
        identity: &AuthenticatedIdentity,
    ) -> GateState {
        let method_matches =
            identity.authentication_method.as_deref() == Some(self.authentication_method.as_str());

        if !identity.is_authenticated() || !method_matches {
            return GateState::Unauthenticated;
        }

        if self.predicate.evaluate(request, &identity.claims) {
            GateState::AuthenticatedMatch
        } else {
            GateState::AuthenticatedNoMatch
        }
    }

    #[instrument(skip(self, identity), fields(subject = identity.subject()))]
    pub fn authorize(&self, request: &ClientRequest, identity: &AuthenticatedIdentity) -> Decision {
        let state = self.evaluate_state(request, identity);
        debug!(?state, "Authorization evaluated");
        state.into()
    }
}
