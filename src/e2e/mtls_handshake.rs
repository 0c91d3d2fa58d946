use super::util::GateFixture;
use crate::configuration::ClientCertificateMode;
use crate::gate::TrustPolicy;
use hyper::StatusCode;

#[tokio::test]
async fn test_trusted_client_with_matching_claim_is_greeted() {
    let gate = GateFixture::allow_list().await;

    let (status, body) = gate.get("/hello", Some("bob")).await.unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Hello there, CN=Bob, O=Web API Book");
}

#[tokio::test]
async fn test_trusted_client_without_matching_claim_is_denied() {
    let gate = GateFixture::allow_list().await;

    let (status, body) = gate.get("/hello", Some("alice")).await.unwrap();

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("access denied"));
}

#[tokio::test]
async fn test_untrusted_issuer_is_rejected_by_trust_policy() {
    // Chains to a CA the handshake knows, but which is not on the allow-list.
    let gate = GateFixture::allow_list().await;

    let (status, body) = gate.get("/hello", Some("mallory")).await.unwrap();

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("untrusted issuer"));
}

#[tokio::test]
async fn test_self_signed_certificate_naming_trusted_issuer_is_refused() {
    // Self-signed, with the demo CA as issuer name and Bob's email address.
    let gate = GateFixture::allow_list().await;

    assert!(gate.get("/hello", Some("forged")).await.is_err());

    let (status, _) = gate.get("/hello", Some("bob")).await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_client_certificate_is_rejected() {
    let gate = GateFixture::allow_list().await;

    let (status, body) = gate.get("/hello", None).await.unwrap();

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("no client certificate"));
}

#[tokio::test]
async fn test_metrics_are_served_without_client_certificate() {
    let gate = GateFixture::allow_list().await;

    let (status, body) = gate.get("/metrics", None).await.unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("http_requests_total"));
    assert!(body.contains("gate_decisions_total"));
}

#[tokio::test]
async fn test_client_ca_bundle_refuses_foreign_chain_in_handshake() {
    let gate = GateFixture::start(
        TrustPolicy::issuer_allow_list([super::util::DEMO_CA_ISSUER]),
        Some("demo-ca.pem"),
        ClientCertificateMode::Required,
    )
    .await;

    let (status, _) = gate.get("/hello", Some("bob")).await.unwrap();
    assert_eq!(status, StatusCode::OK);

    assert!(gate.get("/hello", Some("mallory")).await.is_err());
}

#[tokio::test]
async fn test_any_issuer_reaches_authorization_without_validation() {
    let gate = GateFixture::start(TrustPolicy::NoValidation, None, ClientCertificateMode::Optional).await;

    let (status, _) = gate.get("/hello", Some("bob")).await.unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, body) = gate.get("/hello", Some("mallory")).await.unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("access denied"));
}

#[tokio::test]
async fn test_required_client_certificate_fails_handshake_when_absent() {
    let gate = GateFixture::start(TrustPolicy::NoValidation, None, ClientCertificateMode::Required).await;

    assert!(gate.get("/hello", None).await.is_err());
}
