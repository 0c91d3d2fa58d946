use crate::configuration::{ClientCertificateMode, ServerConfig, ServerTlsConfig};
use crate::gate::authorizer::RequireClaim;
use crate::gate::{AuthorizationGate, ClaimType, Gate, TrustPolicy, X509_AUTHENTICATION_METHOD};
use crate::server::listeners::tls::TlsListener;
use crate::server::ServerContext;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HOST;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::crypto::aws_lc_rs;
use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

pub const DEMO_CA_ISSUER: &str = "CN=Demo Certification Authority, O=Web API Book";

pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn demo_gate(trust_policy: TrustPolicy) -> Gate {
    let predicate = RequireClaim::new(ClaimType::Email, "bob@webapibook.net", DEMO_CA_ISSUER);
    Gate::with_parts(
        trust_policy,
        AuthorizationGate::with_predicate(X509_AUTHENTICATION_METHOD, Arc::new(predicate)),
    )
}

/// A TLS listener bound to an ephemeral local port, running the demo gate.
///
/// The demo rule allows `bob@webapibook.net` as vouched for by the demo CA.
pub struct GateFixture {
    pub address: SocketAddr,
    handle: JoinHandle<()>,
}

impl GateFixture {
    /// Demo CA allow-list, with client chains verified against `client-cas.pem`
    /// (the demo CA and the untrusted CA) during the handshake.
    pub async fn allow_list() -> Self {
        Self::start(
            TrustPolicy::issuer_allow_list([DEMO_CA_ISSUER]),
            Some("client-cas.pem"),
            ClientCertificateMode::Optional,
        )
        .await
    }

    pub async fn start(
        trust_policy: TrustPolicy,
        client_ca_bundle: Option<&str>,
        client_certificate: ClientCertificateMode,
    ) -> Self {
        let server_config = ServerConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            port: 0,
            query_timeout: 10,
            query_timeout_grace_period: 1,
            worker_threads: 1,
            tls: Some(ServerTlsConfig {
                server_certificate_bundle: fixture("server.pem"),
                server_private_key: fixture("server.key"),
                client_ca_bundle: client_ca_bundle.map(fixture),
                client_certificate,
            }),
        };

        let listener = TlsListener::new(&server_config, ServerContext::new(demo_gate(trust_policy)))
            .expect("Failed to build TLS listener");
        let tcp = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let address = tcp.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let _ = listener.serve_listener(tcp).await;
        });

        Self { address, handle }
    }

    /// Sends a single GET request, optionally presenting the named client identity.
    pub async fn get(
        &self,
        path: &str,
        client_identity: Option<&str>,
    ) -> Result<(StatusCode, String), Box<dyn Error + Send + Sync>> {
        let connector = TlsConnector::from(Arc::new(client_config(client_identity)?));
        let tcp = TcpStream::connect(self.address).await?;
        let tls = connector
            .connect(ServerName::try_from("localhost")?, tcp)
            .await?;

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;
        tokio::spawn(async move {
            let _ = connection.await;
        });

        let request = Request::get(path)
            .header(HOST, "localhost")
            .body(Full::new(Bytes::new()))?;
        let response = sender.send_request(request).await?;

        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok((status, String::from_utf8(body.to_vec())?))
    }
}

impl Drop for GateFixture {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn client_config(
    client_identity: Option<&str>,
) -> Result<rustls::ClientConfig, Box<dyn Error + Send + Sync>> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(fixture("demo-ca.pem"))? {
        roots.add(cert?)?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
        aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots);

    let config = match client_identity {
        Some(name) => {
            let certs = CertificateDer::pem_file_iter(fixture(&format!("{name}.pem")))?
                .collect::<Result<Vec<_>, _>>()?;
            let key = PrivateKeyDer::from_pem_file(fixture(&format!("{name}.key")))?;
            builder.with_client_auth_cert(certs, key)?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}
