use crate::configuration::{ClientCertificateMode, Error, ServerConfig, ServerTlsConfig};
use crate::server;
use crate::server::{serve_request, PeerCertificate, ServerContext};
use hyper_util::rt::TokioIo;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{aws_lc_rs, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// Requests a client certificate without checking who issued it.
///
/// Handshake signatures are still verified, so the peer proves possession of the key.
/// The chain is not, which is why configuration loading only allows this verifier
/// together with the `no_validation` trust policy.
#[derive(Debug)]
pub struct AnyClientCertVerifier {
    mandatory: bool,
    algorithms: WebPkiSupportedAlgorithms,
}

impl AnyClientCertVerifier {
    pub fn new(provider: &CryptoProvider, mandatory: bool) -> Self {
        Self {
            mandatory,
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ClientCertVerifier for AnyClientCertVerifier {
    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

pub struct TlsListener {
    binding_address: SocketAddr,
    tls_acceptor: TlsAcceptor,
    context: Arc<ServerContext>,
    timeouts: Arc<[Duration; 2]>,
}

impl TlsListener {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Result<Self, Error> {
        let tls_config = server_config.tls.as_ref().ok_or_else(|| {
            Error::MissingExpectedTLSSection("TLS configuration is missing".to_string())
        })?;

        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);
        let timeouts = [
            Duration::from_secs(server_config.query_timeout),
            Duration::from_secs(server_config.query_timeout_grace_period),
        ];

        Ok(Self {
            binding_address,
            tls_acceptor: Self::build_tls_acceptor(tls_config)?,
            context: Arc::new(context),
            timeouts: Arc::new(timeouts),
        })
    }

    fn build_client_cert_verifier(
        tls_config: &ServerTlsConfig,
        provider: &Arc<CryptoProvider>,
    ) -> Result<Option<Arc<dyn ClientCertVerifier>>, Error> {
        let mandatory = match tls_config.client_certificate {
            ClientCertificateMode::Disabled => {
                debug!("Client certificates disabled (will serve without TLS client authentication)");
                return Ok(None);
            }
            ClientCertificateMode::Optional => false,
            ClientCertificateMode::Required => true,
        };

        let Some(client_ca_bundle) = tls_config.client_ca_bundle.as_ref() else {
            debug!("No client CA bundle (client certificate chains will not be verified)");
            let verifier: Arc<dyn ClientCertVerifier> =
                Arc::new(AnyClientCertVerifier::new(provider, mandatory));
            return Ok(Some(verifier));
        };

        debug!("Client CA bundle detected (will verify client certificate chains)");
        let client_certs: Vec<CertificateDer> =
            CertificateDer::pem_file_iter(client_ca_bundle)?.collect::<Result<_, _>>()?;

        let mut client_cert_store = RootCertStore::empty();
        for client_cert in client_certs {
            client_cert_store.add(client_cert)?;
        }

        let builder = WebPkiClientVerifier::builder_with_provider(
            Arc::new(client_cert_store),
            Arc::clone(provider),
        );
        let verifier = if mandatory {
            builder.build()?
        } else {
            builder.allow_unauthenticated().build()?
        };

        Ok(Some(verifier))
    }

    pub fn build_tls_acceptor(tls_config: &ServerTlsConfig) -> Result<TlsAcceptor, Error> {
        debug!("Detected TLS configuration");
        let provider = Arc::new(aws_lc_rs::default_provider());

        let server_certs = CertificateDer::pem_file_iter(&tls_config.server_certificate_bundle)?
            .collect::<Result<_, _>>()?;
        let server_key = PrivateKeyDer::from_pem_file(&tls_config.server_private_key)?;

        let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;

        let server_config = match Self::build_client_cert_verifier(tls_config, &provider)? {
            Some(verifier) => builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(server_certs, server_key)?,
            None => builder
                .with_no_client_auth()
                .with_single_cert(server_certs, server_key)?,
        };

        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }

    pub async fn serve(&self) -> Result<(), server::Error> {
        let listener = TcpListener::bind(self.binding_address).await?;
        self.serve_listener(listener).await
    }

    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), server::Error> {
        info!("Listening on {} (mTLS)", listener.local_addr()?);

        loop {
            let (tcp, remote_address) = listener.accept().await?;

            let tls_acceptor = self.tls_acceptor.clone();
            let context = Arc::clone(&self.context);
            let timeouts = Arc::clone(&self.timeouts);

            tokio::spawn(async move {
                let tls = match tls_acceptor.accept(tcp).await {
                    Ok(tls) => tls,
                    Err(error) => {
                        debug!("TLS handshake with {remote_address} failed: {error}");
                        return;
                    }
                };

                let (_, session) = tls.get_ref();
                let peer_certificate = session
                    .peer_certificates()
                    .and_then(|certs| certs.first())
                    .map(|cert| PeerCertificate(Arc::new(cert.to_vec())));

                debug!(
                    client_certificate = peer_certificate.is_some(),
                    "Accepted connection from {remote_address}"
                );
                let stream = TokioIo::new(tls);
                serve_request(stream, context, peer_certificate, timeouts, remote_address).await;
            });
        }
    }
}
