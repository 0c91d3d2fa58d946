use crate::gate::{AuthenticatedIdentity, ClientRequest, Gate, Outcome};
use crate::server::PeerCertificate;
use tracing::{debug, instrument};

pub struct ServerContext {
    gate: Gate,
}

impl ServerContext {
    pub fn new(gate: Gate) -> Self {
        Self { gate }
    }

    #[instrument(skip(self, peer_certificate))]
    pub fn evaluate_request(
        &self,
        request: &ClientRequest,
        peer_certificate: Option<&PeerCertificate>,
    ) -> Outcome {
        let der = peer_certificate.map(|cert| cert.0.as_slice());
        let outcome = self.gate.evaluate(request, der);

        debug!(
            status = %outcome.status(),
            subject = outcome.identity().and_then(AuthenticatedIdentity::subject),
            "Gate evaluated request"
        );
        outcome
    }
}
