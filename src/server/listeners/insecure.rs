use crate::configuration::ServerConfig;
use crate::server::{serve_request, Error, ServerContext};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Plain-text listener. Requests never carry a client certificate, so the gate rejects
/// everything except the metrics endpoint.
pub struct InsecureListener {
    binding_address: SocketAddr,
    context: Arc<ServerContext>,
    timeouts: Arc<[Duration; 2]>,
}

impl InsecureListener {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Self {
        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);
        let timeouts = [
            Duration::from_secs(server_config.query_timeout),
            Duration::from_secs(server_config.query_timeout_grace_period),
        ];

        Self {
            binding_address,
            context: Arc::new(context),
            timeouts: Arc::new(timeouts),
        }
    }

    pub async fn serve(&self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.binding_address).await?;
        self.serve_listener(listener).await
    }

    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), Error> {
        info!("Listening on {} (non-TLS)", listener.local_addr()?);
        warn!("Client certificates cannot be presented without TLS");

        loop {
            let (tcp, remote_address) = listener.accept().await?;
            debug!("Accepted connection from {remote_address}");

            let stream = TokioIo::new(tcp);
            let context = Arc::clone(&self.context);
            let timeouts = Arc::clone(&self.timeouts);

            tokio::spawn(async move {
                serve_request(stream, context, None, timeouts, remote_address).await;
            });
        }
    }
}
