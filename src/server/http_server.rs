use crate::gate::{AuthenticatedIdentity, ClientRequest, Outcome};
use crate::metrics_provider::{IN_FLIGHT_REQUESTS, METRICS_PROVIDER};
use crate::server::{Error, PeerCertificate, ServerContext};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

pub type ResponseBody = Full<Bytes>;

pub async fn serve_request<S>(
    stream: TokioIo<S>,
    context: Arc<ServerContext>,
    peer_certificate: Option<PeerCertificate>,
    timeouts: Arc<[Duration; 2]>,
    remote_address: SocketAddr,
) where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |mut request| {
            if let Some(ref peer_certificate) = peer_certificate {
                request.extensions_mut().insert(peer_certificate.clone());
            }
            handle_request(Arc::clone(&context), request, remote_address)
        }),
    );
    pin!(conn);

    update_in_flight(IN_FLIGHT_REQUESTS.fetch_add(1, Ordering::Relaxed) + 1);

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        debug!("iter = {iter} sleep_duration = {sleep_duration:?}");
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("after polling conn, no error"),
                    Err(error) =>  debug!("error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    update_in_flight(IN_FLIGHT_REQUESTS.fetch_sub(1, Ordering::Relaxed).saturating_sub(1));
}

fn update_in_flight(in_flight: u64) {
    METRICS_PROVIDER
        .metric_http_request_in_flight
        .set(i64::try_from(in_flight).unwrap_or(i64::MAX));
}

#[instrument(skip(context, request), fields(request_id = %Uuid::new_v4()))]
async fn handle_request<B>(
    context: Arc<ServerContext>,
    request: Request<B>,
    remote_address: SocketAddr,
) -> Result<Response<ResponseBody>, Infallible> {
    let start_time = Instant::now();
    let method = request.method().to_owned();
    let path = request.uri().path().to_owned();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = match router(&context, request) {
        Ok(response) => response,
        Err(error) => {
            let details = trace_id
                .as_ref()
                .map(|trace_id| json!({"trace_id": trace_id}))
                .unwrap_or(json!({}));
            error_to_response(&error, details)
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();

    METRICS_PROVIDER.metric_http_request_total.inc();
    METRICS_PROVIDER
        .metric_http_request_duration
        .observe(elapsed);

    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {path}")
    } else {
        format!("{elapsed:?} - {status} {method} {path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

fn router<B>(context: &ServerContext, request: Request<B>) -> Result<Response<ResponseBody>, Error> {
    let (parts, _) = request.into_parts();

    if parts.uri.path() == "/metrics" {
        return if parts.method == Method::GET {
            handle_metrics()
        } else {
            Err(Error::NotFound)
        };
    }

    let client_request = ClientRequest::new(parts.method.as_str(), parts.uri.path());
    let peer_certificate = parts.extensions.get::<PeerCertificate>();

    match context.evaluate_request(&client_request, peer_certificate) {
        Outcome::Allowed { identity } => handle_hello(&identity),
        Outcome::Denied { .. } => Err(Error::Unauthorized("access denied".to_string())),
        Outcome::Rejected { rejection } => Err(Error::Unauthorized(rejection.to_string())),
    }
}

fn handle_hello(identity: &AuthenticatedIdentity) -> Result<Response<ResponseBody>, Error> {
    let Some(client_name) = identity.subject() else {
        return Err(Error::Unauthorized("access denied".to_string()));
    };

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(format!("Hello there, {client_name}"))))?;

    Ok(response)
}

fn handle_metrics() -> Result<Response<ResponseBody>, Error> {
    let (content_type, metrics) = METRICS_PROVIDER.gather()?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(Bytes::from(metrics)))?;

    Ok(response)
}

pub fn error_to_response<T>(error: &Error, details: T) -> Response<ResponseBody>
where
    T: Serialize,
{
    let (status, code) = match error {
        Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        Error::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Error::Initialization(_) | Error::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
        }
    };

    let body = json!({
        "errors": [{
            "code": code,
            "message": error.to_string(),
            "detail": details
        }]
    });

    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
