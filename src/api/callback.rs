//! A short-lived local HTTP listener that receives the OAuth redirect.
//!
//! The listener serves until the first request on the redirect path. That request either carries
//! a `code` together with the expected `state`, in which case the code is handed to the waiting
//! flow, or it does not, in which case nothing is captured. Either way the browser gets a
//! confirmation page and the listener stops. Requests on other paths (e.g. `/favicon.ico`) get a
//! 404 and do not end the listener.

use crate::error::Res;
use anyhow::Context;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};
use url::Url;

/// How long the flow waits for the browser to come back.
pub(crate) const CALLBACK_WAIT: Duration = Duration::from_secs(120);

/// A single connection may not hold the listener for longer than this.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

const PORT_DEFAULT: u16 = 8080;

const RECEIVED_HTML: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
<title>Smartsheet authorization</title></head>\
<body><h2>Authorization received. You can close this window and return to the terminal.</h2>\
</body></html>";

const REJECTED_HTML: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
<title>Smartsheet authorization</title></head>\
<body><h2>The authorization response could not be used. Return to the terminal to enter the \
code manually.</h2></body></html>";

struct CallbackState {
    path: String,
    expected_state: String,
}

/// What one connection saw on the redirect path. Only the first request counts.
#[derive(Default)]
struct Captured(Mutex<Option<Option<String>>>);

impl Captured {
    fn record(&self, code: Option<String>) {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            *guard = Some(code);
        }
    }

    fn take(&self) -> Option<Option<String>> {
        match self.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

type OutcomeSender = Arc<Mutex<Option<oneshot::Sender<Option<String>>>>>;

/// A running callback listener. Dropping it stops the listener.
pub(crate) struct CallbackListener {
    addr: SocketAddr,
    receiver: oneshot::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

impl CallbackListener {
    /// Binds to the host and port of `redirect_uri` and starts serving. Fails if the port cannot
    /// be bound, e.g. because it is already in use.
    pub(crate) async fn bind(redirect_uri: &Url, expected_state: impl Into<String>) -> Res<Self> {
        let host = redirect_uri.host_str().unwrap_or("localhost").to_string();
        let port = redirect_uri.port_or_known_default().unwrap_or(PORT_DEFAULT);
        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .with_context(|| format!("Unable to listen on {host}:{port}"))?;
        let addr = listener.local_addr().context("Unable to read the listener address")?;
        debug!("Callback listener bound to {addr}");

        let (sender, receiver) = oneshot::channel();
        let state = Arc::new(CallbackState {
            path: redirect_uri.path().to_string(),
            expected_state: expected_state.into(),
        });
        let task = tokio::spawn(serve(listener, state, sender));
        Ok(Self {
            addr,
            receiver,
            task,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Waits up to `timeout` for the callback, then stops the listener and releases its socket
    /// before returning. `None` means no usable code arrived.
    pub(crate) async fn wait(mut self, timeout: Duration) -> Option<String> {
        let outcome = match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(code)) => code,
            Ok(Err(_)) => {
                warn!("The callback listener stopped without a result");
                None
            }
            Err(_) => {
                warn!("No authorization callback within {}s", timeout.as_secs());
                None
            }
        };
        self.shutdown().await;
        outcome
    }

    async fn shutdown(&mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
        debug!("Callback listener on {} stopped", self.addr);
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accepts connections until aborted, serving each on its own task so that an idle connection
/// cannot hold up the redirect. Aborting drops the `JoinSet` and with it every open connection.
async fn serve(
    listener: TcpListener,
    state: Arc<CallbackState>,
    sender: oneshot::Sender<Option<String>>,
) {
    let sender: OutcomeSender = Arc::new(Mutex::new(Some(sender)));
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Callback connection from {peer}");
                    connections.spawn(serve_connection(stream, peer, state.clone(), sender.clone()));
                }
                Err(e) => warn!("Callback listener accept failed: {e}"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

/// Serves one connection. The outcome is sent only after the connection that produced it has
/// finished, so the browser always receives its page before the listener goes away.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<CallbackState>,
    sender: OutcomeSender,
) {
    let captured = Arc::new(Captured::default());
    let seen = captured.clone();
    let service = service_fn(move |req| {
        let ctx = state.clone();
        let seen = seen.clone();
        async move { Ok::<_, Infallible>(handle(req, &ctx, &seen)) }
    });
    let connection = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service);
    match tokio::time::timeout(CONNECTION_TIMEOUT, connection).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Callback connection error: {e}"),
        Err(_) => debug!("Callback connection from {peer} timed out"),
    }

    if let Some(outcome) = captured.take() {
        let sender = match sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

fn handle(req: Request<Incoming>, ctx: &CallbackState, seen: &Captured) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != ctx.path {
        return html(StatusCode::NOT_FOUND, "");
    }

    let query = req.uri().query().unwrap_or("");
    match extract_code(query, &ctx.expected_state) {
        Ok(code) => {
            debug!("Received an authorization code on the callback");
            seen.record(Some(code));
            html(StatusCode::OK, RECEIVED_HTML)
        }
        Err(reason) => {
            warn!("Discarding authorization callback: {reason}");
            seen.record(None);
            html(StatusCode::OK, REJECTED_HTML)
        }
    }
}

/// Pulls `code` out of a callback query string, requiring `state` to equal `expected_state`.
pub(crate) fn extract_code(query: &str, expected_state: &str) -> std::result::Result<String, String> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    if let Some(error) = error {
        return Err(format!("the authorization server returned '{error}'"));
    }
    match state {
        Some(s) if s == expected_state => {}
        Some(_) => return Err("state mismatch".to_string()),
        None => return Err("missing state".to_string()),
    }
    match code {
        Some(c) if !c.is_empty() => Ok(c),
        _ => Err("missing code".to_string()),
    }
}

fn html(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}
