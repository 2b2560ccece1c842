//! HTTP server: hyper service feeding script request handlers.
//!
//! The service collects the request body up front, hands the request core to
//! the registered handler, then waits for the script to end the response.
//! Upgrade requests are diverted to the websocket handler when one is set.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use pontoon_script::{
    Array, AsyncResult, Cause, EventHandler, ScriptEnv, ScriptResult, Value, expect_int,
    expect_str, modified_handler, opt_str, void_async_handler,
};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, warn};

use crate::buffer::{Buffer, expect_bytes};
use crate::net::expect_port;
use crate::route_matcher::RouteMatcher;
use crate::streams::SharedHandler;
use crate::websocket::{WebSocketWrapper, WsCore};

/// Everything the script can observe about one request, plus the channel
/// the response travels back on.
pub struct HttpRequestCore {
    pub method: String,
    pub uri: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub remote: Option<SocketAddr>,
    params: Mutex<HashMap<String, String>>,
    response_tx: Mutex<Option<oneshot::Sender<ResponseParts>>>,
}

/// The script-built response, handed back to the hyper service.
pub struct ResponseParts {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequestCore {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_params(&self, params: HashMap<String, String>) {
        *self.params.lock() = params;
    }

    pub fn params(&self) -> HashMap<String, String> {
        self.params.lock().clone()
    }

    /// Complete the request. Only the first response wins; later calls are
    /// dropped.
    pub fn respond(&self, parts: ResponseParts) {
        if let Some(tx) = self.response_tx.lock().take() {
            let _ = tx.send(parts);
        }
    }

    #[cfg(test)]
    pub fn for_tests(
        method: &str,
        path: &str,
    ) -> (Arc<Self>, oneshot::Receiver<ResponseParts>) {
        let (tx, rx) = oneshot::channel();
        let core = Arc::new(Self {
            method: method.into(),
            uri: path.into(),
            path: path.into(),
            query: String::new(),
            headers: vec![("Content-Type".into(), "text/plain".into())],
            body: b"payload".to_vec(),
            remote: None,
            params: Mutex::new(HashMap::new()),
            response_tx: Mutex::new(Some(tx)),
        });
        (core, rx)
    }
}

type RequestHandler = SharedHandler<Arc<HttpRequestCore>>;
type WsHandler = SharedHandler<(Arc<WsCore>, String)>;

struct ServerState {
    request_handler: Mutex<Option<RequestHandler>>,
    ws_handler: Mutex<Option<WsHandler>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    bound: Mutex<Option<SocketAddr>>,
}

/// The native accept loop behind an [`HttpServer`] wrapper.
pub struct HttpServerCore {
    handle: Handle,
    state: Arc<ServerState>,
}

impl HttpServerCore {
    pub fn new(handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            state: Arc::new(ServerState {
                request_handler: Mutex::new(None),
                ws_handler: Mutex::new(None),
                shutdown: Mutex::new(None),
                bound: Mutex::new(None),
            }),
        })
    }

    pub fn set_request_handler(&self, handler: RequestHandler) {
        *self.state.request_handler.lock() = Some(handler);
    }

    pub fn set_ws_handler(&self, handler: WsHandler) {
        *self.state.ws_handler.lock() = Some(handler);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.state.bound.lock()
    }

    pub fn listen(
        self: &Arc<Self>,
        port: u16,
        host: String,
        on_listen: Option<SharedHandler<AsyncResult<()>>>,
    ) {
        let state = self.state.clone();
        let handle = self.handle.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        *self.state.shutdown.lock() = Some(shutdown_tx);
        self.handle.clone().spawn(async move {
            let listener = match TcpListener::bind((host.as_str(), port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(host, port, error = %err, "http bind failed");
                    if let Some(on_listen) = on_listen {
                        on_listen.handle(Err(Cause::from(err)));
                    }
                    return;
                }
            };
            let bound = listener.local_addr().ok();
            *state.bound.lock() = bound;
            debug!(addr = ?bound, "http server listening");
            if let Some(on_listen) = on_listen {
                on_listen.handle(Ok(()));
            }
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let (stream, remote) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(error = %err, "http accept failed");
                                continue;
                            }
                        };
                        let state = state.clone();
                        let conn_handle = handle.clone();
                        handle.spawn(async move {
                            let service = service_fn(move |request| {
                                serve(state.clone(), conn_handle.clone(), Some(remote), request)
                            });
                            let io = TokioIo::new(stream);
                            let conn = hyper::server::conn::http1::Builder::new()
                                .serve_connection(io, service)
                                .with_upgrades();
                            if let Err(err) = conn.await {
                                debug!(error = %err, "http connection ended");
                            }
                        });
                    }
                }
            }
            debug!(addr = ?bound, "http server closed");
        });
    }

    pub fn close(&self, on_close: Option<SharedHandler<AsyncResult<()>>>) {
        if let Some(shutdown) = self.state.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        *self.state.bound.lock() = None;
        if let Some(on_close) = on_close {
            on_close.handle(Ok(()));
        }
    }
}

fn is_websocket_upgrade(request: &Request<Incoming>) -> bool {
    let upgraded = request
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    upgraded && request.headers().contains_key(SEC_WEBSOCKET_KEY)
}

async fn serve(
    state: Arc<ServerState>,
    handle: Handle,
    remote: Option<SocketAddr>,
    mut request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if is_websocket_upgrade(&request) {
        if let Some(ws_handler) = state.ws_handler.lock().clone() {
            return Ok(upgrade_websocket(handle, ws_handler, &mut request));
        }
    }

    let Some(request_handler) = state.request_handler.lock().clone() else {
        return Ok(simple_response(StatusCode::NOT_FOUND));
    };

    let (parts, body) = request.into_parts();
    let body = body.collect().await?.to_bytes();
    let uri = parts.uri.clone();
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let (response_tx, response_rx) = oneshot::channel();
    let core = Arc::new(HttpRequestCore {
        method: parts.method.as_str().to_string(),
        uri: uri.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers,
        body: body.to_vec(),
        remote,
        params: Mutex::new(HashMap::new()),
        response_tx: Mutex::new(Some(response_tx)),
    });

    request_handler.handle(core);

    match response_rx.await {
        Ok(parts) => {
            let mut response = Response::builder().status(parts.status);
            for (name, value) in parts.headers {
                response = response.header(name, value);
            }
            Ok(response
                .body(Full::new(Bytes::from(parts.body)))
                .unwrap_or_else(|_| simple_response(StatusCode::INTERNAL_SERVER_ERROR)))
        }
        // Response sender dropped without ending: the request wrapper was
        // discarded. Surface it as a server error.
        Err(_) => Ok(simple_response(StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

fn upgrade_websocket(
    handle: Handle,
    ws_handler: WsHandler,
    request: &mut Request<Incoming>,
) -> Response<Full<Bytes>> {
    let key = request
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .map(|v| derive_accept_key(v.as_bytes()))
        .unwrap_or_default();
    let path = request.uri().path().to_string();
    let upgrade = hyper::upgrade::on(request);
    let ws_handle = handle.clone();
    handle.spawn(async move {
        match upgrade.await {
            Ok(upgraded) => {
                let stream = WebSocketStream::from_raw_socket(
                    TokioIo::new(upgraded),
                    Role::Server,
                    None,
                )
                .await;
                let core = WsCore::spawn(stream, &ws_handle);
                ws_handler.handle((core, path));
            }
            Err(err) => warn!(error = %err, "websocket upgrade failed"),
        }
    });
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_ACCEPT, key)
        .body(Full::new(Bytes::new()))
        .expect("static upgrade response")
}

fn simple_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("static response")
}

/// Script-facing HTTP server.
pub struct HttpServer {
    core: Arc<HttpServerCore>,
    env: ScriptEnv,
}

impl HttpServer {
    pub const CLASS: &'static str = "Pontoon\\Http\\HttpServer";

    pub fn new(handle: Handle, env: ScriptEnv) -> Self {
        Self {
            core: HttpServerCore::new(handle),
            env,
        }
    }

    /// Install the request handler: either a callable or a route matcher
    /// resource.
    pub fn request_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServer::requestHandler()";
        if let Some(resource) = handler.as_resource() {
            if let Some(matcher) = resource.downcast::<RouteMatcher>() {
                self.core.set_request_handler(matcher);
                return Ok(());
            }
        }
        let env = self.env.clone();
        let adapter = modified_handler(
            &self.env,
            handler,
            SITE,
            move |core: Arc<HttpRequestCore>| HttpServerRequest::wrap(core, env.clone()).value(),
        )?;
        self.core.set_request_handler(adapter);
        Ok(())
    }

    pub fn websocket_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServer::websocketHandler()";
        let env = self.env.clone();
        let adapter = modified_handler(
            &self.env,
            handler,
            SITE,
            move |(core, path): (Arc<WsCore>, String)| {
                WebSocketWrapper::wrap(core, path, env.clone()).value()
            },
        )?;
        self.core.set_ws_handler(adapter);
        Ok(())
    }

    pub fn listen(&self, port: &Value, host: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServer::listen()";
        let port = expect_port(&self.env, port, SITE)?;
        let host = opt_str(&self.env, host, "host", SITE)?.unwrap_or_else(|| "0.0.0.0".into());
        let on_listen = if handler.is_absent() {
            None
        } else {
            Some(void_async_handler(&self.env, handler, SITE)? as SharedHandler<AsyncResult<()>>)
        };
        self.core.listen(port, host, on_listen);
        Ok(())
    }

    pub fn close(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServer::close()";
        let on_close = if handler.is_absent() {
            None
        } else {
            Some(void_async_handler(&self.env, handler, SITE)? as SharedHandler<AsyncResult<()>>)
        };
        self.core.close(on_close);
        Ok(())
    }

    pub fn port(&self) -> Value {
        self.core
            .local_addr()
            .map_or(Value::Null, |addr| Value::Int(addr.port() as i64))
    }

    pub fn core(&self) -> &Arc<HttpServerCore> {
        &self.core
    }
}

/// Script-facing request. The body is already collected when the wrapper is
/// built, so body handlers deliver at registration.
pub struct HttpServerRequest {
    core: Arc<HttpRequestCore>,
    env: ScriptEnv,
    response: Mutex<Option<Value>>,
}

impl HttpServerRequest {
    pub const CLASS: &'static str = "Pontoon\\Http\\HttpServerRequest";

    pub fn wrap(core: Arc<HttpRequestCore>, env: ScriptEnv) -> Arc<Self> {
        Arc::new(Self {
            core,
            env,
            response: Mutex::new(None),
        })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Resource(pontoon_script::Resource::from_arc(Self::CLASS, self.clone()))
    }

    pub fn method(&self) -> Value {
        Value::Str(self.core.method.clone())
    }

    pub fn uri(&self) -> Value {
        Value::Str(self.core.uri.clone())
    }

    pub fn path(&self) -> Value {
        Value::Str(self.core.path.clone())
    }

    pub fn query(&self) -> Value {
        Value::Str(self.core.query.clone())
    }

    /// Route parameters extracted by the route matcher, empty otherwise.
    pub fn params(&self) -> Value {
        let mut array = Array::new();
        let mut params: Vec<(String, String)> = self.core.params().into_iter().collect();
        params.sort();
        for (name, value) in params {
            array.insert(pontoon_script::ArrayKey::Str(name), Value::Str(value));
        }
        Value::Array(array)
    }

    pub fn headers(&self) -> Value {
        let mut array = Array::new();
        for (name, value) in &self.core.headers {
            array.insert(
                pontoon_script::ArrayKey::Str(name.clone()),
                Value::Str(value.clone()),
            );
        }
        Value::Array(array)
    }

    pub fn header(&self, name: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\Http\\HttpServerRequest::header()";
        let name = expect_str(&self.env, name, "name", SITE)?;
        Ok(self
            .core
            .header(&name)
            .map_or(Value::Null, |value| Value::Str(value.to_string())))
    }

    /// The response wrapper, created once per request.
    pub fn response(&self) -> Value {
        let mut cached = self.response.lock();
        if let Some(value) = cached.as_ref() {
            return value.clone();
        }
        let response = HttpServerResponse::wrap(self.core.clone(), self.env.clone());
        let value = response.value();
        *cached = Some(value.clone());
        value
    }

    /// Deliver the whole body as one buffer.
    pub fn body_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerRequest::bodyHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, Buffer::into_value)?;
        adapter.handle(Buffer::from_bytes(self.core.body.clone()));
        Ok(())
    }

    pub fn data_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerRequest::dataHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, Buffer::into_value)?;
        if !self.core.body.is_empty() {
            adapter.handle(Buffer::from_bytes(self.core.body.clone()));
        }
        Ok(())
    }

    pub fn end_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerRequest::endHandler()";
        let adapter = pontoon_script::void_handler(&self.env, handler, SITE)?;
        adapter.handle(());
        Ok(())
    }
}

/// Script-facing response builder. `end` sends the response exactly once.
pub struct HttpServerResponse {
    core: Arc<HttpRequestCore>,
    env: ScriptEnv,
    status: AtomicU16,
    status_message: Mutex<Option<String>>,
    chunked: AtomicBool,
    headers: Mutex<Vec<(String, String)>>,
    body: Mutex<Vec<u8>>,
    ended: AtomicBool,
}

impl HttpServerResponse {
    pub const CLASS: &'static str = "Pontoon\\Http\\HttpServerResponse";

    fn wrap(core: Arc<HttpRequestCore>, env: ScriptEnv) -> Arc<Self> {
        Arc::new(Self {
            core,
            env,
            status: AtomicU16::new(200),
            status_message: Mutex::new(None),
            chunked: AtomicBool::new(false),
            headers: Mutex::new(Vec::new()),
            body: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Resource(pontoon_script::Resource::from_arc(Self::CLASS, self.clone()))
    }

    pub fn status_code(&self) -> Value {
        Value::Int(self.status.load(Ordering::Acquire) as i64)
    }

    pub fn set_status_code(&self, status: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerResponse::setStatusCode()";
        let status = expect_int(&self.env, status, "statusCode", SITE)?;
        let status = u16::try_from(status)
            .ok()
            .filter(|s| (100..=599).contains(s))
            .ok_or_else(|| {
                self.env
                    .error(format!("statusCode argument to {} must be a valid HTTP status.", SITE))
            })?;
        self.status.store(status, Ordering::Release);
        Ok(())
    }

    /// The reason phrase: the explicitly set one, falling back to the
    /// canonical phrase for the current status code.
    pub fn status_message(&self) -> Value {
        if let Some(message) = self.status_message.lock().clone() {
            return Value::Str(message);
        }
        let phrase = StatusCode::from_u16(self.status.load(Ordering::Acquire))
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("");
        Value::Str(phrase.into())
    }

    pub fn set_status_message(&self, message: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerResponse::setStatusMessage()";
        let message = expect_str(&self.env, message, "statusMessage", SITE)?;
        *self.status_message.lock() = Some(message);
        Ok(())
    }

    /// Chunked transfer is advisory here: the body is buffered in full and
    /// sent with a known length, so the flag is recorded but does not change
    /// the wire encoding.
    pub fn set_chunked(&self, chunked: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerResponse::setChunked()";
        let chunked = pontoon_script::expect_bool(&self.env, chunked, "chunked", SITE)?;
        self.chunked.store(chunked, Ordering::Release);
        Ok(())
    }

    pub fn is_chunked(&self) -> Value {
        Value::Bool(self.chunked.load(Ordering::Acquire))
    }

    /// Write-queue controls. The buffered response never exerts backpressure,
    /// so the max size is accepted and ignored and the queue is never full.
    pub fn set_write_queue_max_size(&self, size: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerResponse::setWriteQueueMaxSize()";
        expect_int(&self.env, size, "size", SITE)?;
        Ok(())
    }

    pub fn write_queue_full(&self) -> Value {
        Value::Bool(false)
    }

    pub fn put_header(&self, name: &Value, value: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerResponse::putHeader()";
        let name = expect_str(&self.env, name, "name", SITE)?;
        let value = expect_str(&self.env, value, "value", SITE)?;
        self.headers.lock().push((name, value));
        Ok(())
    }

    pub fn write(&self, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerResponse::write()";
        let bytes = expect_bytes(&self.env, data, "data", SITE)?;
        self.body.lock().extend_from_slice(&bytes);
        Ok(())
    }

    /// Finish the response, optionally appending a final chunk. Repeated
    /// ends are ignored.
    pub fn end(&self, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpServerResponse::end()";
        if !data.is_absent() {
            let bytes = expect_bytes(&self.env, data, "data", SITE)?;
            self.body.lock().extend_from_slice(&bytes);
        }
        if !self.ended.swap(true, Ordering::AcqRel) {
            self.core.respond(ResponseParts {
                status: self.status.load(Ordering::Acquire),
                headers: std::mem::take(&mut self.headers.lock()),
                body: std::mem::take(&mut self.body.lock()),
            });
        }
        Ok(())
    }

    pub fn close(&self) {
        let _ = self.end(&Value::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let (core, _rx) = HttpRequestCore::for_tests("GET", "/x");
        assert_eq!(core.header("content-type"), Some("text/plain"));
        assert_eq!(core.header("Accept"), None);
    }

    #[test]
    fn response_end_sends_exactly_once() {
        let (core, mut rx) = HttpRequestCore::for_tests("GET", "/");
        let response = HttpServerResponse::wrap(core, ScriptEnv::new("t.php"));
        response.set_status_code(&Value::Int(201)).unwrap();
        response.write(&Value::Str("hello".into())).unwrap();
        response.end(&Value::Str(" world".into())).unwrap();
        response.end(&Value::Null).unwrap();

        let parts = rx.try_recv().unwrap();
        assert_eq!(parts.status, 201);
        assert_eq!(parts.body, b"hello world");
    }

    #[test]
    fn response_reason_phrase_and_stream_pass_throughs() {
        let (core, _rx) = HttpRequestCore::for_tests("GET", "/");
        let response = HttpServerResponse::wrap(core, ScriptEnv::new("t.php"));

        assert_eq!(response.status_message(), Value::Str("OK".into()));
        response.set_status_code(&Value::Int(404)).unwrap();
        assert_eq!(response.status_message(), Value::Str("Not Found".into()));
        response
            .set_status_message(&Value::Str("Gone Fishing".into()))
            .unwrap();
        assert_eq!(response.status_message(), Value::Str("Gone Fishing".into()));

        assert_eq!(response.is_chunked(), Value::Bool(false));
        response.set_chunked(&Value::Bool(true)).unwrap();
        assert_eq!(response.is_chunked(), Value::Bool(true));
        assert!(response.set_chunked(&Value::Str("yes".into())).is_err());

        response.set_write_queue_max_size(&Value::Int(4096)).unwrap();
        assert_eq!(response.write_queue_full(), Value::Bool(false));
    }

    #[test]
    fn body_handler_delivers_the_collected_body() {
        let (core, _rx) = HttpRequestCore::for_tests("POST", "/in");
        let env = ScriptEnv::new("t.php");
        let request = HttpServerRequest::wrap(core, env.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callable = pontoon_script::Callable::new("onBody", move |_env, args| {
            let resource = args[0].as_resource().unwrap();
            let buffer = resource.downcast::<Buffer>().unwrap();
            sink.lock().push(buffer.to_utf8());
            Ok(())
        });
        request.body_handler(&Value::Callable(callable)).unwrap();
        assert_eq!(seen.lock().as_slice(), &["payload"]);
    }

    #[test]
    fn invalid_status_codes_are_rejected() {
        let (core, _rx) = HttpRequestCore::for_tests("GET", "/");
        let response = HttpServerResponse::wrap(core, ScriptEnv::new("t.php"));
        assert!(response.set_status_code(&Value::Int(42)).is_err());
        assert!(response.set_status_code(&Value::Int(302)).is_ok());
    }
}
