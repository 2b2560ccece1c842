//! HTTP client: reqwest-backed requests with script response handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use parking_lot::Mutex;
use pontoon_script::{
    Array, Callable, EventHandler, Handler, ScriptEnv, ScriptResult, Value, expect_callable,
    expect_str, modified_handler, void_handler,
};
use tokio::runtime::Handle;
use tracing::warn;

use crate::buffer::{Buffer, expect_bytes};
use crate::net::expect_port;
use crate::streams::SharedHandler;
use crate::websocket::{WebSocketWrapper, WsCore};

/// The response as delivered to the script handler: status, headers and the
/// collected body.
pub struct HttpResponseCore {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Script-facing HTTP client. Host and port are set up front; requests take
/// relative URIs.
pub struct HttpClient {
    handle: Handle,
    env: ScriptEnv,
    client: reqwest::Client,
    host: Mutex<String>,
    port: AtomicU16,
    exception: Mutex<Option<Callable>>,
}

impl HttpClient {
    pub const CLASS: &'static str = "Pontoon\\Http\\HttpClient";

    pub fn new(handle: Handle, env: ScriptEnv) -> Self {
        Self {
            handle,
            env,
            client: reqwest::Client::new(),
            host: Mutex::new("localhost".into()),
            port: AtomicU16::new(80),
            exception: Mutex::new(None),
        }
    }

    pub fn set_host(&self, host: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClient::setHost()";
        let host = expect_str(&self.env, host, "host", SITE)?;
        *self.host.lock() = host;
        Ok(())
    }

    pub fn set_port(&self, port: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClient::setPort()";
        let port = expect_port(&self.env, port, SITE)?;
        self.port.store(port, Ordering::Release);
        Ok(())
    }

    pub fn host(&self) -> Value {
        Value::Str(self.host.lock().clone())
    }

    pub fn port(&self) -> Value {
        Value::Int(self.port.load(Ordering::Acquire) as i64)
    }

    /// Errors from requests whose exceptions have nowhere else to go.
    pub fn exception_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClient::exceptionHandler()";
        let callable = expect_callable(&self.env, handler, "handler", SITE)?;
        *self.exception.lock() = Some(callable);
        Ok(())
    }

    /// Open a request. Nothing goes on the wire until the request's `end`.
    pub fn request(&self, method: &Value, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\Http\\HttpClient::request()";
        let request = self.build_request(method, uri, handler, SITE)?;
        Ok(Value::Resource(pontoon_script::Resource::from_arc(
            HttpClientRequest::CLASS,
            request,
        )))
    }

    /// Fire-and-read convenience: `GET` the uri and hand the response to the
    /// handler.
    pub fn get_now(&self, uri: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClient::getNow()";
        let request = self.build_request(&Value::Str("GET".into()), uri, handler, SITE)?;
        request.end(&Value::Null)
    }

    pub fn get(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("GET", "Pontoon\\Http\\HttpClient::get()", uri, handler)
    }

    pub fn put(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("PUT", "Pontoon\\Http\\HttpClient::put()", uri, handler)
    }

    pub fn post(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("POST", "Pontoon\\Http\\HttpClient::post()", uri, handler)
    }

    pub fn delete(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("DELETE", "Pontoon\\Http\\HttpClient::delete()", uri, handler)
    }

    pub fn head(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("HEAD", "Pontoon\\Http\\HttpClient::head()", uri, handler)
    }

    pub fn options(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("OPTIONS", "Pontoon\\Http\\HttpClient::options()", uri, handler)
    }

    pub fn patch(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("PATCH", "Pontoon\\Http\\HttpClient::patch()", uri, handler)
    }

    pub fn trace(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("TRACE", "Pontoon\\Http\\HttpClient::trace()", uri, handler)
    }

    pub fn connect(&self, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        self.verb("CONNECT", "Pontoon\\Http\\HttpClient::connect()", uri, handler)
    }

    /// Per-verb variant of [`request`](Self::request): the method is fixed and
    /// only uri and handler come from the script.
    fn verb(&self, method: &str, site: &str, uri: &Value, handler: &Value) -> ScriptResult<Value> {
        let request = self.build_request(&Value::Str(method.into()), uri, handler, site)?;
        Ok(Value::Resource(pontoon_script::Resource::from_arc(
            HttpClientRequest::CLASS,
            request,
        )))
    }

    fn build_request(
        &self,
        method: &Value,
        uri: &Value,
        handler: &Value,
        site: &str,
    ) -> ScriptResult<Arc<HttpClientRequest>> {
        let method = expect_str(&self.env, method, "method", site)?.to_uppercase();
        let uri = expect_str(&self.env, uri, "uri", site)?;
        let env = self.env.clone();
        let on_response = modified_handler(
            &self.env,
            handler,
            site,
            move |core: Arc<HttpResponseCore>| {
                HttpClientResponse::wrap(core, env.clone()).value()
            },
        )?;
        Ok(Arc::new(HttpClientRequest {
            env: self.env.clone(),
            handle: self.handle.clone(),
            client: self.client.clone(),
            url_base: format!(
                "http://{}:{}",
                self.host.lock(),
                self.port.load(Ordering::Acquire)
            ),
            method,
            uri,
            headers: Mutex::new(Vec::new()),
            body: Mutex::new(Vec::new()),
            sent: AtomicBool::new(false),
            on_response,
            exception: Mutex::new(self.exception.lock().clone()),
        }))
    }

    /// Open a websocket to the configured host and port.
    pub fn connect_websocket(&self, uri: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClient::connectWebsocket()";
        let uri = expect_str(&self.env, uri, "uri", SITE)?;
        let env = self.env.clone();
        let on_connect = modified_handler(
            &self.env,
            handler,
            SITE,
            move |core: Arc<WsCore>| WebSocketWrapper::wrap(core, "", env.clone()).value(),
        )?;
        let url = format!(
            "ws://{}:{}{}",
            self.host.lock(),
            self.port.load(Ordering::Acquire),
            uri
        );
        let exception = self.exception.lock().clone();
        let env = self.env.clone();
        let handle = self.handle.clone();
        self.handle.spawn(async move {
            match tokio_tungstenite::connect_async(&url).await {
                Ok((stream, _response)) => {
                    let core = WsCore::spawn(stream, &handle);
                    on_connect.handle(core);
                }
                Err(err) => report_exception(&env, &exception, &err.to_string()),
            }
        });
        Ok(())
    }
}

fn report_exception(env: &ScriptEnv, exception: &Option<Callable>, message: &str) {
    match exception {
        Some(callable) => {
            if let Err(fault) = callable.call(env, &[Value::Str(message.to_string())]) {
                env.report_fault(&fault);
            }
        }
        None => warn!(error = message, "http client request failed"),
    }
}

/// An open request: headers and body accumulate until `end` sends it.
pub struct HttpClientRequest {
    env: ScriptEnv,
    handle: Handle,
    client: reqwest::Client,
    url_base: String,
    method: String,
    uri: String,
    headers: Mutex<Vec<(String, String)>>,
    body: Mutex<Vec<u8>>,
    sent: AtomicBool,
    on_response: Arc<Handler<Arc<HttpResponseCore>>>,
    exception: Mutex<Option<Callable>>,
}

impl HttpClientRequest {
    pub const CLASS: &'static str = "Pontoon\\Http\\HttpClientRequest";

    pub fn put_header(&self, name: &Value, value: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClientRequest::putHeader()";
        let name = expect_str(&self.env, name, "name", SITE)?;
        let value = expect_str(&self.env, value, "value", SITE)?;
        self.headers.lock().push((name, value));
        Ok(())
    }

    pub fn write(&self, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClientRequest::write()";
        let bytes = expect_bytes(&self.env, data, "data", SITE)?;
        self.body.lock().extend_from_slice(&bytes);
        Ok(())
    }

    pub fn exception_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClientRequest::exceptionHandler()";
        let callable = expect_callable(&self.env, handler, "handler", SITE)?;
        *self.exception.lock() = Some(callable);
        Ok(())
    }

    /// Send the request, optionally appending a final body chunk. A request
    /// is sent at most once.
    pub fn end(&self, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClientRequest::end()";
        if !data.is_absent() {
            let bytes = expect_bytes(&self.env, data, "data", SITE)?;
            self.body.lock().extend_from_slice(&bytes);
        }
        if self.sent.swap(true, Ordering::AcqRel) {
            return Err(self.env.error(format!("{} called twice.", SITE)));
        }
        let method = reqwest::Method::from_bytes(self.method.as_bytes())
            .map_err(|_| self.env.error(format!("invalid method {}.", self.method)))?;
        let url = format!("{}{}", self.url_base, self.uri);
        let mut builder = self.client.request(method, &url);
        for (name, value) in self.headers.lock().iter() {
            builder = builder.header(name, value);
        }
        let body = std::mem::take(&mut *self.body.lock());
        if !body.is_empty() {
            builder = builder.body(body);
        }
        let on_response = self.on_response.clone();
        let exception = self.exception.lock().clone();
        let env = self.env.clone();
        self.handle.spawn(async move {
            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    report_exception(&env, &exception, &err.to_string());
                    return;
                }
            };
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            match response.bytes().await {
                Ok(body) => {
                    on_response.handle(Arc::new(HttpResponseCore {
                        status,
                        headers,
                        body: body.to_vec(),
                    }));
                }
                Err(err) => report_exception(&env, &exception, &err.to_string()),
            }
        });
        Ok(())
    }
}

/// Script-facing response. The body is fully collected before delivery.
pub struct HttpClientResponse {
    core: Arc<HttpResponseCore>,
    env: ScriptEnv,
}

impl HttpClientResponse {
    pub const CLASS: &'static str = "Pontoon\\Http\\HttpClientResponse";

    pub fn wrap(core: Arc<HttpResponseCore>, env: ScriptEnv) -> Arc<Self> {
        Arc::new(Self { core, env })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Resource(pontoon_script::Resource::from_arc(Self::CLASS, self.clone()))
    }

    pub fn status_code(&self) -> Value {
        Value::Int(self.core.status as i64)
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
        const SITE: &str = "Pontoon\\Http\\HttpClientResponse::header()";
        let name = expect_str(&self.env, name, "name", SITE)?;
        Ok(self
            .core
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
            .map_or(Value::Null, |(_, value)| Value::Str(value.clone())))
    }

    /// Deliver the whole body as one buffer.
    pub fn body_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClientResponse::bodyHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, Buffer::into_value)?;
        adapter.handle(Buffer::from_bytes(self.core.body.clone()));
        Ok(())
    }

    pub fn data_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClientResponse::dataHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, Buffer::into_value)?;
        if !self.core.body.is_empty() {
            adapter.handle(Buffer::from_bytes(self.core.body.clone()));
        }
        Ok(())
    }

    pub fn end_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\HttpClientResponse::endHandler()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        adapter.handle(());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_wrapper_exposes_status_headers_and_body() {
        let env = ScriptEnv::new("t.php");
        let core = Arc::new(HttpResponseCore {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: br#"{"ok":true}"#.to_vec(),
        });
        let response = HttpClientResponse::wrap(core, env);
        assert_eq!(response.status_code(), Value::Int(200));
        assert_eq!(
            response.header(&Value::Str("content-type".into())).unwrap(),
            Value::Str("application/json".into())
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callable = Callable::new("onBody", move |_env, args| {
            let buffer = args[0]
                .as_resource()
                .unwrap()
                .downcast::<Buffer>()
                .unwrap();
            sink.lock().push(buffer.to_utf8());
            Ok(())
        });
        response.body_handler(&Value::Callable(callable)).unwrap();
        assert_eq!(seen.lock().as_slice(), &[r#"{"ok":true}"#]);
    }

    #[tokio::test]
    async fn verb_helpers_open_requests_and_validate_handlers() {
        let env = ScriptEnv::new("t.php");
        let client = HttpClient::new(Handle::current(), env);
        let noop = Callable::new("noop", |_, _| Ok(()));
        let request = client
            .post(&Value::Str("/items".into()), &Value::Callable(noop))
            .unwrap();
        assert!(
            request
                .as_resource()
                .and_then(|r| r.downcast::<HttpClientRequest>())
                .is_some()
        );

        let err = client
            .put(&Value::Str("/items".into()), &Value::Int(3))
            .unwrap_err();
        assert!(err.to_string().contains("Pontoon\\Http\\HttpClient::put()"));
    }

    #[tokio::test]
    async fn request_end_twice_is_an_error() {
        let env = ScriptEnv::new("t.php");
        let client = HttpClient::new(Handle::current(), env);
        client.set_port(&Value::Int(1)).unwrap();
        let noop = Callable::new("noop", |_, _| Ok(()));
        let request = client
            .request(
                &Value::Str("GET".into()),
                &Value::Str("/".into()),
                &Value::Callable(noop),
            )
            .unwrap();
        let request = request
            .as_resource()
            .and_then(|r| r.downcast::<HttpClientRequest>())
            .unwrap();
        assert!(request.end(&Value::Null).is_ok());
        assert!(request.end(&Value::Null).is_err());
    }
}
