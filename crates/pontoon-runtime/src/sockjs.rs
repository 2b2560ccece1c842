//! SockJS-style app server: websocket connections dispatched to script
//! apps by path prefix, plus the event-bus bridge.
//!
//! The transport is the websocket layer; this module owns the app table,
//! the bridge's JSON frame protocol (`send`/`publish`/`register`/
//! `unregister`) and the permitted-address matching that gates it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pontoon_script::{
    Cause, EventHandler, ScriptEnv, ScriptResult, Value, expect_array, modified_handler,
    void_handler,
};
use regex::Regex;
use serde_json::Value as Json;
use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::bus::{BusMessage, EventBusCore};
use crate::error::RuntimeResult;
use crate::http_server::HttpServerCore;
use crate::streams::{ReadStream, SharedHandler, WriteStream, fn_handler};
use crate::websocket::WsCore;

/// One connection delivered to an installed app.
pub struct SockJSSocket {
    core: Arc<WsCore>,
    env: ScriptEnv,
}

impl SockJSSocket {
    pub const CLASS: &'static str = "Pontoon\\SockJS\\SockJSSocket";

    pub fn wrap(core: Arc<WsCore>, env: ScriptEnv) -> Arc<Self> {
        Arc::new(Self { core, env })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Resource(pontoon_script::Resource::from_arc(Self::CLASS, self.clone()))
    }

    pub fn data_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\SockJS\\SockJSSocket::dataHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, Buffer::into_value)?;
        self.core.set_data_handler(adapter);
        Ok(())
    }

    pub fn end_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\SockJS\\SockJSSocket::endHandler()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        self.core.set_end_handler(adapter);
        Ok(())
    }

    pub fn drain_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\SockJS\\SockJSSocket::drainHandler()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        self.core.set_drain_handler(adapter);
        Ok(())
    }

    pub fn exception_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\SockJS\\SockJSSocket::exceptionHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, |cause: Cause| {
            Value::Str(cause.to_string())
        })?;
        self.core.set_exception_handler(adapter);
        Ok(())
    }

    pub fn write_value(&self, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\SockJS\\SockJSSocket::write()";
        let bytes = crate::buffer::expect_bytes(&self.env, data, "data", SITE)?;
        self.core
            .write_binary(bytes)
            .map_err(|err| self.env.error(err.to_string()))
    }

    pub fn pause(&self) {
        self.core.pause();
    }

    pub fn resume(&self) {
        self.core.resume();
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn core(&self) -> &Arc<WsCore> {
        &self.core
    }
}

impl ReadStream for SockJSSocket {
    fn set_data_handler(&self, handler: SharedHandler<Buffer>) {
        self.core.set_data_handler(handler);
    }

    fn set_end_handler(&self, handler: SharedHandler<()>) {
        self.core.set_end_handler(handler);
    }

    fn set_exception_handler(&self, handler: SharedHandler<Cause>) {
        self.core.set_exception_handler(handler);
    }

    fn pause(&self) {
        self.core.pause();
    }

    fn resume(&self) {
        self.core.resume();
    }
}

impl WriteStream for SockJSSocket {
    fn write(&self, data: Buffer) -> RuntimeResult<()> {
        self.core.write_binary(data.to_vec())
    }

    fn set_write_queue_max_size(&self, _size: usize) {}

    fn write_queue_full(&self) -> bool {
        false
    }

    fn set_drain_handler(&self, handler: SharedHandler<()>) {
        self.core.set_drain_handler(handler);
    }
}

/// One entry of a permitted-address list. An entry with neither an exact
/// address nor a pattern matches every address; an empty list matches none.
struct Permitted {
    address: Option<String>,
    address_re: Option<Regex>,
}

impl Permitted {
    fn matches(&self, address: &str) -> bool {
        if let Some(exact) = &self.address {
            if exact != address {
                return false;
            }
        }
        if let Some(pattern) = &self.address_re {
            if !pattern.is_match(address) {
                return false;
            }
        }
        true
    }
}

fn address_allowed(list: &[Permitted], address: &str) -> bool {
    list.iter().any(|entry| entry.matches(address))
}

fn permitted_list(
    env: &ScriptEnv,
    value: &Value,
    param: &str,
    site: &str,
) -> ScriptResult<Vec<Permitted>> {
    let array = expect_array(env, value, param, site)?;
    let mut list = Vec::new();
    for entry in array.values() {
        let entry = expect_array(env, entry, param, site)?;
        let address = entry
            .get_str("address")
            .and_then(|v| v.as_str().map(str::to_string));
        let address_re = match entry.get_str("address_re").and_then(|v| v.as_str()) {
            None => None,
            Some(pattern) => Some(Regex::new(pattern).map_err(|err| {
                env.error(format!(
                    "{} entry in {} has an invalid address_re: {}.",
                    param, site, err
                ))
            })?),
        };
        list.push(Permitted {
            address,
            address_re,
        });
    }
    Ok(list)
}

struct BridgeConfig {
    bus: EventBusCore,
    inbound: Vec<Permitted>,
    outbound: Vec<Permitted>,
}

/// One bridged connection: parses frames off the socket and moves messages
/// between it and the event bus.
struct BridgeConnection {
    socket: Arc<WsCore>,
    config: Arc<BridgeConfig>,
    registrations: Mutex<HashMap<String, u64>>,
}

impl BridgeConnection {
    fn attach(socket: Arc<WsCore>, config: Arc<BridgeConfig>) {
        let conn = Arc::new(Self {
            socket: socket.clone(),
            config,
            registrations: Mutex::new(HashMap::new()),
        });
        socket.set_data_handler(conn.clone());
        let teardown = conn.clone();
        socket.set_close_handler(fn_handler(move |()| teardown.teardown()));
    }

    fn teardown(&self) {
        let ids: Vec<u64> = self.registrations.lock().drain().map(|(_, id)| id).collect();
        for id in ids {
            self.config.bus.unregister(id);
        }
    }

    fn handle_frame(&self, frame: &[u8]) {
        let message: Json = match serde_json::from_slice(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "malformed bridge frame dropped");
                return;
            }
        };
        let Some(kind) = message.get("type").and_then(Json::as_str) else {
            warn!("bridge frame without a type dropped");
            return;
        };
        let Some(address) = message.get("address").and_then(Json::as_str) else {
            warn!(kind, "bridge frame without an address dropped");
            return;
        };
        match kind {
            "send" | "publish" => {
                if !address_allowed(&self.config.inbound, address) {
                    debug!(address, "inbound bridge message rejected");
                    return;
                }
                let body = message.get("body").cloned().unwrap_or(Json::Null);
                if kind == "publish" {
                    self.config.bus.publish(address, body);
                    return;
                }
                let reply = message
                    .get("replyAddress")
                    .and_then(Json::as_str)
                    .map(|reply_address| {
                        let reply_address = reply_address.to_string();
                        let socket = self.socket.clone();
                        fn_handler(move |reply: BusMessage| {
                            let frame = serde_json::json!({
                                "address": reply_address,
                                "body": reply.body,
                            });
                            if socket.write_text(frame.to_string()).is_err() {
                                trace!("bridge reply after close dropped");
                            }
                        })
                    });
                self.config.bus.send(address, body, reply);
            }
            "register" => {
                if !address_allowed(&self.config.outbound, address) {
                    debug!(address, "outbound bridge registration rejected");
                    return;
                }
                let mut registrations = self.registrations.lock();
                if registrations.contains_key(address) {
                    return;
                }
                let socket = self.socket.clone();
                let delivery_address = address.to_string();
                let id = self.config.bus.register(
                    address,
                    fn_handler(move |message: BusMessage| {
                        let frame = serde_json::json!({
                            "address": delivery_address,
                            "body": message.body,
                        });
                        if socket.write_text(frame.to_string()).is_err() {
                            trace!("bridge delivery after close dropped");
                        }
                    }),
                );
                registrations.insert(address.to_string(), id);
            }
            "unregister" => {
                if let Some(id) = self.registrations.lock().remove(address) {
                    self.config.bus.unregister(id);
                }
            }
            other => {
                warn!(kind = other, "unknown bridge frame type dropped");
            }
        }
    }
}

impl EventHandler<Buffer> for BridgeConnection {
    fn handle(&self, frame: Buffer) {
        self.handle_frame(&frame.to_vec());
    }
}

enum AppKind {
    Script(SharedHandler<Arc<WsCore>>),
    Bridge(Arc<BridgeConfig>),
}

struct App {
    prefix: String,
    kind: AppKind,
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

/// Routes incoming websocket connections to the installed apps.
struct AppDispatcher {
    apps: Arc<Mutex<Vec<Arc<App>>>>,
}

impl EventHandler<(Arc<WsCore>, String)> for AppDispatcher {
    fn handle(&self, (socket, path): (Arc<WsCore>, String)) {
        let app = self
            .apps
            .lock()
            .iter()
            .find(|app| prefix_matches(&app.prefix, &path))
            .cloned();
        match app {
            Some(app) => match &app.kind {
                AppKind::Script(handler) => handler.handle(socket),
                AppKind::Bridge(config) => BridgeConnection::attach(socket, config.clone()),
            },
            None => {
                debug!(path, "no app installed for connection");
                socket.close();
            }
        }
    }
}

/// The script-facing app server. Attached to an HTTP server at construction;
/// apps are installed per path prefix.
pub struct SockJSServer {
    server: Arc<HttpServerCore>,
    bus: EventBusCore,
    env: ScriptEnv,
    apps: Arc<Mutex<Vec<Arc<App>>>>,
}

impl SockJSServer {
    pub const CLASS: &'static str = "Pontoon\\SockJS\\SockJSServer";

    pub fn new(server: Arc<HttpServerCore>, bus: EventBusCore, env: ScriptEnv) -> Self {
        let apps: Arc<Mutex<Vec<Arc<App>>>> = Arc::new(Mutex::new(Vec::new()));
        server.set_ws_handler(Arc::new(AppDispatcher { apps: apps.clone() }));
        Self {
            server,
            bus,
            env,
            apps,
        }
    }

    /// Install a script app: every connection under the configured prefix is
    /// delivered to the handler as a socket.
    pub fn install_app(&self, config: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\SockJS\\SockJSServer::installApp()";
        let prefix = self.prefix_from(config, SITE)?;
        let env = self.env.clone();
        let adapter = modified_handler(&self.env, handler, SITE, move |core: Arc<WsCore>| {
            SockJSSocket::wrap(core, env.clone()).value()
        })?;
        self.apps.lock().push(Arc::new(App {
            prefix,
            kind: AppKind::Script(adapter),
        }));
        Ok(())
    }

    /// Install the event-bus bridge app. Frames from connected clients are
    /// moved onto the bus when the inbound list permits their address;
    /// registrations are accepted when the outbound list permits theirs.
    pub fn bridge(
        &self,
        config: &Value,
        inbound_permitted: &Value,
        outbound_permitted: &Value,
    ) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\SockJS\\SockJSServer::bridge()";
        let prefix = self.prefix_from(config, SITE)?;
        let inbound = permitted_list(&self.env, inbound_permitted, "inboundPermitted", SITE)?;
        let outbound = permitted_list(&self.env, outbound_permitted, "outboundPermitted", SITE)?;
        self.apps.lock().push(Arc::new(App {
            prefix,
            kind: AppKind::Bridge(Arc::new(BridgeConfig {
                bus: self.bus.clone(),
                inbound,
                outbound,
            })),
        }));
        Ok(())
    }

    pub fn server(&self) -> &Arc<HttpServerCore> {
        &self.server
    }

    fn prefix_from(&self, config: &Value, site: &str) -> ScriptResult<String> {
        let config = expect_array(&self.env, config, "config", site)?;
        config
            .get_str("prefix")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| {
                self.env
                    .error(format!("config argument to {} must contain a prefix.", site))
            })
    }
}

pub(crate) fn sockjs_server_from_args(
    bus: &EventBusCore,
    env: &ScriptEnv,
    args: &[Value],
    site: &str,
) -> ScriptResult<SockJSServer> {
    let server = args
        .first()
        .and_then(Value::as_resource)
        .and_then(|r| r.downcast::<crate::http_server::HttpServer>())
        .ok_or_else(|| {
            env.error(format!("server argument to {} must be an HTTP server.", site))
        })?;
    Ok(SockJSServer::new(
        server.core().clone(),
        bus.clone(),
        env.clone(),
    ))
}
