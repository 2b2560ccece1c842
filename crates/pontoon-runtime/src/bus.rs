//! In-process event bus: point-to-point send, publish, and replies.
//!
//! Delivery is synchronous on the caller's task. Point-to-point sends pick
//! one subscriber round-robin; publish delivers to every subscriber of the
//! address. Replies ride on generated one-shot addresses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use pontoon_script::{
    EventHandler, ScriptEnv, ScriptResult, Value, array_to_json, expect_callable, expect_str,
    json_to_value, void_async_handler,
};
use serde_json::Value as Json;
use tracing::{debug, trace};

use crate::streams::SharedHandler;

/// A message as it travels on the bus.
#[derive(Clone, Debug)]
pub struct BusMessage {
    pub body: Json,
    pub reply_address: Option<String>,
}

struct Subscription {
    id: u64,
    handler: SharedHandler<BusMessage>,
}

struct BusInner {
    subs: DashMap<String, Vec<Subscription>>,
    // Registration id -> address, the record unregistration consults.
    registrations: DashMap<u64, String>,
    cursor: DashMap<String, usize>,
    next_id: AtomicU64,
}

/// The native bus. Wrappers and platform services share one instance.
#[derive(Clone)]
pub struct EventBusCore {
    inner: Arc<BusInner>,
}

impl EventBusCore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subs: DashMap::new(),
                registrations: DashMap::new(),
                cursor: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe a handler at an address. The returned id is the only handle
    /// needed to unregister; ids are process-unique and never reused.
    pub fn register(&self, address: &str, handler: SharedHandler<BusMessage>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subs
            .entry(address.to_string())
            .or_default()
            .push(Subscription { id, handler });
        self.inner.registrations.insert(id, address.to_string());
        debug!(address, registration_id = id, "handler registered");
        id
    }

    /// Remove a registration by id. Unknown ids are a no-op; the second of
    /// two unregisters for the same id returns false.
    pub fn unregister(&self, id: u64) -> bool {
        let Some((_, address)) = self.inner.registrations.remove(&id) else {
            return false;
        };
        if let Some(mut subs) = self.inner.subs.get_mut(&address) {
            subs.retain(|sub| sub.id != id);
        }
        debug!(address, registration_id = id, "handler unregistered");
        true
    }

    pub fn subscriber_count(&self, address: &str) -> usize {
        self.inner.subs.get(address).map_or(0, |subs| subs.len())
    }

    /// Point-to-point: deliver to one subscriber, rotating between them.
    /// Messages to addresses with no subscriber are dropped.
    pub fn send(&self, address: &str, body: Json, reply: Option<SharedHandler<BusMessage>>) {
        let reply_address = reply.map(|handler| self.register_reply(handler));
        let target = {
            let Some(subs) = self.inner.subs.get(address) else {
                trace!(address, "send dropped, no subscriber");
                return;
            };
            if subs.is_empty() {
                return;
            }
            let mut cursor = self.inner.cursor.entry(address.to_string()).or_insert(0);
            let index = *cursor % subs.len();
            *cursor = cursor.wrapping_add(1);
            subs[index].handler.clone()
        };
        target.handle(BusMessage {
            body,
            reply_address,
        });
    }

    /// Deliver to every subscriber of the address.
    pub fn publish(&self, address: &str, body: Json) {
        let targets: Vec<SharedHandler<BusMessage>> = match self.inner.subs.get(address) {
            Some(subs) => subs.iter().map(|sub| sub.handler.clone()).collect(),
            None => return,
        };
        for handler in targets {
            handler.handle(BusMessage {
                body: body.clone(),
                reply_address: None,
            });
        }
    }

    /// Register a reply handler on a generated address that unregisters
    /// itself after the first delivery.
    fn register_reply(&self, handler: SharedHandler<BusMessage>) -> String {
        let bus = self.clone();
        let address = format!(
            "__pontoon.reply.{}",
            self.inner.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let slot: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
        let one_shot = {
            let slot = slot.clone();
            crate::streams::fn_handler(move |message: BusMessage| {
                if let Some(id) = slot.lock().take() {
                    bus.unregister(id);
                    handler.handle(message);
                }
            })
        };
        let id = self.register(&address, one_shot);
        *slot.lock() = Some(id);
        address
    }

    pub fn clear(&self) {
        self.inner.subs.clear();
        self.inner.registrations.clear();
        self.inner.cursor.clear();
    }
}

impl Default for EventBusCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Coerce a script message argument to the wire format. Scalars and arrays
/// are accepted; resources and callables are not.
fn message_body(env: &ScriptEnv, value: &Value, site: &str) -> ScriptResult<Json> {
    match value {
        Value::Array(array) => array_to_json(array).map_err(|err| env.error(err.to_string())),
        Value::Null | Value::Default => Ok(Json::Null),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {
            pontoon_script::value_to_json(value).map_err(|err| env.error(err.to_string()))
        }
        other => Err(env.error(format!(
            "message argument to {} must be a scalar or array, {} given.",
            site,
            other.kind()
        ))),
    }
}

/// A received message, as exposed to scripts.
pub struct Message {
    core: EventBusCore,
    env: ScriptEnv,
    native: BusMessage,
}

impl Message {
    pub const CLASS: &'static str = "Pontoon\\EventBus\\Message";

    pub fn body(&self) -> Value {
        json_to_value(&self.native.body)
    }

    /// Reply to a point-to-point message. Ignored when the sender did not
    /// ask for a reply.
    pub fn reply(&self, message: &Value, reply_handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\EventBus\\Message::reply()";
        let body = message_body(&self.env, message, SITE)?;
        let on_reply = self.env_handler(reply_handler, SITE)?;
        if let Some(address) = &self.native.reply_address {
            self.core.send(address, body, on_reply);
        }
        Ok(())
    }

    fn env_handler(
        &self,
        value: &Value,
        site: &str,
    ) -> ScriptResult<Option<SharedHandler<BusMessage>>> {
        if value.is_absent() {
            return Ok(None);
        }
        let callable = expect_callable(&self.env, value, "replyHandler", site)?;
        Ok(Some(message_adapter(
            self.core.clone(),
            self.env.clone(),
            callable,
        )))
    }
}

/// Build the adapter that wraps an incoming native message into a script
/// resource before invoking the callable.
fn message_adapter(
    core: EventBusCore,
    env: ScriptEnv,
    callable: pontoon_script::Callable,
) -> SharedHandler<BusMessage> {
    let adapter_env = env.clone();
    Arc::new(pontoon_script::Handler::with_modifier(
        env,
        callable,
        move |native: BusMessage| {
            Value::resource(
                Message::CLASS,
                Message {
                    core: core.clone(),
                    env: adapter_env.clone(),
                    native,
                },
            )
        },
    ))
}

/// The script-facing event bus wrapper. Tracks the registrations it created
/// so `close` can tear them down without touching other bus users.
pub struct EventBus {
    core: EventBusCore,
    env: ScriptEnv,
    registrations: Mutex<Vec<u64>>,
}

impl EventBus {
    pub const CLASS: &'static str = "Pontoon\\EventBus";

    pub fn new(core: EventBusCore, env: ScriptEnv) -> Self {
        Self {
            core,
            env,
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Register a script callable at an address. Returns the registration
    /// id as a string. The optional result handler is completed once the
    /// registration is effective, which for the local bus is immediately.
    pub fn register_handler(
        &self,
        address: &Value,
        handler: &Value,
        result_handler: &Value,
    ) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\EventBus::registerHandler()";
        let address = expect_str(&self.env, address, "address", SITE)?;
        let callable = expect_callable(&self.env, handler, "handler", SITE)?;
        let on_registered = if result_handler.is_absent() {
            None
        } else {
            Some(void_async_handler(&self.env, result_handler, SITE)?)
        };
        let adapter = message_adapter(self.core.clone(), self.env.clone(), callable);
        let id = self.core.register(&address, adapter);
        self.registrations.lock().push(id);
        if let Some(on_registered) = on_registered {
            on_registered.handle(Ok(()));
        }
        Ok(Value::Str(id.to_string()))
    }

    /// Register a handler that only ever sees messages from this process.
    /// The bus is in-process, so this is the same registration path as
    /// `registerHandler`.
    pub fn register_local_handler(
        &self,
        address: &Value,
        handler: &Value,
        result_handler: &Value,
    ) -> ScriptResult<Value> {
        self.register_handler(address, handler, result_handler)
    }

    /// Remove a registration by the id `registerHandler` returned.
    /// Unknown ids are ignored.
    pub fn unregister_handler(&self, id: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\EventBus::unregisterHandler()";
        let id = expect_str(&self.env, id, "id", SITE)?;
        let Ok(id) = id.parse::<u64>() else {
            return Ok(());
        };
        self.core.unregister(id);
        self.registrations.lock().retain(|held| *held != id);
        Ok(())
    }

    /// Tear down every registration this wrapper created, then complete the
    /// optional done handler. Other handlers on the bus are untouched.
    pub fn close(&self, done_handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\EventBus::close()";
        let on_done = if done_handler.is_absent() {
            None
        } else {
            Some(void_async_handler(&self.env, done_handler, SITE)?)
        };
        for id in self.registrations.lock().drain(..) {
            self.core.unregister(id);
        }
        if let Some(on_done) = on_done {
            on_done.handle(Ok(()));
        }
        Ok(())
    }

    pub fn send(&self, address: &Value, message: &Value, reply_handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\EventBus::send()";
        let address = expect_str(&self.env, address, "address", SITE)?;
        let body = message_body(&self.env, message, SITE)?;
        let on_reply = if reply_handler.is_absent() {
            None
        } else {
            let callable = expect_callable(&self.env, reply_handler, "replyHandler", SITE)?;
            Some(message_adapter(
                self.core.clone(),
                self.env.clone(),
                callable,
            ))
        };
        self.core.send(&address, body, on_reply);
        Ok(())
    }

    pub fn publish(&self, address: &Value, message: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\EventBus::publish()";
        let address = expect_str(&self.env, address, "address", SITE)?;
        let body = message_body(&self.env, message, SITE)?;
        self.core.publish(&address, body);
        Ok(())
    }
}
