//! The root facade class scripts interact with, plus the container logger.

use pontoon_script::{
    EventHandler, ScriptEnv, ScriptResult, Value, expect_int, expect_str, json_to_value,
    modified_handler, void_handler,
};

use crate::bus::EventBus;
use crate::context::Platform;
use crate::fs::FileSystem;
use crate::http_client::HttpClient;
use crate::http_server::HttpServer;
use crate::net::{NetClient, NetServer};
use crate::shareddata::SharedData;

/// The root platform object: a handle to everything else.
pub struct Pontoon {
    platform: Platform,
    env: ScriptEnv,
}

impl Pontoon {
    pub const CLASS: &'static str = "Pontoon";

    pub fn new(platform: Platform, env: ScriptEnv) -> Self {
        Self { platform, env }
    }

    pub fn event_bus(&self) -> Value {
        Value::resource(
            EventBus::CLASS,
            EventBus::new(self.platform.bus().clone(), self.env.clone()),
        )
    }

    pub fn shared_data(&self) -> Value {
        Value::resource(
            SharedData::CLASS,
            SharedData::new(self.platform.shared_data().clone(), self.env.clone()),
        )
    }

    pub fn file_system(&self) -> Value {
        Value::resource(
            FileSystem::CLASS,
            FileSystem::new(self.platform.handle().clone(), self.env.clone()),
        )
    }

    pub fn create_net_server(&self) -> Value {
        Value::resource(
            NetServer::CLASS,
            NetServer::new(self.platform.handle().clone(), self.env.clone()),
        )
    }

    pub fn create_net_client(&self) -> Value {
        Value::resource(
            NetClient::CLASS,
            NetClient::new(self.platform.handle().clone(), self.env.clone()),
        )
    }

    pub fn create_http_server(&self) -> Value {
        Value::resource(
            HttpServer::CLASS,
            HttpServer::new(self.platform.handle().clone(), self.env.clone()),
        )
    }

    pub fn create_http_client(&self) -> Value {
        Value::resource(
            HttpClient::CLASS,
            HttpClient::new(self.platform.handle().clone(), self.env.clone()),
        )
    }

    /// Attach an app server to an existing HTTP server.
    pub fn create_sockjs_server(&self, server: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon::createSockJSServer()";
        let args = [server.clone()];
        let sockjs =
            crate::sockjs::sockjs_server_from_args(self.platform.bus(), &self.env, &args, SITE)?;
        Ok(Value::resource(
            crate::sockjs::SockJSServer::CLASS,
            sockjs,
        ))
    }

    /// `setTimer(delayMs, handler)` -> timer id. The handler receives the
    /// id, so one callable can serve several timers.
    pub fn set_timer(&self, delay: &Value, handler: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon::setTimer()";
        let delay = non_negative_ms(&self.env, delay, SITE)?;
        let adapter = modified_handler(&self.env, handler, SITE, |id: u64| Value::Int(id as i64))?;
        Ok(Value::Int(
            self.platform.timers().set_timer(delay, adapter) as i64
        ))
    }

    pub fn set_periodic(&self, interval: &Value, handler: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon::setPeriodic()";
        let interval = non_negative_ms(&self.env, interval, SITE)?;
        let adapter = modified_handler(&self.env, handler, SITE, |id: u64| Value::Int(id as i64))?;
        Ok(Value::Int(
            self.platform.timers().set_periodic(interval, adapter) as i64,
        ))
    }

    pub fn cancel_timer(&self, id: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon::cancelTimer()";
        let id = expect_int(&self.env, id, "id", SITE)?;
        if id < 0 {
            return Ok(Value::Bool(false));
        }
        Ok(Value::Bool(self.platform.timers().cancel(id as u64)))
    }

    /// Run a callable on the platform's executor as soon as possible.
    pub fn run_on_context(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon::runOnContext()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        self.platform.handle().spawn(async move {
            adapter.handle(());
        });
        Ok(())
    }

    /// The deployment configuration, as a script value.
    pub fn config(&self) -> Value {
        json_to_value(self.platform.config())
    }

    pub fn logger(&self) -> Value {
        Value::resource(Logger::CLASS, Logger::new(self.env.clone()))
    }

    /// Stop this execution unit's platform services: pending timers are
    /// cancelled and bus registrations dropped.
    pub fn exit(&self) {
        self.platform.shutdown();
    }
}

fn non_negative_ms(env: &ScriptEnv, value: &Value, site: &str) -> ScriptResult<u64> {
    let ms = expect_int(env, value, "delay", site)?;
    u64::try_from(ms)
        .map_err(|_| env.error(format!("delay argument to {} must not be negative.", site)))
}

/// Container logger, bridged to `tracing`.
pub struct Logger {
    env: ScriptEnv,
}

impl Logger {
    pub const CLASS: &'static str = "Pontoon\\Logger";

    pub fn new(env: ScriptEnv) -> Self {
        Self { env }
    }

    pub fn trace(&self, message: &Value) -> ScriptResult<()> {
        let message = self.message(message, "Pontoon\\Logger::trace()")?;
        tracing::trace!(target: "script", "{message}");
        Ok(())
    }

    pub fn debug(&self, message: &Value) -> ScriptResult<()> {
        let message = self.message(message, "Pontoon\\Logger::debug()")?;
        tracing::debug!(target: "script", "{message}");
        Ok(())
    }

    pub fn info(&self, message: &Value) -> ScriptResult<()> {
        let message = self.message(message, "Pontoon\\Logger::info()")?;
        tracing::info!(target: "script", "{message}");
        Ok(())
    }

    pub fn warn(&self, message: &Value) -> ScriptResult<()> {
        let message = self.message(message, "Pontoon\\Logger::warn()")?;
        tracing::warn!(target: "script", "{message}");
        Ok(())
    }

    pub fn error(&self, message: &Value) -> ScriptResult<()> {
        let message = self.message(message, "Pontoon\\Logger::error()")?;
        tracing::error!(target: "script", "{message}");
        Ok(())
    }

    fn message(&self, value: &Value, site: &str) -> ScriptResult<String> {
        expect_str(&self.env, value, "message", site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pontoon_script::Callable;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn set_timer_delivers_the_timer_id() {
        let platform = Platform::new(Handle::current());
        let env = ScriptEnv::new("t.php");
        let facade = Pontoon::new(platform, env);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let on_timer = Callable::new("onTimer", move |_env, args| {
            sink.lock().push(args[0].clone());
            Ok(())
        });
        let id = facade
            .set_timer(&Value::Int(10), &Value::Callable(on_timer))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(seen.lock().clone(), vec![id]);

        assert!(
            facade
                .set_timer(&Value::Int(-1), &Value::Callable(Callable::new("f", |_, _| Ok(()))))
                .is_err()
        );
        assert_eq!(
            facade.cancel_timer(&Value::Int(-3)).unwrap(),
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn run_on_context_invokes_the_callable() {
        let platform = Platform::new(Handle::current());
        let facade = Pontoon::new(platform, ScriptEnv::new("t.php"));
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let callable = Callable::new("task", move |_env, _args| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        facade.run_on_context(&Value::Callable(callable)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn config_round_trips_through_the_facade() {
        let platform = Platform::new(Handle::current())
            .with_config(serde_json::json!({"port": 8080, "tags": ["a", "b"]}));
        let facade = Pontoon::new(platform, ScriptEnv::new("t.php"));
        let config = facade.config();
        let array = config.as_array().unwrap();
        assert_eq!(array.get_str("port"), Some(&Value::Int(8080)));
    }
}
