//! Class registry: the script-visible names of the platform wrappers and
//! how to construct them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pontoon_script::{ScriptEnv, ScriptResult, Value};
use tracing::debug;

use crate::bus::EventBus;
use crate::context::Platform;
use crate::facade::{Logger, Pontoon};
use crate::fs::FileSystem;
use crate::http_client::HttpClient;
use crate::http_server::HttpServer;
use crate::net::{NetClient, NetServer};
use crate::parsetools::parser_from_args;
use crate::pump::pump_from_args;
use crate::route_matcher::RouteMatcher;
use crate::shareddata::SharedData;
use crate::sockjs::SockJSServer;
use crate::testtools::TestRunner;

/// Builds one wrapper instance for a script `new` expression.
pub type Constructor =
    Arc<dyn Fn(&Platform, &ScriptEnv, &[Value]) -> ScriptResult<Value> + Send + Sync>;

/// Name-to-constructor table the engine consults when a script instantiates
/// a platform class.
#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<String, Constructor>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: &str,
        ctor: impl Fn(&Platform, &ScriptEnv, &[Value]) -> ScriptResult<Value> + Send + Sync + 'static,
    ) {
        self.classes.write().insert(name.to_string(), Arc::new(ctor));
        debug!(class = name, "class registered");
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    /// Registered names, sorted, for the engine's installation pass.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn construct(
        &self,
        name: &str,
        platform: &Platform,
        env: &ScriptEnv,
        args: &[Value],
    ) -> ScriptResult<Value> {
        let ctor = self
            .classes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| env.error(format!("unknown class {}.", name)))?;
        ctor(platform, env, args)
    }
}

/// Register the full platform class set. Called once per execution unit,
/// before the engine installs the names.
pub fn register_core_classes(registry: &ClassRegistry) {
    registry.register(Pontoon::CLASS, |platform, env, _args| {
        Ok(Value::resource(
            Pontoon::CLASS,
            Pontoon::new(platform.clone(), env.clone()),
        ))
    });
    registry.register(Logger::CLASS, |_platform, env, _args| {
        Ok(Value::resource(Logger::CLASS, Logger::new(env.clone())))
    });
    registry.register(crate::buffer::Buffer::CLASS, |_platform, env, args| {
        let buffer = match args.first() {
            None => crate::buffer::Buffer::new(),
            Some(value) if value.is_absent() => crate::buffer::Buffer::new(),
            // An integer argument is a size hint, not content.
            Some(Value::Int(size)) if *size >= 0 => {
                crate::buffer::Buffer::with_size(*size as usize)
            }
            Some(value) => crate::buffer::Buffer::from_bytes(crate::buffer::expect_bytes(
                env,
                value,
                "initial",
                "Pontoon\\Buffer::__construct()",
            )?),
        };
        Ok(buffer.into_value())
    });
    registry.register(EventBus::CLASS, |platform, env, _args| {
        Ok(Value::resource(
            EventBus::CLASS,
            EventBus::new(platform.bus().clone(), env.clone()),
        ))
    });
    registry.register(SharedData::CLASS, |platform, env, _args| {
        Ok(Value::resource(
            SharedData::CLASS,
            SharedData::new(platform.shared_data().clone(), env.clone()),
        ))
    });
    registry.register(FileSystem::CLASS, |platform, env, _args| {
        Ok(Value::resource(
            FileSystem::CLASS,
            FileSystem::new(platform.handle().clone(), env.clone()),
        ))
    });
    registry.register(NetServer::CLASS, |platform, env, _args| {
        Ok(Value::resource(
            NetServer::CLASS,
            NetServer::new(platform.handle().clone(), env.clone()),
        ))
    });
    registry.register(NetClient::CLASS, |platform, env, _args| {
        Ok(Value::resource(
            NetClient::CLASS,
            NetClient::new(platform.handle().clone(), env.clone()),
        ))
    });
    registry.register(HttpServer::CLASS, |platform, env, _args| {
        Ok(Value::resource(
            HttpServer::CLASS,
            HttpServer::new(platform.handle().clone(), env.clone()),
        ))
    });
    registry.register(HttpClient::CLASS, |platform, env, _args| {
        Ok(Value::resource(
            HttpClient::CLASS,
            HttpClient::new(platform.handle().clone(), env.clone()),
        ))
    });
    registry.register(RouteMatcher::CLASS, |_platform, env, _args| {
        Ok(RouteMatcher::new(env.clone()).value())
    });
    registry.register(
        crate::parsetools::RecordParser::CLASS,
        |_platform, env, args| {
            let parser = parser_from_args(env, args)?;
            Ok(Value::Resource(pontoon_script::Resource::from_arc(
                crate::parsetools::RecordParser::CLASS,
                parser,
            )))
        },
    );
    registry.register(crate::pump::Pump::CLASS, |_platform, env, args| {
        let pump = pump_from_args(env, args)?;
        Ok(Value::Resource(pontoon_script::Resource::from_arc(
            crate::pump::Pump::CLASS,
            pump,
        )))
    });
    registry.register(SockJSServer::CLASS, |platform, env, args| {
        let server = crate::sockjs::sockjs_server_from_args(
            platform.bus(),
            env,
            args,
            "Pontoon\\SockJS\\SockJSServer::__construct()",
        )?;
        Ok(Value::resource(SockJSServer::CLASS, server))
    });
    registry.register(TestRunner::CLASS, |_platform, env, _args| {
        Ok(Value::resource(
            TestRunner::CLASS,
            TestRunner::new(env.clone()),
        ))
    });
}
