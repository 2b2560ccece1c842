//! Named shared maps of immutable wire-format values.

use std::sync::Arc;

use dashmap::DashMap;
use pontoon_script::{ScriptEnv, ScriptResult, Value, expect_str, json_to_value, value_to_json};
use serde_json::Value as Json;

type MapCore = DashMap<String, Json>;

/// The native registry of named maps. One per platform.
#[derive(Clone, Default)]
pub struct SharedDataCore {
    maps: Arc<DashMap<String, Arc<MapCore>>>,
}

impl SharedDataCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a map by name, creating it on first use. Every caller of the
    /// same name sees the same map.
    pub fn get_map(&self, name: &str) -> Arc<MapCore> {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }

    pub fn remove_map(&self, name: &str) -> bool {
        self.maps.remove(name).is_some()
    }
}

/// Script-facing access point for shared maps.
pub struct SharedData {
    core: SharedDataCore,
    env: ScriptEnv,
}

impl SharedData {
    pub const CLASS: &'static str = "Pontoon\\SharedData";

    pub fn new(core: SharedDataCore, env: ScriptEnv) -> Self {
        Self { core, env }
    }

    pub fn get_map(&self, name: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\SharedData::getMap()";
        let name = expect_str(&self.env, name, "name", SITE)?;
        let map = SharedMap {
            core: self.core.get_map(&name),
            env: self.env.clone(),
        };
        Ok(Value::resource(SharedMap::CLASS, map))
    }

    pub fn remove_map(&self, name: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\SharedData::removeMap()";
        let name = expect_str(&self.env, name, "name", SITE)?;
        Ok(Value::Bool(self.core.remove_map(&name)))
    }
}

/// A concurrent map shared between execution units.
///
/// Values are stored in the wire format, so only scalars and arrays go in;
/// what comes back out is a copy, never a shared mutable structure.
pub struct SharedMap {
    core: Arc<MapCore>,
    env: ScriptEnv,
}

impl SharedMap {
    pub const CLASS: &'static str = "Pontoon\\SharedData\\SharedMap";

    /// Store a value, returning the previous value under the key or null.
    pub fn put(&self, key: &Value, value: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\SharedData\\SharedMap::put()";
        let key = expect_str(&self.env, key, "key", SITE)?;
        let stored = value_to_json(value).map_err(|err| self.env.error(err.to_string()))?;
        let previous = self.core.insert(key, stored);
        Ok(previous.as_ref().map_or(Value::Null, json_to_value))
    }

    pub fn get(&self, key: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\SharedData\\SharedMap::get()";
        let key = expect_str(&self.env, key, "key", SITE)?;
        Ok(self
            .core
            .get(&key)
            .map_or(Value::Null, |entry| json_to_value(entry.value())))
    }

    pub fn remove(&self, key: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\SharedData\\SharedMap::remove()";
        let key = expect_str(&self.env, key, "key", SITE)?;
        Ok(self
            .core
            .remove(&key)
            .map_or(Value::Null, |(_, old)| json_to_value(&old)))
    }

    pub fn keys(&self) -> Value {
        let mut keys: Vec<String> = self.core.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Value::Array(pontoon_script::Array::from_values(
            keys.into_iter().map(Value::Str),
        ))
    }

    pub fn size(&self) -> Value {
        Value::Int(self.core.len() as i64)
    }

    pub fn is_empty(&self) -> Value {
        Value::Bool(self.core.is_empty())
    }

    pub fn clear(&self) {
        self.core.clear();
    }
}
