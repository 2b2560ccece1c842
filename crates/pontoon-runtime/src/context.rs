//! The platform context: the explicit handle wrappers are constructed from.
//!
//! One `Platform` per runtime. It owns the process-wide services (event bus,
//! shared data, timers) and the tokio handle everything spawns on; nothing
//! here is reachable through globals.

use serde_json::Value as Json;
use tokio::runtime::Handle;

use crate::bus::EventBusCore;
use crate::shareddata::SharedDataCore;
use crate::timers::TimerCore;

#[derive(Clone)]
pub struct Platform {
    handle: Handle,
    bus: EventBusCore,
    shared: SharedDataCore,
    timers: TimerCore,
    config: Json,
}

impl Platform {
    pub fn new(handle: Handle) -> Self {
        Self {
            timers: TimerCore::new(handle.clone()),
            bus: EventBusCore::new(),
            shared: SharedDataCore::new(),
            config: Json::Null,
            handle,
        }
    }

    /// Attach the deployment configuration scripts read back through the
    /// facade.
    pub fn with_config(mut self, config: Json) -> Self {
        self.config = config;
        self
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn bus(&self) -> &EventBusCore {
        &self.bus
    }

    pub fn shared_data(&self) -> &SharedDataCore {
        &self.shared
    }

    pub fn timers(&self) -> &TimerCore {
        &self.timers
    }

    pub fn config(&self) -> &Json {
        &self.config
    }

    /// Stop platform-owned background activity: pending timers and bus
    /// registrations. Sockets and servers are owned by their wrappers.
    pub fn shutdown(&self) {
        self.timers.cancel_all();
        self.bus.clear();
    }
}
