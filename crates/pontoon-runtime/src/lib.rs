//! pontoon-runtime - the platform services behind the Pontoon bridge.
//!
//! This crate implements the native side of the bridge: the event bus,
//! timers, shared data, TCP and HTTP servers and clients, websockets, the
//! filesystem API, and the record parser, each as a script-agnostic core
//! with a thin script-facing wrapper around it. The verticle module ties
//! them together: a factory creates one execution unit per deployment,
//! installs the class registry into a [`engine::ScriptEngine`], and runs
//! the entry script.

pub mod buffer;
pub mod bus;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod facade;
pub mod fs;
pub mod http_client;
pub mod http_server;
pub mod net;
pub mod parsetools;
pub mod pump;
pub mod registry;
pub mod route_matcher;
pub mod shareddata;
pub mod sockjs;
pub mod streams;
pub mod testtools;
pub mod timers;
pub mod verticle;
pub mod websocket;

pub use buffer::Buffer;
pub use bus::{BusMessage, EventBus, EventBusCore, Message};
pub use config::DeploymentConfig;
pub use context::Platform;
pub use engine::{EngineFault, ScriptEngine};
pub use error::{RuntimeError, RuntimeResult};
pub use facade::{Logger, Pontoon};
pub use fs::{AsyncFile, FileProps, FileSystem};
pub use http_client::{HttpClient, HttpClientRequest, HttpClientResponse};
pub use http_server::{HttpServer, HttpServerRequest, HttpServerResponse};
pub use net::{NetClient, NetServer, NetSocket};
pub use parsetools::RecordParser;
pub use pump::Pump;
pub use registry::{ClassRegistry, register_core_classes};
pub use route_matcher::RouteMatcher;
pub use shareddata::{SharedData, SharedDataCore, SharedMap};
pub use sockjs::{SockJSServer, SockJSSocket};
pub use streams::{ReadStream, SharedHandler, WriteStream};
pub use testtools::TestRunner;
pub use timers::TimerCore;
pub use verticle::{Verticle, VerticleFactory};
pub use websocket::{WebSocketWrapper, WsCore};
