//! Verticle lifecycle: the factory the container calls into, and the
//! bootstrap that drives a script engine through one deployment.

use std::sync::Arc;

use parking_lot::Mutex;
use pontoon_script::{ScriptEnv, ScriptError};
use tracing::{debug, error};

use crate::config::DeploymentConfig;
use crate::context::Platform;
use crate::engine::{EngineFault, ScriptEngine};
use crate::error::{RuntimeError, RuntimeResult};
use crate::registry::{ClassRegistry, register_core_classes};

type FaultReporter = Arc<dyn Fn(&str) + Send + Sync>;

/// Creates verticles once the container has handed over a platform.
#[derive(Default)]
pub struct VerticleFactory {
    platform: Mutex<Option<Platform>>,
}

impl VerticleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the container exactly once, before any deployment.
    pub fn init(&self, platform: Platform) {
        *self.platform.lock() = Some(platform);
    }

    pub fn create_verticle(&self, config: DeploymentConfig) -> RuntimeResult<Verticle> {
        let platform = self
            .platform
            .lock()
            .clone()
            .ok_or(RuntimeError::Uninitialized)?;
        Ok(Verticle::new(
            platform.with_config(config.config.clone()),
            config,
        ))
    }
}

/// One deployed script: its platform view, class registry, and entry point.
pub struct Verticle {
    platform: Platform,
    config: DeploymentConfig,
    env: ScriptEnv,
    registry: Arc<ClassRegistry>,
    reporter: FaultReporter,
}

impl std::fmt::Debug for Verticle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Verticle({})", self.config.main.display())
    }
}

impl Verticle {
    fn new(platform: Platform, config: DeploymentConfig) -> Self {
        let file = config.main.display().to_string();
        let reporter: FaultReporter = Arc::new(|message: &str| {
            error!(target: "script", "{message}");
        });
        let env = {
            let reporter = reporter.clone();
            ScriptEnv::with_fault_hook(file, move |fault: &ScriptError| {
                reporter(&fault.to_string());
            })
        };
        let registry = Arc::new(ClassRegistry::new());
        register_core_classes(&registry);
        Self {
            platform,
            config,
            env,
            registry,
            reporter,
        }
    }

    /// Route fault diagnostics somewhere other than the error log.
    pub fn set_fault_reporter(&mut self, reporter: impl Fn(&str) + Send + Sync + 'static) {
        let reporter: FaultReporter = Arc::new(reporter);
        self.reporter = reporter.clone();
        let file = self.config.main.display().to_string();
        self.env = ScriptEnv::with_fault_hook(file, move |fault: &ScriptError| {
            reporter(&fault.to_string());
        });
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn env(&self) -> &ScriptEnv {
        &self.env
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Install the platform classes, then run the entry script.
    ///
    /// `die`/`exit` end the script cleanly. A script-level fault is reported
    /// through the fault reporter and does not fail the deployment; only
    /// engine-level failures propagate as errors.
    pub fn start(&self, engine: &mut dyn ScriptEngine) -> RuntimeResult<()> {
        debug!(main = %self.config.main.display(), "starting verticle");
        engine
            .install_classes(&self.registry)
            .map_err(|fault| RuntimeError::internal(fault.to_string()))?;
        match engine.execute(&self.config.main) {
            Ok(()) => Ok(()),
            Err(fault) if fault.is_clean_termination() => {
                debug!(main = %self.config.main.display(), "script terminated itself");
                Ok(())
            }
            Err(EngineFault::Script { message, location }) => {
                (self.reporter)(&format!("{} in {}", message, location.describe()));
                Ok(())
            }
            Err(fault) => Err(RuntimeError::ScriptFault(fault.to_string())),
        }
    }

    /// Undeploy: release every platform resource this verticle owns.
    pub fn stop(&self) {
        debug!(main = %self.config.main.display(), "stopping verticle");
        self.platform.shutdown();
    }
}
