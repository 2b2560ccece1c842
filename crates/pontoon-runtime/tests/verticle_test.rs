//! Integration tests for the verticle bootstrap against a stub engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use pontoon_runtime::engine::{EngineFault, ScriptEngine};
use pontoon_runtime::{ClassRegistry, DeploymentConfig, Platform, RuntimeError, VerticleFactory};
use pontoon_script::Location;
use tokio::runtime::Handle;

/// A scripted engine: records the installation pass, then fails (or
/// succeeds) however the test tells it to.
struct StubEngine {
    installed: Vec<String>,
    executed: Vec<PathBuf>,
    outcome: Option<EngineFault>,
}

impl StubEngine {
    fn new(outcome: Option<EngineFault>) -> Self {
        Self {
            installed: Vec::new(),
            executed: Vec::new(),
            outcome,
        }
    }
}

impl ScriptEngine for StubEngine {
    fn install_classes(&mut self, registry: &ClassRegistry) -> Result<(), EngineFault> {
        self.installed = registry.names();
        Ok(())
    }

    fn execute(&mut self, script: &Path) -> Result<(), EngineFault> {
        assert!(
            !self.installed.is_empty(),
            "execute ran before the classes were installed"
        );
        self.executed.push(script.to_path_buf());
        match self.outcome.take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

fn deploy(factory: &VerticleFactory) -> pontoon_runtime::Verticle {
    factory
        .create_verticle(DeploymentConfig::new("verticle.php"))
        .unwrap()
}

#[tokio::test]
async fn classes_are_installed_before_the_script_runs() {
    let factory = VerticleFactory::new();
    factory.init(Platform::new(Handle::current()));
    let verticle = deploy(&factory);

    let mut engine = StubEngine::new(None);
    verticle.start(&mut engine).unwrap();

    assert_eq!(engine.executed, vec![PathBuf::from("verticle.php")]);
    for class in [
        "Pontoon",
        "Pontoon\\Buffer",
        "Pontoon\\EventBus",
        "Pontoon\\Http\\HttpServer",
        "Pontoon\\Http\\RouteMatcher",
        "Pontoon\\Net\\NetServer",
        "Pontoon\\ParseTools\\RecordParser",
        "Pontoon\\Pump",
        "Pontoon\\TestRunner",
    ] {
        assert!(
            engine.installed.iter().any(|name| name == class),
            "{class} missing from the installation pass"
        );
    }
}

#[tokio::test]
async fn die_and_exit_terminate_cleanly() {
    let factory = VerticleFactory::new();
    factory.init(Platform::new(Handle::current()));

    for outcome in [EngineFault::Die, EngineFault::Exit] {
        let mut verticle = deploy(&factory);
        let reported: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        verticle.set_fault_reporter(move |message| sink.lock().push(message.to_string()));

        let mut engine = StubEngine::new(Some(outcome));
        verticle.start(&mut engine).unwrap();
        assert!(reported.lock().is_empty());
    }
}

#[tokio::test]
async fn script_faults_are_reported_but_do_not_fail_the_deployment() {
    let factory = VerticleFactory::new();
    factory.init(Platform::new(Handle::current()));
    let mut verticle = deploy(&factory);

    let reported: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    verticle.set_fault_reporter(move |message| sink.lock().push(message.to_string()));

    let fault = EngineFault::Script {
        message: "Call to undefined function frobnicate()".to_string(),
        location: Location::new("verticle.php", 12).in_function("main"),
    };
    let mut engine = StubEngine::new(Some(fault));
    verticle.start(&mut engine).unwrap();

    let reported = reported.lock();
    assert_eq!(reported.len(), 1);
    assert_eq!(
        reported[0],
        "Call to undefined function frobnicate() in verticle.php on line 12 in main()"
    );
}

#[tokio::test]
async fn engine_failures_propagate_as_errors() {
    let factory = VerticleFactory::new();
    factory.init(Platform::new(Handle::current()));
    let verticle = deploy(&factory);

    let mut engine = StubEngine::new(Some(EngineFault::Other(anyhow::anyhow!(
        "parse error in verticle.php"
    ))));
    let err = verticle.start(&mut engine).unwrap_err();
    assert!(matches!(err, RuntimeError::ScriptFault(_)));
}

#[test]
fn the_factory_rejects_deployments_before_init() {
    let factory = VerticleFactory::new();
    let err = factory
        .create_verticle(DeploymentConfig::new("verticle.php"))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Uninitialized));
}
