//! Assertion helpers for verticle test scripts.
//!
//! A test script constructs a runner, makes assertions as its async
//! handlers fire, and calls `complete()` when the scenario is done. The
//! harness polls `is_complete`/`failures` to decide the outcome.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pontoon_script::{ScriptEnv, ScriptResult, Value};

pub struct TestRunner {
    env: ScriptEnv,
    complete: AtomicBool,
    failures: Mutex<Vec<String>>,
}

impl TestRunner {
    pub const CLASS: &'static str = "Pontoon\\TestRunner";

    pub fn new(env: ScriptEnv) -> Self {
        Self {
            env,
            complete: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn assert_true(&self, value: &Value) -> ScriptResult<()> {
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(self.fail(format!("assertTrue failed: got {value:?}")))
        }
    }

    pub fn assert_false(&self, value: &Value) -> ScriptResult<()> {
        if value.as_bool() == Some(false) {
            Ok(())
        } else {
            Err(self.fail(format!("assertFalse failed: got {value:?}")))
        }
    }

    pub fn assert_equals(&self, expected: &Value, actual: &Value) -> ScriptResult<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(self.fail(format!(
                "assertEquals failed: expected {expected:?}, got {actual:?}"
            )))
        }
    }

    pub fn assert_null(&self, value: &Value) -> ScriptResult<()> {
        if value.is_absent() {
            Ok(())
        } else {
            Err(self.fail(format!("assertNull failed: got {value:?}")))
        }
    }

    pub fn assert_not_null(&self, value: &Value) -> ScriptResult<()> {
        if value.is_absent() {
            Err(self.fail("assertNotNull failed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Marks the scenario as finished. Idempotent.
    pub fn complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }

    fn fail(&self, message: String) -> pontoon_script::ScriptError {
        self.failures.lock().push(message.clone());
        self.env.error(message)
    }
}
