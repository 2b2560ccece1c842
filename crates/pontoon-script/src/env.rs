//! Execution environment and callable handles.
//!
//! Rather than rely on an ambient interpreter context, every adapter takes
//! an explicit [`ScriptEnv`] value at construction. The env carries the
//! interpreter's
//! current source location (for error formatting) and the fault hook through
//! which faults raised inside script callables reach the bootstrap's
//! reporting contract.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ScriptError, ScriptResult};
use crate::value::Value;

/// A position in the executing script.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub function: Option<String>,
    pub class: Option<String>,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            function: None,
            class: None,
        }
    }

    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn in_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// One-line rendering used by the bootstrap's diagnostic:
    /// `<file> on line <n>[ in <class>::<function>()]`.
    pub fn describe(&self) -> String {
        let mut out = format!("{} on line {}", self.file, self.line);
        match (&self.class, &self.function) {
            (Some(class), Some(function)) => {
                out.push_str(&format!(" in {}::{}()", class, function));
            }
            (None, Some(function)) => {
                out.push_str(&format!(" in {}()", function));
            }
            _ => {}
        }
        out
    }
}

type FaultHook = Arc<dyn Fn(&ScriptError) + Send + Sync>;

struct EnvInner {
    location: Mutex<Location>,
    fault_hook: FaultHook,
}

/// Execution context handed to every callback adapter.
///
/// Cheap to clone; clones share the same location cell and fault hook, which
/// is what an interpreter driving many adapters from one script wants.
#[derive(Clone)]
pub struct ScriptEnv {
    inner: Arc<EnvInner>,
}

impl ScriptEnv {
    /// Create an env for a script, reporting faults through `tracing`.
    pub fn new(file: impl Into<String>) -> Self {
        Self::with_fault_hook(file, |fault: &ScriptError| {
            tracing::error!("{}", fault);
        })
    }

    /// Create an env with an explicit fault hook. The bootstrap installs its
    /// reporting hook this way; tests install recording hooks.
    pub fn with_fault_hook(
        file: impl Into<String>,
        hook: impl Fn(&ScriptError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                location: Mutex::new(Location::new(file, 0)),
                fault_hook: Arc::new(hook),
            }),
        }
    }

    /// The interpreter's current execution position.
    pub fn location(&self) -> Location {
        self.inner.location.lock().clone()
    }

    /// Updated by the interpreter as execution advances.
    pub fn set_location(&self, location: Location) {
        *self.inner.location.lock() = location;
    }

    /// Format a message with the current location appended:
    /// `<message> in <file> on line <n>.` A trailing period on the message
    /// is folded into the suffix.
    pub fn format_message(&self, message: &str) -> String {
        let message = message.strip_suffix('.').unwrap_or(message);
        let location = self.location();
        format!("{} in {} on line {}.", message, location.file, location.line)
    }

    /// Raise an argument-shape error at the current location.
    pub fn error(&self, message: impl AsRef<str>) -> ScriptError {
        ScriptError::Argument(self.format_message(message.as_ref()))
    }

    /// Raise a not-callable error at the current location.
    pub fn not_callable(&self, message: impl AsRef<str>) -> ScriptError {
        ScriptError::NotCallable(self.format_message(message.as_ref()))
    }

    /// Forward a fault from inside a script callable to the reporting hook.
    /// Adapters never swallow or retry; propagation policy lives with the
    /// bootstrap that installed the hook.
    pub fn report_fault(&self, fault: &ScriptError) {
        (self.inner.fault_hook)(fault);
    }
}

impl fmt::Debug for ScriptEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEnv")
            .field("location", &self.location())
            .finish_non_exhaustive()
    }
}

/// Signature of an invocable script value.
pub type CallableFn = dyn Fn(&ScriptEnv, &[Value]) -> ScriptResult<()> + Send + Sync;

/// An invocable handle to a script callable.
///
/// Clones share the underlying function; identity is pointer equality, which
/// is what handler registries key on.
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    f: Arc<CallableFn>,
}

impl Callable {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&ScriptEnv, &[Value]) -> ScriptResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into().into(),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the callable within the given environment.
    pub fn call(&self, env: &ScriptEnv, args: &[Value]) -> ScriptResult<()> {
        (self.f)(env, args)
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.name)
    }
}
