//! Callback adapters bridging native handlers to script callables.
//!
//! A [`Handler`] is a standing subscription: the native platform retains it
//! for as long as the corresponding event source is live and may invoke it
//! zero or many times, on whatever task owns the resource. One adapter
//! implementation serves every API surface because the per-call-site result
//! modifier converts the native result into its script-facing wrapper before
//! delivery.

use std::fmt;
use std::sync::Arc;

use crate::convert::expect_callable;
use crate::env::{Callable, ScriptEnv};
use crate::error::ScriptResult;
use crate::value::Value;

/// The native single-argument callback interface.
pub trait EventHandler<T>: Send + Sync {
    fn handle(&self, event: T);
}

/// Per-call-site conversion from a native result to its script-facing value.
/// Stateless and applied synchronously inside the adapter's invocation path.
pub type ResultModifier<T> = Arc<dyn Fn(T) -> Value + Send + Sync>;

/// Cause of a failed native operation, delivered to async-result callables
/// as their error argument.
#[derive(Debug, Clone)]
pub struct Cause {
    message: String,
}

impl Cause {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<std::io::Error> for Cause {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for Cause {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Outcome of an asynchronous native operation.
pub type AsyncResult<T> = Result<T, Cause>;

/// The callback adapter: retains the capturing environment, the script
/// callable, and the result modifier.
pub struct Handler<T> {
    env: ScriptEnv,
    callable: Callable,
    modifier: ResultModifier<T>,
}

impl<T> Handler<T> {
    pub fn with_modifier(
        env: ScriptEnv,
        callable: Callable,
        modifier: impl Fn(T) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            env,
            callable,
            modifier: Arc::new(modifier),
        }
    }

    pub fn env(&self) -> &ScriptEnv {
        &self.env
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    fn invoke(&self, args: &[Value]) {
        if let Err(fault) = self.callable.call(&self.env, args) {
            self.env.report_fault(&fault);
        }
    }
}

impl<T: Into<Value> + 'static> Handler<T> {
    pub fn new(env: ScriptEnv, callable: Callable) -> Self {
        Self::with_modifier(env, callable, T::into)
    }
}

impl<T> EventHandler<T> for Handler<T> {
    fn handle(&self, event: T) {
        let value = (self.modifier)(event);
        self.invoke(&[value]);
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({})", self.callable.name())
    }
}

/// Adapter invoking the callable with no arguments, for native handlers
/// whose event carries no information.
pub struct VoidHandler {
    env: ScriptEnv,
    callable: Callable,
}

impl VoidHandler {
    pub fn new(env: ScriptEnv, callable: Callable) -> Self {
        Self { env, callable }
    }
}

impl EventHandler<()> for VoidHandler {
    fn handle(&self, _event: ()) {
        if let Err(fault) = self.callable.call(&self.env, &[]) {
            self.env.report_fault(&fault);
        }
    }
}

/// Async-result adapter, two-argument convention: `(result, null)` on
/// success, `(null, error)` on failure.
pub struct AsyncResultHandler<T> {
    inner: Handler<T>,
}

impl<T> AsyncResultHandler<T> {
    pub fn with_modifier(
        env: ScriptEnv,
        callable: Callable,
        modifier: impl Fn(T) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Handler::with_modifier(env, callable, modifier),
        }
    }
}

impl<T: Into<Value> + 'static> AsyncResultHandler<T> {
    pub fn new(env: ScriptEnv, callable: Callable) -> Self {
        Self {
            inner: Handler::new(env, callable),
        }
    }
}

impl<T> EventHandler<AsyncResult<T>> for AsyncResultHandler<T> {
    fn handle(&self, result: AsyncResult<T>) {
        match result {
            Ok(value) => {
                let wrapped = (self.inner.modifier)(value);
                self.inner.invoke(&[wrapped, Value::Null]);
            }
            Err(cause) => {
                self.inner
                    .invoke(&[Value::Null, Value::Str(cause.to_string())]);
            }
        }
    }
}

/// Async-result adapter, one-argument convention: `(null)` on success,
/// `(error)` on failure. Used where the native result carries no value.
pub struct VoidAsyncHandler {
    env: ScriptEnv,
    callable: Callable,
}

impl VoidAsyncHandler {
    pub fn new(env: ScriptEnv, callable: Callable) -> Self {
        Self { env, callable }
    }
}

impl EventHandler<AsyncResult<()>> for VoidAsyncHandler {
    fn handle(&self, result: AsyncResult<()>) {
        let arg = match result {
            Ok(()) => Value::Null,
            Err(cause) => Value::Str(cause.to_string()),
        };
        if let Err(fault) = self.callable.call(&self.env, &[arg]) {
            self.env.report_fault(&fault);
        }
    }
}

// Factory helpers in the HandlerFactory shape: validate the callable first,
// surfacing the error at the call site, then construct the adapter.

pub fn generic_handler<T: Into<Value> + 'static>(
    env: &ScriptEnv,
    value: &Value,
    site: &str,
) -> ScriptResult<Arc<Handler<T>>> {
    let callable = expect_callable(env, value, "Handler", site)?;
    Ok(Arc::new(Handler::new(env.clone(), callable)))
}

pub fn modified_handler<T>(
    env: &ScriptEnv,
    value: &Value,
    site: &str,
    modifier: impl Fn(T) -> Value + Send + Sync + 'static,
) -> ScriptResult<Arc<Handler<T>>> {
    let callable = expect_callable(env, value, "Handler", site)?;
    Ok(Arc::new(Handler::with_modifier(
        env.clone(),
        callable,
        modifier,
    )))
}

pub fn void_handler(env: &ScriptEnv, value: &Value, site: &str) -> ScriptResult<Arc<VoidHandler>> {
    let callable = expect_callable(env, value, "Handler", site)?;
    Ok(Arc::new(VoidHandler::new(env.clone(), callable)))
}

pub fn async_result_handler<T: Into<Value> + 'static>(
    env: &ScriptEnv,
    value: &Value,
    site: &str,
) -> ScriptResult<Arc<AsyncResultHandler<T>>> {
    let callable = expect_callable(env, value, "Handler", site)?;
    Ok(Arc::new(AsyncResultHandler::new(env.clone(), callable)))
}

pub fn modified_async_result_handler<T>(
    env: &ScriptEnv,
    value: &Value,
    site: &str,
    modifier: impl Fn(T) -> Value + Send + Sync + 'static,
) -> ScriptResult<Arc<AsyncResultHandler<T>>> {
    let callable = expect_callable(env, value, "Handler", site)?;
    Ok(Arc::new(AsyncResultHandler::with_modifier(
        env.clone(),
        callable,
        modifier,
    )))
}

pub fn void_async_handler(
    env: &ScriptEnv,
    value: &Value,
    site: &str,
) -> ScriptResult<Arc<VoidAsyncHandler>> {
    let callable = expect_callable(env, value, "Handler", site)?;
    Ok(Arc::new(VoidAsyncHandler::new(env.clone(), callable)))
}
