//! pontoon-script - the interpreter-facing core of the Pontoon bridge.
//!
//! This crate owns the script value model, the coercion utility that bridges
//! dynamically-typed values to the structured wire format, and the callback
//! adapter machinery that turns script callables into native event handlers.
//! It performs no I/O; the platform side lives in pontoon-runtime.

pub mod convert;
pub mod env;
pub mod error;
pub mod handler;
pub mod value;

pub use convert::{
    array_to_json, expect_array, expect_bool, expect_callable, expect_int, expect_str,
    json_to_array, json_to_value, opt_callable, opt_int, opt_str, value_to_json,
};
pub use env::{Callable, CallableFn, Location, ScriptEnv};
pub use error::{ScriptError, ScriptResult};
pub use handler::{
    AsyncResult, AsyncResultHandler, Cause, EventHandler, Handler, ResultModifier, VoidAsyncHandler,
    VoidHandler, async_result_handler, generic_handler, modified_async_result_handler,
    modified_handler, void_async_handler, void_handler,
};
pub use value::{Array, ArrayKey, Resource, Value};
