//! Stream traits shared by sockets, files and websockets.
//!
//! These are the seams the pump works across: any readable resource exposes
//! data/end/exception events plus flow control, any writable resource exposes
//! a write queue with a high-water mark and a drain signal.

use std::sync::Arc;

use pontoon_script::{Cause, EventHandler};

use crate::buffer::Buffer;
use crate::error::RuntimeResult;

/// Shorthand for a shared native handler slot.
pub type SharedHandler<T> = Arc<dyn EventHandler<T>>;

/// A source of buffers with flow control.
pub trait ReadStream: Send + Sync {
    fn set_data_handler(&self, handler: SharedHandler<Buffer>);
    fn set_end_handler(&self, handler: SharedHandler<()>);
    fn set_exception_handler(&self, handler: SharedHandler<Cause>);
    fn pause(&self);
    fn resume(&self);
}

/// A sink for buffers with a bounded write queue.
pub trait WriteStream: Send + Sync {
    fn write(&self, data: Buffer) -> RuntimeResult<()>;
    fn set_write_queue_max_size(&self, size: usize);
    fn write_queue_full(&self) -> bool;
    fn set_drain_handler(&self, handler: SharedHandler<()>);
}

/// Wrap a plain closure as an [`EventHandler`]. Native plumbing (the pump,
/// parser chaining, tests) uses this where no script callable is involved.
pub struct FnHandler<F>(pub F);

impl<T, F> EventHandler<T> for FnHandler<F>
where
    F: Fn(T) + Send + Sync,
{
    fn handle(&self, event: T) {
        (self.0)(event)
    }
}

pub fn fn_handler<T>(f: impl Fn(T) + Send + Sync + 'static) -> SharedHandler<T> {
    Arc::new(FnHandler(f))
}

/// A handler that drops its events. Installed when a stream's consumer is
/// torn down.
pub fn noop_handler<T: 'static>() -> SharedHandler<T> {
    fn_handler(|_event| ())
}
