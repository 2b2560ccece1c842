//! Pump: moves data from a read stream to a write stream with flow control.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use pontoon_script::{ScriptEnv, ScriptResult, Value};

use crate::buffer::Buffer;
use crate::fs::AsyncFile;
use crate::net::NetSocket;
use crate::sockjs::SockJSSocket;
use crate::streams::{ReadStream, WriteStream, fn_handler, noop_handler};
use crate::websocket::WebSocketWrapper;

/// Ties a read stream to a write stream: pauses the source while the sink's
/// write queue is full, resumes it on drain.
pub struct Pump {
    source: Arc<dyn ReadStream>,
    sink: Arc<dyn WriteStream>,
    pumped: AtomicU64,
    running: AtomicBool,
}

impl std::fmt::Debug for Pump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pump")
    }
}

impl Pump {
    pub const CLASS: &'static str = "Pontoon\\Pump";

    pub fn new(source: Arc<dyn ReadStream>, sink: Arc<dyn WriteStream>) -> Arc<Self> {
        Arc::new(Self {
            source,
            sink,
            pumped: AtomicU64::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// Install the data and drain handlers and begin moving bytes.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let pump = self.clone();
        self.source.set_data_handler(fn_handler(move |buffer: Buffer| {
            pump.pumped
                .fetch_add(buffer.len() as u64, Ordering::Relaxed);
            if pump.sink.write(buffer).is_err() {
                pump.source.pause();
                return;
            }
            if pump.sink.write_queue_full() {
                pump.source.pause();
            }
        }));
        let source = self.source.clone();
        self.sink.set_drain_handler(fn_handler(move |_| {
            source.resume();
        }));
    }

    /// Stop moving bytes. The streams themselves stay open.
    pub fn stop(self: &Arc<Self>) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.source.set_data_handler(noop_handler());
        self.sink.set_drain_handler(noop_handler());
    }

    /// Total bytes moved since the pump was created.
    pub fn bytes_pumped(&self) -> u64 {
        self.pumped.load(Ordering::Relaxed)
    }

    pub fn set_write_queue_max_size(&self, size: usize) {
        self.sink.set_write_queue_max_size(size);
    }
}

/// Extract the readable side of a stream resource argument.
pub fn read_stream_arg(
    env: &ScriptEnv,
    value: &Value,
    param: &str,
    site: &str,
) -> ScriptResult<Arc<dyn ReadStream>> {
    if let Some(resource) = value.as_resource() {
        if let Some(socket) = resource.downcast::<NetSocket>() {
            return Ok(socket);
        }
        if let Some(file) = resource.downcast::<AsyncFile>() {
            return Ok(file);
        }
        if let Some(ws) = resource.downcast::<WebSocketWrapper>() {
            return Ok(ws);
        }
        if let Some(socket) = resource.downcast::<SockJSSocket>() {
            return Ok(socket);
        }
    }
    Err(env.error(format!(
        "{} argument to {} must be a readable stream, {} given.",
        param,
        site,
        value.kind()
    )))
}

/// Extract the writable side of a stream resource argument.
pub fn write_stream_arg(
    env: &ScriptEnv,
    value: &Value,
    param: &str,
    site: &str,
) -> ScriptResult<Arc<dyn WriteStream>> {
    if let Some(resource) = value.as_resource() {
        if let Some(socket) = resource.downcast::<NetSocket>() {
            return Ok(socket);
        }
        if let Some(file) = resource.downcast::<AsyncFile>() {
            return Ok(file);
        }
        if let Some(ws) = resource.downcast::<WebSocketWrapper>() {
            return Ok(ws);
        }
        if let Some(socket) = resource.downcast::<SockJSSocket>() {
            return Ok(socket);
        }
    }
    Err(env.error(format!(
        "{} argument to {} must be a writable stream, {} given.",
        param,
        site,
        value.kind()
    )))
}

/// Construct a pump from script arguments: `(readStream, writeStream)`.
pub fn pump_from_args(env: &ScriptEnv, args: &[Value]) -> ScriptResult<Arc<Pump>> {
    const SITE: &str = "Pontoon\\Pump::__construct()";
    let source_value = args.first().cloned().unwrap_or(Value::Null);
    let sink_value = args.get(1).cloned().unwrap_or(Value::Null);
    let source = read_stream_arg(env, &source_value, "readStream", SITE)?;
    let sink = write_stream_arg(env, &sink_value, "writeStream", SITE)?;
    Ok(Pump::new(source, sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeResult;
    use crate::streams::SharedHandler;
    use parking_lot::Mutex;
    use pontoon_script::Cause;

    /// In-memory streams for exercising the pump's flow control.
    #[derive(Default)]
    struct FakeSource {
        data: Mutex<Option<SharedHandler<Buffer>>>,
        paused: AtomicBool,
    }

    impl FakeSource {
        fn feed(&self, bytes: &[u8]) {
            if let Some(handler) = self.data.lock().clone() {
                handler.handle(Buffer::from_bytes(bytes.to_vec()));
            }
        }
    }

    impl ReadStream for FakeSource {
        fn set_data_handler(&self, handler: SharedHandler<Buffer>) {
            *self.data.lock() = Some(handler);
        }
        fn set_end_handler(&self, _handler: SharedHandler<()>) {}
        fn set_exception_handler(&self, _handler: SharedHandler<Cause>) {}
        fn pause(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
    }

    struct FakeSink {
        written: Mutex<Vec<u8>>,
        queued: AtomicU64,
        max: AtomicU64,
        drain: Mutex<Option<SharedHandler<()>>>,
    }

    impl FakeSink {
        fn new(max: u64) -> Self {
            Self {
                written: Mutex::new(Vec::new()),
                queued: AtomicU64::new(0),
                max: AtomicU64::new(max),
                drain: Mutex::new(None),
            }
        }

        fn flush(&self) {
            self.queued.store(0, Ordering::SeqCst);
            if let Some(handler) = self.drain.lock().clone() {
                handler.handle(());
            }
        }
    }

    impl WriteStream for FakeSink {
        fn write(&self, data: Buffer) -> RuntimeResult<()> {
            self.queued.fetch_add(data.len() as u64, Ordering::SeqCst);
            self.written.lock().extend_from_slice(&data.to_vec());
            Ok(())
        }
        fn set_write_queue_max_size(&self, size: usize) {
            self.max.store(size as u64, Ordering::SeqCst);
        }
        fn write_queue_full(&self) -> bool {
            self.queued.load(Ordering::SeqCst) >= self.max.load(Ordering::SeqCst)
        }
        fn set_drain_handler(&self, handler: SharedHandler<()>) {
            *self.drain.lock() = Some(handler);
        }
    }

    #[test]
    fn pump_pauses_on_full_queue_and_resumes_on_drain() {
        let source = Arc::new(FakeSource::default());
        let sink = Arc::new(FakeSink::new(4));
        let pump = Pump::new(source.clone(), sink.clone());
        pump.start();

        source.feed(b"ab");
        assert!(!source.paused.load(Ordering::SeqCst));
        source.feed(b"cdef");
        assert!(source.paused.load(Ordering::SeqCst));

        sink.flush();
        assert!(!source.paused.load(Ordering::SeqCst));
        assert_eq!(sink.written.lock().as_slice(), b"abcdef");
        assert_eq!(pump.bytes_pumped(), 6);
    }

    #[test]
    fn stopped_pump_moves_nothing() {
        let source = Arc::new(FakeSource::default());
        let sink = Arc::new(FakeSink::new(1024));
        let pump = Pump::new(source.clone(), sink.clone());
        pump.start();
        source.feed(b"x");
        pump.stop();
        source.feed(b"y");
        assert_eq!(sink.written.lock().as_slice(), b"x");
        assert_eq!(pump.bytes_pumped(), 1);
    }

    #[test]
    fn constructor_rejects_non_stream_arguments() {
        let env = ScriptEnv::new("t.php");
        let err = pump_from_args(&env, &[Value::Int(1), Value::Null]).unwrap_err();
        assert!(err.to_string().contains("readStream"));
    }
}
