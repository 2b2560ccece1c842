//! WebSocket connections, server- and client-side.
//!
//! One core serves both roles: it owns a `tokio-tungstenite` stream through
//! a read task and a write task, mirroring the socket core's shape. Frames
//! are surfaced to scripts as buffers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pontoon_script::{
    Cause, EventHandler, ScriptEnv, ScriptResult, Value, modified_handler, void_handler,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use crate::buffer::{Buffer, expect_bytes};
use crate::error::{RuntimeError, RuntimeResult};
use crate::streams::{ReadStream, SharedHandler, WriteStream, noop_handler};

struct WsHandlers {
    data: Mutex<SharedHandler<Buffer>>,
    end: Mutex<SharedHandler<()>>,
    close: Mutex<SharedHandler<()>>,
    exception: Mutex<SharedHandler<Cause>>,
    drain: Mutex<SharedHandler<()>>,
}

/// The native side of one websocket connection.
pub struct WsCore {
    frame_tx: mpsc::UnboundedSender<WsMessage>,
    pause_tx: watch::Sender<bool>,
    handlers: WsHandlers,
    closed: AtomicBool,
    close_emitted: AtomicBool,
}

impl WsCore {
    pub fn spawn<S>(stream: WebSocketStream<S>, handle: &Handle) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut sink, mut source) = stream.split();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<WsMessage>();
        let (pause_tx, mut pause_rx) = watch::channel(false);
        let core = Arc::new(Self {
            frame_tx,
            pause_tx,
            handlers: WsHandlers {
                data: Mutex::new(noop_handler()),
                end: Mutex::new(noop_handler()),
                close: Mutex::new(noop_handler()),
                exception: Mutex::new(noop_handler()),
                drain: Mutex::new(noop_handler()),
            },
            closed: AtomicBool::new(false),
            close_emitted: AtomicBool::new(false),
        });

        let reader = core.clone();
        handle.spawn(async move {
            loop {
                while *pause_rx.borrow() {
                    if pause_rx.changed().await.is_err() {
                        return;
                    }
                }
                let Some(frame) = source.next().await else {
                    reader.handlers.end.lock().clone().handle(());
                    reader.emit_close();
                    return;
                };
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        let handler = reader.handlers.data.lock().clone();
                        handler.handle(Buffer::from_bytes(text.as_bytes().to_vec()));
                    }
                    Ok(WsMessage::Binary(bytes)) => {
                        let handler = reader.handlers.data.lock().clone();
                        handler.handle(Buffer::from_bytes(bytes.to_vec()));
                    }
                    Ok(WsMessage::Close(_)) => {
                        reader.handlers.end.lock().clone().handle(());
                        reader.emit_close();
                        return;
                    }
                    Ok(_) => {} // ping/pong, answered by the protocol layer
                    Err(err) => {
                        reader
                            .handlers
                            .exception
                            .lock()
                            .clone()
                            .handle(Cause::new(err.to_string()));
                        reader.emit_close();
                        return;
                    }
                }
            }
        });

        let writer = core.clone();
        handle.spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let is_close = matches!(frame, WsMessage::Close(_));
                if let Err(err) = sink.send(frame).await {
                    writer
                        .handlers
                        .exception
                        .lock()
                        .clone()
                        .handle(Cause::new(err.to_string()));
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
            writer.emit_close();
        });

        core
    }

    pub fn set_data_handler(&self, handler: SharedHandler<Buffer>) {
        *self.handlers.data.lock() = handler;
    }

    pub fn set_end_handler(&self, handler: SharedHandler<()>) {
        *self.handlers.end.lock() = handler;
    }

    pub fn set_close_handler(&self, handler: SharedHandler<()>) {
        *self.handlers.close.lock() = handler;
    }

    pub fn set_exception_handler(&self, handler: SharedHandler<Cause>) {
        *self.handlers.exception.lock() = handler;
    }

    pub fn set_drain_handler(&self, handler: SharedHandler<()>) {
        *self.handlers.drain.lock() = handler;
    }

    pub fn write_text(&self, text: String) -> RuntimeResult<()> {
        self.send(WsMessage::text(text))
    }

    pub fn write_binary(&self, bytes: Vec<u8>) -> RuntimeResult<()> {
        self.send(WsMessage::binary(bytes))
    }

    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.pause_tx.send(false);
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.frame_tx.send(WsMessage::Close(None));
        }
    }

    fn send(&self, frame: WsMessage) -> RuntimeResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::Closed);
        }
        self.frame_tx.send(frame).map_err(|_| RuntimeError::Closed)
    }

    fn emit_close(&self) {
        if !self.close_emitted.swap(true, Ordering::AcqRel) {
            self.closed.store(true, Ordering::Release);
            debug!("websocket closed");
            self.handlers.close.lock().clone().handle(());
        }
    }
}

/// Script-facing websocket. Server-side connections carry the request path.
pub struct WebSocketWrapper {
    core: Arc<WsCore>,
    path: String,
    env: ScriptEnv,
}

impl WebSocketWrapper {
    pub const CLASS: &'static str = "Pontoon\\Http\\WebSocket";

    pub fn wrap(core: Arc<WsCore>, path: impl Into<String>, env: ScriptEnv) -> Arc<Self> {
        Arc::new(Self {
            core,
            path: path.into(),
            env,
        })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Resource(pontoon_script::Resource::from_arc(Self::CLASS, self.clone()))
    }

    /// The request path of the handshake. Empty for client connections.
    pub fn path(&self) -> Value {
        Value::Str(self.path.clone())
    }

    pub fn data_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\WebSocket::dataHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, Buffer::into_value)?;
        self.core.set_data_handler(adapter);
        Ok(())
    }

    pub fn end_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\WebSocket::endHandler()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        self.core.set_end_handler(adapter);
        Ok(())
    }

    pub fn close_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\WebSocket::closeHandler()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        self.core.set_close_handler(adapter);
        Ok(())
    }

    pub fn exception_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\WebSocket::exceptionHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, |cause: Cause| {
            Value::Str(cause.to_string())
        })?;
        self.core.set_exception_handler(adapter);
        Ok(())
    }

    pub fn write_text_frame(&self, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\WebSocket::writeTextFrame()";
        let text = pontoon_script::expect_str(&self.env, data, "data", SITE)?;
        self.core
            .write_text(text)
            .map_err(|err| self.env.error(err.to_string()))
    }

    pub fn write_binary_frame(&self, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Http\\WebSocket::writeBinaryFrame()";
        let bytes = expect_bytes(&self.env, data, "data", SITE)?;
        self.core
            .write_binary(bytes)
            .map_err(|err| self.env.error(err.to_string()))
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn core(&self) -> &Arc<WsCore> {
        &self.core
    }
}

impl ReadStream for WebSocketWrapper {
    fn set_data_handler(&self, handler: SharedHandler<Buffer>) {
        self.core.set_data_handler(handler);
    }

    fn set_end_handler(&self, handler: SharedHandler<()>) {
        self.core.set_end_handler(handler);
    }

    fn set_exception_handler(&self, handler: SharedHandler<Cause>) {
        self.core.set_exception_handler(handler);
    }

    fn pause(&self) {
        self.core.pause();
    }

    fn resume(&self) {
        self.core.resume();
    }
}

impl WriteStream for WebSocketWrapper {
    fn write(&self, data: Buffer) -> RuntimeResult<()> {
        self.core.write_binary(data.to_vec())
    }

    // The frame channel is unbounded; the queue never reports full, so the
    // drain handler is retained but never fires.
    fn set_write_queue_max_size(&self, _size: usize) {}

    fn write_queue_full(&self) -> bool {
        false
    }

    fn set_drain_handler(&self, handler: SharedHandler<()>) {
        self.core.set_drain_handler(handler);
    }
}
