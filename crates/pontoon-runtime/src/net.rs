//! TCP servers, clients and sockets.
//!
//! The socket core owns its transport through a pair of tasks: a read loop
//! delivering buffers to the data handler, and a write loop draining a
//! command channel. Wrappers hold the core through an `Arc` and never touch
//! the transport directly. The core is generic over the transport so tests
//! can drive it with an in-memory duplex pipe.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use pontoon_script::{
    AsyncResult, Array, Cause, EventHandler, ScriptEnv, ScriptResult, Value, expect_int,
    modified_async_result_handler, modified_handler, opt_str, void_async_handler, void_handler,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::buffer::{Buffer, expect_bytes};
use crate::error::{RuntimeError, RuntimeResult};
use crate::streams::{ReadStream, SharedHandler, WriteStream, noop_handler};

const DEFAULT_WRITE_QUEUE_MAX: usize = 64 * 1024;
const READ_CHUNK: usize = 8 * 1024;

enum SocketCommand {
    Write(Vec<u8>),
    Close,
}

struct SocketHandlers {
    data: Mutex<SharedHandler<Buffer>>,
    end: Mutex<SharedHandler<()>>,
    drain: Mutex<SharedHandler<()>>,
    exception: Mutex<SharedHandler<Cause>>,
    close: Mutex<SharedHandler<()>>,
}

impl SocketHandlers {
    fn new() -> Self {
        Self {
            data: Mutex::new(noop_handler()),
            end: Mutex::new(noop_handler()),
            drain: Mutex::new(noop_handler()),
            exception: Mutex::new(noop_handler()),
            close: Mutex::new(noop_handler()),
        }
    }
}

/// The native side of one connection.
pub struct SocketCore {
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    pause_tx: watch::Sender<bool>,
    handlers: SocketHandlers,
    queued: AtomicUsize,
    queue_max: AtomicUsize,
    closed: AtomicBool,
    close_emitted: AtomicBool,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

impl SocketCore {
    /// Take ownership of a transport and start its read and write loops.
    pub fn spawn<S>(
        stream: S,
        handle: &Handle,
        local: Option<SocketAddr>,
        peer: Option<SocketAddr>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (pause_tx, pause_rx) = watch::channel(false);
        let core = Arc::new(Self {
            command_tx,
            pause_tx,
            handlers: SocketHandlers::new(),
            queued: AtomicUsize::new(0),
            queue_max: AtomicUsize::new(DEFAULT_WRITE_QUEUE_MAX),
            closed: AtomicBool::new(false),
            close_emitted: AtomicBool::new(false),
            local,
            peer,
        });
        handle.spawn(read_loop(core.clone(), read_half, pause_rx));
        handle.spawn(write_loop(core.clone(), write_half, command_rx));
        core
    }

    pub fn set_data_handler(&self, handler: SharedHandler<Buffer>) {
        *self.handlers.data.lock() = handler;
    }

    pub fn set_end_handler(&self, handler: SharedHandler<()>) {
        *self.handlers.end.lock() = handler;
    }

    pub fn set_drain_handler(&self, handler: SharedHandler<()>) {
        *self.handlers.drain.lock() = handler;
    }

    pub fn set_exception_handler(&self, handler: SharedHandler<Cause>) {
        *self.handlers.exception.lock() = handler;
    }

    pub fn set_close_handler(&self, handler: SharedHandler<()>) {
        *self.handlers.close.lock() = handler;
    }

    /// Queue bytes for the write loop. Fails once the socket is closed.
    pub fn write(&self, bytes: Vec<u8>) -> RuntimeResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::Closed);
        }
        self.queued.fetch_add(bytes.len(), Ordering::AcqRel);
        self.command_tx
            .send(SocketCommand::Write(bytes))
            .map_err(|_| RuntimeError::Closed)
    }

    pub fn write_queue_full(&self) -> bool {
        self.queued.load(Ordering::Acquire) >= self.queue_max.load(Ordering::Acquire)
    }

    pub fn set_write_queue_max_size(&self, size: usize) {
        self.queue_max.store(size.max(1), Ordering::Release);
    }

    /// Stop delivering data events until resumed. Bytes arriving meanwhile
    /// back up in the transport, not in memory here.
    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.pause_tx.send(false);
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.command_tx.send(SocketCommand::Close);
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn emit_close(&self) {
        if !self.close_emitted.swap(true, Ordering::AcqRel) {
            self.closed.store(true, Ordering::Release);
            self.handlers.close.lock().clone().handle(());
        }
    }
}

async fn read_loop<R>(core: Arc<SocketCore>, mut read_half: R, mut paused: watch::Receiver<bool>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        while *paused.borrow() {
            if paused.changed().await.is_err() {
                return;
            }
        }
        match read_half.read(&mut buf).await {
            Ok(0) => {
                // Remote end-of-stream. The write side stays usable until
                // the socket is closed locally.
                core.handlers.end.lock().clone().handle(());
                return;
            }
            Ok(n) => {
                let handler = core.handlers.data.lock().clone();
                handler.handle(Buffer::from_bytes(buf[..n].to_vec()));
            }
            Err(err) => {
                core.handlers.exception.lock().clone().handle(Cause::from(err));
                core.emit_close();
                return;
            }
        }
    }
}

async fn write_loop<W>(
    core: Arc<SocketCore>,
    mut write_half: W,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
) where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(command) = command_rx.recv().await {
        match command {
            SocketCommand::Write(bytes) => {
                let len = bytes.len();
                let result = write_half.write_all(&bytes).await;
                let before = core.queued.fetch_sub(len, Ordering::AcqRel);
                let max = core.queue_max.load(Ordering::Acquire);
                if before >= max && before.saturating_sub(len) < max {
                    core.handlers.drain.lock().clone().handle(());
                }
                if let Err(err) = result {
                    core.handlers.exception.lock().clone().handle(Cause::from(err));
                    break;
                }
            }
            SocketCommand::Close => {
                let _ = write_half.shutdown().await;
                break;
            }
        }
    }
    core.emit_close();
}

/// Render a socket address as the script-facing `{host, port}` array.
fn address_value(addr: Option<SocketAddr>) -> Value {
    match addr {
        Some(addr) => {
            let mut array = Array::new();
            array.insert("host", Value::Str(addr.ip().to_string()));
            array.insert("port", Value::Int(addr.port() as i64));
            Value::Array(array)
        }
        None => Value::Null,
    }
}

/// Script-facing socket wrapper. Also the crate's canonical read/write
/// stream pair, so a socket can sit on either side of a pump.
pub struct NetSocket {
    core: Arc<SocketCore>,
    env: ScriptEnv,
}

impl NetSocket {
    pub const CLASS: &'static str = "Pontoon\\Net\\NetSocket";

    pub fn wrap(core: Arc<SocketCore>, env: ScriptEnv) -> Arc<Self> {
        Arc::new(Self { core, env })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Resource(pontoon_script::Resource::from_arc(Self::CLASS, self.clone()))
    }

    pub fn data_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetSocket::dataHandler()";
        let adapter = modified_handler(&self.env, handler, SITE, Buffer::into_value)?;
        self.core.set_data_handler(adapter);
        Ok(())
    }

    pub fn end_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetSocket::endHandler()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        self.core.set_end_handler(adapter);
        Ok(())
    }

    pub fn drain_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetSocket::drainHandler()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        self.core.set_drain_handler(adapter);
        Ok(())
    }

    pub fn exception_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetSocket::exceptionHandler()";
        let adapter =
            modified_handler(&self.env, handler, SITE, |cause: Cause| {
                Value::Str(cause.to_string())
            })?;
        self.core.set_exception_handler(adapter);
        Ok(())
    }

    pub fn close_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetSocket::closeHandler()";
        let adapter = void_handler(&self.env, handler, SITE)?;
        self.core.set_close_handler(adapter);
        Ok(())
    }

    /// Write a string or Buffer. Enqueued in call order; a failed socket
    /// surfaces through the exception handler, not here.
    pub fn write_value(&self, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetSocket::write()";
        let bytes = expect_bytes(&self.env, data, "data", SITE)?;
        if let Err(err) = self.core.write(bytes) {
            return Err(self.env.error(err.to_string()));
        }
        Ok(())
    }

    pub fn pause(&self) {
        self.core.pause();
    }

    pub fn resume(&self) {
        self.core.resume();
    }

    pub fn set_write_queue_max_size_value(&self, size: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetSocket::setWriteQueueMaxSize()";
        let size = expect_int(&self.env, size, "size", SITE)?;
        if size <= 0 {
            return Err(self.env.error(format!("size argument to {} must be positive.", SITE)));
        }
        self.core.set_write_queue_max_size(size as usize);
        Ok(())
    }

    pub fn is_write_queue_full(&self) -> Value {
        Value::Bool(self.core.write_queue_full())
    }

    pub fn local_address(&self) -> Value {
        address_value(self.core.local_addr())
    }

    pub fn remote_address(&self) -> Value {
        address_value(self.core.peer_addr())
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn core(&self) -> &Arc<SocketCore> {
        &self.core
    }
}

impl ReadStream for NetSocket {
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

impl WriteStream for NetSocket {
    fn write(&self, data: Buffer) -> RuntimeResult<()> {
        self.core.write(data.to_vec())
    }

    fn set_write_queue_max_size(&self, size: usize) {
        self.core.set_write_queue_max_size(size);
    }

    fn write_queue_full(&self) -> bool {
        self.core.write_queue_full()
    }

    fn set_drain_handler(&self, handler: SharedHandler<()>) {
        self.core.set_drain_handler(handler);
    }
}

/// The native accept loop behind a [`NetServer`] wrapper.
pub struct NetServerCore {
    handle: Handle,
    connect_handler: Mutex<Option<SharedHandler<Arc<SocketCore>>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    bound: Mutex<Option<SocketAddr>>,
}

impl NetServerCore {
    pub fn new(handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            connect_handler: Mutex::new(None),
            shutdown: Mutex::new(None),
            bound: Mutex::new(None),
        })
    }

    pub fn set_connect_handler(&self, handler: SharedHandler<Arc<SocketCore>>) {
        *self.connect_handler.lock() = Some(handler);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }

    /// Bind and start accepting. The listen callback fires once the port is
    /// bound (or binding failed); accepted connections flow to the connect
    /// handler.
    pub fn listen(
        self: &Arc<Self>,
        port: u16,
        host: String,
        on_listen: Option<SharedHandler<AsyncResult<()>>>,
    ) {
        let server = self.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown.lock() = Some(shutdown_tx);
        self.handle.clone().spawn(async move {
            let listener = match TcpListener::bind((host.as_str(), port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(host, port, error = %err, "bind failed");
                    if let Some(on_listen) = on_listen {
                        on_listen.handle(Err(Cause::from(err)));
                    }
                    return;
                }
            };
            let bound = listener.local_addr().ok();
            *server.bound.lock() = bound;
            debug!(addr = ?bound, "server listening");
            if let Some(on_listen) = on_listen {
                on_listen.handle(Ok(()));
            }
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(error = %err, "accept failed");
                                continue;
                            }
                        };
                        let local = stream.local_addr().ok();
                        let socket =
                            SocketCore::spawn(stream, &server.handle, local, Some(peer));
                        let handler = server.connect_handler.lock().clone();
                        if let Some(handler) = handler {
                            handler.handle(socket);
                        }
                    }
                }
            }
            debug!(addr = ?bound, "server closed");
        });
    }

    /// Stop accepting. Open connections are left to finish on their own.
    pub fn close(&self, on_close: Option<SharedHandler<AsyncResult<()>>>) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        *self.bound.lock() = None;
        if let Some(on_close) = on_close {
            on_close.handle(Ok(()));
        }
    }
}

/// Script-facing TCP server.
pub struct NetServer {
    core: Arc<NetServerCore>,
    env: ScriptEnv,
}

impl NetServer {
    pub const CLASS: &'static str = "Pontoon\\Net\\NetServer";

    pub fn new(handle: Handle, env: ScriptEnv) -> Self {
        Self {
            core: NetServerCore::new(handle),
            env,
        }
    }

    pub fn connect_handler(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetServer::connectHandler()";
        let env = self.env.clone();
        let adapter = modified_handler(&self.env, handler, SITE, move |core: Arc<SocketCore>| {
            NetSocket::wrap(core, env.clone()).value()
        })?;
        self.core.set_connect_handler(adapter);
        Ok(())
    }

    /// `listen(port[, host][, handler])`. Host defaults to all interfaces;
    /// port 0 binds an ephemeral port readable back through `port()`.
    pub fn listen(&self, port: &Value, host: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetServer::listen()";
        let port = expect_port(&self.env, port, SITE)?;
        let host = opt_str(&self.env, host, "host", SITE)?.unwrap_or_else(|| "0.0.0.0".into());
        let on_listen = if handler.is_absent() {
            None
        } else {
            Some(void_async_handler(&self.env, handler, SITE)?
                as SharedHandler<AsyncResult<()>>)
        };
        self.core.listen(port, host, on_listen);
        Ok(())
    }

    pub fn close(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetServer::close()";
        let on_close = if handler.is_absent() {
            None
        } else {
            Some(void_async_handler(&self.env, handler, SITE)?
                as SharedHandler<AsyncResult<()>>)
        };
        self.core.close(on_close);
        Ok(())
    }

    pub fn port(&self) -> Value {
        self.core
            .local_addr()
            .map_or(Value::Null, |addr| Value::Int(addr.port() as i64))
    }

    pub fn host(&self) -> Value {
        self.core
            .local_addr()
            .map_or(Value::Null, |addr| Value::Str(addr.ip().to_string()))
    }

    pub fn core(&self) -> &Arc<NetServerCore> {
        &self.core
    }
}

/// Script-facing TCP client.
pub struct NetClient {
    handle: Handle,
    env: ScriptEnv,
}

impl NetClient {
    pub const CLASS: &'static str = "Pontoon\\Net\\NetClient";

    pub fn new(handle: Handle, env: ScriptEnv) -> Self {
        Self { handle, env }
    }

    /// `connect(port[, host], handler)`. The handler receives the connected
    /// socket or the connection error.
    pub fn connect(&self, port: &Value, host: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\Net\\NetClient::connect()";
        let port = expect_port(&self.env, port, SITE)?;
        let host = opt_str(&self.env, host, "host", SITE)?.unwrap_or_else(|| "127.0.0.1".into());
        let env = self.env.clone();
        let on_connect = modified_async_result_handler(
            &self.env,
            handler,
            SITE,
            move |core: Arc<SocketCore>| NetSocket::wrap(core, env.clone()).value(),
        )?;
        let handle = self.handle.clone();
        self.handle.spawn(async move {
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => {
                    let local = stream.local_addr().ok();
                    let peer = stream.peer_addr().ok();
                    let core = SocketCore::spawn(stream, &handle, local, peer);
                    on_connect.handle(Ok(core));
                }
                Err(err) => {
                    on_connect.handle(Err(Cause::from(err)));
                }
            }
        });
        Ok(())
    }
}

pub(crate) fn expect_port(env: &ScriptEnv, value: &Value, site: &str) -> ScriptResult<u16> {
    let port = expect_int(env, value, "port", site)?;
    u16::try_from(port)
        .map_err(|_| env.error(format!("port argument to {} must be between 0 and 65535.", site)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::fn_handler;
    use std::time::Duration;

    #[tokio::test]
    async fn duplex_socket_delivers_data_in_order_then_end() {
        let (near, far) = tokio::io::duplex(1024);
        let core = SocketCore::spawn(near, &Handle::current(), None, None);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let ended = Arc::new(AtomicBool::new(false));
        let sink = chunks.clone();
        core.set_data_handler(fn_handler(move |buffer: Buffer| {
            sink.lock().push(buffer.to_utf8());
        }));
        let end_flag = ended.clone();
        core.set_end_handler(fn_handler(move |_| {
            end_flag.store(true, Ordering::SeqCst);
        }));

        let (mut far_read, mut far_write) = tokio::io::split(far);
        far_write.write_all(b"one").await.unwrap();
        far_write.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        far_write.write_all(b"two").await.unwrap();
        far_write.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        far_write.write_all(b"three").await.unwrap();
        far_write.shutdown().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(chunks.lock().concat(), "onetwothree");
        assert!(ended.load(Ordering::SeqCst));

        // Writes queued before close still arrive on the far side.
        core.write(b"reply".to_vec()).unwrap();
        core.close();
        let mut out = Vec::new();
        far_read.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"reply");
        assert!(core.write(b"late".to_vec()).is_err());
    }

    #[tokio::test]
    async fn pause_defers_data_until_resume() {
        let (near, far) = tokio::io::duplex(1024);
        let core = SocketCore::spawn(near, &Handle::current(), None, None);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        core.set_data_handler(fn_handler(move |buffer: Buffer| {
            sink.lock().push(buffer.to_utf8());
        }));
        core.pause();

        let (_far_read, mut far_write) = tokio::io::split(far);
        far_write.write_all(b"held").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(chunks.lock().is_empty());

        core.resume();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(chunks.lock().as_slice(), &["held"]);
    }

    #[tokio::test]
    async fn server_accepts_and_client_connects() {
        let handle = Handle::current();
        let server = NetServerCore::new(handle.clone());
        let greeted = Arc::new(AtomicBool::new(false));
        server.set_connect_handler(fn_handler(move |socket: Arc<SocketCore>| {
            let _ = socket.write(b"hi\n".to_vec());
        }));
        let (bound_tx, bound_rx) = tokio::sync::oneshot::channel();
        let bound_tx = Mutex::new(Some(bound_tx));
        server.listen(
            0,
            "127.0.0.1".into(),
            Some(fn_handler(move |result: AsyncResult<()>| {
                assert!(result.is_ok());
                if let Some(tx) = bound_tx.lock().take() {
                    let _ = tx.send(());
                }
            })),
        );
        bound_rx.await.unwrap();
        let port = server.local_addr().unwrap().port();

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let client = SocketCore::spawn(stream, &handle, None, None);
        let flag = greeted.clone();
        client.set_data_handler(fn_handler(move |buffer: Buffer| {
            if buffer.to_utf8() == "hi\n" {
                flag.store(true, Ordering::SeqCst);
            }
        }));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(greeted.load(Ordering::SeqCst));
        server.close(None);
    }

    #[test]
    fn wrapper_rejects_bad_arguments() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let env = ScriptEnv::new("t.php");
        let server = NetServer::new(runtime.handle().clone(), env);
        assert!(server.connect_handler(&Value::Int(1)).is_err());
        assert!(
            server
                .listen(&Value::Str("not a port".into()), &Value::Null, &Value::Null)
                .is_err()
        );
        assert!(
            server
                .listen(&Value::Int(70000), &Value::Null, &Value::Null)
                .is_err()
        );
    }
}
