//! Filesystem access: async operations with result handlers, plus `_sync`
//! variants that run on the calling thread.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use pontoon_script::{
    Array, Cause, EventHandler, ScriptEnv, ScriptResult, Value, expect_int, expect_str,
    modified_async_result_handler, void_async_handler,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;

use crate::buffer::{Buffer, expect_bytes};
use crate::error::RuntimeResult;
use crate::streams::{ReadStream, SharedHandler, WriteStream};

/// Script-facing filesystem service.
pub struct FileSystem {
    handle: Handle,
    env: ScriptEnv,
}

impl FileSystem {
    pub const CLASS: &'static str = "Pontoon\\FileSystem";

    pub fn new(handle: Handle, env: ScriptEnv) -> Self {
        Self { handle, env }
    }

    pub fn read_file(&self, path: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::readFile()";
        let path = self.path_arg(path, SITE)?;
        let on_done = modified_async_result_handler(&self.env, handler, SITE, |bytes: Vec<u8>| {
            Buffer::from_bytes(bytes).into_value()
        })?;
        self.handle.spawn(async move {
            on_done.handle(tokio::fs::read(&path).await.map_err(Cause::from));
        });
        Ok(())
    }

    pub fn read_file_sync(&self, path: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\FileSystem::readFileSync()";
        let path = self.path_arg(path, SITE)?;
        let bytes = std::fs::read(&path).map_err(|err| self.env.error(err.to_string()))?;
        Ok(Buffer::from_bytes(bytes).into_value())
    }

    pub fn write_file(&self, path: &Value, data: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::writeFile()";
        let path = self.path_arg(path, SITE)?;
        let bytes = expect_bytes(&self.env, data, "data", SITE)?;
        let on_done = void_async_handler(&self.env, handler, SITE)?;
        self.handle.spawn(async move {
            on_done.handle(tokio::fs::write(&path, bytes).await.map_err(Cause::from));
        });
        Ok(())
    }

    pub fn write_file_sync(&self, path: &Value, data: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::writeFileSync()";
        let path = self.path_arg(path, SITE)?;
        let bytes = expect_bytes(&self.env, data, "data", SITE)?;
        std::fs::write(&path, bytes).map_err(|err| self.env.error(err.to_string()))
    }

    pub fn copy(&self, from: &Value, to: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::copy()";
        let from = self.path_arg(from, SITE)?;
        let to = path_from(&self.env, to, "to", SITE)?;
        let on_done = void_async_handler(&self.env, handler, SITE)?;
        self.handle.spawn(async move {
            on_done.handle(
                tokio::fs::copy(&from, &to)
                    .await
                    .map(|_| ())
                    .map_err(Cause::from),
            );
        });
        Ok(())
    }

    pub fn move_file(&self, from: &Value, to: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::move()";
        let from = self.path_arg(from, SITE)?;
        let to = path_from(&self.env, to, "to", SITE)?;
        let on_done = void_async_handler(&self.env, handler, SITE)?;
        self.handle.spawn(async move {
            on_done.handle(tokio::fs::rename(&from, &to).await.map_err(Cause::from));
        });
        Ok(())
    }

    /// `delete(path[, recursive], handler)`.
    pub fn delete(&self, path: &Value, recursive: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::delete()";
        let path = self.path_arg(path, SITE)?;
        let recursive = matches!(recursive, Value::Bool(true));
        let on_done = void_async_handler(&self.env, handler, SITE)?;
        self.handle.spawn(async move {
            let result = async {
                let meta = tokio::fs::metadata(&path).await?;
                if meta.is_dir() {
                    if recursive {
                        tokio::fs::remove_dir_all(&path).await
                    } else {
                        tokio::fs::remove_dir(&path).await
                    }
                } else {
                    tokio::fs::remove_file(&path).await
                }
            }
            .await;
            on_done.handle(result.map_err(Cause::from));
        });
        Ok(())
    }

    /// `mkdir(path[, createParents], handler)`.
    pub fn mkdir(&self, path: &Value, parents: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::mkdir()";
        let path = self.path_arg(path, SITE)?;
        let parents = matches!(parents, Value::Bool(true));
        let on_done = void_async_handler(&self.env, handler, SITE)?;
        self.handle.spawn(async move {
            let result = if parents {
                tokio::fs::create_dir_all(&path).await
            } else {
                tokio::fs::create_dir(&path).await
            };
            on_done.handle(result.map_err(Cause::from));
        });
        Ok(())
    }

    /// List a directory; the result is an array of entry paths.
    pub fn read_dir(&self, path: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::readDir()";
        let path = self.path_arg(path, SITE)?;
        let on_done =
            modified_async_result_handler(&self.env, handler, SITE, |names: Vec<String>| {
                Value::Array(Array::from_values(names.into_iter().map(Value::Str)))
            })?;
        self.handle.spawn(async move {
            let result = async {
                let mut entries = tokio::fs::read_dir(&path).await?;
                let mut names = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    names.push(entry.path().to_string_lossy().into_owned());
                }
                names.sort();
                Ok::<_, std::io::Error>(names)
            }
            .await;
            on_done.handle(result.map_err(Cause::from));
        });
        Ok(())
    }

    pub fn exists(&self, path: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::exists()";
        let path = self.path_arg(path, SITE)?;
        let on_done =
            modified_async_result_handler(&self.env, handler, SITE, |exists: bool| {
                Value::Bool(exists)
            })?;
        self.handle.spawn(async move {
            let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            on_done.handle(Ok(exists));
        });
        Ok(())
    }

    pub fn exists_sync(&self, path: &Value) -> ScriptResult<Value> {
        const SITE: &str = "Pontoon\\FileSystem::existsSync()";
        let path = self.path_arg(path, SITE)?;
        Ok(Value::Bool(path.exists()))
    }

    pub fn props(&self, path: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::props()";
        let path = self.path_arg(path, SITE)?;
        let on_done =
            modified_async_result_handler(&self.env, handler, SITE, |props: FileProps| {
                props.into_value()
            })?;
        self.handle.spawn(async move {
            let result = tokio::fs::metadata(&path)
                .await
                .map(FileProps::from_metadata)
                .map_err(Cause::from);
            on_done.handle(result);
        });
        Ok(())
    }

    /// Open a file for positional reads and writes, creating it if needed.
    pub fn open(&self, path: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem::open()";
        let path = self.path_arg(path, SITE)?;
        let env = self.env.clone();
        let handle = self.handle.clone();
        let on_done =
            modified_async_result_handler(&self.env, handler, SITE, move |file: tokio::fs::File| {
                AsyncFile::wrap(file, handle.clone(), env.clone()).value()
            })?;
        self.handle.spawn(async move {
            let result = tokio::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .await
                .map_err(Cause::from);
            on_done.handle(result);
        });
        Ok(())
    }

    fn path_arg(&self, value: &Value, site: &str) -> ScriptResult<PathBuf> {
        path_from(&self.env, value, "path", site)
    }
}

fn path_from(env: &ScriptEnv, value: &Value, param: &str, site: &str) -> ScriptResult<PathBuf> {
    Ok(PathBuf::from(expect_str(env, value, param, site)?))
}

/// Properties of a file, delivered by `props()`.
pub struct FileProps {
    pub size: u64,
    pub is_dir: bool,
    pub is_file: bool,
    pub modified_ms: Option<i64>,
}

impl FileProps {
    pub const CLASS: &'static str = "Pontoon\\FileSystem\\FileProps";

    fn from_metadata(meta: std::fs::Metadata) -> Self {
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        Self {
            size: meta.len(),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            modified_ms,
        }
    }

    fn into_value(self) -> Value {
        Value::resource(Self::CLASS, self)
    }

    pub fn to_array(&self) -> Value {
        let mut array = Array::new();
        array.insert("size", Value::Int(self.size as i64));
        array.insert("isDirectory", Value::Bool(self.is_dir));
        array.insert("isRegularFile", Value::Bool(self.is_file));
        array.insert(
            "lastModifiedTime",
            self.modified_ms.map_or(Value::Null, Value::Int),
        );
        Value::Array(array)
    }
}

/// An open file supporting positional reads and writes. One operation runs
/// at a time; the async mutex serializes them in call order.
pub struct AsyncFile {
    file: Arc<AsyncMutex<tokio::fs::File>>,
    handle: Handle,
    env: ScriptEnv,
}

impl AsyncFile {
    pub const CLASS: &'static str = "Pontoon\\FileSystem\\AsyncFile";

    pub fn wrap(file: tokio::fs::File, handle: Handle, env: ScriptEnv) -> Arc<Self> {
        Arc::new(Self {
            file: Arc::new(AsyncMutex::new(file)),
            handle,
            env,
        })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Resource(pontoon_script::Resource::from_arc(Self::CLASS, self.clone()))
    }

    /// `read(position, length, handler)`.
    pub fn read(&self, position: &Value, length: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem\\AsyncFile::read()";
        let position = non_negative(&self.env, position, "position", SITE)?;
        let length = non_negative(&self.env, length, "length", SITE)?;
        let on_done = modified_async_result_handler(&self.env, handler, SITE, |bytes: Vec<u8>| {
            Buffer::from_bytes(bytes).into_value()
        })?;
        let file = self.file.clone();
        self.handle.spawn(async move {
            let result = async {
                let mut file = file.lock().await;
                file.seek(SeekFrom::Start(position)).await?;
                let mut bytes = vec![0u8; length as usize];
                let mut filled = 0;
                while filled < bytes.len() {
                    let n = file.read(&mut bytes[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                bytes.truncate(filled);
                Ok::<_, std::io::Error>(bytes)
            }
            .await;
            on_done.handle(result.map_err(Cause::from));
        });
        Ok(())
    }

    /// `write(data, position, handler)`.
    pub fn write_at(&self, data: &Value, position: &Value, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem\\AsyncFile::write()";
        let bytes = expect_bytes(&self.env, data, "data", SITE)?;
        let position = non_negative(&self.env, position, "position", SITE)?;
        let on_done = void_async_handler(&self.env, handler, SITE)?;
        let file = self.file.clone();
        self.handle.spawn(async move {
            let result = async {
                let mut file = file.lock().await;
                file.seek(SeekFrom::Start(position)).await?;
                file.write_all(&bytes).await
            }
            .await;
            on_done.handle(result.map_err(Cause::from));
        });
        Ok(())
    }

    pub fn flush(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem\\AsyncFile::flush()";
        let on_done = if handler.is_absent() {
            None
        } else {
            Some(void_async_handler(&self.env, handler, SITE)?)
        };
        let file = self.file.clone();
        self.handle.spawn(async move {
            let result = file.lock().await.sync_all().await.map_err(Cause::from);
            if let Some(on_done) = on_done {
                on_done.handle(result);
            }
        });
        Ok(())
    }

    pub fn close(&self, handler: &Value) -> ScriptResult<()> {
        const SITE: &str = "Pontoon\\FileSystem\\AsyncFile::close()";
        let on_done = if handler.is_absent() {
            None
        } else {
            Some(void_async_handler(&self.env, handler, SITE)?)
        };
        let file = self.file.clone();
        self.handle.spawn(async move {
            let result = file.lock().await.shutdown().await.map_err(Cause::from);
            if let Some(on_done) = on_done {
                on_done.handle(result);
            }
        });
        Ok(())
    }
}

fn non_negative(env: &ScriptEnv, value: &Value, param: &str, site: &str) -> ScriptResult<u64> {
    let n = expect_int(env, value, param, site)?;
    u64::try_from(n)
        .map_err(|_| env.error(format!("{} argument to {} must not be negative.", param, site)))
}

// Streaming over an open file: sequential reads from the current position,
// writes appended at the end. Enough for pumping a file to a socket.
impl ReadStream for AsyncFile {
    fn set_data_handler(&self, handler: SharedHandler<Buffer>) {
        let file = self.file.clone();
        self.handle.spawn(async move {
            let mut chunk = vec![0u8; 8 * 1024];
            loop {
                let n = {
                    let mut file = file.lock().await;
                    match file.read(&mut chunk).await {
                        Ok(n) => n,
                        Err(_) => break,
                    }
                };
                if n == 0 {
                    break;
                }
                handler.handle(Buffer::from_bytes(chunk[..n].to_vec()));
            }
        });
    }

    fn set_end_handler(&self, _handler: SharedHandler<()>) {}

    fn set_exception_handler(&self, _handler: SharedHandler<Cause>) {}

    fn pause(&self) {}

    fn resume(&self) {}
}

impl WriteStream for AsyncFile {
    fn write(&self, data: Buffer) -> RuntimeResult<()> {
        let file = self.file.clone();
        let bytes = data.to_vec();
        self.handle.spawn(async move {
            let mut file = file.lock().await;
            let _ = file.seek(SeekFrom::End(0)).await;
            let _ = file.write_all(&bytes).await;
        });
        Ok(())
    }

    fn set_write_queue_max_size(&self, _size: usize) {}

    fn write_queue_full(&self) -> bool {
        false
    }

    fn set_drain_handler(&self, handler: SharedHandler<()>) {
        let _ = handler;
    }
}
