//! The script-facing byte buffer resource.

use parking_lot::Mutex;
use pontoon_script::{ScriptEnv, ScriptResult, Value};

/// A growable byte buffer shared between script and native code.
///
/// Scripts hold it as a resource; native read loops deliver owned buffers.
/// Interior mutability lets a script append to a buffer it received without
/// taking ownership of the resource cell.
pub struct Buffer {
    bytes: Mutex<Vec<u8>>,
}

impl Buffer {
    pub const CLASS: &'static str = "Pontoon\\Buffer";

    pub fn new() -> Self {
        Self {
            bytes: Mutex::new(Vec::new()),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(bytes.into()),
        }
    }

    pub fn from_str(s: &str) -> Self {
        Self::from_bytes(s.as_bytes().to_vec())
    }

    /// An empty buffer sized for an expected payload. The length stays zero
    /// until data is appended.
    pub fn with_size(size: usize) -> Self {
        Self {
            bytes: Mutex::new(Vec::with_capacity(size)),
        }
    }

    pub fn append_bytes(&self, bytes: &[u8]) {
        self.bytes.lock().extend_from_slice(bytes);
    }

    pub fn append_str(&self, s: &str) {
        self.append_bytes(s.as_bytes());
    }

    pub fn append_buffer(&self, other: &Buffer) {
        // Lock ordering is irrelevant: other is snapshotted first.
        let tail = other.to_vec();
        self.bytes.lock().extend_from_slice(&tail);
    }

    /// Append a 32-bit integer as four big-endian bytes.
    pub fn append_int(&self, value: i32) {
        self.bytes.lock().extend_from_slice(&value.to_be_bytes());
    }

    /// Read back a 32-bit big-endian integer at `pos`. `None` when fewer
    /// than four bytes remain.
    pub fn get_int(&self, pos: usize) -> Option<i32> {
        let bytes = self.bytes.lock();
        let slice = bytes.get(pos..pos.checked_add(4)?)?;
        Some(i32::from_be_bytes(slice.try_into().ok()?))
    }

    /// The bytes in `start..end` as a lossy UTF-8 string. `None` when the
    /// range falls outside the buffer.
    pub fn get_string(&self, start: usize, end: usize) -> Option<String> {
        let bytes = self.bytes.lock();
        let slice = bytes.get(start..end)?;
        Some(String::from_utf8_lossy(slice).into_owned())
    }

    /// A copy of the bytes in `start..end` as a new buffer.
    pub fn get_buffer(&self, start: usize, end: usize) -> Option<Buffer> {
        let bytes = self.bytes.lock();
        bytes.get(start..end).map(Buffer::from_bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Lossy UTF-8 rendering, the script's string view of the bytes.
    pub fn to_utf8(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    /// Wrap into a resource value for delivery to a script callable.
    pub fn into_value(self) -> Value {
        Value::resource(Self::CLASS, self)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        Self::from_bytes(self.to_vec())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buffer({} bytes)", self.len())
    }
}

impl From<Buffer> for Value {
    fn from(buffer: Buffer) -> Value {
        buffer.into_value()
    }
}

/// Coerce a write argument to raw bytes: strings pass through, buffer
/// resources are snapshotted.
pub fn expect_bytes(
    env: &ScriptEnv,
    value: &Value,
    param: &str,
    site: &str,
) -> ScriptResult<Vec<u8>> {
    if let Some(resource) = value.as_resource() {
        if let Some(buffer) = resource.downcast::<Buffer>() {
            return Ok(buffer.to_vec());
        }
    }
    if let Value::Str(s) = value {
        return Ok(s.as_bytes().to_vec());
    }
    Err(env.error(format!(
        "{} argument to {} must be a string or Buffer, {} given.",
        param,
        site,
        value.kind()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let buffer = Buffer::from_str("hello");
        buffer.append_str(", world");
        assert_eq!(buffer.to_utf8(), "hello, world");
        assert_eq!(buffer.len(), 12);
    }

    #[test]
    fn append_buffer_snapshots_the_source() {
        let a = Buffer::from_str("ab");
        let b = Buffer::from_str("cd");
        a.append_buffer(&b);
        b.append_str("!!");
        assert_eq!(a.to_utf8(), "abcd");
    }

    #[test]
    fn sized_construction_starts_empty() {
        let buffer = Buffer::with_size(64);
        assert!(buffer.is_empty());
        buffer.append_str("x");
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn append_int_writes_four_big_endian_bytes() {
        let buffer = Buffer::new();
        buffer.append_int(0x01020304);
        assert_eq!(buffer.to_vec(), vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buffer.get_int(0), Some(0x01020304));
        assert_eq!(buffer.get_int(1), None);
    }

    #[test]
    fn range_accessors_bounds_check() {
        let buffer = Buffer::from_str("hello, world");
        assert_eq!(buffer.get_string(7, 12).as_deref(), Some("world"));
        assert_eq!(buffer.get_string(7, 13), None);
        assert_eq!(buffer.get_buffer(0, 5).unwrap().to_utf8(), "hello");
        assert!(buffer.get_buffer(6, 5).is_none());
    }

    #[test]
    fn expect_bytes_accepts_strings_and_buffer_resources() {
        let env = ScriptEnv::new("t.php");
        let bytes = expect_bytes(&env, &Value::Str("x".into()), "data", "write()").unwrap();
        assert_eq!(bytes, b"x");

        let value = Buffer::from_str("yz").into_value();
        let bytes = expect_bytes(&env, &value, "data", "write()").unwrap();
        assert_eq!(bytes, b"yz");

        assert!(expect_bytes(&env, &Value::Int(1), "data", "write()").is_err());
    }
}
