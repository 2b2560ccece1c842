//! Record parser: splits a byte stream into delimited or fixed-size records.

use std::sync::Arc;

use parking_lot::Mutex;
use pontoon_script::{
    EventHandler, ScriptEnv, ScriptResult, Value, expect_int, expect_str, modified_handler,
};

use crate::buffer::Buffer;
use crate::streams::SharedHandler;

#[derive(Clone, Debug)]
enum Mode {
    Delimited(Vec<u8>),
    Fixed(usize),
}

struct ParserState {
    pending: Vec<u8>,
    mode: Mode,
}

/// Splits incoming buffers into records and emits each to the output
/// handler. The mode can be switched between emissions, including from
/// inside the output handler itself (length-prefixed protocols switch
/// between a delimited header and a fixed-size body).
pub struct RecordParser {
    state: Mutex<ParserState>,
    output: Mutex<SharedHandler<Buffer>>,
}

impl std::fmt::Debug for RecordParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordParser")
    }
}

impl RecordParser {
    pub const CLASS: &'static str = "Pontoon\\ParseTools\\RecordParser";

    pub fn new_delimited(delimiter: impl Into<Vec<u8>>, output: SharedHandler<Buffer>) -> Self {
        Self {
            state: Mutex::new(ParserState {
                pending: Vec::new(),
                mode: Mode::Delimited(delimiter.into()),
            }),
            output: Mutex::new(output),
        }
    }

    pub fn new_fixed(size: usize, output: SharedHandler<Buffer>) -> Self {
        Self {
            state: Mutex::new(ParserState {
                pending: Vec::new(),
                mode: Mode::Fixed(size.max(1)),
            }),
            output: Mutex::new(output),
        }
    }

    /// Switch to delimited mode. Takes effect before the next record is
    /// scanned.
    pub fn delimited_mode(&self, delimiter: impl Into<Vec<u8>>) {
        self.state.lock().mode = Mode::Delimited(delimiter.into());
    }

    /// Switch to fixed-size mode.
    pub fn fixed_size_mode(&self, size: usize) {
        self.state.lock().mode = Mode::Fixed(size.max(1));
    }

    pub fn set_output(&self, output: SharedHandler<Buffer>) {
        *self.output.lock() = output;
    }

    /// Feed bytes in. Complete records are emitted before this returns.
    pub fn handle_bytes(&self, bytes: &[u8]) {
        self.state.lock().pending.extend_from_slice(bytes);
        // One record per iteration, with no lock held during emission, so
        // the output handler may switch modes for the next record.
        loop {
            let record = {
                let mut state = self.state.lock();
                match take_record(&mut state) {
                    Some(record) => record,
                    None => break,
                }
            };
            let output = self.output.lock().clone();
            output.handle(Buffer::from_bytes(record));
        }
    }
}

fn take_record(state: &mut ParserState) -> Option<Vec<u8>> {
    match &state.mode {
        Mode::Delimited(delimiter) => {
            let at = find(&state.pending, delimiter)?;
            let mut rest = state.pending.split_off(at + delimiter.len());
            state.pending.truncate(at);
            std::mem::swap(&mut state.pending, &mut rest);
            Some(rest)
        }
        Mode::Fixed(size) => {
            let size = *size;
            if state.pending.len() < size {
                return None;
            }
            let rest = state.pending.split_off(size);
            Some(std::mem::replace(&mut state.pending, rest))
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl EventHandler<Buffer> for RecordParser {
    fn handle(&self, data: Buffer) {
        self.handle_bytes(&data.to_vec());
    }
}

/// Construct a parser from script arguments: `(delimiter | size, handler)`.
pub fn parser_from_args(env: &ScriptEnv, args: &[Value]) -> ScriptResult<Arc<RecordParser>> {
    const SITE: &str = "Pontoon\\ParseTools\\RecordParser::__construct()";
    let spec = args.first().cloned().unwrap_or(Value::Null);
    let handler_value = args.get(1).cloned().unwrap_or(Value::Null);
    let output = modified_handler(env, &handler_value, SITE, Buffer::into_value)?;
    let parser = match &spec {
        Value::Int(_) => {
            let size = expect_int(env, &spec, "size", SITE)?;
            if size <= 0 {
                return Err(env.error(format!("size argument to {} must be positive.", SITE)));
            }
            RecordParser::new_fixed(size as usize, output)
        }
        _ => {
            let delimiter = expect_str(env, &spec, "delimiter", SITE)?;
            RecordParser::new_delimited(delimiter.into_bytes(), output)
        }
    };
    Ok(Arc::new(parser))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::fn_handler;

    fn collect() -> (SharedHandler<Buffer>, Arc<Mutex<Vec<String>>>) {
        let records: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        (
            fn_handler(move |buffer: Buffer| sink.lock().push(buffer.to_utf8())),
            records,
        )
    }

    #[test]
    fn delimited_records_split_across_chunks() {
        let (output, records) = collect();
        let parser = RecordParser::new_delimited(b"\r\n".to_vec(), output);
        parser.handle_bytes(b"first\r\nsec");
        parser.handle_bytes(b"ond\r");
        parser.handle_bytes(b"\npartial");
        assert_eq!(records.lock().as_slice(), &["first", "second"]);
        parser.handle_bytes(b"\r\n");
        assert_eq!(records.lock().last().unwrap(), "partial");
    }

    #[test]
    fn fixed_size_records() {
        let (output, records) = collect();
        let parser = RecordParser::new_fixed(4, output);
        parser.handle_bytes(b"abcdefgh12");
        assert_eq!(records.lock().as_slice(), &["abcd", "efgh"]);
        parser.handle_bytes(b"34");
        assert_eq!(records.lock().last().unwrap(), "1234");
    }

    #[test]
    fn mode_switch_from_inside_the_output_handler() {
        // Length-prefixed protocol: "<n>\n" then n bytes, repeating.
        let records: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let parser: Arc<Mutex<Option<Arc<RecordParser>>>> = Arc::new(Mutex::new(None));
        let sink = records.clone();
        let parser_ref = parser.clone();
        let expecting_header = Arc::new(Mutex::new(true));
        let output = fn_handler(move |buffer: Buffer| {
            let text = buffer.to_utf8();
            let mut header = expecting_header.lock();
            let current = parser_ref.lock().clone().unwrap();
            if *header {
                let size: usize = text.trim().parse().unwrap();
                current.fixed_size_mode(size);
            } else {
                sink.lock().push(text);
                current.delimited_mode(b"\n".to_vec());
            }
            *header = !*header;
        });
        let built = Arc::new(RecordParser::new_delimited(b"\n".to_vec(), output));
        *parser.lock() = Some(built.clone());

        built.handle_bytes(b"5\nhello3\nabc");
        assert_eq!(records.lock().as_slice(), &["hello", "abc"]);
    }

    #[test]
    fn constructor_rejects_non_callable_handlers() {
        let env = ScriptEnv::new("t.php");
        let err =
            parser_from_args(&env, &[Value::Str("\n".into()), Value::Int(3)]).unwrap_err();
        assert!(err.to_string().contains("must be callable"));
        assert!(
            parser_from_args(&env, &[Value::Int(0), Value::Callable(
                pontoon_script::Callable::new("f", |_, _| Ok(()))
            )])
            .is_err()
        );
    }
}
