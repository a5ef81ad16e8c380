//! Textual access traces.
//!
//! One access per line: `<core> <op> <addr> [len] [value]`.
//! - `op` is `R` (load), `W` (store), `X` (read-exclusive) or `I` (instruction fetch).
//! - `addr`, `len` and `value` accept decimal or `0x`-prefixed hex.
//! - `len` defaults to 8 bytes; `value` is only meaningful for stores and defaults to 0.
//!
//! Blank lines and everything after `#` are ignored.

use std::io::BufRead;

use cohsim_core::common::{MemOp, Port};
use thiserror::Error;

/// Largest access a trace line may describe.
const MAX_LEN: usize = 8;

/// Trace line that could not be parsed.
#[derive(Debug, Error)]
pub enum TraceError {
    /// Reading the trace failed.
    #[error("cannot read trace: {0}")]
    Io(#[from] std::io::Error),

    /// A field is missing or malformed.
    #[error("line {line}: {detail}")]
    Syntax {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        detail: String,
    },
}

/// One access replayed against the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceOp {
    /// Issuing core.
    pub core: usize,
    /// Instruction or data side.
    pub port: Port,
    /// Operation type.
    pub op: MemOp,
    /// Byte address.
    pub address: u64,
    /// Access size in bytes.
    pub len: usize,
    /// Stored value, little-endian, truncated to `len`.
    pub value: u64,
}

impl TraceOp {
    /// Store payload, or a zeroed buffer for loads.
    pub fn payload(&self) -> Vec<u8> {
        let mut bytes = self.value.to_le_bytes().to_vec();
        bytes.truncate(self.len);
        bytes
    }
}

fn parse_number(field: &str) -> Option<u64> {
    field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")).map_or_else(
        || field.parse().ok(),
        |hex| u64::from_str_radix(&hex.replace('_', ""), 16).ok(),
    )
}

/// Parses one trace line.
///
/// # Returns
///
/// `Ok(None)` for blank and comment-only lines.
pub fn parse_line(text: &str, line: usize) -> Result<Option<TraceOp>, TraceError> {
    let body = text.split('#').next().unwrap_or_default();
    let fields: Vec<&str> = body.split_whitespace().collect();
    if fields.is_empty() {
        return Ok(None);
    }
    let syntax = |detail: String| TraceError::Syntax { line, detail };
    if !(3..=5).contains(&fields.len()) {
        return Err(syntax(format!("expected 3 to 5 fields, found {}", fields.len())));
    }

    let core = fields[0]
        .parse()
        .map_err(|_| syntax(format!("bad core `{}`", fields[0])))?;
    let (port, op) = match fields[1] {
        "R" | "r" => (Port::Data, MemOp::Read),
        "W" | "w" => (Port::Data, MemOp::Write),
        "X" | "x" => (Port::Data, MemOp::ReadEx),
        "I" | "i" => (Port::Instruction, MemOp::Read),
        other => return Err(syntax(format!("unknown operation `{other}`"))),
    };
    let address = parse_number(fields[2]).ok_or_else(|| syntax(format!("bad address `{}`", fields[2])))?;
    let len = match fields.get(3) {
        Some(field) => parse_number(field)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| (1..=MAX_LEN).contains(n))
            .ok_or_else(|| syntax(format!("length `{field}` must be between 1 and {MAX_LEN}")))?,
        None => MAX_LEN,
    };
    let value = match fields.get(4) {
        Some(_) if op != MemOp::Write => return Err(syntax("only stores carry a value".to_owned())),
        Some(field) => parse_number(field).ok_or_else(|| syntax(format!("bad value `{field}`")))?,
        None => 0,
    };

    Ok(Some(TraceOp {
        core,
        port,
        op,
        address,
        len,
        value,
    }))
}

/// Parses a whole trace.
pub fn parse(reader: impl BufRead) -> Result<Vec<TraceOp>, TraceError> {
    let mut ops = Vec::new();
    for (i, text) in reader.lines().enumerate() {
        if let Some(op) = parse_line(&text?, i + 1)? {
            ops.push(op);
        }
    }
    Ok(ops)
}
