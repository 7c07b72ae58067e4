//! Transaction Codec
//!
//! Flattens a parameterized statement into the textual block payload
//! `statement;param1;param2;...` and recovers it again for replay.
//!
//! Parameters that cannot travel as plain text are wrapped in markers:
//!
//! | parameter              | segment              |
//! |------------------------|----------------------|
//! | bytes                  | `{raw}<base64>{raw}` |
//! | integer                | `{int}<n>{int}`      |
//! | boolean                | `{bool}true{bool}`   |
//! | null                   | `{null}`             |
//! | text with `;` or `{…`  | `{txt}<base64>{txt}` |
//! | any other text         | the text itself      |
//!
//! An unmarked segment always decodes as text, so payloads written by
//! older writers (text-only parameters) still replay.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqliteValue};

use crate::error::{Error, Result};

const DELIMITER: char = ';';

const RAW_MARKER: &str = "{raw}";
const INT_MARKER: &str = "{int}";
const BOOL_MARKER: &str = "{bool}";
const TEXT_MARKER: &str = "{txt}";
const NULL_MARKER: &str = "{null}";

/// A statement parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Null,
    Integer(i64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
}

impl Param {
    /// Encode as a single payload segment
    fn encode(&self) -> String {
        match self {
            Param::Null => NULL_MARKER.to_string(),
            Param::Integer(n) => wrap(INT_MARKER, &n.to_string()),
            Param::Bool(b) => wrap(BOOL_MARKER, if *b { "true" } else { "false" }),
            Param::Bytes(bytes) => wrap(RAW_MARKER, &STANDARD.encode(bytes)),
            Param::Text(s) if needs_escape(s) => wrap(TEXT_MARKER, &STANDARD.encode(s.as_bytes())),
            Param::Text(s) => s.clone(),
        }
    }

    /// Decode a single payload segment
    fn decode(segment: &str) -> Result<Self> {
        if !segment.starts_with('{') {
            return Ok(Param::Text(segment.to_string()));
        }
        if segment == NULL_MARKER {
            return Ok(Param::Null);
        }
        if let Some(inner) = unwrap_marker(RAW_MARKER, segment) {
            return Ok(Param::Bytes(decode_base64(inner)?));
        }
        if let Some(inner) = unwrap_marker(INT_MARKER, segment) {
            return inner
                .parse()
                .map(Param::Integer)
                .map_err(|e| Error::Decode(format!("bad integer {:?}: {}", inner, e)));
        }
        if let Some(inner) = unwrap_marker(BOOL_MARKER, segment) {
            return match inner {
                "true" => Ok(Param::Bool(true)),
                "false" => Ok(Param::Bool(false)),
                other => Err(Error::Decode(format!("bad boolean {:?}", other))),
            };
        }
        if let Some(inner) = unwrap_marker(TEXT_MARKER, segment) {
            let text = String::from_utf8(decode_base64(inner)?)
                .map_err(|e| Error::Decode(format!("escaped text is not UTF-8: {}", e)))?;
            return Ok(Param::Text(text));
        }

        Err(Error::Decode(format!("unknown parameter marker in {:?}", segment)))
    }
}

fn wrap(marker: &str, inner: &str) -> String {
    format!("{marker}{inner}{marker}")
}

fn unwrap_marker<'a>(marker: &str, segment: &'a str) -> Option<&'a str> {
    segment.strip_prefix(marker)?.strip_suffix(marker)
}

fn needs_escape(text: &str) -> bool {
    text.contains(DELIMITER) || text.starts_with('{')
}

fn decode_base64(inner: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(inner)
        .map_err(|e| Error::Decode(format!("bad base64 {:?}: {}", inner, e)))
}

impl ToSql for Param {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Param::Null => SqliteValue::Null,
            Param::Integer(n) => SqliteValue::Integer(*n),
            Param::Bool(b) => SqliteValue::Integer(*b as i64),
            Param::Text(s) => return Ok(ToSqlOutput::from(s.as_str())),
            Param::Bytes(b) => return Ok(ToSqlOutput::from(b.as_slice())),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Text(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Text(s)
    }
}

impl From<i64> for Param {
    fn from(n: i64) -> Self {
        Param::Integer(n)
    }
}

impl From<i32> for Param {
    fn from(n: i32) -> Self {
        Param::Integer(n as i64)
    }
}

impl From<u32> for Param {
    fn from(n: u32) -> Self {
        Param::Integer(n as i64)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Self {
        Param::Bool(b)
    }
}

impl From<Vec<u8>> for Param {
    fn from(b: Vec<u8>) -> Self {
        Param::Bytes(b)
    }
}

impl From<&[u8]> for Param {
    fn from(b: &[u8]) -> Self {
        Param::Bytes(b.to_vec())
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Param::Null, Into::into)
    }
}

/// A decoded block payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub statement: String,
    pub params: Vec<Param>,
}

impl Transaction {
    pub fn new(statement: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            statement: statement.into(),
            params,
        }
    }

    /// Serialize into a block payload
    pub fn encode(&self) -> Result<String> {
        encode_transaction(&self.statement, &self.params)
    }
}

/// Serialize `statement` and its parameters into a block payload.
///
/// Trailing `;` and whitespace are stripped from the statement; a `;`
/// anywhere else would be ambiguous with the delimiter and is rejected.
pub fn encode_transaction(statement: &str, params: &[Param]) -> Result<String> {
    let statement = statement.trim_end_matches(|c: char| c == DELIMITER || c.is_whitespace());
    if statement.trim().is_empty() {
        return Err(Error::Encode("empty statement".into()));
    }
    if statement.contains(DELIMITER) {
        return Err(Error::Encode(format!(
            "statement contains '{}': {}",
            DELIMITER, statement
        )));
    }

    let mut data = statement.to_string();
    for param in params {
        data.push(DELIMITER);
        data.push_str(&param.encode());
    }
    Ok(data)
}

/// Recover the statement and parameters from a block payload
pub fn decode_transaction(data: &str) -> Result<Transaction> {
    let mut segments = data.split(DELIMITER);
    let statement = match segments.next() {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => return Err(Error::Decode("payload has no statement".into())),
    };

    let params = segments.map(Param::decode).collect::<Result<Vec<_>>>()?;
    Ok(Transaction { statement, params })
}
