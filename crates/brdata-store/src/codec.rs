//! Payload serialization for cache files and remote artifacts.
//!
//! Two formats:
//! - `json`: one document, the serde form of `DatasetPayload`
//! - `jsonl`: a header line, then one JSON array per row. `Multi` payloads
//!   interleave a `{"table": .., "columns": ..}` object before each table's
//!   rows.
//!
//! Both decoders reject NUL bytes and non-UTF-8 content before parsing.

use brdata_core::{DatasetPayload, Table, TableError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Serialization kind of a stored payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFormat {
    #[default]
    Json,
    Jsonl,
}

impl CacheFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
        }
    }

    /// File extension for payload files.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl Display for CacheFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(format!("unknown cache format `{other}` (expected json or jsonl)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("corrupted payload: {0}")]
    Corrupt(String),

    #[error("line {line}: parse error: {message}")]
    Parse { line: usize, message: String },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("line {line}: {source}")]
    Table {
        line: usize,
        #[source]
        source: TableError,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JsonlHeader {
    Single { columns: Vec<String> },
    Multi,
}

#[derive(Serialize, Deserialize)]
struct JsonlTableHeader {
    table: String,
    columns: Vec<String>,
}

/// Encode a payload in `format`.
pub fn encode_payload(payload: &DatasetPayload, format: CacheFormat) -> Result<Vec<u8>, CodecError> {
    match format {
        CacheFormat::Json => {
            serde_json::to_vec(payload).map_err(|e| CodecError::Serialize(e.to_string()))
        }
        CacheFormat::Jsonl => encode_jsonl(payload),
    }
}

/// Decode a payload previously written in `format`.
pub fn decode_payload(bytes: &[u8], format: CacheFormat) -> Result<DatasetPayload, CodecError> {
    let text = validate_substrate_bytes(bytes)?;
    match format {
        CacheFormat::Json => serde_json::from_str(text).map_err(|e| CodecError::Parse {
            line: e.line(),
            message: e.to_string(),
        }),
        CacheFormat::Jsonl => decode_jsonl(text),
    }
}

fn encode_jsonl(payload: &DatasetPayload) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    match payload {
        DatasetPayload::Single(table) => {
            push_line(
                &mut out,
                &JsonlHeader::Single {
                    columns: table.columns().to_vec(),
                },
            )?;
            push_rows(&mut out, table)?;
        }
        DatasetPayload::Multi(tables) => {
            push_line(&mut out, &JsonlHeader::Multi)?;
            for (key, table) in tables {
                push_line(
                    &mut out,
                    &JsonlTableHeader {
                        table: key.clone(),
                        columns: table.columns().to_vec(),
                    },
                )?;
                push_rows(&mut out, table)?;
            }
        }
    }
    Ok(out)
}

fn push_rows(out: &mut Vec<u8>, table: &Table) -> Result<(), CodecError> {
    for row in table.rows() {
        push_line(out, row)?;
    }
    Ok(())
}

fn push_line(out: &mut Vec<u8>, value: &impl Serialize) -> Result<(), CodecError> {
    serde_json::to_writer(&mut *out, value).map_err(|e| CodecError::Serialize(e.to_string()))?;
    out.push(b'\n');
    Ok(())
}

fn decode_jsonl(text: &str) -> Result<DatasetPayload, CodecError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (first_line, first) = lines
        .next()
        .ok_or_else(|| CodecError::Corrupt("empty jsonl payload".to_string()))?;
    let header: JsonlHeader = parse_line(first_line, first)?;

    match header {
        JsonlHeader::Single { columns } => {
            let mut table = Table::empty(columns).map_err(|source| CodecError::Table {
                line: first_line,
                source,
            })?;
            for (line_no, line) in lines {
                let row: Vec<Value> = parse_line(line_no, line)?;
                table.push_row(row).map_err(|source| CodecError::Table {
                    line: line_no,
                    source,
                })?;
            }
            Ok(DatasetPayload::Single(table))
        }
        JsonlHeader::Multi => {
            let mut tables: BTreeMap<String, Table> = BTreeMap::new();
            let mut current: Option<String> = None;
            for (line_no, line) in lines {
                if line.starts_with('{') {
                    let header: JsonlTableHeader = parse_line(line_no, line)?;
                    let table =
                        Table::empty(header.columns).map_err(|source| CodecError::Table {
                            line: line_no,
                            source,
                        })?;
                    if tables.insert(header.table.clone(), table).is_some() {
                        return Err(CodecError::Corrupt(format!(
                            "line {line_no}: table `{}` appears twice",
                            header.table
                        )));
                    }
                    current = Some(header.table);
                    continue;
                }

                let key = current.as_ref().ok_or_else(|| {
                    CodecError::Corrupt(format!("line {line_no}: row before any table header"))
                })?;
                let row: Vec<Value> = parse_line(line_no, line)?;
                if let Some(table) = tables.get_mut(key) {
                    table.push_row(row).map_err(|source| CodecError::Table {
                        line: line_no,
                        source,
                    })?;
                }
            }
            Ok(DatasetPayload::Multi(tables))
        }
    }
}

fn parse_line<T: for<'de> Deserialize<'de>>(line_no: usize, line: &str) -> Result<T, CodecError> {
    serde_json::from_str(line).map_err(|e| CodecError::Parse {
        line: line_no,
        message: e.to_string(),
    })
}

fn validate_substrate_bytes(bytes: &[u8]) -> Result<&str, CodecError> {
    if bytes.contains(&0) {
        return Err(CodecError::Corrupt("contains NUL byte(s)".to_string()));
    }
    std::str::from_utf8(bytes)
        .map_err(|_| CodecError::Corrupt("contains non-UTF-8 byte sequence(s)".to_string()))
}
