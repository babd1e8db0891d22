//! The unit of data stored in the tree.
//!
//! A record is a key, a JSON document value and a tombstone flag. Records are
//! written to segment data files as one JSON object per line, which keeps the
//! data file scannable with a plain buffered line reader.

use std::cmp::Ordering;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids;

/// Document payload of a record.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field under which [`Record::generate`] stores the generated key.
pub const RECORD_ID_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub tomb: bool,
    #[serde(default, skip_serializing_if = "Document::is_empty")]
    pub value: Document,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Record {
    pub fn new(key: impl Into<String>, value: Document) -> Self {
        Self {
            key: key.into(),
            tomb: false,
            value,
        }
    }

    /// A deletion marker for `key`.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tomb: true,
            value: Document::new(),
        }
    }

    /// Creates a record under a freshly generated key, also stored in the
    /// value under [`RECORD_ID_FIELD`].
    pub fn generate(source_id: u16, mut value: Document) -> Self {
        let key = ids::new_id(source_id);
        value.insert(
            RECORD_ID_FIELD.to_string(),
            serde_json::Value::String(key.clone()),
        );
        Self::new(key, value)
    }

    pub fn is_tombstone(&self) -> bool {
        self.tomb
    }

    /// Orders records by key.
    pub fn key_cmp(&self, other: &Self) -> Ordering {
        self.key.as_bytes().cmp(other.key.as_bytes())
    }

    /// Writes the record as a single newline-terminated line.
    pub fn encode_into<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer(&mut writer, self).map_err(|e| Error::Encode("record", e.into()))?;
        writer
            .write_all(b"\n")
            .map_err(|e| Error::Encode("record", e))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decodes one line, with or without its trailing newline.
    pub fn decode(line: &[u8]) -> Result<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        serde_json::from_slice(line).map_err(|e| Error::Decode("record", io::Error::from(e)))
    }
}

/// Rejects keys that cannot be stored.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key is empty".to_string()));
    }
    Ok(())
}
