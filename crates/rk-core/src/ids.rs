//! Identifiers.
//!
//! Batches and flows get a fresh random id per run. Record ids belong to the
//! record store: they are written to disk and read back, so they have a fixed
//! textual form (`rec_` followed by 32 lowercase hex digits) that is checked
//! whenever one is parsed.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! run_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

run_id! {
    /// One batch of ingested files.
    BatchId
}

run_id! {
    /// One file's flow within a batch.
    FileId
}

const RECORD_PREFIX: &str = "rec_";

/// Identifier the record store assigns to a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(Uuid);

impl RecordId {
    /// Allocate an id for a record about to be stored.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the stored form, rejecting anything the store would not have
    /// written.
    pub fn parse(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix(RECORD_PREFIX)
            .ok_or_else(|| Error::Validation(format!("record id {s:?} lacks the {RECORD_PREFIX} prefix")))?;
        if hex.len() != 32 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::Validation(format!("record id {s:?} is not 32 lowercase hex digits")));
        }
        Uuid::parse_str(hex)
            .map(Self)
            .map_err(|e| Error::Validation(format!("record id {s:?}: {e}")))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{RECORD_PREFIX}{}", self.0.simple())
    }
}

impl TryFrom<String> for RecordId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(BatchId::new(), BatchId::new());
        assert_ne!(FileId::new(), FileId::new());
    }

    #[test]
    fn record_id_has_store_form() {
        let id = RecordId::generate();
        let text = id.to_string();
        assert!(text.starts_with("rec_"));
        assert_eq!(text.len(), 36);
        assert!(!text.contains('-'));
        assert_eq!(RecordId::parse(&text).unwrap(), id);
    }

    #[test]
    fn record_id_rejects_foreign_forms() {
        let uuid = Uuid::new_v4();
        let rejected = [
            uuid.to_string(),
            format!("rec_{}", uuid.hyphenated()),
            format!("rec_{}", uuid.simple().to_string().to_uppercase()),
            "rec_".to_string(),
        ];
        for text in &rejected {
            let err = RecordId::parse(text).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{text}: {err:?}");
        }
    }

    #[test]
    fn record_id_serde_goes_through_parse() {
        let id = RecordId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert_eq!(serde_json::from_str::<RecordId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<RecordId>("\"not-a-record\"").is_err());
    }

    #[test]
    fn file_id_serializes_as_plain_uuid() {
        let id = FileId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert_eq!(serde_json::from_str::<FileId>(&json).unwrap(), id);
    }
}
