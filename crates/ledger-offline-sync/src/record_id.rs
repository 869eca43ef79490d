//! Buffer keys.

use crate::SyncError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Key of an entry in the offline buffer.
///
/// `Local` ids are minted by the buffer for sessions that have never reached
/// the backend. `Remote` ids are backend ids of sessions edited while offline.
/// The string form (`local:<n>` / `remote:<n>`) only appears in the stored
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordId {
    Local(u64),
    Remote(i64),
}

impl RecordId {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{}", id),
            Self::Remote(id) => write!(f, "remote:{}", id),
        }
    }
}

impl FromStr for RecordId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SyncError::InvalidRecordId(s.to_string());
        let (kind, value) = s.split_once(':').ok_or_else(invalid)?;
        match kind {
            "local" => value.parse().map(Self::Local).map_err(|_| invalid()),
            "remote" => value.parse().map(Self::Remote).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
