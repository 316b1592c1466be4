//! Offline identifier type

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix that keeps client-generated ids out of the server id namespace.
pub const OFFLINE_ID_PREFIX: &str = "offline-";

/// Client-generated identifier for a record captured without connectivity.
///
/// Uses UUID v7 (time-sortable) rendered with an `offline-` prefix, so an
/// offline id can never collide with a server-assigned id and can be told
/// apart by inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalId(Uuid);

impl LocalId {
    /// Create a new unique offline id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{OFFLINE_ID_PREFIX}{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(OFFLINE_ID_PREFIX).unwrap_or(s);
        Ok(Self(Uuid::parse_str(raw)?))
    }
}

impl TryFrom<String> for LocalId {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LocalId> for String {
    fn from(id: LocalId) -> Self {
        id.to_string()
    }
}

/// Whether an id string belongs to the offline namespace.
///
/// Foreign keys on photos and deficiencies may hold either kind of id until
/// the parent assessment syncs and the reference is rewritten.
#[must_use]
pub fn is_offline_id(value: &str) -> bool {
    value.starts_with(OFFLINE_ID_PREFIX)
}
