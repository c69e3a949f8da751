//! Guild-scoped records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::traits::HasName;
use crate::value_objects::Snowflake;

/// Guild (server) record
///
/// Sub-collections (roles, members, channels, emoji) are not stored here;
/// they live in the guild's own cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Guild {
    pub fn new(id: Snowflake, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Owner id, when the remote sent one
    pub fn owner_id(&self) -> Option<Snowflake> {
        self.fields
            .get("owner_id")
            .and_then(Value::as_str)
            .and_then(|s| Snowflake::parse(s).ok())
    }

    /// Member count reported by the remote (not the cached member count)
    pub fn member_count(&self) -> Option<u64> {
        self.fields.get("member_count").and_then(Value::as_u64)
    }
}

impl_record!(Guild);

impl HasName for Guild {
    fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}

/// Guild role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Snowflake,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Role {
    /// Position in the role hierarchy
    pub fn position(&self) -> i64 {
        self.fields
            .get("position")
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }
}

impl_record!(Role);

impl HasName for Role {
    fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}

/// Custom guild emoji
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emoji {
    pub id: Snowflake,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl_record!(Emoji);

impl HasName for Emoji {
    fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}
