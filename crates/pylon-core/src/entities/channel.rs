//! Guild channels and private (direct message) channels

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::traits::HasName;
use crate::value_objects::Snowflake;

/// Guild channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Channel {
    /// Raw channel type number
    pub fn kind(&self) -> Option<u64> {
        self.fields.get("type").and_then(Value::as_u64)
    }
}

impl_record!(Channel);

impl HasName for Channel {
    fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}

/// Direct message channel, held in a capacity-bounded map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrivateChannel {
    pub id: Snowflake,
    pub recipient_ids: Vec<Snowflake>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PrivateChannel {
    pub fn new(id: Snowflake, recipient_ids: Vec<Snowflake>, fields: Map<String, Value>) -> Self {
        Self {
            id,
            recipient_ids,
            fields,
        }
    }

    /// Check whether the user takes part in this channel
    #[inline]
    pub fn has_recipient(&self, user_id: Snowflake) -> bool {
        self.recipient_ids.contains(&user_id)
    }
}

impl_record!(PrivateChannel);
