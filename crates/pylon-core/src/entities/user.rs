//! Users and guild members

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::traits::{HasId, HasName};
use crate::value_objects::Snowflake;

/// Global user record
///
/// A user exists once per client, no matter how many guilds it shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl User {
    pub fn new(id: Snowflake, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    #[inline]
    pub fn is_bot(&self) -> bool {
        self.fields
            .get("bot")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl_record!(User);

impl HasName for User {
    /// Display name, falling back to the account username
    fn name(&self) -> Option<&str> {
        self.fields
            .get("global_name")
            .and_then(Value::as_str)
            .or_else(|| self.fields.get("username").and_then(Value::as_str))
    }
}

/// Guild member
///
/// Holds only the user's id; the user itself lives in the global user map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub user_id: Snowflake,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Member {
    pub fn new(user_id: Snowflake, fields: Map<String, Value>) -> Self {
        Self { user_id, fields }
    }

    /// Guild-specific nickname
    pub fn nick(&self) -> Option<&str> {
        self.fields.get("nick").and_then(Value::as_str)
    }

    /// Role ids assigned to the member
    pub fn role_ids(&self) -> Vec<Snowflake> {
        self.fields
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| Snowflake::parse(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl super::Fields for Member {
    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }
}

impl HasId for Member {
    fn id(&self) -> Snowflake {
        self.user_id
    }
}

impl HasName for Member {
    fn name(&self) -> Option<&str> {
        self.nick()
    }
}
