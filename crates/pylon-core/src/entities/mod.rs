//! Entities - records kept in the cache
//!
//! Every entity is an id plus the raw field map received from the remote.
//! Updates overlay only the fields that are present, so fields this crate
//! does not model survive every merge untouched.

use serde_json::{Map, Value};

/// Access to an entity's raw field map
pub trait Fields {
    fn fields(&self) -> &Map<String, Value>;

    fn fields_mut(&mut self) -> &mut Map<String, Value>;

    /// Look up a raw field
    fn field(&self, key: &str) -> Option<&Value> {
        self.fields().get(key)
    }

    /// Look up a string field
    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields().get(key).and_then(Value::as_str)
    }

    /// Overlay the fields present in `patch`, keeping everything else
    fn merge(&mut self, patch: &Map<String, Value>) {
        let fields = self.fields_mut();
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
    }
}

/// Implements `Fields` and `HasId` for an `{ id, fields }` record
macro_rules! impl_record {
    ($ty:ty) => {
        impl $crate::entities::Fields for $ty {
            fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
                &self.fields
            }

            fn fields_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
                &mut self.fields
            }
        }

        impl $crate::traits::HasId for $ty {
            fn id(&self) -> $crate::value_objects::Snowflake {
                self.id
            }
        }
    };
}

mod channel;
mod guild;
mod user;

pub use channel::{Channel, PrivateChannel};
pub use guild::{Emoji, Guild, Role};
pub use user::{Member, User};
