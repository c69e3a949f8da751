//! Capability traits
//!
//! Entities are flat records; behaviour common to several of them is
//! expressed through these small traits instead of a type hierarchy.

use chrono::{DateTime, Utc};

use crate::value_objects::Snowflake;

/// Anything identified by a snowflake
pub trait HasId {
    fn id(&self) -> Snowflake;
}

/// Anything with a human-readable name
pub trait HasName {
    fn name(&self) -> Option<&str>;
}

/// Creation time, derived from the snowflake id
pub trait HasTimestamp {
    fn created_at(&self) -> DateTime<Utc>;
}

impl<T: HasId> HasTimestamp for T {
    fn created_at(&self) -> DateTime<Utc> {
        self.id().created_at()
    }
}
