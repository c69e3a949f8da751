//! Capability traits shared by cached entities

mod capabilities;

pub use capabilities::{HasId, HasName, HasTimestamp};
