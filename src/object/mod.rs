//! The flood-fill unit: envelope + typed payload, content-addressed by
//! its [`crate::object::envelope::InventoryVector`].

pub mod envelope;
pub mod payload;

pub use envelope::{InventoryVector, Object, ObjectHeader, ObjectType};
pub use payload::ObjectPayload;
