//! Application message model and the outbound/inbound pipeline (spec
//! §3 "Plaintext"/"Label", §4.9).

pub mod pipeline;
pub mod plaintext;

pub use plaintext::{Label, LabelType, MessageKind, MessageStatus, Plaintext, MAX_RETRIES};
