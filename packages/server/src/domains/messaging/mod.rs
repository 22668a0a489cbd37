//! Messaging domain - protocol messages addressed to things
//!
//! Messages arrive with a templated topic (`<namespace>/<name>/...`). They are
//! rewritten for a concrete thing, validated, stamped with a correlation ID,
//! and sent over the shared protocol channel.

pub mod activities;
pub mod message;
pub mod topic;

pub use activities::send_message;
pub use message::{ProtocolMessage, CORRELATION_ID_HEADER};
pub use topic::{prepare_message, rewrite_topic, validate_topic, ThingAddress, TopicError};
