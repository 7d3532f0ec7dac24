//! Shared types for Plaza.
//!
//! Holds the data model, the REST/gateway wire types and the pure parts of the
//! post-interaction state machine (reaction toggles, content validation, feed
//! assembly) so the server store and the client cache apply identical rules.

pub mod api;
pub mod error;
pub mod events;
pub mod feed;
pub mod models;
pub mod reactions;
pub mod validate;

pub use error::ValidationError;
pub use reactions::{Emoji, ReactionMap, Toggle};
