//! Client side of Plaza.
//!
//! [`ClientCache`] keeps a local, best-effort mirror of the feed so views can
//! update before the server answers. It is never a source of truth: every
//! change is written through to an [`Authority`] and reconciled with what the
//! authority reports. [`HttpAuthority`] is the REST implementation.

pub mod authority;
pub mod cache;
pub mod error;

pub use authority::{Authority, HttpAuthority};
pub use cache::{CacheEvent, ClientCache};
pub use error::ClientError;
