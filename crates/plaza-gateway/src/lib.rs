//! Change notification for Plaza.
//!
//! Every authoritative mutation is published on the [`dispatcher::Dispatcher`];
//! WebSocket clients connected through [`connection`] receive the events and
//! use them to reload their local caches.

pub mod connection;
pub mod dispatcher;
