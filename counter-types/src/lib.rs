//! # counter-types
//!
//! Wire event types for the livecount shared counter.
//!
//! This crate provides the types exchanged between the counter server and its
//! browser clients:
//! - [`ClientEvent`] - Events a client sends (increment, decrement, disconnect)
//! - [`ServerEvent`] - Events the server pushes (counter and visitor updates)
//! - [`ConnectionId`] - Process-local handle for a live client session
//! - [`WireError`] - Encoding errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod events;
mod ids;

pub use error::WireError;
pub use events::{ClientEvent, ServerEvent};
pub use ids::ConnectionId;
