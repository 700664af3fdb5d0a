//! # counter-server
//!
//! Shared live counter server.
//!
//! This crate implements a server that:
//! - Holds one integer counter in memory and applies increments/decrements
//! - Pushes every change to all connected WebSocket clients
//! - Persists the counter and a visitor total to a durable store, retrying
//!   failed writes once
//! - Shuts down gracefully on SIGINT/SIGTERM within a fixed deadline
//!
//! ## Architecture
//!
//! ```text
//! Browser A ──┐                      ┌── Browser B
//!             │   WebSocket /socket  │
//!             ├─────────────────────►│
//!         ┌───┴──────────────────────┴───┐
//!         │        counter-server        │
//!         │  state ─► registry fan-out   │
//!         │    └────► persistence sync   │
//!         │  ┌────────────────────────┐  │
//!         │  │  SQLite (counter, kv)  │  │
//!         │  └────────────────────────┘  │
//!         └──────────────────────────────┘
//! ```
//!
//! ## Events
//!
//! - client → server: `increment`, `decrement`, `disconnect`
//! - server → client: `updateCounter`, `updateTotalVisitors`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod persist;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod store;
