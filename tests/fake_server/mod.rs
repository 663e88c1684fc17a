#![allow(dead_code)]

//! Fake ROP server for integration testing
//!
//! This module provides an in-process server that speaks enough of the
//! framed transport to test `Session` end-to-end:
//!
//! TCP -> TLS handshake -> Connect -> Execute / AsyncWait / RegisterPush -> Disconnect
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and call dispatch
//! - `handlers/` -- one file per family of calls
//! - `store` -- mailbox model, per-session objects and event queues, builder

mod handlers;
pub mod server;
pub mod store;

pub use server::FakeRopServer;
pub use store::{PASSWORD, StoreBuilder};
