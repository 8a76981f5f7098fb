//! `todosync` relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay keeps
//! one opaque record per identity and pushes every new record to the
//! connections watching that identity.

pub mod config;
pub mod relay;
pub mod store;
