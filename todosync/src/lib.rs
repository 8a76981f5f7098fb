//! `todosync` -- categorized to-do list with local caching and live sync.

pub mod auth;
pub mod backend;
pub mod config;
pub mod shell;
pub mod store;
pub mod sync;
pub mod tasks;
