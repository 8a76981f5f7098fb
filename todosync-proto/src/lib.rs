//! Shared data formats for `todosync`: the task snapshot layout persisted
//! locally and stored remotely, and the relay frame protocol.

pub mod codec;
pub mod relay;
pub mod task;
