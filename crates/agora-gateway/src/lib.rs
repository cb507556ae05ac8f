//! Push side of the messaging core: per-user session channels and the
//! WebSocket relay that drains them.

pub mod connection;
pub mod dispatcher;

pub use dispatcher::Dispatcher;
