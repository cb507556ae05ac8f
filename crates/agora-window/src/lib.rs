//! Client-side sliding window over a room's message list.
//!
//! [`WindowCache`] keeps only the messages around the scroll position;
//! [`spawn_window`] runs it as a single-threaded actor fed with
//! [`ScrollEvent`]s, fetching gaps from a [`MessageSource`].

pub mod actor;
pub mod cache;
pub mod source;

pub use actor::{ScrollEvent, WindowHandle, WindowSnapshot, spawn_window};
pub use cache::{IndexRange, MemoryStats, WindowCache, WindowConfig, WindowState};
pub use source::{HttpMessageSource, MessageSource};
