//! # Messaging
//!
//! The remote store boundary (`RemoteStore` trait with a Redis-backed and an
//! in-process implementation) and the hybrid local/remote `MessageBus` built
//! on top of it. Every remote operation is asynchronous and bounded; none may
//! block application startup.

pub mod bus;
pub mod store;

pub use bus::{BusSubscriptionId, MessageBus};
pub use store::{ChannelMessage, MemoryStore, RedisStore, RemoteStore};
