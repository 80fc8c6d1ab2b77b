//! Crossbar routing core: inter-process commands and events.
//!
//! Processes of one application call each other's functions and exchange
//! notifications over point-to-point channels, without sharing memory.
//!
//! ## Architecture
//!
//! - **Registry**: one per process; owns the tables and exposes the API
//! - **Channel table**: remote process identifier → live transport
//! - **Command table**: command name → local handler or owning channel
//! - **Reply / route trackers**: correlation ID → waiting caller / origin channel
//! - **Listener table**: event name → local callbacks
//! - **Dispatcher**: the protocol state machine for inbound messages
//! - **WireMessage**: JSON-framed protocol messages
//!
//! Channels come from [`memory::pair`] for in-process wiring or from [`tcp`]
//! for processes talking over sockets.

pub mod channel;
pub mod command;
mod dispatch;
pub mod listener;
pub mod memory;
pub mod message;
pub mod registry;
pub mod tcp;
pub mod tracker;

pub use channel::{ChannelLink, QueueTransport, Transport, WireError};
pub use command::{CommandInfo, CommandLocation};
pub use listener::{callback, EventCallback, Subscription};
pub use message::WireMessage;
pub use registry::Registry;
