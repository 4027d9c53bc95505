#![warn(missing_docs)]
//! Client half of a coopsync session.
//!
//! [`ClientNetworking`] connects to a server, keeps the player list and the
//! remote entity pool current, and reconciles remote entities against the
//! host simulation once per tick.

pub mod error;
pub mod networking;
pub mod players;

pub use error::ConnectError;
pub use networking::{ClientConfig, ClientNetworking, ConnectionStatus};
pub use players::PlayerList;
