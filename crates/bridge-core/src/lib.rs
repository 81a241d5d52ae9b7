//! Core of the tile bridge: typed game messages, the match-state tracker, the canonical event
//! protocol, the agent gateway and the action player.
//!
//! Nothing here touches the network capture or the browser directly. The proxy crate feeds
//! typed messages in and wires the agent transport and input driver up.

pub mod agent;
pub mod error;
pub mod message;
pub mod player;
pub mod protocol;
pub mod state;
pub mod tile;

#[cfg(any(test, feature = "test-support"))]
pub mod sim;
