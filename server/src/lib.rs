//! # Player Sync Server Library
//!
//! Authoritative state-synchronization server for the multiplayer game.
//! It tracks each connected player's visual state (position and color),
//! ingests per-tick movement deltas, and rebroadcasts a snapshot of all
//! players to every connected client on a fixed cadence.
//!
//! ## Protocol
//!
//! The wire protocol (see the `shared` crate) has no message-kind tag.
//! A payload is classified by connection history alone:
//! - the first payload after connect is the 4-byte identity announcement
//!   carrying the player's display color;
//! - every subsequent payload is an 8-byte movement delta;
//! - the server's only outbound message is the roster frame, 12 bytes per
//!   live session, sent to all peers every tick.
//!
//! This implicit classification is preserved bit-for-bit for
//! compatibility with existing clients, fragile as it is; any protocol
//! extension should introduce an explicit kind tag instead of leaning on
//! it further.
//!
//! ## Architecture
//!
//! A single run loop owns all mutable session state. Transport tasks
//! (acceptor plus one reader and one writer per WebSocket connection)
//! translate socket activity into `SessionEvent`s on one channel; the run
//! loop drains that channel at the start of each 10 ms tick, applies the
//! events to the session registry, then snapshots it and fans the encoded
//! roster frame out through per-peer queues. Registry mutations can never
//! interleave because nothing else holds the registry.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The map from session id to player state. Creation on connect,
//! color/position mutation on payload receipt, removal on disconnect,
//! point-in-time snapshots for broadcasting.
//!
//! ### Lifecycle Module (`lifecycle`)
//! The per-connection two-state machine (awaiting identity, synced) that
//! classifies inbound payloads and drives registry mutations. Malformed
//! payloads are dropped and logged without dropping the connection.
//!
//! ### Network Module (`network`)
//! WebSocket transport plumbing, the `Server` value itself, and the
//! broadcast scheduler loop, including bounded per-tick event draining
//! and best-effort per-peer sends.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new("0.0.0.0:6777", Duration::from_millis(10)).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod lifecycle;
pub mod network;
pub mod registry;
