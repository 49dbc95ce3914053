//! `sy-client`: client side of the Switchyard procedure-call framework.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Client::new(chain).at("users").at("id:7").query(&input)     │
//! │        │                                                     │
//! │        ▼                                                     │
//! │  LinkChain: LoggerLink ─► SplitLink ─┬─► HttpLink            │
//! │                                      └─► DuplexLink          │
//! │                                             │                │
//! │                   SharedSubscriptions ◄─────┘                │
//! │                          │                                   │
//! │                   DuplexClient (WebSocket, reconnect, ids)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Duplex engine guarantees
//!
//! - Ids are allocated per client, monotonically increasing.
//! - POSTs issued while disconnected queue and flush on the next open;
//!   POSTs already sent are never re-sent after a reconnect.
//! - Every live subscription is re-sent after each reconnect.
//! - When back-off gives up, pending POSTs fail with
//!   [`CallError::ConnectionFailed`]; later calls queue until
//!   [`DuplexClient::reconnect`].

pub mod builder;
pub mod client;
pub mod duplex;
pub mod error;
pub mod links;
pub mod reconnect;
pub mod shared;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::DuplexClientBuilder;
pub use client::{CallBuilder, Client};
pub use duplex::{ConnectionState, DuplexClient, SubscriptionCallback, Unsubscribe};
pub use error::{CallError, ClientError};
pub use links::{DuplexLink, HttpLink, Link, LinkChain, LoggerLink, Next, Operation, Outcome, SplitLink};
pub use reconnect::{ReconnectBackoff, Schedule};
pub use shared::SharedSubscriptions;

pub use sy_protocol::Method;
