//! Observable in-memory state that persists itself on every change.
//!
//! A declared state is a tree of mappings, sequences and records wrapped in
//! [`observable::node::ObservableNode`] handles. Every write takes a snapshot
//! of the whole state before and after, computes a [`diff::Diff`] and, when
//! something changed, notifies the state's observers once. The
//! [`persist::bridge::PersistenceBridge`] observer writes the new snapshot to
//! a [`persist::StateStore`] before the write returns.
//!
//! # Examples
//!
//! In-memory usage with [`persist::memory::MemoryStateStore`]:
//! ```
//! use livestate::{
//!     declare_persistent,
//!     persist::memory::MemoryStateStore,
//!     value::Value,
//! };
//!
//! let store = MemoryStateStore::new();
//! let initial = Value::mapping([("users", Value::sequence([Value::mapping([("name", "Alice")])]))]);
//! let state = declare_persistent(initial, store.clone()).expect("declare");
//!
//! let users = state.node().child("users").expect("users");
//! users.push(Value::mapping([("name", "Eve")])).expect("push");
//!
//! assert_eq!(users.len().expect("len"), 2);
//! assert_eq!(store.write_count(), 1);
//! assert_eq!(
//!     store.last_write().as_deref(),
//!     Some(r#"{"users":[{"name":"Alice"},{"name":"Eve"}]}"#)
//! );
//! ```
//!
//! Serving a state over HTTP:
//! ```no_run
//! use livestate::{
//!     dispatch::{server::serve, EndpointRegistry},
//!     observable::root::StateRoot,
//!     value::Value,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let state = StateRoot::declare(Value::mapping([("hits", 0)])).expect("declare");
//! let mut endpoints = EndpointRegistry::new();
//! let read = state.clone();
//! endpoints.get("/hits", move |_req| Ok(read.snapshot()));
//! let table = endpoints.build().expect("routes");
//! serve("127.0.0.1:5000".parse().expect("addr"), table).await.expect("serve");
//! # }
//! ```
#![warn(missing_docs)]

/// JSON text encoding of snapshots.
pub mod codec;
/// Serving configuration.
pub mod config;
/// Structural diff between snapshots.
pub mod diff;
/// Endpoint registry, dispatch table and HTTP surface.
pub mod dispatch;
/// Observable nodes, state roots and observers.
pub mod observable;
/// Storage abstraction, stores and the persistence observer.
pub mod persist;
/// Async change event stream.
pub mod runtime;
/// Shared primitive types: paths, methods, ids.
pub mod types;
/// Tagged value model.
pub mod value;

pub use persist::bridge::declare_persistent;
