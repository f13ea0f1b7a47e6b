//! Optimistic mutations over a single-writer query cache, with an admin
//! console data layer built on top.
//!
//! # Examples
//!
//! Direct use of [`core::store::CacheStore`]:
//! ```
//! use optiq::{core::store::CacheStore, types::QueryKey};
//! use serde_json::json;
//!
//! let mut store = CacheStore::new();
//! let key = QueryKey::new("userProfile").with(1u64);
//! store.write(key.clone(), json!({ "name": "Alice" })).expect("write");
//!
//! let snapshot = store
//!     .begin_optimistic(key.clone(), Some(json!({ "name": "Bob" })))
//!     .expect("begin");
//! assert_eq!(store.get(&key).map(|e| e.value["name"].clone()), Some(json!("Bob")));
//!
//! store.rollback(key.clone(), snapshot).expect("rollback");
//! assert_eq!(store.get(&key).map(|e| e.value["name"].clone()), Some(json!("Alice")));
//! ```
//!
//! Console over the in-memory backend:
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use optiq::{
//!     admin::{requests::UpdateProfileRequest, service::AdminConsole},
//!     core::store::CacheStore,
//!     remote::memory::InMemoryBackend,
//!     runtime::handle::{spawn_cache, RuntimeConfig},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = spawn_cache(CacheStore::new(), None, RuntimeConfig::default());
//! let console = AdminConsole::new(Arc::new(InMemoryBackend::seeded()), cache.clone(), Duration::from_secs(6));
//!
//! let session = console.login("alice@example.com", "secret1").await.expect("login");
//! let session = session.into_result().expect("accepted");
//! console.profile(session.user.id).await.expect("profile");
//!
//! let outcome = console
//!     .update_profile(session.user.id, UpdateProfileRequest {
//!         name: "Bob".to_string(),
//!         email: "alice@example.com".to_string(),
//!     })
//!     .await
//!     .expect("update");
//! assert_eq!(outcome.into_result().expect("saved").name, "Bob");
//! cache.shutdown().await.expect("shutdown");
//! # }
//! ```
//!
//! Durable cache with SQLite journaling:
//! ```no_run
//! use optiq::{
//!     persist::sqlite::SqliteOpSink,
//!     runtime::handle::{spawn_cache, RuntimeConfig},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteOpSink::open("console-cache.db").expect("open sqlite");
//! let store = sink.load_store().expect("replay");
//! let handle = spawn_cache(store, Some(Box::new(sink)), RuntimeConfig::default());
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Admin console models, forms, mutations and facade.
pub mod admin;
/// Environment-driven configuration.
pub mod config;
/// Core in-memory cache store.
pub mod core;
/// Mutation controller, outcome taxonomy and lifecycle states.
pub mod mutation;
/// Journaled cache op model.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Cached reads through the runtime.
pub mod query;
/// Remote resource client contract and implementations.
pub mod remote;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
/// Client-side field validation.
pub mod validate;
