//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  UpstreamSource │ LockBackend │ KeyValueStore │ Clock      │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ WikipediaSource │ RedisLockBackend │ RedisStore            │ │
//! │  │ InMemoryLockBackend │ InMemoryStore │ StaticUpstream       │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use wikitop::adapters::{connect, RedisLockBackend, RedisStore, WikipediaSource};
//!
//! let conn = connect("redis://localhost:6379").await?;
//! let store = Arc::new(RedisStore::new(conn.clone()));
//! let locks = Arc::new(RedisLockBackend::new(conn, Duration::from_millis(50)));
//! let upstream = Arc::new(WikipediaSource::new(WikipediaConfig::default())?);
//! ```

mod memory;
mod redis;
mod wikipedia;

pub use self::redis::{connect, RedisLockBackend, RedisStore};
pub use memory::{InMemoryLockBackend, InMemoryStore, StaticUpstream};
pub use wikipedia::{parse_top_articles, WikipediaConfig, WikipediaSource};
