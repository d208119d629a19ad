#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! # About Refetch
//!
//! Refetch is an asynchronous state management library built around a
//! stale-while-revalidate query cache.
//!
//! Heavily inspired by [Tanstack Query](https://tanstack.com/query/latest/).
//!
//! A query provides:
//! - caching
//! - de-duplication
//! - invalidation
//! - background refetching
//! - retries with exponential backoff
//! - cancellation of superseded fetches
//! - memory management with cache lifetimes
//! - infinite (paginated) queries
//! - mutations that invalidate what they touched
//! - opt-in fetch lifecycle tracing
//!
//! ## The main entry points are:
//! - [`QueryClient::query`] - mounts a [`QueryHandle`] that reads, caches and
//!   refetches data for one key.
//! - [`QueryClient::infinite_query`] - the paginated variant.
//! - [`QueryClient::mutation`] - side-effecting calls that invalidate query
//!   keys on success.
//!
//! The client is single-threaded: run it on a current-thread runtime inside a
//! [`tokio::task::LocalSet`], which hosts the fetch and gc tasks.
//!
//! # A Simple Example
//!
//! ```no_run
//! use refetch::{query_key, QueryClient, QueryError};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let local = tokio::task::LocalSet::new();
//!     local
//!         .run_until(async {
//!             let client = QueryClient::new();
//!
//!             let user = client.query(
//!                 query_key!["user", 1],
//!                 |_key| async move { Ok::<_, QueryError>("alice".to_string()) },
//!                 client.query_options(),
//!             );
//!
//!             while !user.is_success() {
//!                 tokio::time::sleep(Duration::from_millis(1)).await;
//!             }
//!             assert_eq!(user.data(), Some("alice".to_string()));
//!         })
//!         .await;
//! }
//! ```

/// Subscriptions to cache-wide query events.
pub mod cache_observer;
mod error;
mod garbage_collector;
mod infinite_query;
mod instant;
mod mutation;
mod query;
mod query_cache;
mod query_client;
mod query_executor;
mod query_key;
mod query_options;
mod query_state;
mod retry;
/// Opt-in recording of fetch lifecycle events.
pub mod trace;
mod use_query;
mod util;

pub use error::*;
pub use infinite_query::{InfiniteData, InfiniteQueryHandle, InfiniteQueryOptions, PageParamFn};
pub use instant::*;
pub use mutation::{MutationHandle, MutationOptions, MutationStatus};
pub use query::ListenerKey;
pub use query_cache::{CacheObserverKey, QuerySubscription};
pub use query_client::*;
pub use query_key::QueryKey;
pub use query_options::*;
pub use query_state::*;
pub use retry::*;
pub use use_query::QueryHandle;

// The query_key! macro expands to serde_json::json! calls.
#[doc(hidden)]
pub use serde_json;

/// Convenience trait for query value requirements.
pub trait QueryValue: std::fmt::Debug + Clone {}
impl<V> QueryValue for V where V: std::fmt::Debug + Clone {}
