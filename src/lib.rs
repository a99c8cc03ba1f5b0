//! Client core of the Onebox email triage app.
//!
//! Reads from the backend go through a keyed, freshness-aware cache with
//! in-flight de-duplication ([`query`], [`cache`]); writes invalidate the
//! reads they affect. Search, filtering and sorting of loaded emails happen
//! locally ([`search`]).

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod inbox;
pub mod query;
pub mod search;


pub use api::{EmailApi, HttpEmailApi};
pub use cache::{FetchCache, QueryKey};
pub use config::Config;
pub use error::{QueryError, Result};
pub use inbox::Inbox;
pub use query::{Mutation, Query, QueryClient, QueryResult};
pub use search::{SearchFilters, SearchSession, SortConfig, SortField};
