//! autopool-state — embedded state store for autopool.
//!
//! Backed by [redb](https://docs.rs/redb). Persists the latest versioned
//! snapshot of every pool and the append-only scaling activity history.
//!
//! Values are JSON-serialized into `&[u8]` columns. Activity keys are
//! `{pool}:{seq:020}` so a prefix scan returns one pool's history in order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
