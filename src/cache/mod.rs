//! Page cache plumbing shared by the origin and the edge.
//!
//! - **paths**: the `(domain, path)` → file location contract
//! - **writer**: atomic temp-file + rename persistence
//! - **inflight**: per-key render coalescing
//!
//! The layout on disk is
//!
//! ```text
//! {cache_root}/{domain}/{sha256(path)[0..2]}/{sha256(path)[2..4]}/{normalized path}
//! ```

mod inflight;
mod lock;
pub mod paths;
mod writer;

pub use inflight::{InFlightRenders, RenderRole};
pub(crate) use lock::mutex_lock;
pub use paths::{cache_path, normalize, normalize_domain, shard_hash};
pub use writer::{CacheWriteError, CacheWriter, write_atomic, write_atomic_with};
