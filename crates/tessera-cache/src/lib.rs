//! Array handles and the cross-iteration reuse cache for Tessera.
//!
//! [`ArrayCache`] is what the execution engine calls to obtain and return
//! tensor storage. Allocation prefers a cached buffer of the same
//! `(data type, shape)`; release either retains the buffer, drops it, or
//! (for views) defuses the call. Owning buffers and views are distinct
//! variants of [`Buffer`], so a view can never enter the cache or free the
//! memory it aliases.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod cache;
pub mod config;
pub mod handle;
pub mod lru;
pub mod metrics;

pub use buffer::{Buffer, BufferBytes, OwnedBuffer, ViewBuffer};
pub use cache::{ArrayCache, CacheKey, ReleaseOutcome};
pub use config::CacheConfig;
pub use handle::ArrayHandle;
pub use lru::LruIndex;
pub use metrics::CacheMetrics;
