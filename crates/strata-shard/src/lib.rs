//! Bounded-fanout shard tree and blob location allocator.
//!
//! Uploaded blobs are spread over a fixed-depth tree of numerically named
//! directories so that no directory grows past a configured number of
//! entries:
//!
//! ```text
//! <root>/000/000/000/<files...>
//! <root>/000/000/001/<files...>
//! ...
//! <root>/000/001/000/<files...>
//! ```
//!
//! The filesystem is the only source of truth. No counter or index is
//! persisted; after a restart the allocator rediscovers the current leaf by
//! scanning.
//!
//! # Components
//!
//! - [`ShardLayout`]: the trait isolating all filesystem scanning
//! - [`ShardTree`]: the directory-listing implementation of [`ShardLayout`]
//! - [`BlobShardAllocator`]: cached cursor with check-lock-check allocation
//!
//! # Design Rules
//!
//! 1. Directory names are zero-padded to one width per tree, so lexical and
//!    numeric order agree.
//! 2. Branch levels count only numerically named subdirectories; leaves in
//!    content-addressed mode count every entry.
//! 3. The cursor only moves forward within a process.
//! 4. Exhaustion is fatal and never retried.

pub mod allocator;
pub mod error;
pub mod naming;
pub mod traits;
pub mod tree;

pub use allocator::{Allocation, BlobShardAllocator};
pub use error::{ShardError, ShardResult};
pub use traits::ShardLayout;
pub use tree::{LeafFilter, ShardTree};
