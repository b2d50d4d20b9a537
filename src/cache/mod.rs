//! Content caching.
//!
//! # Data Flow
//! ```text
//! get_content(path)
//!     → cache hit? send If-None-Match: <etag>
//!         304 → touch (timestamp only), serve cached payload
//!         200 → replace entry wholesale
//! update_content(path) → invalidate before send and after success
//! list_content(path)   → never cached
//! ```

pub mod content;

pub use content::{CacheEntry, ContentCache};
