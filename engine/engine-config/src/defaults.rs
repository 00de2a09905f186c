//! Default configuration values.
//!
//! Single source of truth for everything outside `SearchOptions` (whose
//! defaults live with the search engine itself).

// Engine defaults
pub const THREADS: usize = 2;
pub const LOG_LEVEL: &str = "info";

// Cache defaults
pub const NNCACHE_SIZE: usize = 200_000;
