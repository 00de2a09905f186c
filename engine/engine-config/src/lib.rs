//! Centralized configuration loading from config.toml.
//!
//! # Configuration Priority
//!
//! Settings are loaded with the following priority (highest to lowest):
//! 1. Environment variables (`XQZERO_<SECTION>_<KEY>`)
//! 2. config.toml file
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```toml
//! [engine]
//! threads = 4
//! log-level = "debug"
//!
//! [cache]
//! nncache-size = 500000
//!
//! [search]
//! minibatch-size = 64
//! cpuct = 2.1
//! smart-pruning = true
//! ```

mod defaults;
mod loader;
mod structs;

pub use defaults::*;
pub use loader::{apply_env_overrides, load_config, load_from_path, CONFIG_SEARCH_PATHS};
pub use structs::{CacheSection, EngineConfig, EngineSection};
