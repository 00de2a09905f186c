//! Configuration struct definitions.
//!
//! All config structs deserialize from TOML with per-field defaults, so a
//! partial (or absent) config file always yields a runnable configuration.

use mcts::SearchOptions;
use serde::Deserialize;

use crate::defaults;

fn d_threads() -> usize {
    defaults::THREADS
}
fn d_log_level() -> String {
    defaults::LOG_LEVEL.into()
}
fn d_nncache_size() -> usize {
    defaults::NNCACHE_SIZE
}

/// Top-level configuration for the engine binary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub cache: CacheSection,
    /// Search options, exactly as the `mcts` crate defines them
    /// (kebab-case keys, e.g. `minibatch-size`).
    pub search: SearchOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineSection {
    /// Worker threads per search.
    #[serde(default = "d_threads")]
    pub threads: usize,

    /// Log filter handed to the tracing subscriber.
    #[serde(default = "d_log_level")]
    pub log_level: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            threads: d_threads(),
            log_level: d_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheSection {
    /// Evaluation cache capacity, in entries.
    #[serde(default = "d_nncache_size")]
    pub nncache_size: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            nncache_size: d_nncache_size(),
        }
    }
}

impl EngineConfig {
    /// The search options this configuration selects.
    pub fn search_options(&self) -> SearchOptions {
        self.search.clone()
    }
}
