//! Configuration loading logic.
//!
//! Handles loading config from files and applying environment variable
//! overrides.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::EngineConfig;

/// Standard locations to search for config.toml
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "config.toml",    // Current directory
    "../config.toml", // Parent directory (when running from a subdirectory)
];

/// Load the engine configuration.
///
/// Search order:
/// 1. Path named by the `XQZERO_CONFIG` environment variable
/// 2. `config.toml` in the current directory
/// 3. `../config.toml`
///
/// Built-in defaults fill everything a file does not set, then
/// environment variable overrides (`XQZERO_<SECTION>_<KEY>`) are applied
/// on top.
pub fn load_config() -> EngineConfig {
    if let Ok(path) = std::env::var("XQZERO_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            info!("loading config from XQZERO_CONFIG: {}", path.display());
            return load_from_path(&path);
        }
        warn!(
            "XQZERO_CONFIG={} not found, searching defaults",
            path.display()
        );
    }

    for candidate in CONFIG_SEARCH_PATHS {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("loading config from {}", path.display());
            return load_from_path(&path);
        }
    }

    debug!("no config.toml found, using built-in defaults");
    apply_env_overrides(EngineConfig::default())
}

/// Load configuration from a specific path, falling back to defaults on
/// read or parse failure.
pub fn load_from_path(path: &Path) -> EngineConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("failed to parse {}: {e}, using defaults", path.display());
                apply_env_overrides(EngineConfig::default())
            }
        },
        Err(e) => {
            warn!("failed to read {}: {e}, using defaults", path.display());
            apply_env_overrides(EngineConfig::default())
        }
    }
}

/// Reduce env override boilerplate.
macro_rules! env_override {
    // String field
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(v) = std::env::var($key) {
            $config.$section.$field = v;
        }
    };
    // Parseable field (usize, f32, bool, ...)
    ($config:expr, $section:ident . $field:ident, $key:expr, parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = v;
        }
    };
}

/// Apply environment variable overrides to a configuration.
///
/// Variables follow the pattern `XQZERO_<SECTION>_<KEY>`.
pub fn apply_env_overrides(mut config: EngineConfig) -> EngineConfig {
    // Engine
    env_override!(config, engine.threads, "XQZERO_ENGINE_THREADS", parse);
    env_override!(config, engine.log_level, "XQZERO_ENGINE_LOG_LEVEL");

    // Cache
    env_override!(config, cache.nncache_size, "XQZERO_CACHE_NNCACHE_SIZE", parse);

    // Search
    env_override!(
        config,
        search.minibatch_size,
        "XQZERO_SEARCH_MINIBATCH_SIZE",
        parse
    );
    env_override!(
        config,
        search.max_prefetch_batch,
        "XQZERO_SEARCH_MAX_PREFETCH_BATCH",
        parse
    );
    env_override!(config, search.cpuct, "XQZERO_SEARCH_CPUCT", parse);
    env_override!(config, search.temperature, "XQZERO_SEARCH_TEMPERATURE", parse);
    env_override!(
        config,
        search.temp_decay_moves,
        "XQZERO_SEARCH_TEMP_DECAY_MOVES",
        parse
    );
    env_override!(
        config,
        search.dirichlet_noise,
        "XQZERO_SEARCH_DIRICHLET_NOISE",
        parse
    );
    env_override!(
        config,
        search.verbose_stats,
        "XQZERO_SEARCH_VERBOSE_STATS",
        parse
    );
    env_override!(
        config,
        search.smart_pruning,
        "XQZERO_SEARCH_SMART_PRUNING",
        parse
    );
    env_override!(
        config,
        search.fpu_reduction,
        "XQZERO_SEARCH_FPU_REDUCTION",
        parse
    );
    env_override!(
        config,
        search.cache_history_length,
        "XQZERO_SEARCH_CACHE_HISTORY_LENGTH",
        parse
    );
    env_override!(
        config,
        search.policy_softmax_temp,
        "XQZERO_SEARCH_POLICY_SOFTMAX_TEMP",
        parse
    );
    env_override!(
        config,
        search.allowed_node_collisions,
        "XQZERO_SEARCH_ALLOWED_NODE_COLLISIONS",
        parse
    );

    config
}
