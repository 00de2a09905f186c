//! Search options and per-search limits.

use serde::Deserialize;
use xqzero_core::Move;

/// Tunable search parameters. Field names are the stable interface; the
/// defaults are starting points, not gospel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SearchOptions {
    /// Target number of leaves gathered per NN batch.
    pub minibatch_size: usize,

    /// Additional leaves speculatively pushed into the cache while the
    /// batch is being assembled. 0 disables prefetch.
    pub max_prefetch_batch: usize,

    /// PUCT exploration constant.
    pub cpuct: f32,

    /// Base sampling temperature for move selection at the root.
    /// 0 selects greedily by visit count.
    pub temperature: f32,

    /// Full moves over which the temperature applies; afterwards selection
    /// is greedy. 0 disables temperature entirely.
    pub temp_decay_moves: u32,

    /// Mix Dirichlet noise into the root priors.
    pub dirichlet_noise: bool,

    /// Dirichlet concentration (only used with `dirichlet_noise`).
    pub dirichlet_alpha: f32,

    /// Fraction of the root prior replaced by noise.
    pub dirichlet_epsilon: f32,

    /// Log per-move statistics when the search concludes.
    pub verbose_stats: bool,

    /// Stop early once the visit lead of the best move can no longer be
    /// overtaken within the remaining budget.
    pub smart_pruning: bool,

    /// First-play-urgency reduction: unvisited children are assumed
    /// slightly worse than their parent, scaled by how much policy mass
    /// has already been explored.
    pub fpu_reduction: f32,

    /// Number of prior plies folded into the evaluation-cache key.
    pub cache_history_length: usize,

    /// Softmax temperature applied to raw policy scores at expansion.
    pub policy_softmax_temp: f32,

    /// Collisions tolerated while gathering one minibatch before it is cut
    /// short.
    pub allowed_node_collisions: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            minibatch_size: 32,
            max_prefetch_batch: 32,
            cpuct: 1.7,
            temperature: 0.0,
            temp_decay_moves: 0,
            dirichlet_noise: false,
            dirichlet_alpha: 0.3,
            dirichlet_epsilon: 0.25,
            verbose_stats: false,
            smart_pruning: true,
            fpu_reduction: 0.0,
            cache_history_length: 7,
            policy_softmax_temp: 1.0,
            allowed_node_collisions: 16,
        }
    }
}

impl SearchOptions {
    /// Small, single-leaf batches and no early stopping: every playout is
    /// sequential and reproducible. Used throughout the tests.
    pub fn for_testing() -> Self {
        Self {
            minibatch_size: 1,
            max_prefetch_batch: 0,
            smart_pruning: false,
            ..Self::default()
        }
    }

    pub fn with_minibatch_size(mut self, n: usize) -> Self {
        self.minibatch_size = n;
        self
    }

    pub fn with_cpuct(mut self, c: f32) -> Self {
        self.cpuct = c;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_temp_decay_moves(mut self, moves: u32) -> Self {
        self.temp_decay_moves = moves;
        self
    }

    pub fn with_dirichlet_noise(mut self, enabled: bool) -> Self {
        self.dirichlet_noise = enabled;
        self
    }

    pub fn with_smart_pruning(mut self, enabled: bool) -> Self {
        self.smart_pruning = enabled;
        self
    }

    pub fn with_fpu_reduction(mut self, reduction: f32) -> Self {
        self.fpu_reduction = reduction;
        self
    }

    pub fn with_cache_history_length(mut self, plies: usize) -> Self {
        self.cache_history_length = plies;
        self
    }

    pub fn with_policy_softmax_temp(mut self, temp: f32) -> Self {
        self.policy_softmax_temp = temp;
        self
    }

    pub fn with_max_prefetch_batch(mut self, n: usize) -> Self {
        self.max_prefetch_batch = n;
        self
    }

    pub fn with_allowed_node_collisions(mut self, n: usize) -> Self {
        self.allowed_node_collisions = n;
        self
    }

    pub fn with_verbose_stats(mut self, enabled: bool) -> Self {
        self.verbose_stats = enabled;
        self
    }
}

/// Budget for one search. Negative numeric limits mean "no limit".
#[derive(Debug, Clone)]
pub struct SearchLimits {
    /// Stop once the root has this many visits (including reused ones).
    pub visits: i64,

    /// Stop once this many playouts have been made in this search.
    pub playouts: i64,

    /// Wall-clock limit in milliseconds.
    pub time_ms: i64,

    /// Run until explicitly stopped, ignoring the limits above.
    pub infinite: bool,

    /// Restrict the root to this move subset. Empty means unrestricted.
    pub searchmoves: Vec<Move>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            visits: -1,
            playouts: -1,
            time_ms: -1,
            infinite: false,
            searchmoves: Vec::new(),
        }
    }
}

impl SearchLimits {
    pub fn visits(n: i64) -> Self {
        Self {
            visits: n,
            ..Self::default()
        }
    }

    pub fn playouts(n: i64) -> Self {
        Self {
            playouts: n,
            ..Self::default()
        }
    }

    pub fn time_ms(ms: i64) -> Self {
        Self {
            time_ms: ms,
            ..Self::default()
        }
    }

    pub fn infinite() -> Self {
        Self {
            infinite: true,
            ..Self::default()
        }
    }

    pub fn with_searchmoves(mut self, moves: Vec<Move>) -> Self {
        self.searchmoves = moves;
        self
    }
}
