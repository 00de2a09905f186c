//! Search orchestration: worker pool, limits, stop control and final
//! move selection.
//!
//! `Search` owns a shared context the workers run against. Lock order is
//! `nodes` (the tree arena) before `counters`; nothing ever holds both in
//! the other direction. The final best move has exactly one publisher,
//! enforced by the `responded_bestmove` flag.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};

use xqzero_core::{
    BestMoveCallback, BestMoveInfo, InfoCallback, Move, Network, NetworkError, Position,
    PositionHistory, ThinkingInfo,
};

use crate::cache::NNCache;
use crate::node::NodeId;
use crate::params::{SearchLimits, SearchOptions};
use crate::tree::{read_arena, Arena, NodeTree};
use crate::worker::{apply_dirichlet_noise, SearchWorker};

/// Minimum spacing between periodic info reports. Best-move or depth
/// changes report immediately.
const INFO_INTERVAL: Duration = Duration::from_millis(500);

/// Reported principal variations are capped at this many plies.
const MAX_PV_LENGTH: usize = 20;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

#[derive(Debug, Default)]
struct Counters {
    stop: bool,
    responded_bestmove: bool,
    /// Set by smart pruning once the lead is insurmountable.
    found_best_move: bool,
    /// Memoized final result, so repeated queries agree even under
    /// temperature sampling.
    best_move: Option<BestMoveInfo>,
    total_playouts: u64,
    cum_depth: u64,
    max_depth: u32,
    last_info_time: Option<Instant>,
    last_info_best: Option<Move>,
    last_info_depth: u32,
}

/// Best root edge and runner-up, as seen at one instant.
struct RootSnapshot {
    best: Option<(Move, u32, f32)>,
    second_n: u32,
    root_n: u32,
}

/// Everything shared between the search handle and its workers.
pub(crate) struct SearchContext<P: Position, N: Network<P>> {
    arena: Arc<RwLock<Arena>>,
    root: NodeId,
    played_history: PositionHistory<P>,
    cache: Arc<NNCache>,
    network: Arc<N>,
    options: SearchOptions,
    limits: SearchLimits,
    start_time: Instant,
    initial_visits: u32,
    counters: Mutex<Counters>,
    error: Mutex<Option<SearchError>>,
    best_move_callback: Option<BestMoveCallback>,
    info_callback: Option<InfoCallback>,
}

impl<P: Position, N: Network<P>> SearchContext<P, N> {
    fn lock_counters(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn arena(&self) -> &RwLock<Arena> {
        &self.arena
    }

    pub(crate) fn arena_arc(&self) -> Arc<RwLock<Arena>> {
        Arc::clone(&self.arena)
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn played_history(&self) -> &PositionHistory<P> {
        &self.played_history
    }

    pub(crate) fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub(crate) fn limits(&self) -> &SearchLimits {
        &self.limits
    }

    pub(crate) fn network(&self) -> &N {
        &self.network
    }

    pub(crate) fn cache(&self) -> Arc<NNCache> {
        Arc::clone(&self.cache)
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Cache key for the position `history` ends in, folding in the
    /// configured number of prior plies.
    pub(crate) fn cache_key(&self, history: &PositionHistory<P>) -> u64 {
        history.hash_last(self.options.cache_history_length + 1)
    }

    /// Whether a root edge may be searched, honoring `searchmoves`.
    pub(crate) fn root_move_allowed(&self, mv: Move) -> bool {
        self.limits.searchmoves.is_empty() || self.limits.searchmoves.contains(&mv)
    }

    /// Whether workers should keep iterating.
    pub(crate) fn is_search_active(&self) -> bool {
        let counters = self.lock_counters();
        !counters.stop && !counters.found_best_move && !self.limits_reached(&counters)
    }

    fn limits_reached(&self, counters: &Counters) -> bool {
        if self.limits.infinite {
            return false;
        }
        if self.limits.visits >= 0
            && counters.total_playouts + self.initial_visits as u64 >= self.limits.visits as u64
        {
            return true;
        }
        if self.limits.playouts >= 0 && counters.total_playouts >= self.limits.playouts as u64 {
            return true;
        }
        if self.limits.time_ms >= 0 && self.elapsed_ms() >= self.limits.time_ms as u64 {
            return true;
        }
        false
    }

    /// Upper bound on playouts the search may still perform, from the
    /// visit/playout/time limits. `None` when unbounded.
    fn remaining_playouts(&self, counters: &Counters) -> Option<u64> {
        if self.limits.infinite {
            return None;
        }
        let mut remaining: Option<u64> = None;
        let mut fold = |candidate: u64| {
            remaining = Some(remaining.map_or(candidate, |r: u64| r.min(candidate)));
        };
        if self.limits.visits >= 0 {
            let used = counters.total_playouts + self.initial_visits as u64;
            fold((self.limits.visits as u64).saturating_sub(used));
        }
        if self.limits.playouts >= 0 {
            fold((self.limits.playouts as u64).saturating_sub(counters.total_playouts));
        }
        if self.limits.time_ms >= 0 && counters.total_playouts > 0 {
            let elapsed = self.elapsed_ms().max(1);
            let left = (self.limits.time_ms as u64).saturating_sub(elapsed);
            fold(left * counters.total_playouts / elapsed);
        }
        remaining
    }

    /// How many leaves the next minibatch should gather: the configured
    /// size, capped by what the budget still allows.
    pub(crate) fn gather_target(&self) -> usize {
        let minibatch = self.options.minibatch_size.max(1);
        let counters = self.lock_counters();
        match self.remaining_playouts(&counters) {
            Some(remaining) => minibatch.min(remaining.max(1) as usize),
            None => minibatch,
        }
    }

    /// Record a finished iteration: bump playout and depth counters,
    /// re-evaluate smart pruning, and emit throttled progress output.
    pub(crate) fn note_iteration(&self, playouts: u64, sum_depth: u64, max_depth: u32) {
        let snapshot = self.snapshot_root();

        let mut pending_info: Option<ThinkingInfo> = None;
        {
            let mut counters = self.lock_counters();
            counters.total_playouts += playouts;
            counters.cum_depth += sum_depth;
            if max_depth > counters.max_depth {
                counters.max_depth = max_depth;
            }

            if self.options.smart_pruning && !counters.found_best_move {
                if let (Some((_, best_n, _)), Some(remaining)) =
                    (snapshot.best, self.remaining_playouts(&counters))
                {
                    if best_n as u64 > snapshot.second_n as u64 + remaining {
                        debug!(
                            best_n,
                            second_n = snapshot.second_n,
                            remaining,
                            "smart pruning: lead is insurmountable"
                        );
                        counters.found_best_move = true;
                    }
                }
            }

            let avg_depth = if counters.total_playouts > 0 {
                (counters.cum_depth / counters.total_playouts) as u32
            } else {
                0
            };
            let best_move = snapshot.best.map(|(mv, _, _)| mv);
            let interval_due = match counters.last_info_time {
                None => true,
                Some(at) => at.elapsed() >= INFO_INTERVAL,
            };
            if best_move != counters.last_info_best
                || avg_depth > counters.last_info_depth
                || interval_due
            {
                counters.last_info_time = Some(Instant::now());
                counters.last_info_best = best_move;
                counters.last_info_depth = avg_depth;

                let elapsed = self.elapsed_ms();
                let nps = if elapsed > 0 {
                    counters.total_playouts * 1000 / elapsed
                } else {
                    0
                };
                pending_info = Some(ThinkingInfo {
                    depth: avg_depth,
                    seldepth: counters.max_depth,
                    time_ms: elapsed,
                    nodes: snapshot.root_n as u64,
                    nps,
                    score_cp: snapshot
                        .best
                        .map(|(_, _, q)| q_to_centipawns(q))
                        .unwrap_or(0),
                    pv: Vec::new(),
                });
            }
        }

        // PV walk needs the nodes lock, so it happens with counters
        // released.
        if let Some(mut thinking) = pending_info {
            thinking.pv = self.principal_variation();
            if let Some(callback) = &self.info_callback {
                callback(&thinking);
            }
        }
    }

    fn snapshot_root(&self) -> RootSnapshot {
        let arena = read_arena(&self.arena);
        let root = arena.get(self.root);
        let best_idx = self.best_child_no_temperature(&arena, self.root);
        let best = best_idx.map(|i| {
            let child = root.child(i);
            let (n, q) = if child.is_some() {
                let child = arena.get(child);
                (child.n(), child.q())
            } else {
                (0, 0.0)
            };
            (root.edges()[i].mv(), n, q)
        });
        let second_n = root
            .edges()
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != best_idx)
            .map(|(i, _)| {
                let child = root.child(i);
                if child.is_some() {
                    arena.get(child).n()
                } else {
                    0
                }
            })
            .max()
            .unwrap_or(0);
        RootSnapshot {
            best,
            second_n,
            root_n: root.n(),
        }
    }

    /// Child with the most visits; ties break by higher Q, then edge
    /// order. Before any child is visited the highest prior wins.
    fn best_child_no_temperature(&self, arena: &Arena, node_id: NodeId) -> Option<usize> {
        let node = arena.get(node_id);
        if node.edges().is_empty() {
            return None;
        }
        let is_root = node_id == self.root;

        let mut best: Option<(usize, u32, f32)> = None;
        let mut best_prior: Option<(usize, f32)> = None;
        for (i, edge) in node.edges().iter().enumerate() {
            if is_root && !self.root_move_allowed(edge.mv()) {
                continue;
            }
            let child = node.child(i);
            let (n, q) = if child.is_some() {
                let child = arena.get(child);
                (child.n(), child.q())
            } else {
                (0, f32::NEG_INFINITY)
            };
            if n > 0 {
                let better = match best {
                    None => true,
                    Some((_, bn, bq)) => n > bn || (n == bn && q > bq),
                };
                if better {
                    best = Some((i, n, q));
                }
            }
            let prior_better = match best_prior {
                None => true,
                Some((_, bp)) => edge.prior() > bp,
            };
            if prior_better {
                best_prior = Some((i, edge.prior()));
            }
        }
        best.map(|(i, _, _)| i)
            .or(best_prior.map(|(i, _)| i))
            // `searchmoves` filtered everything out: fall back to edge 0.
            .or(Some(0))
    }

    /// Sample a visited child with probability proportional to
    /// `n^(1/temperature)`. Falls back to greedy selection when nothing
    /// has been visited.
    fn best_child_with_temperature(
        &self,
        arena: &Arena,
        node_id: NodeId,
        temperature: f32,
    ) -> Option<usize> {
        if temperature <= 0.0 {
            return self.best_child_no_temperature(arena, node_id);
        }
        let node = arena.get(node_id);
        let is_root = node_id == self.root;

        let mut candidates: Vec<(usize, f64)> = Vec::new();
        for (i, edge) in node.edges().iter().enumerate() {
            if is_root && !self.root_move_allowed(edge.mv()) {
                continue;
            }
            let child = node.child(i);
            if child.is_some() {
                let n = arena.get(child).n();
                if n > 0 {
                    candidates.push((i, (n as f64).powf(1.0 / temperature as f64)));
                }
            }
        }
        if candidates.is_empty() {
            return self.best_child_no_temperature(arena, node_id);
        }

        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        let mut threshold = rand::thread_rng().gen::<f64>() * total;
        for (i, weight) in &candidates {
            threshold -= weight;
            if threshold <= 0.0 {
                return Some(*i);
            }
        }
        candidates.last().map(|(i, _)| *i)
    }

    /// Temperature actually in effect for this search's move number.
    fn effective_temperature(&self) -> f32 {
        if self.options.temperature > 0.0
            && self.played_history.move_number() as u32 <= self.options.temp_decay_moves
        {
            self.options.temperature
        } else {
            0.0
        }
    }

    fn compute_best_move_info(&self) -> BestMoveInfo {
        let arena = read_arena(&self.arena);
        let temperature = self.effective_temperature();
        let best_idx = self.best_child_with_temperature(&arena, self.root, temperature);
        let root = arena.get(self.root);
        match best_idx {
            None => BestMoveInfo {
                best: None,
                ponder: None,
            },
            Some(i) => {
                let best = root.edges()[i].mv();
                let child = root.child(i);
                let ponder = if child.is_some() {
                    self.best_child_no_temperature(&arena, child)
                        .map(|j| arena.get(child).edges()[j].mv())
                } else {
                    None
                };
                BestMoveInfo {
                    best: Some(best),
                    ponder,
                }
            }
        }
    }

    /// Temperature-free evaluation of the position: the best child's Q,
    /// or the terminal value at a terminal root.
    pub(crate) fn best_eval(&self) -> f32 {
        let arena = read_arena(&self.arena);
        let root = arena.get(self.root);
        if root.is_terminal() {
            return root.terminal_value();
        }
        match self.best_child_no_temperature(&arena, self.root) {
            Some(i) => {
                let child = root.child(i);
                if child.is_some() {
                    arena.get(child).q()
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn principal_variation(&self) -> Vec<Move> {
        let arena = read_arena(&self.arena);
        let mut pv = Vec::new();
        let mut node_id = self.root;
        while pv.len() < MAX_PV_LENGTH {
            let best = match self.best_child_no_temperature(&arena, node_id) {
                Some(best) => best,
                None => break,
            };
            let node = arena.get(node_id);
            pv.push(node.edges()[best].mv());
            let child = node.child(best);
            if child.is_none() {
                break;
            }
            let child_node = arena.get(child);
            if child_node.n() == 0 || !child_node.is_extended() {
                break;
            }
            node_id = child;
        }
        pv
    }

    /// Make sure the final result has been published. The first caller
    /// wins; everyone else (and everything after an abort) is a no-op.
    pub(crate) fn ensure_bestmove_published(&self) {
        {
            let counters = self.lock_counters();
            if counters.responded_bestmove {
                return;
            }
        }
        let computed = self.compute_best_move_info();
        let published = {
            let mut counters = self.lock_counters();
            if counters.responded_bestmove {
                None
            } else {
                counters.responded_bestmove = true;
                let info = *counters.best_move.get_or_insert(computed);
                Some(info)
            }
        };
        if let Some(best) = published {
            if self.options.verbose_stats {
                self.send_moves_stats();
            }
            info!(playouts = self.total_playouts(), "search finished: {}", best);
            if let Some(callback) = &self.best_move_callback {
                callback(&best);
            }
        }
    }

    /// Per-move statistics for the root, logged on completion when
    /// `verbose_stats` is on. Includes the cached first-ply network value
    /// where the cache still holds one.
    fn send_moves_stats(&self) {
        let arena = read_arena(&self.arena);
        let root = arena.get(self.root);
        let sqrt_n = (root.n_with_in_flight() as f32).sqrt();

        let mut order: Vec<usize> = (0..root.edges().len()).collect();
        order.sort_by_key(|&i| {
            let child = root.child(i);
            let n = if child.is_some() {
                arena.get(child).n()
            } else {
                0
            };
            std::cmp::Reverse(n)
        });

        for i in order {
            let edge = &root.edges()[i];
            let child = root.child(i);
            let (n, in_flight, q) = if child.is_some() {
                let child = arena.get(child);
                (child.n(), child.n_in_flight(), child.q())
            } else {
                (0, 0, 0.0)
            };
            let u = self.options.cpuct * edge.prior() * sqrt_n / (1.0 + n as f32);

            let mut first_ply = self.played_history.clone();
            first_ply.append(edge.mv());
            let cached = self
                .cache
                .lookup(self.cache_key(&first_ply))
                .map(|entry| format!("{:8.5}", -entry.q))
                .unwrap_or_else(|| "  n/a   ".to_string());

            info!(
                target: "mcts::stats",
                "{:>5} N: {:7} (+{:2}) (P: {:5.2}%) (Q: {:8.5}) (U: {:8.5}) (V: {})",
                edge.mv().to_string(),
                n,
                in_flight,
                edge.prior() * 100.0,
                q,
                u,
                cached,
            );
        }
    }

    /// First backend failure wins: stop the search and suppress the
    /// final callback, the error surfaces from `wait()`.
    pub(crate) fn report_error(&self, err: NetworkError) {
        {
            let mut error = self
                .error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if error.is_none() {
                *error = Some(SearchError::Network(err));
            }
        }
        let mut counters = self.lock_counters();
        counters.stop = true;
        counters.responded_bestmove = true;
    }

    pub(crate) fn total_playouts(&self) -> u64 {
        self.lock_counters().total_playouts
    }
}

fn q_to_centipawns(q: f32) -> i32 {
    (290.680623072 * (1.548090806 * q as f64).tan()) as i32
}

/// A single search over a shared tree.
///
/// Construct with the tree, a network, callbacks, limits and options;
/// then either `run_blocking(n)` or `start_threads(n)` + `wait()`.
/// Dropping a running search aborts it.
pub struct Search<P: Position, N: Network<P>> {
    ctx: Arc<SearchContext<P, N>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: Position, N: Network<P>> Search<P, N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: &NodeTree<P>,
        network: Arc<N>,
        best_move_callback: Option<BestMoveCallback>,
        info_callback: Option<InfoCallback>,
        limits: SearchLimits,
        options: SearchOptions,
        cache: Arc<NNCache>,
    ) -> Search<P, N> {
        let initial_visits = tree.root_visits();
        let ctx = Arc::new(SearchContext {
            arena: tree.shared_arena(),
            root: tree.root_id(),
            played_history: tree.played_history().clone(),
            cache,
            network,
            options,
            limits,
            start_time: Instant::now(),
            initial_visits,
            counters: Mutex::new(Counters::default()),
            error: Mutex::new(None),
            best_move_callback,
            info_callback,
        });

        // A reused root already has priors; refresh its noise for this
        // search if requested.
        if ctx.options.dirichlet_noise {
            let mut arena = crate::tree::write_arena(&ctx.arena);
            let root_id = ctx.root;
            let root = arena.get_mut(root_id);
            if !root.is_terminal() && !root.edges().is_empty() {
                apply_dirichlet_noise(
                    root,
                    ctx.options.dirichlet_alpha,
                    ctx.options.dirichlet_epsilon,
                    &mut rand::thread_rng(),
                );
            }
        }

        Search {
            ctx,
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Start `how_many` worker threads and return immediately.
    pub fn start_threads(&self, how_many: usize) -> Result<(), SearchError> {
        let mut threads = self
            .threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for i in 0..how_many {
            let ctx = Arc::clone(&self.ctx);
            let handle = std::thread::Builder::new()
                .name(format!("mcts-worker-{i}"))
                .spawn(move || SearchWorker::new(ctx).run_blocking())
                .map_err(|e| SearchError::Spawn(e.to_string()))?;
            threads.push(handle);
        }
        debug!(how_many, "search workers started");
        Ok(())
    }

    /// Run with `threads` workers and block until the search finishes.
    pub fn run_blocking(&self, threads: usize) -> Result<(), SearchError> {
        self.start_threads(threads)?;
        self.wait()
    }

    /// Alias of `run_blocking(1)`; observable behavior is identical.
    pub fn run_single_threaded(&self) -> Result<(), SearchError> {
        self.run_blocking(1)
    }

    /// Ask the search to stop. Not blocking; the final best move is still
    /// reported (by exactly one worker, or by `wait()`).
    pub fn stop(&self) {
        debug!("search stop requested");
        let mut counters = self.ctx.lock_counters();
        counters.stop = true;
    }

    /// Stop without reporting a best move.
    pub fn abort(&self) {
        debug!("search abort requested");
        let mut counters = self.ctx.lock_counters();
        counters.stop = true;
        counters.responded_bestmove = true;
    }

    /// Block until all workers have exited. Publishes the final best move
    /// if no worker already did, and surfaces the first backend failure.
    pub fn wait(&self) -> Result<(), SearchError> {
        let handles: Vec<JoinHandle<()>> = {
            let mut threads = self
                .threads
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *threads)
        };
        for handle in handles {
            if handle.join().is_err() {
                let mut error = self
                    .ctx
                    .error
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if error.is_none() {
                    *error = Some(SearchError::WorkerPanicked);
                }
                drop(error);
                let mut counters = self.ctx.lock_counters();
                counters.stop = true;
                counters.responded_bestmove = true;
            }
        }
        self.ctx.ensure_bestmove_published();
        let stored = {
            let mut error = self
                .ctx
                .error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            error.take()
        };
        match stored {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The final result. Memoized: repeated calls agree even with
    /// temperature enabled.
    pub fn get_best_move(&self) -> BestMoveInfo {
        {
            let counters = self.ctx.lock_counters();
            if let Some(best) = counters.best_move {
                return best;
            }
        }
        let computed = self.ctx.compute_best_move_info();
        let mut counters = self.ctx.lock_counters();
        *counters.best_move.get_or_insert(computed)
    }

    /// Temperature-free evaluation of the best move. With temperature
    /// enabled this may refer to a different move than `get_best_move`.
    pub fn get_best_eval(&self) -> f32 {
        self.ctx.best_eval()
    }

    /// Playouts completed by this search so far.
    pub fn total_playouts(&self) -> u64 {
        self.ctx.total_playouts()
    }
}

impl<P: Position, N: Network<P>> Drop for Search<P, N> {
    fn drop(&mut self) {
        self.abort();
        let handles: Vec<JoinHandle<()>> = {
            let mut threads = self
                .threads
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *threads)
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}
