//! The per-thread search worker.
//!
//! Each worker runs the same iteration until the search goes inactive:
//!
//! 1. initialize per-iteration buffers and a fresh caching computation
//! 2. gather a minibatch of leaves by PUCT descent
//! 3. speculatively prefetch further positions into the cache
//! 4. run the network batch (the only mandatory blocking point)
//! 5. fetch results into the gathered nodes
//! 6. back values up to the root
//! 7. update shared counters, stop conditions and progress output
//!
//! Descent holds the shared tree lock and claims nodes through atomic
//! in-flight counters; only edge creation and child spawning take the
//! exclusive lock.

use std::sync::Arc;

use rand::Rng;
use tracing::{trace, warn};

use xqzero_core::{GameResult, Move, Network, NetworkError, Position, PositionHistory};

use crate::computation::CachingComputation;
use crate::node::{Node, NodeId};
use crate::search::SearchContext;
use crate::tree::{read_arena, write_arena, Arena};

/// One gathered leaf: a node to evaluate, a terminal revisit, or a
/// collision that only needs its in-flight claims released.
struct NodeToProcess {
    node: NodeId,
    /// Plies below the root where the leaf was found.
    depth: u16,
    is_collision: bool,
    /// Whether this entry added a real backend input (cache miss).
    nn_queried: bool,
    /// Caching-computation slot for evaluated entries.
    slot: usize,
    /// Value to back up, from the leaf's side to move's perspective.
    v: f32,
}

enum Pick {
    /// Unextended, unclaimed leaf: ours to extend.
    Fresh { node: NodeId, depth: u16 },
    /// Terminal node reached again.
    Terminal { node: NodeId, depth: u16, v: f32 },
    /// Already claimed by another in-flight descent.
    Collision { node: NodeId, depth: u16 },
}

enum Extended {
    Terminal(f32),
    NeedsEval(Vec<Move>),
}

pub(crate) struct SearchWorker<P: Position, N: Network<P>> {
    ctx: Arc<SearchContext<P, N>>,
    history: PositionHistory<P>,
    minibatch: Vec<NodeToProcess>,
    computation: Option<CachingComputation<P, N::Computation>>,
}

impl<P: Position, N: Network<P>> SearchWorker<P, N> {
    pub(crate) fn new(ctx: Arc<SearchContext<P, N>>) -> SearchWorker<P, N> {
        let history = ctx.played_history().clone();
        SearchWorker {
            ctx,
            history,
            minibatch: Vec::new(),
            computation: None,
        }
    }

    /// Run iterations until the search goes inactive, then make sure the
    /// final best move has a publisher.
    pub(crate) fn run_blocking(&mut self) {
        while self.ctx.is_search_active() {
            if let Err(err) = self.execute_one_iteration() {
                warn!("search worker stopping on backend failure: {err}");
                self.ctx.report_error(err);
                return;
            }
        }
        self.ctx.ensure_bestmove_published();
    }

    fn execute_one_iteration(&mut self) -> Result<(), NetworkError> {
        self.initialize_iteration();
        self.gather_minibatch();
        self.maybe_prefetch_into_cache();
        self.run_nn_computation()?;
        self.fetch_minibatch_results();
        self.do_backup_update();
        self.update_counters();
        Ok(())
    }

    // Stage 1.
    fn initialize_iteration(&mut self) {
        self.minibatch.clear();
        self.computation = Some(CachingComputation::new(
            self.ctx.network().new_computation(),
            self.ctx.cache(),
        ));
    }

    // Stage 2.
    fn gather_minibatch(&mut self) {
        let target = self.ctx.gather_target();
        let allowed_collisions = self.ctx.options().allowed_node_collisions;
        let mut gathered = 0usize;
        let mut collisions = 0usize;

        while gathered < target {
            match self.pick_node_to_extend() {
                Pick::Collision { node, depth } => {
                    self.minibatch.push(NodeToProcess {
                        node,
                        depth,
                        is_collision: true,
                        nn_queried: false,
                        slot: 0,
                        v: 0.0,
                    });
                    collisions += 1;
                    if collisions > allowed_collisions {
                        trace!(collisions, "collision budget exhausted, cutting minibatch");
                        break;
                    }
                }
                Pick::Terminal { node, depth, v } => {
                    self.minibatch.push(NodeToProcess {
                        node,
                        depth,
                        is_collision: false,
                        nn_queried: false,
                        slot: 0,
                        v,
                    });
                    gathered += 1;
                }
                Pick::Fresh { node, depth } => {
                    match self.extend_node(node) {
                        Extended::Terminal(v) => {
                            self.minibatch.push(NodeToProcess {
                                node,
                                depth,
                                is_collision: false,
                                nn_queried: false,
                                slot: 0,
                                v,
                            });
                        }
                        Extended::NeedsEval(moves) => {
                            let computation = self
                                .computation
                                .as_mut()
                                .expect("computation initialized in stage 1");
                            let key = self.ctx.cache_key(&self.history);
                            let before = computation.backend_batch_size();
                            let slot = computation.add_input(key, &self.history, moves);
                            self.minibatch.push(NodeToProcess {
                                node,
                                depth,
                                is_collision: false,
                                nn_queried: computation.backend_batch_size() > before,
                                slot,
                                v: 0.0,
                            });
                        }
                    }
                    gathered += 1;
                }
            }
        }
    }

    /// Descend from the root, re-selecting the PUCT-best child at every
    /// level with virtual-loss-adjusted statistics, until reaching a node
    /// that is unextended, terminal, or claimed by another in-flight
    /// descent. Every node along the path is claimed via `n_in_flight`.
    fn pick_node_to_extend(&mut self) -> Pick {
        self.history.trim(self.ctx.played_history().len());
        let mut arena = read_arena(self.ctx.arena());
        let mut node_id = self.ctx.root();
        let mut depth: u16 = 0;

        loop {
            let (terminal, terminal_value, extended, n, was_in_flight) = {
                let node = arena.get(node_id);
                let was_in_flight = node.increment_n_in_flight();
                (
                    node.is_terminal(),
                    node.terminal_value(),
                    node.is_extended(),
                    node.n(),
                    was_in_flight,
                )
            };

            // A node that was claimed but never completed a visit is still
            // in another descent's pipeline: colliding instead of entering
            // keeps us off its half-installed edges.
            if n == 0 && was_in_flight > 0 {
                return Pick::Collision {
                    node: node_id,
                    depth,
                };
            }
            if terminal {
                return Pick::Terminal {
                    node: node_id,
                    depth,
                    v: terminal_value,
                };
            }
            if !extended {
                return Pick::Fresh {
                    node: node_id,
                    depth,
                };
            }

            let best_idx = self.select_child(&arena, node_id);
            let (mv, existing_child) = {
                let node = arena.get(node_id);
                (node.edges()[best_idx].mv(), node.child(best_idx))
            };
            let child_id = if existing_child.is_some() {
                existing_child
            } else {
                drop(arena);
                let id = write_arena(self.ctx.arena()).get_or_spawn_child(node_id, best_idx);
                arena = read_arena(self.ctx.arena());
                id
            };

            self.history.append(mv);
            depth += 1;
            node_id = child_id;
        }
    }

    /// PUCT scores for every edge of `node_id`, in edge order.
    fn score_edges(&self, arena: &Arena, node_id: NodeId) -> Vec<f32> {
        let options = self.ctx.options();
        let node = arena.get(node_id);
        let is_root = node_id == self.ctx.root();

        let mut visited_policy = 0.0f32;
        for (i, edge) in node.edges().iter().enumerate() {
            let child = node.child(i);
            if child.is_some() && arena.get(child).n() > 0 {
                visited_policy += edge.prior();
            }
        }
        // First-play urgency: an unvisited child starts slightly below the
        // parent's own value, sinking further as more policy mass gets
        // explored. The root anchors at zero.
        let parent_q = if is_root { 0.0 } else { node.q() };
        let fpu = -parent_q - options.fpu_reduction * visited_policy.sqrt();

        let sqrt_n = (node.n_with_in_flight() as f32).sqrt();
        node.edges()
            .iter()
            .enumerate()
            .map(|(i, edge)| {
                if is_root && !self.ctx.root_move_allowed(edge.mv()) {
                    return f32::NEG_INFINITY;
                }
                let child = node.child(i);
                let (q, n_eff) = if child.is_some() {
                    let child = arena.get(child);
                    let n_eff = child.n_with_in_flight();
                    if n_eff > 0 {
                        (child.q_in_flight(), n_eff)
                    } else {
                        (fpu, 0)
                    }
                } else {
                    (fpu, 0)
                };
                q + options.cpuct * edge.prior() * sqrt_n / (1.0 + n_eff as f32)
            })
            .collect()
    }

    /// Index of the PUCT-best edge. Ties break by edge order.
    fn select_child(&self, arena: &Arena, node_id: NodeId) -> usize {
        let scores = self.score_edges(arena, node_id);
        let mut best = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (i, score) in scores.into_iter().enumerate() {
            if score > best_score {
                best_score = score;
                best = i;
            }
        }
        best
    }

    /// Extend a fresh leaf: adjudicate terminal rules, otherwise create
    /// its edge array (policy arrives in stage 5). `self.history` must
    /// end in this node's position.
    fn extend_node(&mut self, node_id: NodeId) -> Extended {
        let result = self.history.compute_game_result();
        if result != GameResult::Undecided {
            let value = result.value_for(self.history.last().side_to_move());
            write_arena(self.ctx.arena())
                .get_mut(node_id)
                .make_terminal(value);
            return Extended::Terminal(value);
        }

        let mut moves = self.history.last().legal_moves();
        if moves.is_empty() {
            // The position contract says a move-less position must
            // adjudicate itself; recover by scoring it a draw.
            warn!("position reported no legal moves but no result; treating as draw");
            write_arena(self.ctx.arena())
                .get_mut(node_id)
                .make_terminal(0.0);
            return Extended::Terminal(0.0);
        }
        if node_id == self.ctx.root() {
            let searchmoves = &self.ctx.limits().searchmoves;
            if !searchmoves.is_empty() {
                moves.retain(|mv| searchmoves.contains(mv));
            }
        }
        write_arena(self.ctx.arena())
            .get_mut(node_id)
            .create_edges(moves.iter().copied());
        Extended::NeedsEval(moves)
    }

    // Stage 3: while the backend is about to run anyway, walk the most
    // promising subtrees and queue evaluations for positions the cache
    // does not know yet. No tree nodes are created and nothing prefetched
    // takes part in backup.
    fn maybe_prefetch_into_cache(&mut self) {
        let budget = self.ctx.options().max_prefetch_batch;
        if budget == 0 {
            return;
        }
        self.history.trim(self.ctx.played_history().len());
        let lock = self.ctx.arena_arc();
        let arena = read_arena(&lock);
        self.prefetch_into_cache(&arena, self.ctx.root(), budget);
    }

    fn prefetch_into_cache(&mut self, arena: &Arena, node_id: NodeId, budget: usize) -> usize {
        if budget == 0 {
            return 0;
        }
        let node = arena.get(node_id);
        if node.is_terminal() || !node.is_extended() {
            return 0;
        }

        let scores = self.score_edges(arena, node_id);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut used = 0;
        for i in order {
            if used >= budget {
                break;
            }
            let (mv, child) = {
                let node = arena.get(node_id);
                (node.edges()[i].mv(), node.child(i))
            };
            self.history.append(mv);
            if child.is_some() && arena.get(child).is_extended() {
                used += self.prefetch_into_cache(arena, child, budget - used);
            } else if self.history.compute_game_result() == GameResult::Undecided {
                let key = self.ctx.cache_key(&self.history);
                let moves = self.history.last().legal_moves();
                let computation = self
                    .computation
                    .as_mut()
                    .expect("computation initialized in stage 1");
                if computation.add_input_if_needed(key, &self.history, moves) {
                    used += 1;
                }
            }
            self.history.pop();
        }
        used
    }

    // Stage 4.
    fn run_nn_computation(&mut self) -> Result<(), NetworkError> {
        match self.computation.as_mut() {
            Some(computation) => computation.compute_blocking(),
            None => Ok(()),
        }
    }

    // Stage 5: install values and policy into the gathered nodes.
    fn fetch_minibatch_results(&mut self) {
        let computation = match self.computation.as_ref() {
            Some(computation) => computation,
            None => return,
        };
        let options = self.ctx.options();
        let mut arena = write_arena(self.ctx.arena());
        for entry in &mut self.minibatch {
            if entry.is_collision {
                continue;
            }
            let is_root = entry.node == self.ctx.root();
            let node = arena.get_mut(entry.node);
            if node.is_terminal() {
                continue;
            }
            entry.v = computation.get_q(entry.slot);
            let raw: Vec<f32> = node
                .edges()
                .iter()
                .map(|edge| computation.get_p(entry.slot, edge.mv()))
                .collect();
            let priors = softmax_with_temperature(&raw, options.policy_softmax_temp);
            for (edge, prior) in node.edges_mut().iter_mut().zip(priors) {
                edge.set_prior(prior);
            }
            if is_root && options.dirichlet_noise {
                apply_dirichlet_noise(
                    node,
                    options.dirichlet_alpha,
                    options.dirichlet_epsilon,
                    &mut rand::thread_rng(),
                );
            }
        }
    }

    // Stage 6: propagate values to the root, negating at every ply.
    // Collision entries only release their in-flight claims.
    fn do_backup_update(&mut self) {
        let arena = read_arena(self.ctx.arena());
        for entry in &self.minibatch {
            if entry.is_collision {
                let mut id = entry.node;
                while id.is_some() {
                    let node = arena.get(id);
                    node.cancel_score_update();
                    id = node.parent();
                }
                continue;
            }
            // The leaf value is from its side to move's perspective;
            // stored statistics are from the mover-in's perspective.
            let mut v = -entry.v;
            let mut id = entry.node;
            while id.is_some() {
                let node = arena.get(id);
                node.finalize_score_update(v);
                v = -v;
                id = node.parent();
            }
        }
    }

    // Stage 7.
    fn update_counters(&mut self) {
        let playouts = self
            .minibatch
            .iter()
            .filter(|entry| !entry.is_collision)
            .count() as u64;
        let sum_depth: u64 = self
            .minibatch
            .iter()
            .filter(|entry| !entry.is_collision)
            .map(|entry| entry.depth as u64)
            .sum();
        let max_depth = self
            .minibatch
            .iter()
            .filter(|entry| !entry.is_collision)
            .map(|entry| entry.depth as u32)
            .max()
            .unwrap_or(0);

        self.ctx.note_iteration(playouts, sum_depth, max_depth);

        trace!(
            playouts,
            collisions = self.minibatch.len() as u64 - playouts,
            nn_queried = self.minibatch.iter().filter(|e| e.nn_queried).count(),
            "iteration complete"
        );
    }
}

/// Softmax with temperature over raw policy scores, max-shifted for
/// numeric stability. Degenerate input collapses to uniform.
pub(crate) fn softmax_with_temperature(raw: &[f32], temperature: f32) -> Vec<f32> {
    if raw.is_empty() {
        return Vec::new();
    }
    let t = if temperature > 0.0 { temperature } else { 1.0 };
    let max = raw.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = raw.iter().map(|&x| ((x - max) / t).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![1.0 / raw.len() as f32; raw.len()]
    }
}

/// Mix Dirichlet(α) noise into a node's priors at weight ε. Gamma
/// variates normalized to a simplex sample. The generator is a
/// parameter so callers (and tests) can seed it.
pub(crate) fn apply_dirichlet_noise<R: Rng>(node: &mut Node, alpha: f32, epsilon: f32, rng: &mut R) {
    use rand_distr::{Distribution, Gamma};

    let count = node.edges().len();
    if count < 2 || epsilon <= 0.0 {
        return;
    }
    let gamma = match Gamma::new(alpha as f64, 1.0) {
        Ok(gamma) => gamma,
        Err(_) => return,
    };
    let mut noise: Vec<f32> = (0..count).map(|_| gamma.sample(rng) as f32).collect();
    let sum: f32 = noise.iter().sum();
    if sum <= 0.0 {
        return;
    }
    for sample in &mut noise {
        *sample /= sum;
    }
    for (edge, sample) in node.edges_mut().iter_mut().zip(noise) {
        edge.set_prior((1.0 - epsilon) * edge.prior() + epsilon * sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_uniform_input() {
        let priors = softmax_with_temperature(&[1.0, 1.0, 1.0, 1.0], 1.0);
        for p in priors {
            assert!((p - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_prefers_higher_scores() {
        let priors = softmax_with_temperature(&[2.0, 0.0], 1.0);
        assert!(priors[0] > priors[1]);
        assert!((priors.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_high_temperature_flattens() {
        let sharp = softmax_with_temperature(&[2.0, 0.0], 1.0);
        let flat = softmax_with_temperature(&[2.0, 0.0], 10.0);
        assert!(flat[0] < sharp[0]);
        assert!(flat[0] > 0.5);
    }

    fn uniform_node(edges: u8) -> Node {
        let mut node = Node::new(NodeId::NONE);
        let moves: Vec<Move> = (0..edges)
            .map(|i| {
                Move::new(
                    xqzero_core::Square::new(i),
                    xqzero_core::Square::new(i + 1),
                )
            })
            .collect();
        node.create_edges(moves);
        let priors = softmax_with_temperature(&vec![0.0; edges as usize], 1.0);
        for (edge, prior) in node.edges_mut().iter_mut().zip(priors) {
            edge.set_prior(prior);
        }
        node
    }

    #[test]
    fn test_dirichlet_noise_keeps_simplex() {
        let mut node = uniform_node(4);
        apply_dirichlet_noise(&mut node, 0.3, 0.25, &mut rand::thread_rng());
        let total: f32 = node.edges().iter().map(|e| e.prior()).sum();
        assert!((total - 1.0).abs() < 1e-4);
        for edge in node.edges() {
            assert!(edge.prior() >= 0.0);
        }
    }

    #[test]
    fn test_dirichlet_noise_is_seed_deterministic() {
        use rand::SeedableRng;
        use rand_chacha::ChaCha20Rng;

        let noised_priors = |seed: u64| {
            let mut node = uniform_node(6);
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            apply_dirichlet_noise(&mut node, 0.3, 0.25, &mut rng);
            node.edges().iter().map(|e| e.prior()).collect::<Vec<f32>>()
        };

        assert_eq!(noised_priors(7), noised_priors(7));
        assert_ne!(noised_priors(7), noised_priors(8));
        // The mix actually moved mass away from uniform.
        assert!(noised_priors(7).iter().any(|p| (p - 1.0 / 6.0).abs() > 1e-4));
    }
}
