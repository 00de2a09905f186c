//! Multi-worker searches: visit accounting, virtual-loss cleanup and
//! single-publisher completion under contention.

mod common;

use std::sync::Arc;

use common::{assert_tree_invariants, recording_best_move_callback, seen_count};
use games_tictactoe::TicTacToe;
use mcts::{NNCache, NodeTree, Search, SearchLimits, SearchOptions};
use xqzero_core::UniformNetwork;

#[test]
fn four_workers_account_for_every_playout() {
    let tree = NodeTree::new(TicTacToe::new());
    let (callback, seen) = recording_best_move_callback();
    let cache = Arc::new(NNCache::new(200_000));
    let options = SearchOptions::default()
        .with_minibatch_size(32)
        .with_smart_pruning(false);
    let search = Search::new(
        &tree,
        Arc::new(UniformNetwork::new()),
        Some(callback),
        None,
        SearchLimits::visits(10_000),
        options,
        cache,
    );
    search.run_blocking(4).unwrap();

    let playouts = search.total_playouts();
    assert!(playouts >= 10_000, "stopped short: {playouts}");
    // Each worker may overshoot by at most one capped minibatch.
    assert!(playouts <= 10_000 + 4 * 32, "overshot: {playouts}");
    assert_eq!(tree.root_visits() as u64, playouts);
    assert_eq!(seen_count(&seen), 1);
    assert_tree_invariants(&tree);
}

#[test]
fn two_workers_with_tiny_batches_stay_consistent() {
    let tree = NodeTree::new(TicTacToe::new());
    let cache = Arc::new(NNCache::new(50_000));
    let options = SearchOptions::default()
        .with_minibatch_size(4)
        .with_allowed_node_collisions(2)
        .with_smart_pruning(false);
    let search = Search::new(
        &tree,
        Arc::new(UniformNetwork::new()),
        None,
        None,
        SearchLimits::visits(2_000),
        options,
        cache,
    );
    search.run_blocking(2).unwrap();

    assert!(search.total_playouts() >= 2_000);
    assert_eq!(tree.root_visits() as u64, search.total_playouts());
    assert_tree_invariants(&tree);
}

#[test]
fn parallel_abort_returns_promptly_without_callback() {
    let tree = NodeTree::new(TicTacToe::new());
    let (callback, seen) = recording_best_move_callback();
    let cache = Arc::new(NNCache::new(50_000));
    let search = Search::new(
        &tree,
        Arc::new(UniformNetwork::new()),
        Some(callback),
        None,
        SearchLimits::infinite(),
        SearchOptions::default().with_minibatch_size(8),
        cache,
    );

    search.start_threads(4).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(30));
    search.abort();
    search.wait().unwrap();

    assert_eq!(seen_count(&seen), 0);
    assert_tree_invariants(&tree);
}

#[test]
fn stop_from_another_thread_publishes_exactly_once() {
    let tree = NodeTree::new(TicTacToe::new());
    let (callback, seen) = recording_best_move_callback();
    let cache = Arc::new(NNCache::new(50_000));
    let search = Search::new(
        &tree,
        Arc::new(UniformNetwork::new()),
        Some(callback),
        None,
        SearchLimits::infinite(),
        SearchOptions::default().with_minibatch_size(8),
        cache,
    );

    search.start_threads(3).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(30));
    search.stop();
    search.wait().unwrap();

    assert_eq!(seen_count(&seen), 1);
    assert!(search.get_best_move().best.is_some());
    assert_tree_invariants(&tree);
}

#[test]
fn parallel_search_still_finds_the_forced_win() {
    // Red mates on cell 2; four workers must agree.
    let tree = NodeTree::new(TicTacToe::from_placements(&[0, 3, 1, 4]));
    let cache = Arc::new(NNCache::new(50_000));
    let search = Search::new(
        &tree,
        Arc::new(UniformNetwork::new()),
        None,
        None,
        SearchLimits::visits(4_000),
        SearchOptions::default().with_minibatch_size(16).with_smart_pruning(false),
        cache,
    );
    search.run_blocking(4).unwrap();

    assert_eq!(search.get_best_move().best, Some(TicTacToe::placement(2)));
    assert!(search.get_best_eval() > 0.8);
    assert_tree_invariants(&tree);
}
