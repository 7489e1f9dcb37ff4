//! Background deadlock detector.
//!
//! DFS cycle detection over the lock manager's wait-for edges, run as its
//! own periodic background thread rather than inline in the lock-request
//! path: a dedicated `std::thread::spawn` worker with a
//! `crossbeam_channel` shutdown signal, the same shape as the log flusher
//! in `wal::log_manager`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{info, warn};

use crate::txn::lock_manager::LockManager;
use crate::txn::transaction_manager::TransactionManager;

const SCAN_INTERVAL: Duration = Duration::from_millis(50);

pub struct DeadlockDetector {
    shutdown_tx: Sender<()>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DeadlockDetector {
    pub fn spawn(lock_manager: Arc<LockManager>, transaction_manager: Arc<TransactionManager>) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let detector = Arc::new(Self {
            shutdown_tx,
            worker: std::sync::Mutex::new(None),
        });

        let worker = std::thread::spawn(move || run(lock_manager, transaction_manager, shutdown_rx));
        *detector.worker.lock().unwrap() = Some(worker);
        detector
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeadlockDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(lock_manager: Arc<LockManager>, transaction_manager: Arc<TransactionManager>, shutdown_rx: Receiver<()>) {
    loop {
        match shutdown_rx.recv_timeout(SCAN_INTERVAL) {
            Ok(()) => return,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                scan_once(&lock_manager, &transaction_manager);
            }
        }
    }
}

fn scan_once(lock_manager: &LockManager, transaction_manager: &TransactionManager) {
    let edges = lock_manager.waits_for_edges();
    if edges.is_empty() {
        return;
    }

    let mut graph: HashMap<u64, Vec<u64>> = HashMap::new();
    for (waiter, holder) in edges {
        graph.entry(waiter).or_default().push(holder);
    }

    if let Some(victim) = find_cycle_victim(&graph) {
        warn!("deadlock detected, aborting youngest transaction {} in the cycle", victim);
        transaction_manager.mark_victim(victim);
        lock_manager.notify_all();
    }
}

/// DFS cycle search over the waits-for graph. Returns the highest
/// (youngest) transaction id among the nodes in the first cycle found.
fn find_cycle_victim(graph: &HashMap<u64, Vec<u64>>) -> Option<u64> {
    let mut visited: HashSet<u64> = HashSet::new();

    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut stack = Vec::new();
        let mut on_stack: HashSet<u64> = HashSet::new();
        if let Some(cycle) = dfs(start, graph, &mut visited, &mut stack, &mut on_stack) {
            return cycle.into_iter().max();
        }
    }
    None
}

fn dfs(
    node: u64,
    graph: &HashMap<u64, Vec<u64>>,
    visited: &mut HashSet<u64>,
    stack: &mut Vec<u64>,
    on_stack: &mut HashSet<u64>,
) -> Option<Vec<u64>> {
    visited.insert(node);
    stack.push(node);
    on_stack.insert(node);

    if let Some(neighbors) = graph.get(&node) {
        for &next in neighbors {
            if on_stack.contains(&next) {
                let start_idx = stack.iter().position(|&n| n == next).unwrap();
                return Some(stack[start_idx..].to_vec());
            }
            if !visited.contains(&next) {
                if let Some(cycle) = dfs(next, graph, visited, stack, on_stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    on_stack.remove(&node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_cycle_victim_is_the_younger_transaction() {
        let mut graph = HashMap::new();
        graph.insert(5u64, vec![9u64]);
        graph.insert(9u64, vec![5u64]);
        let victim = find_cycle_victim(&graph);
        assert_eq!(victim, Some(9));
    }

    #[test]
    fn acyclic_graph_has_no_victim() {
        let mut graph = HashMap::new();
        graph.insert(1u64, vec![2u64]);
        graph.insert(2u64, vec![3u64]);
        assert_eq!(find_cycle_victim(&graph), None);
    }
}
