use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::{debug, warn};
use parking_lot::RwLock;

use crate::errors::{AnubisError, Result};
use crate::TransactionId;

type Adjacency = HashMap<TransactionId, HashSet<TransactionId>>;

/// Directed "is waiting for" graph between transactions.
///
/// An edge `a -> b` means that transaction `a` is blocked on a lock that `b`
/// currently holds (or is queued for ahead of `a`). Nodes are plain transaction
/// ids, so the graph never keeps lock holders alive and cycles in the graph are
/// just cycles in the adjacency map.
///
/// Each insertion is checked for cycles that run through the inserting
/// transaction. A cycle is a deadlock; the transaction that closed it is the
/// victim and its request fails.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    graph: RwLock<Adjacency>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unions `successors` into the set of transactions `predecessor` waits for.
    pub fn add<I>(&self, predecessor: TransactionId, successors: I)
    where
        I: IntoIterator<Item = TransactionId>,
    {
        let mut graph = self.graph.write();
        Self::insert_edges(&mut graph, predecessor, successors);
    }

    /// Removes `holder` from the graph entirely: its own edges and every edge
    /// pointing at it. A transaction without holds can no longer be waited for.
    pub fn remove(&self, holder: TransactionId) {
        let mut graph = self.graph.write();
        graph.remove(&holder);
        graph.retain(|_, successors| {
            successors.remove(&holder);
            !successors.is_empty()
        });
        debug!("Removed Tx {} from wait-for graph", holder);
    }

    /// Removes the outgoing edges of `holder` only, i.e. it stopped waiting.
    pub fn remove_edges(&self, holder: TransactionId) {
        self.graph.write().remove(&holder);
    }

    /// Removes the single edge `predecessor -> successor`, if present.
    pub fn remove_edge(&self, predecessor: TransactionId, successor: TransactionId) {
        let mut graph = self.graph.write();
        if let Some(successors) = graph.get_mut(&predecessor) {
            successors.remove(&successor);
            if successors.is_empty() {
                graph.remove(&predecessor);
            }
        }
    }

    /// Transactions `holder` is currently waiting for.
    pub fn successors(&self, holder: TransactionId) -> Vec<TransactionId> {
        let graph = self.graph.read();
        let mut successors: Vec<TransactionId> = graph
            .get(&holder)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        successors.sort_unstable();
        successors
    }

    /// Number of transactions that are currently waiting for someone.
    pub fn len(&self) -> usize {
        self.graph.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.read().is_empty()
    }

    /// Runs a depth-first search over the whole graph and returns the cycles it
    /// runs into. Every cycle is listed in wait-for order, starting with the node
    /// the search re-entered.
    pub fn find_cycles(&self) -> Vec<Vec<TransactionId>> {
        let graph = self.graph.read();
        Self::cycles(&graph, None)
    }

    /// Fails with [`AnubisError::Deadlock`] if `holder` is part of a cycle.
    pub fn detect_deadlock(&self, holder: TransactionId) -> Result<()> {
        let graph = self.graph.read();
        Self::check(&graph, holder)
    }

    /// Records that `holder` waits for `successors` and checks for a deadlock in
    /// one step. On deadlock the outgoing edges of `holder` are dropped again, so
    /// a failed wait leaves nothing behind.
    pub fn add_and_detect<I>(&self, holder: TransactionId, successors: I) -> Result<()>
    where
        I: IntoIterator<Item = TransactionId>,
    {
        let mut graph = self.graph.write();
        Self::insert_edges(&mut graph, holder, successors);
        let result = Self::check(&graph, holder);
        if result.is_err() {
            graph.remove(&holder);
        }
        result
    }

    fn insert_edges<I>(graph: &mut Adjacency, predecessor: TransactionId, successors: I)
    where
        I: IntoIterator<Item = TransactionId>,
    {
        let mut successors = successors
            .into_iter()
            .filter(|s| *s != predecessor)
            .peekable();
        if successors.peek().is_none() {
            return;
        }
        graph.entry(predecessor).or_default().extend(successors);
    }

    fn check(graph: &Adjacency, holder: TransactionId) -> Result<()> {
        if !graph.contains_key(&holder) {
            return Ok(());
        }
        match Self::cycles(graph, Some(holder))
            .into_iter()
            .find(|cycle| cycle.contains(&holder))
        {
            Some(cycle) => {
                warn!(
                    "Deadlock detected for Tx {}, involving transactions {:?}",
                    holder, cycle
                );
                Err(AnubisError::Deadlock { holder, cycle })
            }
            None => Ok(()),
        }
    }

    /// DFS over all nodes. If `first` is given the search is rooted there before
    /// any other node, which guarantees that a cycle through it is reported.
    fn cycles(graph: &Adjacency, first: Option<TransactionId>) -> Vec<Vec<TransactionId>> {
        let mut roots: Vec<TransactionId> = graph.keys().copied().collect();
        roots.sort_unstable();
        if let Some(first) = first {
            roots.retain(|r| *r != first);
            roots.insert(0, first);
        }

        let mut visited = HashSet::new();
        let mut path = Vec::new();
        let mut cycles = Vec::new();
        for root in roots {
            if !visited.contains(&root) {
                Self::visit(graph, root, &mut visited, &mut path, &mut cycles);
            }
        }
        cycles
    }

    fn visit(
        graph: &Adjacency,
        node: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut Vec<TransactionId>,
        cycles: &mut Vec<Vec<TransactionId>>,
    ) {
        if let Some(start) = path.iter().position(|n| *n == node) {
            cycles.push(path[start..].to_vec());
            return;
        }
        if !visited.insert(node) {
            return;
        }

        path.push(node);
        if let Some(successors) = graph.get(&node) {
            let mut successors: Vec<TransactionId> = successors.iter().copied().collect();
            successors.sort_unstable();
            for successor in successors {
                Self::visit(graph, successor, visited, path, cycles);
            }
        }
        path.pop();
    }
}
