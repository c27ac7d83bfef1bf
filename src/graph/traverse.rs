use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use super::RowGraph;
use crate::row::{Row, RowId};

/// Breadth-first cursor over parent to child edges. It holds no borrow of the
/// graph, so the caller may remove rows between steps.
#[derive(Clone, Debug)]
pub struct GraphWalk {
    roots: VecDeque<RowId>,
    queue: VecDeque<RowId>,
    visited: AHashSet<RowId>,
    current: Option<RowId>,
}

impl GraphWalk {
    pub fn new<I: IntoIterator<Item = RowId>>(seeds: I) -> Self {
        Self {
            roots: seeds.into_iter().collect(),
            queue: VecDeque::new(),
            visited: AHashSet::new(),
            current: None,
        }
    }

    /// Next unvisited id, or `None` when the walk is exhausted.
    pub fn next_id(&mut self, graph: &RowGraph) -> Option<RowId> {
        loop {
            let id = match self.queue.pop_front() {
                Some(id) => id,
                None => {
                    let root = self.roots.pop_front()?;
                    if !self.visited.insert(root) {
                        continue;
                    }
                    root
                }
            };
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            for child in vertex.children() {
                if self.visited.insert(*child) {
                    self.queue.push_back(*child);
                }
            }
            self.current = Some(id);
            return Some(id);
        }
    }

    /// Removes the row most recently returned by [`GraphWalk::next_id`].
    pub fn remove_current(&mut self, graph: &mut RowGraph) -> Option<Row> {
        self.current.take().and_then(|id| graph.remove(id))
    }
}

pub struct Iter<'a> {
    graph: &'a RowGraph,
    walk: GraphWalk,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Row;

    fn next(&mut self) -> Option<&'a Row> {
        let id = self.walk.next_id(self.graph)?;
        self.graph.row(id)
    }
}

impl RowGraph {
    /// Walk rooted at every vertex, in table order.
    pub fn walk(&self) -> GraphWalk {
        GraphWalk::new(self.ids())
    }

    pub fn walk_from<I: IntoIterator<Item = RowId>>(&self, seeds: I) -> GraphWalk {
        GraphWalk::new(seeds)
    }

    /// Visits every row once, breadth-first along child edges.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            graph: self,
            walk: self.walk(),
        }
    }

    pub fn iter_from<I: IntoIterator<Item = RowId>>(&self, seeds: I) -> Iter<'_> {
        Iter {
            graph: self,
            walk: GraphWalk::new(seeds),
        }
    }

    /// Removes the largest part of the sub graph below `roots` that no vertex
    /// outside it still points into. The roots are always removed.
    ///
    /// A vertex is removable once every parent is a removable member; a parent
    /// outside the sub graph, or one already judged to stay, keeps it. When a
    /// pass decides nothing new, the vertices still open only have open or
    /// removable parents inside the sub graph, so they go too.
    pub fn remove_sub_graph(&mut self, roots: &[RowId]) -> Vec<Row> {
        let mut members = Vec::new();
        let mut in_sub = AHashSet::new();
        let mut walk = GraphWalk::new(roots.iter().copied().filter(|id| self.contains(*id)));
        while let Some(id) = walk.next_id(self) {
            in_sub.insert(id);
            members.push(id);
        }

        let mut decided: AHashMap<RowId, bool> = AHashMap::new();
        for root in roots {
            if in_sub.contains(root) {
                decided.insert(*root, true);
            }
        }

        for _ in 0..=members.len() {
            let mut progress = false;
            for id in &members {
                if decided.contains_key(id) {
                    continue;
                }
                let Some(vertex) = self.vertex(*id) else {
                    continue;
                };
                let mut verdict = Some(true);
                for parent in vertex.parents() {
                    if !in_sub.contains(parent) {
                        verdict = Some(false);
                        break;
                    }
                    match decided.get(parent) {
                        Some(false) => {
                            verdict = Some(false);
                            break;
                        }
                        Some(true) => {}
                        None => verdict = None,
                    }
                }
                if let Some(removable) = verdict {
                    decided.insert(*id, removable);
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }

        let mut removed = Vec::new();
        for id in members {
            if decided.get(&id).copied().unwrap_or(true) {
                if let Some(row) = self.remove_vertex(id) {
                    removed.push(row);
                }
            }
        }
        debug!(removed = removed.len(), "sub graph removed");
        removed
    }
}
