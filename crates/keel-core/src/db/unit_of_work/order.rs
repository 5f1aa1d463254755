use std::collections::BTreeSet;

///
/// EdgeKind
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum EdgeKind {
    /// The dependent's identifier embeds the prerequisite's identifier.
    Hard,
    /// The dependent holds a nullable foreign key to the prerequisite.
    Soft,
}

///
/// InsertPlan
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InsertPlan {
    /// Node indexes, prerequisites first.
    pub order: Vec<usize>,
    /// Soft edges `(dependent, prerequisite)` broken to resolve a cycle; the
    /// dependent's foreign key must be written by a follow-up update.
    pub deferred: Vec<(usize, usize)>,
}

///
/// DependencyGraph
///
/// Nodes are scheduling indexes; ties are always broken by the lowest index,
/// so the plan is deterministic for a given scheduling order.
///

#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    prerequisites: Vec<BTreeSet<(usize, EdgeKind)>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new(nodes: usize) -> Self {
        Self {
            prerequisites: vec![BTreeSet::new(); nodes],
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.prerequisites.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.prerequisites.is_empty()
    }

    /// Record that `dependent` must be written after `prerequisite`.
    pub fn add_edge(&mut self, dependent: usize, prerequisite: usize, kind: EdgeKind) {
        self.prerequisites[dependent].insert((prerequisite, kind));
    }

    /// Order all nodes, or return the first hard cycle found (as node indexes,
    /// closed: the first node repeats at the end).
    pub fn plan(&self) -> Result<InsertPlan, Vec<usize>> {
        if let Some(cycle) = self.hard_cycle() {
            return Err(cycle);
        }

        let nodes = self.len();
        let mut emitted = vec![false; nodes];
        let mut plan = InsertPlan::default();

        while plan.order.len() < nodes {
            let satisfied = |node: usize, allow_soft: bool| {
                !emitted[node]
                    && self.prerequisites[node].iter().all(|(prerequisite, kind)| {
                        emitted[*prerequisite] || (allow_soft && *kind == EdgeKind::Soft)
                    })
            };

            let next = if let Some(node) = (0..nodes).find(|node| satisfied(*node, false)) {
                node
            } else {
                // Only soft edges can block here: the hard subgraph is acyclic.
                let node = (0..nodes)
                    .find(|node| satisfied(*node, true))
                    .ok_or_else(|| (0..nodes).filter(|node| !emitted[*node]).collect::<Vec<_>>())?;

                plan.deferred.extend(
                    self.prerequisites[node]
                        .iter()
                        .filter(|(prerequisite, _)| !emitted[*prerequisite])
                        .map(|(prerequisite, _)| (node, *prerequisite)),
                );
                node
            };

            emitted[next] = true;
            plan.order.push(next);
        }

        Ok(plan)
    }

    // Depth-first search over hard edges only.
    fn hard_cycle(&self) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            node: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            marks[node] = Mark::OnStack;
            stack.push(node);

            for (next, kind) in &graph.prerequisites[node] {
                if *kind != EdgeKind::Hard {
                    continue;
                }
                match marks[*next] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|n| n == next).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(*next);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, *next, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }

            stack.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut stack = Vec::new();
        (0..self.len()).find_map(|node| {
            if marks[node] == Mark::Unvisited {
                visit(self, node, &mut marks, &mut stack)
            } else {
                None
            }
        })
    }
}
