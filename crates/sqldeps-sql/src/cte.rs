//! CTE recursion analysis
//!
//! Collects every CTE of a batch, links CTEs that read each other and
//! marks every CTE that lies on a reference cycle as recursive.

use sqlparser::ast::{visit_relations, Query, Statement, Visit, Visitor};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::ControlFlow;

use crate::resolver::entity_name;

/// A CTE as seen by the analyzer
#[derive(Debug, Clone)]
pub struct CteDefinition {
    pub name: String,
    pub body: Query,
    pub is_recursive: bool,
}

/// Collects `WITH` clauses anywhere in a statement tree
#[derive(Default)]
struct WithCollector {
    definitions: BTreeMap<String, Query>,
    declared_recursive: BTreeSet<String>,
}

impl Visitor for WithCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let name = cte.alias.name.value.clone();
                if with.recursive {
                    self.declared_recursive.insert(name.clone());
                }
                // Last definition of a name wins
                self.definitions.insert(name, cte.query.as_ref().clone());
            }
        }
        ControlFlow::Continue(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Gray,
    Black,
}

/// CTE registry with recursion state for one batch of statements
#[derive(Debug, Clone, Default)]
pub struct CteRegistry {
    definitions: BTreeMap<String, Query>,

    /// Referenced CTE -> CTEs whose bodies reference it
    readers: BTreeMap<String, BTreeSet<String>>,

    recursive: BTreeSet<String>,

    names: BTreeSet<String>,
}

impl CteRegistry {
    /// Analyze every `WITH` clause reachable from the statements
    pub fn analyze(statements: &[Statement]) -> Self {
        let mut collector = WithCollector::default();
        for statement in statements {
            let _ = statement.visit(&mut collector);
        }

        let names: BTreeSet<String> = collector.definitions.keys().cloned().collect();
        let mut registry = Self {
            readers: names.iter().map(|n| (n.clone(), BTreeSet::new())).collect(),
            recursive: collector.declared_recursive,
            definitions: collector.definitions,
            names,
        };

        registry.link_references();
        registry.mark_cycles();

        if !registry.recursive.is_empty() {
            tracing::debug!(recursive = ?registry.recursive, "recursive CTEs detected");
        }

        registry
    }

    fn link_references(&mut self) {
        for (name, body) in &self.definitions {
            let _ = visit_relations(body, |relation| {
                let referenced = entity_name(relation);
                if let Some(readers) = self.readers.get_mut(&referenced) {
                    readers.insert(name.clone());
                    if &referenced == name {
                        self.recursive.insert(name.clone());
                    }
                }
                ControlFlow::<()>::Continue(())
            });
        }
    }

    /// Iterative three-colour DFS; reaching a gray node closes a cycle
    fn mark_cycles(&mut self) {
        let order: Vec<&String> = self.names.iter().collect();
        let index: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let adjacency: Vec<Vec<usize>> = order
            .iter()
            .map(|name| {
                self.readers
                    .get(name.as_str())
                    .map(|readers| readers.iter().filter_map(|r| index.get(r.as_str()).copied()).collect())
                    .unwrap_or_default()
            })
            .collect();

        let mut colour = vec![Colour::White; order.len()];
        let mut on_cycle = BTreeSet::new();

        for root in 0..order.len() {
            if colour[root] != Colour::White {
                continue;
            }

            // (node, next neighbour to try)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            colour[root] = Colour::Gray;

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                if let Some(&neighbour) = adjacency[node].get(next) {
                    top.1 += 1;
                    match colour[neighbour] {
                        Colour::White => {
                            colour[neighbour] = Colour::Gray;
                            stack.push((neighbour, 0));
                        }
                        Colour::Gray => {
                            if let Some(start) = stack.iter().position(|&(n, _)| n == neighbour) {
                                on_cycle.extend(stack[start..].iter().map(|&(n, _)| n));
                            }
                        }
                        Colour::Black => {}
                    }
                } else {
                    colour[node] = Colour::Black;
                    stack.pop();
                }
            }
        }

        let cyclic: Vec<String> = on_cycle.into_iter().map(|i| order[i].clone()).collect();
        self.recursive.extend(cyclic);
    }

    pub fn is_cte(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_recursive(&self, name: &str) -> bool {
        self.recursive.contains(name)
    }

    /// Names of every CTE in the batch
    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    pub fn definitions(&self) -> impl Iterator<Item = CteDefinition> + '_ {
        self.definitions.iter().map(|(name, body)| CteDefinition {
            name: name.clone(),
            body: body.clone(),
            is_recursive: self.is_recursive(name),
        })
    }

    /// True when `source` feeding `target` closes a cycle between two CTEs
    ///
    /// That is: `target` already reaches `source` through CTE references.
    pub fn forms_cycle(&self, source: &str, target: &str) -> bool {
        if !self.is_cte(source) || !self.is_cte(target) {
            return false;
        }
        if source == target {
            return self.is_recursive(source);
        }

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([target]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(readers) = self.readers.get(current) {
                for reader in readers {
                    if reader == source {
                        return true;
                    }
                    queue.push_back(reader.as_str());
                }
            }
        }
        false
    }
}
