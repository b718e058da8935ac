//! Dependency analysis over extracted subtask prompts: build edges from
//! ordering cues, detect cycles by DFS, and topologically sort. Grounded on
//! `loop::manager::validate_dependency_graph`/`topological_sort`'s DFS shape
//! and `planning::decomposer::build_specs`'s two-pass title resolution.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

const ORDERING_KEYWORDS: &[&str] = &["after", "then", "once", "following", "based on", "using"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    pub edges: Vec<DependencyEdge>,
    pub has_cycles: bool,
    pub topological_order: Vec<usize>,
    pub parallelizable_groups: Vec<Vec<usize>>,
}

/// Build a dependency edge `subtask[i] -> subtask[j]` whenever `subtask[i]`
/// contains an ordering keyword and mentions a noun phrase drawn from an
/// earlier subtask. A subtask that contains an ordering keyword but cannot
/// be matched to a specific earlier subtask falls back to depending on its
/// immediate predecessor.
pub fn analyze(subtasks: &[String]) -> DependencyAnalysis {
    let mut edges = Vec::new();

    for (idx, subtask) in subtasks.iter().enumerate() {
        if idx == 0 {
            continue;
        }
        let lowered = subtask.to_lowercase();
        if !ORDERING_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            continue;
        }

        let matched = subtasks[..idx].iter().enumerate().find(|(_, earlier)| {
            shares_keyword(&lowered, &earlier.to_lowercase())
        });

        match matched {
            Some((dep_idx, _)) => edges.push(DependencyEdge { from: dep_idx, to: idx }),
            None => edges.push(DependencyEdge { from: idx - 1, to: idx }),
        }
    }

    let has_cycles = detect_cycle(subtasks.len(), &edges);
    let topological_order = if has_cycles {
        (0..subtasks.len()).collect()
    } else {
        topo_sort(subtasks.len(), &edges)
    };
    let parallelizable_groups = if has_cycles { Vec::new() } else { group_by_depth(subtasks.len(), &edges) };

    DependencyAnalysis {
        edges,
        has_cycles,
        topological_order,
        parallelizable_groups,
    }
}

/// Whether two subtask descriptions share a content word longer than 3
/// characters, used as a cheap proxy for "this subtask refers to that one".
fn shares_keyword(a: &str, b: &str) -> bool {
    let words_b: HashSet<&str> = b.split_whitespace().filter(|w| w.len() > 3).collect();
    a.split_whitespace().filter(|w| w.len() > 3).any(|w| words_b.contains(w))
}

fn adjacency(n: usize, edges: &[DependencyEdge]) -> HashMap<usize, Vec<usize>> {
    let mut graph: HashMap<usize, Vec<usize>> = (0..n).map(|i| (i, Vec::new())).collect();
    for edge in edges {
        graph.entry(edge.from).or_default().push(edge.to);
    }
    graph
}

fn detect_cycle(n: usize, edges: &[DependencyEdge]) -> bool {
    let graph = adjacency(n, edges);
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    for node in 0..n {
        if !visited.contains(&node) && has_cycle_dfs(node, &graph, &mut visited, &mut rec_stack) {
            return true;
        }
    }
    false
}

fn has_cycle_dfs(
    node: usize,
    graph: &HashMap<usize, Vec<usize>>,
    visited: &mut HashSet<usize>,
    rec_stack: &mut HashSet<usize>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);

    if let Some(neighbors) = graph.get(&node) {
        for &next in neighbors {
            if !visited.contains(&next) {
                if has_cycle_dfs(next, graph, visited, rec_stack) {
                    return true;
                }
            } else if rec_stack.contains(&next) {
                return true;
            }
        }
    }

    rec_stack.remove(&node);
    false
}

fn topo_sort(n: usize, edges: &[DependencyEdge]) -> Vec<usize> {
    let graph = adjacency(n, edges);
    let mut visited = HashSet::new();
    let mut result = Vec::new();
    for node in 0..n {
        topo_dfs(node, &graph, &mut visited, &mut result);
    }
    result
}

fn topo_dfs(node: usize, graph: &HashMap<usize, Vec<usize>>, visited: &mut HashSet<usize>, result: &mut Vec<usize>) {
    if visited.contains(&node) {
        return;
    }
    visited.insert(node);
    if let Some(neighbors) = graph.get(&node) {
        for &next in neighbors {
            topo_dfs(next, graph, visited, result);
        }
    }
    result.push(node);
}

/// Group nodes into depth layers by longest path from any root, so nodes
/// in the same layer can run in parallel.
fn group_by_depth(n: usize, edges: &[DependencyEdge]) -> Vec<Vec<usize>> {
    let mut incoming: HashMap<usize, Vec<usize>> = (0..n).map(|i| (i, Vec::new())).collect();
    for edge in edges {
        incoming.entry(edge.to).or_default().push(edge.from);
    }

    let mut depth = vec![0usize; n];
    let order = topo_sort(n, edges);
    for node in order {
        if let Some(deps) = incoming.get(&node) {
            if let Some(max_dep_depth) = deps.iter().map(|&d| depth[d]).max() {
                depth[node] = max_dep_depth + 1;
            }
        }
    }

    let max_depth = depth.iter().copied().max().unwrap_or(0);
    let mut groups = vec![Vec::new(); max_depth + 1];
    for (node, d) in depth.iter().enumerate() {
        groups[*d].push(node);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_dependency_keywords_means_no_edges() {
        let subtasks = vec!["add logging".to_string(), "update the readme".to_string()];
        let analysis = analyze(&subtasks);
        assert!(analysis.edges.is_empty());
        assert!(!analysis.has_cycles);
    }

    #[test]
    fn test_ordering_keyword_creates_edge_to_predecessor() {
        let subtasks = vec![
            "create the users table".to_string(),
            "add the migration, based on the users table".to_string(),
        ];
        let analysis = analyze(&subtasks);
        assert_eq!(analysis.edges.len(), 1);
        assert_eq!(analysis.edges[0], DependencyEdge { from: 0, to: 1 });
        assert!(!analysis.has_cycles);
    }

    #[test]
    fn test_topo_order_respects_edges() {
        let subtasks = vec![
            "create the users table".to_string(),
            "add the migration, based on the users table".to_string(),
            "wire up the api endpoint, using the migration".to_string(),
        ];
        let analysis = analyze(&subtasks);
        let pos = |i: usize| analysis.topological_order.iter().position(|&x| x == i).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(1) < pos(2));
    }
}
