//! Dependency graph construction
//!
//! Validates `dependsOn` references, detects cycles with a full diagnostic
//! path, and produces the parallel execution layers used by the
//! orchestrator. Within a layer, services are ordered lexicographically so
//! start order, logs, and tests are reproducible.

use crate::{Error, Result};
use lo1_config::WorkspaceConfig;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// The validated dependency graph, flattened into execution layers
#[derive(Debug, Clone)]
pub struct Dag {
    /// Execution layers; members of a layer depend only on strictly earlier
    /// layers
    pub layers: Vec<Vec<String>>,
    /// Total number of services in the graph
    pub service_count: usize,
}

/// Build the execution layers for a workspace
pub fn build(config: &WorkspaceConfig) -> Result<Dag> {
    validate_references(config)?;
    detect_cycles(config)?;
    let layers = layer(config)?;

    debug!(layers = layers.len(), "dependency graph built");
    Ok(Dag {
        service_count: config.services.len(),
        layers,
    })
}

fn validate_references(config: &WorkspaceConfig) -> Result<()> {
    for (name, service) in &config.services {
        for dep in &service.depends_on {
            if !config.services.contains_key(dep) {
                return Err(Error::UnknownDependency {
                    service: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// DFS with three-color marking. Runs before the topological sort purely for
/// diagnostic quality: on a back edge the full cycle path is reconstructed
/// via parent pointers.
fn detect_cycles(config: &WorkspaceConfig) -> Result<()> {
    let mut colors: HashMap<&str, Color> = config
        .services
        .keys()
        .map(|name| (name.as_str(), Color::White))
        .collect();
    let mut parents: HashMap<&str, &str> = HashMap::new();

    for start in config.services.keys() {
        if colors[start.as_str()] != Color::White {
            continue;
        }

        // Iterative DFS; each frame tracks how far through the node's
        // dependency list we are.
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        colors.insert(start.as_str(), Color::Gray);

        while let Some((node, next_dep)) = stack.pop() {
            let deps = &config.services[node].depends_on;
            if next_dep < deps.len() {
                stack.push((node, next_dep + 1));
                let dep = deps[next_dep].as_str();
                match colors[dep] {
                    Color::White => {
                        parents.insert(dep, node);
                        colors.insert(dep, Color::Gray);
                        stack.push((dep, 0));
                    }
                    Color::Gray => {
                        return Err(Error::CycleDetected {
                            path: render_cycle(&parents, node, dep),
                        });
                    }
                    Color::Black => {}
                }
            } else {
                colors.insert(node, Color::Black);
            }
        }
    }

    Ok(())
}

/// Walk parent pointers from `from` back to `target` and render the cycle as
/// `target -> ... -> from -> target`.
fn render_cycle(parents: &HashMap<&str, &str>, from: &str, target: &str) -> String {
    let mut nodes = vec![from];
    let mut cursor = from;
    while cursor != target {
        cursor = parents[cursor];
        nodes.push(cursor);
    }
    nodes.reverse();
    nodes.push(target);
    nodes.join(" -> ")
}

/// Kahn's algorithm, peeled layer by layer
fn layer(config: &WorkspaceConfig) -> Result<Vec<Vec<String>>> {
    let mut in_degree: BTreeMap<&str, usize> = config
        .services
        .iter()
        .map(|(name, svc)| (name.as_str(), svc.depends_on.len()))
        .collect();

    // Reverse edges: dependency -> dependents.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, service) in &config.services {
        for dep in &service.depends_on {
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut peeled = 0usize;

    while !current.is_empty() {
        // BTreeMap iteration already yields names sorted, but later layers
        // are assembled from dependents in discovery order.
        current.sort_unstable();
        peeled += current.len();

        let mut next: Vec<&str> = Vec::new();
        for &name in &current {
            if let Some(deps) = dependents.get(name) {
                for &dependent in deps {
                    let degree = in_degree.get_mut(dependent).expect("known service");
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent);
                    }
                }
            }
        }

        layers.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    // Cycles were caught by the DFS above; anything unpeeled here means the
    // graph mutated under us.
    if peeled != config.services.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree > 0)
            .map(|(&name, _)| name)
            .collect();
        return Err(Error::CycleDetected {
            path: stuck.join(" -> "),
        });
    }

    Ok(layers)
}
