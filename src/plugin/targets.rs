//! Target graph construction (§4.E step 5): merges each plugin's declared
//! `targets` with the two synthesized defaults, builds a `before`/`after`
//! DAG rooted at `satop.startup`/`satop.shutdown`, validates it, and
//! precomputes a topological run sequence per weakly connected component.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::plugin::descriptor::{PluginDescriptor, TargetSpec};

pub const STARTUP_ROOT: &str = "satop.startup";
pub const SHUTDOWN_ROOT: &str = "satop.shutdown";

#[derive(Debug, Error)]
pub enum TargetGraphError {
    #[error("target {node:?} references unknown target {other:?}")]
    UnknownTarget { node: String, other: String },

    #[error("cycle detected in target graph among: {0:?}")]
    Cycle(Vec<String>),

    #[error("component {component:?} has {} in-degree-zero nodes ({roots:?}), expected exactly one", roots.len())]
    AmbiguousRoot { component: Vec<String>, roots: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct TargetNode {
    pub id: String,
    pub plugin: Option<String>,
    pub function: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Component {
    pub root: String,
    /// Topological order over every node in the component, root included.
    pub sequence: Vec<TargetNode>,
}

#[derive(Debug, Clone)]
pub struct TargetGraph {
    pub components: Vec<Component>,
}

fn merge_defaults(targets: &mut HashMap<String, TargetSpec>) {
    targets.entry("startup".to_owned()).or_insert_with(|| TargetSpec {
        function: Some("startup".to_owned()),
        before: Vec::new(),
        after: vec![STARTUP_ROOT.to_owned()],
    });
    targets.entry("shutdown".to_owned()).or_insert_with(|| TargetSpec {
        function: Some("shutdown".to_owned()),
        before: Vec::new(),
        after: vec![SHUTDOWN_ROOT.to_owned()],
    });
}

pub fn build(plugins: &[PluginDescriptor]) -> Result<TargetGraph, TargetGraphError> {
    let mut nodes: HashMap<String, TargetNode> = HashMap::new();
    nodes.insert(
        STARTUP_ROOT.to_owned(),
        TargetNode {
            id: STARTUP_ROOT.to_owned(),
            plugin: None,
            function: None,
        },
    );
    nodes.insert(
        SHUTDOWN_ROOT.to_owned(),
        TargetNode {
            id: SHUTDOWN_ROOT.to_owned(),
            plugin: None,
            function: None,
        },
    );

    // edge (a, b) means a must run before b.
    let mut edges: Vec<(String, String)> = Vec::new();

    for plugin in plugins {
        let mut targets = plugin.targets.clone();
        merge_defaults(&mut targets);

        for (target_name, spec) in &targets {
            let id = format!("{}.{target_name}", plugin.name);
            nodes.insert(
                id.clone(),
                TargetNode {
                    id: id.clone(),
                    plugin: Some(plugin.name.clone()),
                    function: Some(spec.function.clone().unwrap_or_else(|| target_name.clone())),
                },
            );

            for before in &spec.before {
                edges.push((id.clone(), qualify(before, plugin)));
            }
            for after in &spec.after {
                edges.push((qualify(after, plugin), id.clone()));
            }
        }
    }

    for (from, to) in &edges {
        if !nodes.contains_key(from) {
            return Err(TargetGraphError::UnknownTarget {
                node: to.clone(),
                other: from.clone(),
            });
        }
        if !nodes.contains_key(to) {
            return Err(TargetGraphError::UnknownTarget {
                node: from.clone(),
                other: to.clone(),
            });
        }
    }

    let components = weakly_connected_components(&nodes, &edges);

    let mut result = Vec::with_capacity(components.len());
    for component in components {
        let sequence = topological_order_within(&component, &edges)?;
        let roots: Vec<String> = component
            .iter()
            .filter(|id| in_degree_within(id, &component, &edges) == 0)
            .cloned()
            .collect();

        if roots.len() != 1 {
            return Err(TargetGraphError::AmbiguousRoot {
                component: component.into_iter().collect(),
                roots,
            });
        }

        result.push(Component {
            root: roots.into_iter().next().unwrap(),
            sequence: sequence.into_iter().map(|id| nodes[&id].clone()).collect(),
        });
    }

    Ok(TargetGraph { components: result })
}

/// `before`/`after` fields name either a synthetic root (`satop.startup`)
/// or a bare target within the *same* plugin (`"startup"` meaning this
/// plugin's own startup target); a dotted reference is taken as already
/// fully qualified.
fn qualify(reference: &str, plugin: &PluginDescriptor) -> String {
    if reference == STARTUP_ROOT || reference == SHUTDOWN_ROOT || reference.contains('.') {
        reference.to_owned()
    } else {
        format!("{}.{reference}", plugin.name)
    }
}

fn in_degree_within(node: &str, component: &HashSet<String>, edges: &[(String, String)]) -> usize {
    edges
        .iter()
        .filter(|(from, to)| to == node && component.contains(from))
        .count()
}

fn weakly_connected_components(nodes: &HashMap<String, TargetNode>, edges: &[(String, String)]) -> Vec<HashSet<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
        adjacency.entry(to.as_str()).or_default().push(from.as_str());
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut components = Vec::new();

    for id in nodes.keys() {
        if visited.contains(id) {
            continue;
        }
        let mut component = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(id.clone());
        visited.insert(id.clone());

        while let Some(current) = queue.pop_front() {
            component.insert(current.clone());
            if let Some(neighbors) = adjacency.get(current.as_str()) {
                for neighbor in neighbors {
                    if visited.insert((*neighbor).to_owned()) {
                        queue.push_back((*neighbor).to_owned());
                    }
                }
            }
        }

        components.push(component);
    }

    components
}

fn topological_order_within(component: &HashSet<String>, edges: &[(String, String)]) -> Result<Vec<String>, TargetGraphError> {
    let mut in_degree: HashMap<String, usize> = component.iter().map(|id| (id.clone(), 0)).collect();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for (from, to) in edges {
        if component.contains(from) && component.contains(to) {
            *in_degree.get_mut(to).unwrap() += 1;
            dependents.entry(from.clone()).or_default().push(to.clone());
        }
    }

    let mut queue: Vec<String> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut order = Vec::with_capacity(component.len());

    while !queue.is_empty() {
        queue.sort();
        let current = queue.remove(0);
        order.push(current.clone());
        if let Some(children) = dependents.get(&current) {
            for child in children {
                let degree = in_degree.get_mut(child).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push(child.clone());
                }
            }
        }
    }

    if order.len() != component.len() {
        let remaining: Vec<String> = component.iter().filter(|id| !order.contains(id)).cloned().collect();
        return Err(TargetGraphError::Cycle(remaining));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn descriptor(name: &str, targets: Map<String, TargetSpec>) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_owned(),
            package_path: camino::Utf8PathBuf::from("/plugins").join(name),
            config: serde_json::Value::Null,
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            targets,
            instance: None,
        }
    }

    #[test]
    fn defaults_wire_into_synthetic_roots() {
        let plugins = vec![descriptor("p", Map::new())];
        let graph = build(&plugins).unwrap();

        assert_eq!(graph.components.len(), 2);
        let startup = graph.components.iter().find(|c| c.root == STARTUP_ROOT).unwrap();
        assert!(startup.sequence.iter().any(|n| n.id == "p.startup"));
    }

    #[test]
    fn declared_after_runs_before_dependent() {
        let mut p_targets = Map::new();
        p_targets.insert(
            "startup".to_owned(),
            TargetSpec {
                function: Some("startup".to_owned()),
                before: Vec::new(),
                after: vec![STARTUP_ROOT.to_owned()],
            },
        );
        let mut q_targets = Map::new();
        q_targets.insert(
            "startup".to_owned(),
            TargetSpec {
                function: Some("startup".to_owned()),
                before: Vec::new(),
                after: vec!["p.startup".to_owned()],
            },
        );

        let plugins = vec![descriptor("p", p_targets), descriptor("q", q_targets)];
        let graph = build(&plugins).unwrap();

        let startup = graph.components.iter().find(|c| c.root == STARTUP_ROOT).unwrap();
        let positions: Map<&str, usize> = startup
            .sequence
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        assert!(positions["p.startup"] < positions["q.startup"]);
    }

    #[test]
    fn unknown_target_reference_is_an_error() {
        let mut targets = Map::new();
        targets.insert(
            "startup".to_owned(),
            TargetSpec {
                function: None,
                before: vec!["nonexistent.target".to_owned()],
                after: Vec::new(),
            },
        );
        let plugins = vec![descriptor("p", targets)];
        let err = build(&plugins).unwrap_err();
        assert!(matches!(err, TargetGraphError::UnknownTarget { .. }));
    }

    #[test]
    fn cycle_within_component_is_an_error() {
        let mut p_targets = Map::new();
        p_targets.insert(
            "startup".to_owned(),
            TargetSpec {
                function: None,
                before: vec!["p.extra".to_owned()],
                after: vec![STARTUP_ROOT.to_owned()],
            },
        );
        p_targets.insert(
            "extra".to_owned(),
            TargetSpec {
                function: None,
                before: vec!["p.startup".to_owned()],
                after: Vec::new(),
            },
        );
        let plugins = vec![descriptor("p", p_targets)];
        let err = build(&plugins).unwrap_err();
        assert!(matches!(err, TargetGraphError::Cycle(_)));
    }
}
