//! Dependency resolution (§4.E step 2): an iterative (Kahn's-algorithm)
//! topological sort over each plugin's declared `dependencies: []`.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("plugin {plugin:?} depends on unknown plugin {missing:?}")]
    MissingDependency { plugin: String, missing: String },

    #[error("dependency cycle detected among: {0:?}")]
    Cycle(Vec<String>),
}

/// Returns a load order where every plugin appears after all of its
/// dependencies. Ties (plugins with no ordering constraint between them)
/// are broken by input order, so the result is deterministic given a
/// deterministic input but is not the *only* legal order (§8's testable
/// property only requires *a* legal order).
pub fn topological_order(plugins: &[(String, Vec<String>)]) -> Result<Vec<String>, DependencyError> {
    let names: HashSet<&str> = plugins.iter().map(|(name, _)| name.as_str()).collect();

    for (plugin, deps) in plugins {
        for dep in deps {
            if !names.contains(dep.as_str()) {
                return Err(DependencyError::MissingDependency {
                    plugin: plugin.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = plugins.iter().map(|(name, _)| (name.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (plugin, deps) in plugins {
        *in_degree.get_mut(plugin.as_str()).unwrap() += deps.len();
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(plugin.as_str());
        }
    }

    let mut queue: VecDeque<&str> = plugins
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| in_degree[name] == 0)
        .collect();

    let mut order = Vec::with_capacity(plugins.len());

    while let Some(name) = queue.pop_front() {
        order.push(name.to_owned());
        if let Some(children) = dependents.get(name) {
            for child in children {
                let degree = in_degree.get_mut(child).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if order.len() != plugins.len() {
        let remaining: Vec<String> = in_degree
            .into_iter()
            .filter(|(name, degree)| *degree > 0 && !order.contains(&(*name).to_owned()))
            .map(|(name, _)| name.to_owned())
            .collect();
        return Err(DependencyError::Cycle(remaining));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_depends_b_c_b_depends_c() {
        let plugins = vec![
            ("A".to_owned(), vec!["B".to_owned(), "C".to_owned()]),
            ("B".to_owned(), vec!["C".to_owned()]),
            ("C".to_owned(), vec![]),
        ];
        let order = topological_order(&plugins).unwrap();
        assert_eq!(order.first().unwrap(), "C");
        assert_eq!(order.last().unwrap(), "A");
    }

    #[test]
    fn missing_dependency_is_fatal() {
        let plugins = vec![("A".to_owned(), vec!["B".to_owned()])];
        let err = topological_order(&plugins).unwrap_err();
        assert!(matches!(err, DependencyError::MissingDependency { .. }));
    }

    #[test]
    fn cycle_is_fatal() {
        let plugins = vec![("A".to_owned(), vec!["B".to_owned()]), ("B".to_owned(), vec!["A".to_owned()])];
        let err = topological_order(&plugins).unwrap_err();
        assert!(matches!(err, DependencyError::Cycle(_)));
    }

    #[test]
    fn plugin_with_no_dependencies_stands_alone() {
        let plugins = vec![("solo".to_owned(), vec![])];
        assert_eq!(topological_order(&plugins).unwrap(), vec!["solo".to_owned()]);
    }
}
