//! Lookup dependency ordering for publishes.
//!
//! Publishing an entity also publishes the Draft (and re-publishes the
//! Withdrawn) entities its lookups reach. Entities that are already live
//! are leaves; their own lookups are not followed.

use std::collections::{BTreeSet, HashMap};
use tessera_db::{EntityDefinition, EntityStatus};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Lookup referenced entities not found: {}", .0.join(", "))]
    MissingTargets(Vec<String>),

    /// Entity names along the cycle; the first name is repeated at the end.
    #[error("Cyclic publish dependency detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Whether a lookup target must be (re)published along with its dependent.
pub fn needs_publish(entity: &EntityDefinition) -> bool {
    matches!(entity.status, EntityStatus::Draft | EntityStatus::Withdrawn)
}

/// The catalog entry a lookup key names (entity name or full type name).
pub fn resolve<'a>(catalog: &'a [EntityDefinition], key: &str) -> Option<&'a EntityDefinition> {
    catalog.iter().find(|e| e.answers_to(key))
}

/// Lookup keys of `entity` that name nothing in `catalog`. Self-lookups
/// always resolve.
pub fn missing_targets(entity: &EntityDefinition, catalog: &[EntityDefinition]) -> Vec<String> {
    entity
        .lookup_targets()
        .into_iter()
        .filter(|key| !entity.answers_to(key) && resolve(catalog, key).is_none())
        .collect()
}

/// Entities to publish, dependencies first and `root` last.
///
/// `catalog` is every known definition; it may or may not contain `root`.
pub fn publish_order<'a>(
    root: &'a EntityDefinition,
    catalog: &'a [EntityDefinition],
) -> Result<Vec<&'a EntityDefinition>, GraphError> {
    let mut nodes: Vec<&EntityDefinition> = vec![root];
    let mut index: HashMap<uuid::Uuid, usize> = HashMap::from([(root.id, 0)]);
    let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new()];
    let mut missing: BTreeSet<String> = BTreeSet::new();

    let mut worklist = vec![0usize];
    while let Some(current) = worklist.pop() {
        let entity = nodes[current];
        for target in entity.lookup_targets() {
            if entity.answers_to(&target) {
                continue;
            }
            let Some(dependency) = resolve(catalog, &target) else {
                missing.insert(target);
                continue;
            };
            let dependency = if dependency.id == root.id { root } else { dependency };
            if dependency.id != root.id && !needs_publish(dependency) {
                continue;
            }

            let next = match index.get(&dependency.id) {
                Some(&i) => i,
                None => {
                    nodes.push(dependency);
                    deps.push(BTreeSet::new());
                    let i = nodes.len() - 1;
                    index.insert(dependency.id, i);
                    worklist.push(i);
                    i
                }
            };
            deps[current].insert(next);
        }
    }

    if !missing.is_empty() {
        return Err(GraphError::MissingTargets(missing.into_iter().collect()));
    }

    // Kahn's algorithm; ties broken by name for a stable order.
    let mut remaining: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (node, node_deps) in deps.iter().enumerate() {
        for &dep in node_deps {
            dependents[dep].push(node);
        }
    }

    let by_name = |i: &usize| nodes[*i].entity_name.to_lowercase();
    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| remaining[i] == 0).collect();
    ready.sort_by_key(by_name);
    ready.reverse();

    let mut order = Vec::with_capacity(nodes.len());
    let mut done = vec![false; nodes.len()];
    while let Some(node) = ready.pop() {
        done[node] = true;
        order.push(nodes[node]);
        let mut unlocked = Vec::new();
        for &dependent in &dependents[node] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                unlocked.push(dependent);
            }
        }
        ready.extend(unlocked);
        ready.sort_by_key(by_name);
        ready.reverse();
    }

    if order.len() < nodes.len() {
        return Err(GraphError::Cycle(find_cycle(&nodes, &deps, &done)));
    }
    Ok(order)
}

/// Walk unresolved dependencies from the root until a node repeats.
fn find_cycle(nodes: &[&EntityDefinition], deps: &[BTreeSet<usize>], done: &[bool]) -> Vec<String> {
    let mut current = if done[0] {
        (0..nodes.len()).find(|&i| !done[i]).unwrap_or(0)
    } else {
        0
    };
    let mut path: Vec<usize> = Vec::new();

    loop {
        if let Some(start) = path.iter().position(|&n| n == current) {
            let mut cycle: Vec<String> = path[start..].iter().map(|&n| nodes[n].entity_name.clone()).collect();
            cycle.push(nodes[current].entity_name.clone());
            return cycle;
        }
        path.push(current);
        match deps[current].iter().find(|&&d| !done[d]) {
            Some(&next) => current = next,
            None => return path.iter().map(|&n| nodes[n].entity_name.clone()).collect(),
        }
    }
}
