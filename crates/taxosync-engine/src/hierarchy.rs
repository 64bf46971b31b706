//! Concept creation order.
//!
//! Concepts are dispatched top-down (scheme roots first, then their narrower
//! concepts) so parents usually exist before their children, but every
//! payload concept is planned exactly once regardless of reachability.
//! The walk is iterative and guards against `narrower`/`broader` cycles.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use taxosync_core::{logging, SyncRequest};

/// Dispatch order for concept upserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationPlan {
    /// Every payload concept URI, each exactly once.
    pub order: Vec<String>,
    /// Cycles met during the walk, each as the path that closes on itself.
    pub cycles: Vec<Vec<String>>,
}

fn push_unique<'a>(list: &mut Vec<&'a str>, id: &'a str) {
    if !list.contains(&id) {
        list.push(id);
    }
}

pub fn plan_concepts(request: &SyncRequest) -> CreationPlan {
    let ids: HashSet<&str> = request.concepts().map(|c| c.id.as_str()).collect();

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for concept in request.concepts() {
        for child in concept.narrower.iter().filter(|n| ids.contains(n.as_str())) {
            push_unique(children.entry(concept.id.as_str()).or_default(), child);
        }
        for parent in concept.broader.iter().filter(|b| ids.contains(b.as_str())) {
            push_unique(children.entry(parent.as_str()).or_default(), &concept.id);
        }
    }

    // Scheme roots first, then everything else; visited concepts are skipped.
    let scheme_roots = request
        .schemes()
        .flat_map(|s| s.has_top_concept.iter())
        .filter(|t| ids.contains(t.as_str()))
        .map(String::as_str);
    let declared_roots = request
        .concepts()
        .filter(|c| !c.top_concept_of.is_empty())
        .map(|c| c.id.as_str());
    let roots = scheme_roots
        .chain(declared_roots)
        .chain(request.concepts().map(|c| c.id.as_str()));

    let mut plan = CreationPlan::default();
    let mut visited: HashSet<&str> = HashSet::new();
    for root in roots {
        if !visited.insert(root) {
            continue;
        }
        plan.order.push(root.to_string());
        // (node, next child index); the stack is the current path.
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        let mut on_path: HashSet<&str> = HashSet::from([root]);
        while let Some(&(node, next)) = stack.last() {
            let kids = children.get(node).map(Vec::as_slice).unwrap_or(&[]);
            let Some(&child) = kids.get(next) else {
                on_path.remove(node);
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if on_path.contains(child) {
                let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                let cycle: Vec<String> = stack[start..]
                    .iter()
                    .map(|(n, _)| n.to_string())
                    .chain(std::iter::once(child.to_string()))
                    .collect();
                warn!(
                    { logging::SUBSYSTEM } = "engine",
                    { logging::COMPONENT } = "hierarchy",
                    cycle = %cycle.join(" -> "),
                    "Hierarchy cycle detected"
                );
                plan.cycles.push(cycle);
            } else if visited.insert(child) {
                plan.order.push(child.to_string());
                on_path.insert(child);
                stack.push((child, 0));
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxosync_core::SourceResource;

    fn concept(id: &str, narrower: &[&str]) -> SourceResource {
        let mut c = SourceResource::concept(id);
        c.narrower = narrower.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn test_top_down_order() {
        let mut scheme = SourceResource::scheme("s");
        scheme.has_top_concept = vec!["a".to_string()];
        let mut c = SourceResource::concept("c");
        c.broader = vec!["b".to_string()];
        let request = SyncRequest::new(vec![
            c,
            concept("b", &[]),
            scheme,
            concept("a", &["b"]),
            concept("loose", &[]),
        ]);

        let plan = plan_concepts(&request);
        assert_eq!(plan.order, vec!["a", "b", "c", "loose"]);
        assert!(plan.cycles.is_empty());
    }

    #[test]
    fn test_cycle_detected_and_every_concept_planned_once() {
        let request = SyncRequest::new(vec![
            concept("a", &["b"]),
            concept("b", &["c"]),
            concept("c", &["a"]),
        ]);

        let plan = plan_concepts(&request);
        assert_eq!(plan.order, vec!["a", "b", "c"]);
        assert_eq!(plan.cycles, vec![vec!["a", "b", "c", "a"]]);
    }

    #[test]
    fn test_self_loop() {
        let plan = plan_concepts(&SyncRequest::new(vec![concept("a", &["a"])]));
        assert_eq!(plan.order, vec!["a"]);
        assert_eq!(plan.cycles, vec![vec!["a", "a"]]);
    }

    #[test]
    fn test_dangling_references_ignored() {
        let plan = plan_concepts(&SyncRequest::new(vec![concept("a", &["missing"])]));
        assert_eq!(plan.order, vec!["a"]);
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let graph: Vec<SourceResource> = (0..10_000)
            .map(|i| {
                let next = format!("n{}", i + 1);
                concept(&format!("n{}", i), &[next.as_str()])
            })
            .collect();
        let plan = plan_concepts(&SyncRequest::new(graph));
        assert_eq!(plan.order.len(), 10_000);
        assert_eq!(plan.order[9_999], "n9999");
    }
}
