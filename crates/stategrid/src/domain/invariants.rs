//! # Domain Invariants
//!
//! Business rules that must always hold for the state registry.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::entities::{StateObject, StatePayload};
use super::errors::EngineError;
use super::value_objects::Version;

/// Invariant: versions never decrease.
///
/// Every mutation must produce a version strictly newer than the one it
/// replaces.
pub fn invariant_version_monotone(before: &Version, after: &Version) -> Result<(), EngineError> {
    if after.key() <= before.key() {
        return Err(EngineError::StateInconsistency(format!(
            "version went from {}.{}.{} to {}.{}.{}",
            before.major, before.minor, before.patch, after.major, after.minor, after.patch
        )));
    }
    Ok(())
}

/// Invariant: dependencies form a DAG.
///
/// Checks that adding `edge_from -> depends_on` keeps the graph acyclic.
/// `graph` maps object id to its dependency list.
pub fn invariant_dependency_dag(
    graph: &HashMap<Uuid, Vec<Uuid>>,
    edge_from: Uuid,
    depends_on: &[Uuid],
) -> Result<(), EngineError> {
    // A cycle exists iff some new dependency can already reach edge_from.
    for start in depends_on {
        if *start == edge_from || reaches(graph, *start, edge_from) {
            return Err(EngineError::DependencyCycle(edge_from));
        }
    }
    Ok(())
}

fn reaches(graph: &HashMap<Uuid, Vec<Uuid>>, from: Uuid, target: Uuid) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(deps) = graph.get(&node) {
            stack.extend(deps.iter().copied());
        }
    }
    false
}

/// Invariant: checksum matches content whenever the status requires it.
pub fn invariant_checksum_intact(object: &StateObject) -> Result<(), EngineError> {
    if object.status.requires_intact_checksum() && !object.payload.is_intact() {
        return Err(EngineError::DataCorruption {
            object: object.id,
            detail: format!(
                "checksum {} does not cover {} content bytes",
                object.payload.checksum_prefix(),
                object.payload.content.len()
            ),
        });
    }
    Ok(())
}

/// Invariant: at most one in-flight transition per object.
///
/// `in_flight` is the set of object ids with a non-terminal transition
/// record.
pub fn invariant_single_transition(
    in_flight: &HashSet<Uuid>,
    object: Uuid,
) -> Result<(), EngineError> {
    if in_flight.contains(&object) {
        return Err(EngineError::StateBusy(object));
    }
    Ok(())
}

/// Structural payload validation performed on create and update.
pub fn validate_payload(payload: &StatePayload) -> Result<(), EngineError> {
    if payload.size_bytes != payload.content.len() as u64 {
        return Err(EngineError::MalformedPayload(format!(
            "declared size {} but content is {} bytes",
            payload.size_bytes,
            payload.content.len()
        )));
    }
    if payload.checksum != StatePayload::digest(&payload.content) {
        return Err(EngineError::MalformedPayload(
            "checksum does not match content".to_string(),
        ));
    }
    if payload.encoding.is_empty() {
        return Err(EngineError::MalformedPayload("empty encoding tag".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::StateStatus;

    #[test]
    fn test_version_monotone_ok() {
        let a = Version::initial("a", 100);
        let b = a.bumped_patch("a", "x", 101);
        assert!(invariant_version_monotone(&a, &b).is_ok());
    }

    #[test]
    fn test_version_monotone_rejects_equal_and_older() {
        let a = Version::initial("a", 100);
        assert!(invariant_version_monotone(&a, &a).is_err());
        let b = a.bumped_patch("a", "x", 101);
        assert!(invariant_version_monotone(&b, &a).is_err());
    }

    #[test]
    fn test_dependency_dag_accepts_tree() {
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        let mut graph = HashMap::new();
        graph.insert(child, vec![parent]);
        // A sibling depending on the same parent is fine.
        let sibling = Uuid::new_v4();
        assert!(invariant_dependency_dag(&graph, sibling, &[parent]).is_ok());
    }

    #[test]
    fn test_dependency_dag_rejects_self_loop() {
        let node = Uuid::new_v4();
        let graph = HashMap::new();
        assert!(matches!(
            invariant_dependency_dag(&graph, node, &[node]),
            Err(EngineError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_dependency_dag_rejects_transitive_cycle() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let mut graph = HashMap::new();
        graph.insert(b, vec![a]);
        graph.insert(c, vec![b]);
        // a -> c would close a cycle: c depends on b depends on a.
        assert!(invariant_dependency_dag(&graph, a, &[c]).is_err());
    }

    #[test]
    fn test_checksum_invariant_by_status() {
        let payload = StatePayload::json(b"data".to_vec());
        let mut object = StateObject::new(1, payload, "a", 0);
        object.payload.content[0] ^= 0xFF;

        object.status = StateStatus::Active;
        assert!(invariant_checksum_intact(&object).is_err());

        // A transitioning object is allowed to be mid-flight.
        object.status = StateStatus::Transitioning;
        assert!(invariant_checksum_intact(&object).is_ok());
    }

    #[test]
    fn test_single_transition_invariant() {
        let id = Uuid::new_v4();
        let mut in_flight = HashSet::new();
        assert!(invariant_single_transition(&in_flight, id).is_ok());
        in_flight.insert(id);
        assert!(matches!(
            invariant_single_transition(&in_flight, id),
            Err(EngineError::StateBusy(_))
        ));
    }

    #[test]
    fn test_validate_payload_rejects_bad_size() {
        let mut payload = StatePayload::json(b"data".to_vec());
        payload.size_bytes += 1;
        assert!(validate_payload(&payload).is_err());
    }

    #[test]
    fn test_validate_payload_rejects_empty_encoding() {
        let mut payload = StatePayload::json(b"data".to_vec());
        payload.encoding.clear();
        assert!(validate_payload(&payload).is_err());
    }
}
