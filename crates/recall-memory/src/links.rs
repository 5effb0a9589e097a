//! Bidirectional relation maintenance between records of one namespace.
//!
//! Every `A -> B` edge is mirrored by `B -> A` carrying the inverse relation.
//! Target rows are written before the source row; a failed source write
//! restores the targets from the rows read before the change.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use recall_access::{Namespace, Operation};

use crate::codec::{decode_memory, decode_person, encode_memory, encode_person};
use crate::error::{CodecError, GatewayError, GatewayResult};
use crate::records::{MemoryLink, MemoryRecord, PersonRecord, PersonRelation, RecordKind};
use crate::store::{StoredVector, VectorStore};

const INVERSE_RELATIONS: &[(&str, &str)] = &[
    ("parent_of", "child_of"),
    ("manager_of", "reports_to"),
    ("mentor_of", "mentee_of"),
    ("precedes", "follows"),
    ("causes", "caused_by"),
    ("supersedes", "superseded_by"),
];

/// Returns the relation the target records for `relation_type`.
///
/// Known directional pairs map to each other; anything else is symmetric.
pub fn inverse_relation(relation_type: &str) -> String {
    let relation_type = relation_type.trim();
    for (forward, backward) in INVERSE_RELATIONS {
        if relation_type.eq_ignore_ascii_case(forward) {
            return (*backward).to_string();
        }
        if relation_type.eq_ignore_ascii_case(backward) {
            return (*forward).to_string();
        }
    }
    relation_type.to_string()
}

/// One outbound relation, independent of record kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkEdge {
    pub target_id: String,
    pub relation_type: String,
}

impl LinkEdge {
    pub fn new(target_id: impl Into<String>, relation_type: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            relation_type: relation_type.into(),
        }
    }

    /// The edge the target must hold back to `source_id`.
    pub fn reverse(&self, source_id: &str) -> Self {
        Self::new(source_id, inverse_relation(&self.relation_type))
    }
}

/// Edge difference between two versions of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPlan {
    pub added: Vec<LinkEdge>,
    pub removed: Vec<LinkEdge>,
}

impl LinkPlan {
    pub fn between(before: &[LinkEdge], after: &[LinkEdge]) -> Self {
        let before_set = before.iter().collect::<BTreeSet<_>>();
        let after_set = after.iter().collect::<BTreeSet<_>>();
        Self {
            added: after
                .iter()
                .filter(|edge| !before_set.contains(edge))
                .cloned()
                .collect(),
            removed: before
                .iter()
                .filter(|edge| !after_set.contains(edge))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Sorted, deduplicated ids touched by the plan.
    pub fn target_ids(&self) -> Vec<String> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .map(|edge| edge.target_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Trims, deduplicates and validates caller-supplied edges for `source_id`.
pub fn normalize_edges(
    source_id: Option<&str>,
    edges: Vec<LinkEdge>,
    id_shape: fn(&str) -> bool,
    kind: RecordKind,
) -> Result<Vec<LinkEdge>, GatewayError> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(edges.len());
    for edge in edges {
        let edge = LinkEdge::new(edge.target_id.trim(), edge.relation_type.trim());
        if edge.relation_type.is_empty() {
            return Err(GatewayError::Validation(format!(
                "relation to '{}' is missing a relation_type",
                edge.target_id
            )));
        }
        if !id_shape(&edge.target_id) {
            return Err(GatewayError::Validation(format!(
                "'{}' is not a valid {} id",
                edge.target_id,
                kind.as_str()
            )));
        }
        if source_id.is_some_and(|source_id| source_id == edge.target_id) {
            return Err(GatewayError::Validation(format!(
                "{} '{}' cannot relate to itself",
                kind.as_str(),
                edge.target_id
            )));
        }
        if seen.insert(edge.clone()) {
            normalized.push(edge);
        }
    }
    Ok(normalized)
}

/// Record shapes that carry bidirectional edges.
pub trait LinkedRecord: Clone + Send + Sync {
    const KIND: RecordKind;

    fn decode(stored: &StoredVector) -> Result<Self, CodecError>;
    /// Encodes the record into a row carrying `vector`.
    fn encode(&self, vector: &[f32]) -> Result<StoredVector, CodecError>;
    fn record_id(&self) -> &str;
    fn edges(&self) -> Vec<LinkEdge>;
    fn insert_edge(&mut self, edge: &LinkEdge) -> bool;
    fn remove_edge(&mut self, edge: &LinkEdge) -> bool;
    fn remove_edges_to(&mut self, target_id: &str) -> bool;
    fn touch(&mut self, now_ms: u64);
}

impl LinkedRecord for MemoryRecord {
    const KIND: RecordKind = RecordKind::Memory;

    fn decode(stored: &StoredVector) -> Result<Self, CodecError> {
        decode_memory(stored)
    }

    fn encode(&self, vector: &[f32]) -> Result<StoredVector, CodecError> {
        if self.embedding == vector {
            return encode_memory(self);
        }
        let mut record = self.clone();
        record.embedding = vector.to_vec();
        encode_memory(&record)
    }

    fn record_id(&self) -> &str {
        &self.id
    }

    fn edges(&self) -> Vec<LinkEdge> {
        self.related_memories
            .iter()
            .map(|link| LinkEdge::new(link.id.clone(), link.relation_type.clone()))
            .collect()
    }

    fn insert_edge(&mut self, edge: &LinkEdge) -> bool {
        let exists = self
            .related_memories
            .iter()
            .any(|link| link.id == edge.target_id && link.relation_type == edge.relation_type);
        if exists {
            return false;
        }
        self.related_memories.push(MemoryLink {
            id: edge.target_id.clone(),
            relation_type: edge.relation_type.clone(),
        });
        true
    }

    fn remove_edge(&mut self, edge: &LinkEdge) -> bool {
        let before = self.related_memories.len();
        self.related_memories
            .retain(|link| !(link.id == edge.target_id && link.relation_type == edge.relation_type));
        before != self.related_memories.len()
    }

    fn remove_edges_to(&mut self, target_id: &str) -> bool {
        let before = self.related_memories.len();
        self.related_memories.retain(|link| link.id != target_id);
        before != self.related_memories.len()
    }

    fn touch(&mut self, now_ms: u64) {
        self.updated_at = now_ms.max(self.created_at);
    }
}

impl LinkedRecord for PersonRecord {
    const KIND: RecordKind = RecordKind::Person;

    fn decode(stored: &StoredVector) -> Result<Self, CodecError> {
        decode_person(stored)
    }

    fn encode(&self, vector: &[f32]) -> Result<StoredVector, CodecError> {
        encode_person(self, vector.to_vec())
    }

    fn record_id(&self) -> &str {
        &self.id
    }

    fn edges(&self) -> Vec<LinkEdge> {
        self.relations
            .iter()
            .map(|relation| {
                LinkEdge::new(
                    relation.related_person_id.clone(),
                    relation.relation_type.clone(),
                )
            })
            .collect()
    }

    fn insert_edge(&mut self, edge: &LinkEdge) -> bool {
        let exists = self.relations.iter().any(|relation| {
            relation.related_person_id == edge.target_id
                && relation.relation_type == edge.relation_type
        });
        if exists {
            return false;
        }
        self.relations.push(PersonRelation {
            related_person_id: edge.target_id.clone(),
            relation_type: edge.relation_type.clone(),
        });
        true
    }

    fn remove_edge(&mut self, edge: &LinkEdge) -> bool {
        let before = self.relations.len();
        self.relations.retain(|relation| {
            !(relation.related_person_id == edge.target_id
                && relation.relation_type == edge.relation_type)
        });
        before != self.relations.len()
    }

    fn remove_edges_to(&mut self, target_id: &str) -> bool {
        let before = self.relations.len();
        self.relations
            .retain(|relation| relation.related_person_id != target_id);
        before != self.relations.len()
    }

    fn touch(&mut self, now_ms: u64) {
        self.updated_at = now_ms.max(self.created_at);
    }
}

/// A target row before and after reverse-edge maintenance.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetChange {
    pub id: String,
    pub previous: StoredVector,
    pub updated: StoredVector,
}

/// Reads the targets of `plan` and computes their new rows.
///
/// An added edge whose target does not exist is a validation error; removed
/// edges pointing at missing targets are ignored.
pub async fn prepare_targets<R: LinkedRecord>(
    store: &dyn VectorStore,
    operation: Operation,
    namespace: Namespace,
    source_id: &str,
    plan: &LinkPlan,
    now_ms: u64,
) -> GatewayResult<Vec<TargetChange>> {
    if plan.is_empty() {
        return Ok(Vec::new());
    }
    let target_ids = plan.target_ids();
    let mut rows = store
        .fetch(&target_ids, namespace)
        .await
        .map_err(|error| GatewayError::backend(operation, namespace, Some(source_id), error))?;

    if let Some(missing) = plan
        .added
        .iter()
        .find(|edge| !rows.contains_key(&edge.target_id))
    {
        return Err(GatewayError::Validation(format!(
            "related {} '{}' does not exist in namespace '{namespace}'",
            R::KIND.as_str(),
            missing.target_id
        )));
    }

    let mut targets = BTreeMap::<String, (StoredVector, R)>::new();
    for id in target_ids {
        let Some(previous) = rows.remove(&id) else {
            continue;
        };
        let record = R::decode(&previous)?;
        targets.insert(id, (previous, record));
    }

    let mut changed = BTreeSet::new();
    for edge in &plan.removed {
        if let Some((_, record)) = targets.get_mut(&edge.target_id) {
            if record.remove_edge(&edge.reverse(source_id)) {
                changed.insert(edge.target_id.clone());
            }
        }
    }
    for edge in &plan.added {
        if let Some((_, record)) = targets.get_mut(&edge.target_id) {
            if record.insert_edge(&edge.reverse(source_id)) {
                changed.insert(edge.target_id.clone());
            }
        }
    }

    let mut changes = Vec::with_capacity(changed.len());
    for (id, (previous, mut record)) in targets {
        if !changed.contains(&id) {
            continue;
        }
        record.touch(now_ms);
        let updated = record.encode(&previous.vector)?;
        changes.push(TargetChange {
            id,
            previous,
            updated,
        });
    }
    Ok(changes)
}

/// Writes target rows, then the source row, undoing target writes on failure.
pub async fn commit_linked(
    store: &dyn VectorStore,
    operation: Operation,
    namespace: Namespace,
    source: StoredVector,
    targets: &[TargetChange],
) -> GatewayResult<()> {
    let source_id = source.id.clone();
    let mut written = Vec::with_capacity(targets.len());
    for change in targets {
        if let Err(error) = store.upsert(namespace, vec![change.updated.clone()]).await {
            let restored = restore_targets(store, namespace, &written).await;
            tracing::warn!(
                source_id = %source_id,
                target_id = %change.id,
                restored,
                "reverse link write failed; source left untouched"
            );
            return Err(GatewayError::LinkFailed {
                source_id,
                target_id: change.id.clone(),
                partial: !restored,
                reason: error.to_string(),
            });
        }
        tracing::debug!(source_id = %source_id, target_id = %change.id, "reverse link written");
        written.push(change);
    }

    let Err(error) = store.upsert(namespace, vec![source]).await else {
        return Ok(());
    };
    let Some(first) = written.first() else {
        return Err(GatewayError::backend(
            operation,
            namespace,
            Some(source_id.as_str()),
            error,
        ));
    };
    let target_id = first.id.clone();
    let restored = restore_targets(store, namespace, &written).await;
    tracing::warn!(
        source_id = %source_id,
        target_id = %target_id,
        restored,
        "source write failed after reverse links were written"
    );
    Err(GatewayError::LinkFailed {
        source_id,
        target_id,
        partial: !restored,
        reason: format!("source write failed: {error}"),
    })
}

async fn restore_targets(
    store: &dyn VectorStore,
    namespace: Namespace,
    written: &[&TargetChange],
) -> bool {
    let mut restored = true;
    for change in written.iter().rev() {
        if let Err(error) = store.upsert(namespace, vec![change.previous.clone()]).await {
            tracing::warn!(target_id = %change.id, %error, "reverse link rollback failed");
            restored = false;
        }
    }
    restored
}

/// Outcome of removing reverse edges after a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlinkReport {
    pub unlinked: Vec<String>,
    pub failures: Vec<String>,
}

/// Best-effort removal of every edge pointing at `deleted` from its targets.
pub async fn strip_backlinks<R: LinkedRecord>(
    store: &dyn VectorStore,
    namespace: Namespace,
    deleted: &R,
    now_ms: u64,
) -> UnlinkReport {
    let deleted_id = deleted.record_id();
    let target_ids = deleted
        .edges()
        .into_iter()
        .map(|edge| edge.target_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let mut report = UnlinkReport::default();
    if target_ids.is_empty() {
        return report;
    }

    let rows: HashMap<String, StoredVector> = match store.fetch(&target_ids, namespace).await {
        Ok(rows) => rows,
        Err(error) => {
            tracing::warn!(deleted_id, %error, "could not read related records to unlink");
            report.failures = target_ids;
            return report;
        }
    };

    for id in target_ids {
        let Some(previous) = rows.get(&id) else {
            continue;
        };
        let mut record = match R::decode(previous) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(target_id = %id, %error, "related record failed to decode");
                report.failures.push(id);
                continue;
            }
        };
        if !record.remove_edges_to(deleted_id) {
            continue;
        }
        record.touch(now_ms);
        let written = match record.encode(&previous.vector) {
            Ok(row) => store.upsert(namespace, vec![row]).await.map_err(|error| error.to_string()),
            Err(error) => Err(error.to_string()),
        };
        match written {
            Ok(()) => report.unlinked.push(id),
            Err(error) => {
                tracing::warn!(target_id = %id, %error, "reverse link removal failed");
                report.failures.push(id);
            }
        }
    }
    report
}
