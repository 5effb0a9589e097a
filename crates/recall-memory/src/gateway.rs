//! Gated mutations and authorized reads over a namespaced vector store.
//!
//! Every mutating call runs the same pipeline: argument validation, the
//! namespace policy, the confirmation gate, per-record locks with a fresh
//! read, the per-record ownership check, the write itself, and finally
//! read-after-write verification against the store.

use std::collections::BTreeSet;
use std::sync::Arc;

use recall_access::{
    authorize_record_update, evaluate_access, AccessDecision, Namespace, Operation,
    RecordOwnership,
};
use recall_core::{current_unix_timestamp_ms, poll_until, PollClock, PollOutcome, TokioPollClock};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::codec::{
    decode_memory, decode_person, is_memory_id, is_person_id, new_memory_id, new_person_id,
};
use crate::config::GatewayConfig;
use crate::confirmation::{CallContext, ConfirmationGate, GateDecision, GateOutcome, Proposal};
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, GatewayError, GatewayResult, StoreError};
use crate::links::{
    commit_linked, normalize_edges, prepare_targets, strip_backlinks, LinkEdge, LinkPlan,
    LinkedRecord, UnlinkReport,
};
use crate::locks::{RecordLockGuard, RecordLocks};
use crate::records::{
    memory_embedding_text, person_embedding_text, MemoryLink, MemoryRecord, NewMemory, NewPerson,
    PersonIdentifier, PersonRecord, PersonRelation, RecordKind,
};
use crate::store::{StoredVector, VectorStore};
use crate::update::{MemoryUpdate, PersonUpdate};

const LINK_LOCK_RETRIES: usize = 3;

/// Verified create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Created<R> {
    pub record: R,
    /// Verification reads issued before the record became visible.
    pub attempts: usize,
    /// Records that received a reverse link.
    pub linked: Vec<String>,
}

/// Applied update awaiting caller confirmation of the stored state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeedsVerification<R> {
    pub expected: R,
    /// Row read back right after the write; `None` when it could not be read.
    pub observed: Option<R>,
    pub relinked: Vec<String>,
}

impl<R: PartialEq> NeedsVerification<R> {
    pub fn is_reflected(&self) -> bool {
        self.observed.as_ref() == Some(&self.expected)
    }
}

/// Verified delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deleted {
    pub id: String,
    pub namespace: Namespace,
    pub already_absent: bool,
    pub attempts: usize,
    pub unlinked: Vec<String>,
    pub unlink_failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryMatch {
    pub record: MemoryRecord,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonMatch {
    pub record: PersonRecord,
    pub score: f32,
}

/// One page of decoded records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordPage<R> {
    pub records: Vec<R>,
    pub next_page_token: Option<String>,
}

/// Per-namespace result of a prefetch search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NamespaceLookup {
    Matches { matches: Vec<MemoryMatch> },
    Restricted,
    Failed { reason_code: String, message: String },
}

impl NamespaceLookup {
    fn from_result(result: GatewayResult<Vec<MemoryMatch>>) -> Self {
        match result {
            Ok(matches) => Self::Matches { matches },
            Err(GatewayError::Restricted { .. }) => Self::Restricted,
            Err(error) => Self::Failed {
                reason_code: error.reason_code().to_string(),
                message: error.to_string(),
            },
        }
    }

    pub fn matches(&self) -> &[MemoryMatch] {
        match self {
            Self::Matches { matches } => matches,
            Self::Restricted | Self::Failed { .. } => &[],
        }
    }
}

/// Context gathered from both memory namespaces for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrefetchContext {
    pub personal: NamespaceLookup,
    pub professional: NamespaceLookup,
}

/// Mutation orchestrator and read path for memories and people.
pub struct MemoryGateway {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: GatewayConfig,
    gate: ConfirmationGate,
    locks: RecordLocks,
    clock: Arc<dyn PollClock>,
}

impl MemoryGateway {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: GatewayConfig,
    ) -> Self {
        let gate = ConfirmationGate::new(config.confirmation.clone());
        Self {
            store,
            embedder,
            config,
            gate,
            locks: RecordLocks::new(),
            clock: Arc::new(TokioPollClock),
        }
    }

    /// Replaces the clock used between verification reads.
    pub fn with_poll_clock(mut self, clock: Arc<dyn PollClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    #[tracing::instrument(
        name = "recall_memory.create_memory",
        skip(self, context, input),
        fields(
            caller = %context.caller_id(),
            namespace = %input.namespace,
            record_id = tracing::field::Empty
        )
    )]
    pub async fn create_memory(
        &self,
        context: &CallContext,
        input: NewMemory,
    ) -> GatewayResult<GateOutcome<Created<MemoryRecord>>> {
        let operation = Operation::Create;
        let input = normalize_new_memory(input)?;
        let namespace = input.namespace;
        self.authorize(context, namespace, operation)?;
        if let Some(proposal) = self.propose(context, operation, namespace, to_args(&input)?) {
            return Ok(GateOutcome::RequiresConfirmation(proposal));
        }

        let id = new_memory_id();
        tracing::Span::current().record("record_id", id.as_str());
        let edges = memory_edges(&input.related_memories);
        let _guard = self
            .locks
            .lock_many(
                std::iter::once((namespace, id.as_str()))
                    .chain(edges.iter().map(|edge| (namespace, edge.target_id.as_str()))),
            )
            .await;

        let embedding = self
            .embed(
                operation,
                namespace,
                Some(id.as_str()),
                memory_embedding_text(&input.text, &input.short_description),
            )
            .await?;
        let now = current_unix_timestamp_ms();
        let record = MemoryRecord {
            id: id.clone(),
            owner_id: context.caller_id().to_string(),
            namespace,
            text: input.text,
            short_description: input.short_description,
            category: input.category,
            tags: input.tags,
            embedding,
            related_people: input.related_people,
            related_memories: input.related_memories,
            created_at: now,
            updated_at: now,
        };
        let linked = self
            .write_linked(operation, namespace, None, &record, &record.embedding, now)
            .await?;
        let attempts = self.await_present(context, operation, namespace, &id).await?;
        tracing::debug!(attempts, linked = linked.len(), "memory created");
        Ok(GateOutcome::Executed(Created {
            record,
            attempts,
            linked,
        }))
    }

    #[tracing::instrument(
        name = "recall_memory.update_memory",
        skip(self, context, namespace, id, changes),
        fields(caller = %context.caller_id(), namespace = %namespace, record_id = %id)
    )]
    pub async fn update_memory(
        &self,
        context: &CallContext,
        namespace: Namespace,
        id: &str,
        changes: &Map<String, Value>,
    ) -> GatewayResult<GateOutcome<NeedsVerification<MemoryRecord>>> {
        let operation = Operation::Update;
        let mut update = MemoryUpdate::from_fields(changes)?;
        let id = require_id(id, is_memory_id, RecordKind::Memory)?;
        ensure_memory_namespace(namespace)?;
        if let Some(links) = update.related_memories.take() {
            let edges = normalize_edges(
                Some(id),
                memory_edges(&links),
                is_memory_id,
                RecordKind::Memory,
            )?;
            update.related_memories = Some(memory_links(edges));
        }
        if let Some(people) = update.related_people.take() {
            update.related_people = Some(normalize_person_refs(people)?);
        }
        if let Some(tags) = update.tags.take() {
            update.tags = Some(normalize_tags(tags));
        }
        if let Some(short_description) = update.short_description.take() {
            update.short_description = Some(short_description.trim().to_string());
        }
        if let Some(category) = update.category.take() {
            update.category = Some(category.trim().to_string());
        }
        self.authorize(context, namespace, operation)?;
        let args = json!({
            "id": id,
            "namespace": namespace,
            "fields": Value::Object(changes.clone()),
        });
        if let Some(proposal) = self.propose(context, operation, namespace, args) {
            return Ok(GateOutcome::RequiresConfirmation(proposal));
        }

        let (_guard, current) = self
            .lock_with_links(operation, namespace, id, |stored| {
                let current = decode_existing::<MemoryRecord>(stored, namespace, id)?;
                let mut next = current.clone();
                update.apply(&mut next);
                Ok(LinkPlan::between(&current.edges(), &next.edges()).target_ids())
            })
            .await?;
        let stored = current.ok_or_else(|| not_found(RecordKind::Memory, namespace, id))?;
        let current = decode_memory(&stored)?;
        self.authorize_record(
            context,
            operation,
            namespace,
            RecordOwnership::Memory {
                owner_id: &current.owner_id,
            },
        )?;

        let mut next = current.clone();
        let content_changed = update.apply(&mut next);
        if next.text.trim().is_empty() && next.short_description.is_empty() {
            return Err(GatewayError::Validation(
                "memory needs text or a short_description".to_string(),
            ));
        }
        if content_changed {
            next.embedding = self
                .embed(operation, namespace, Some(id), next.embedding_text())
                .await?;
        }
        let now = current_unix_timestamp_ms();
        next.touch(now);
        let relinked = self
            .write_linked(
                operation,
                namespace,
                Some(&current),
                &next,
                &next.embedding,
                now,
            )
            .await?;
        let observed = self.observe::<MemoryRecord>(operation, namespace, id).await;
        tracing::debug!(content_changed, relinked = relinked.len(), "memory updated");
        Ok(GateOutcome::Executed(NeedsVerification {
            expected: next,
            observed,
            relinked,
        }))
    }

    #[tracing::instrument(
        name = "recall_memory.delete_memory",
        skip(self, context, namespace, id),
        fields(caller = %context.caller_id(), namespace = %namespace, record_id = %id)
    )]
    pub async fn delete_memory(
        &self,
        context: &CallContext,
        namespace: Namespace,
        id: &str,
    ) -> GatewayResult<GateOutcome<Deleted>> {
        let operation = Operation::Delete;
        let id = require_id(id, is_memory_id, RecordKind::Memory)?;
        ensure_memory_namespace(namespace)?;
        self.authorize(context, namespace, operation)?;
        let args = json!({ "id": id, "namespace": namespace });
        if let Some(proposal) = self.propose(context, operation, namespace, args) {
            return Ok(GateOutcome::RequiresConfirmation(proposal));
        }
        self.delete_linked::<MemoryRecord>(context, namespace, id)
            .await
            .map(GateOutcome::Executed)
    }

    #[tracing::instrument(
        name = "recall_memory.create_person",
        skip(self, context, input),
        fields(caller = %context.caller_id(), record_id = tracing::field::Empty)
    )]
    pub async fn create_person(
        &self,
        context: &CallContext,
        input: NewPerson,
    ) -> GatewayResult<GateOutcome<Created<PersonRecord>>> {
        let operation = Operation::Create;
        let namespace = Namespace::People;
        let input = normalize_new_person(input)?;
        self.authorize(context, namespace, operation)?;
        if let Some(proposal) = self.propose(context, operation, namespace, to_args(&input)?) {
            return Ok(GateOutcome::RequiresConfirmation(proposal));
        }

        let id = new_person_id();
        tracing::Span::current().record("record_id", id.as_str());
        let edges = person_edges(&input.relations);
        let _guard = self
            .locks
            .lock_many(
                std::iter::once((namespace, id.as_str()))
                    .chain(edges.iter().map(|edge| (namespace, edge.target_id.as_str()))),
            )
            .await;

        let embedding = self
            .embed(
                operation,
                namespace,
                Some(id.as_str()),
                &person_embedding_text(&input.first_name, &input.last_name, &input.role),
            )
            .await?;
        let now = current_unix_timestamp_ms();
        let record = PersonRecord {
            id: id.clone(),
            first_name: input.first_name,
            last_name: input.last_name,
            role: input.role,
            identifiers: input.identifiers,
            relations: input.relations,
            created_at: now,
            updated_at: now,
        };
        let linked = self
            .write_linked(operation, namespace, None, &record, &embedding, now)
            .await?;
        let attempts = self.await_present(context, operation, namespace, &id).await?;
        tracing::debug!(attempts, linked = linked.len(), "person created");
        Ok(GateOutcome::Executed(Created {
            record,
            attempts,
            linked,
        }))
    }

    #[tracing::instrument(
        name = "recall_memory.update_person",
        skip(self, context, id, changes),
        fields(caller = %context.caller_id(), record_id = %id)
    )]
    pub async fn update_person(
        &self,
        context: &CallContext,
        id: &str,
        changes: &Map<String, Value>,
    ) -> GatewayResult<GateOutcome<NeedsVerification<PersonRecord>>> {
        let operation = Operation::Update;
        let namespace = Namespace::People;
        let mut update = PersonUpdate::from_fields(changes)?;
        let id = require_id(id, is_person_id, RecordKind::Person)?;
        if let Some(relations) = update.relations.take() {
            let edges = normalize_edges(
                Some(id),
                person_edges(&relations),
                is_person_id,
                RecordKind::Person,
            )?;
            update.relations = Some(person_relations(edges));
        }
        if let Some(user_ids) = update.user_ids.take() {
            update.user_ids = Some(normalize_identifiers(user_ids)?);
        }
        self.authorize(context, namespace, operation)?;
        let args = json!({ "id": id, "fields": Value::Object(changes.clone()) });
        if let Some(proposal) = self.propose(context, operation, namespace, args) {
            return Ok(GateOutcome::RequiresConfirmation(proposal));
        }

        let (_guard, current) = self
            .lock_with_links(operation, namespace, id, |stored| {
                let current = decode_existing::<PersonRecord>(stored, namespace, id)?;
                let mut next = current.clone();
                update.apply(&mut next);
                Ok(LinkPlan::between(&current.edges(), &next.edges()).target_ids())
            })
            .await?;
        let stored = current.ok_or_else(|| not_found(RecordKind::Person, namespace, id))?;
        let current = decode_person(&stored)?;
        let identifier_values = current.identifier_values();
        self.authorize_record(
            context,
            operation,
            namespace,
            RecordOwnership::Person {
                identifier_values: &identifier_values,
            },
        )?;

        let mut next = current.clone();
        let content_changed = update.apply(&mut next);
        let embedding_text = next.embedding_text();
        if embedding_text.trim().is_empty() {
            return Err(GatewayError::Validation(
                "person must keep a name or role".to_string(),
            ));
        }
        let vector = if content_changed {
            self.embed(operation, namespace, Some(id), &embedding_text)
                .await?
        } else {
            stored.vector.clone()
        };
        let now = current_unix_timestamp_ms();
        next.touch(now);
        let relinked = self
            .write_linked(operation, namespace, Some(&current), &next, &vector, now)
            .await?;
        let observed = self.observe::<PersonRecord>(operation, namespace, id).await;
        tracing::debug!(content_changed, relinked = relinked.len(), "person updated");
        Ok(GateOutcome::Executed(NeedsVerification {
            expected: next,
            observed,
            relinked,
        }))
    }

    #[tracing::instrument(
        name = "recall_memory.delete_person",
        skip(self, context, id),
        fields(caller = %context.caller_id(), record_id = %id)
    )]
    pub async fn delete_person(
        &self,
        context: &CallContext,
        id: &str,
    ) -> GatewayResult<GateOutcome<Deleted>> {
        let operation = Operation::Delete;
        let namespace = Namespace::People;
        let id = require_id(id, is_person_id, RecordKind::Person)?;
        self.authorize(context, namespace, operation)?;
        let args = json!({ "id": id });
        if let Some(proposal) = self.propose(context, operation, namespace, args) {
            return Ok(GateOutcome::RequiresConfirmation(proposal));
        }
        self.delete_linked::<PersonRecord>(context, namespace, id)
            .await
            .map(GateOutcome::Executed)
    }

    pub async fn get_memory(
        &self,
        context: &CallContext,
        namespace: Namespace,
        id: &str,
    ) -> GatewayResult<Option<MemoryRecord>> {
        ensure_memory_namespace(namespace)?;
        let id = require_id(id, is_memory_id, RecordKind::Memory)?;
        self.authorize(context, namespace, Operation::Read)?;
        let stored = self.fetch_stored(Operation::Read, namespace, id).await?;
        stored
            .map(|stored| decode_memory(&stored).map_err(GatewayError::from))
            .transpose()
    }

    pub async fn get_person(
        &self,
        context: &CallContext,
        id: &str,
    ) -> GatewayResult<Option<PersonRecord>> {
        let namespace = Namespace::People;
        let id = require_id(id, is_person_id, RecordKind::Person)?;
        self.authorize(context, namespace, Operation::Read)?;
        let stored = self.fetch_stored(Operation::Read, namespace, id).await?;
        stored
            .map(|stored| decode_person(&stored).map_err(GatewayError::from))
            .transpose()
    }

    /// Similarity search over one memory namespace; undecodable rows are skipped.
    #[tracing::instrument(
        name = "recall_memory.search_memories",
        skip(self, context, namespace, query, top_k),
        fields(caller = %context.caller_id(), namespace = %namespace)
    )]
    pub async fn search_memories(
        &self,
        context: &CallContext,
        namespace: Namespace,
        query: &str,
        top_k: Option<usize>,
    ) -> GatewayResult<Vec<MemoryMatch>> {
        let operation = Operation::Read;
        ensure_memory_namespace(namespace)?;
        let query = require_query(query)?;
        self.authorize(context, namespace, operation)?;
        let top_k = self.config.search.resolve_top_k(top_k);
        let vector = self.embed(operation, namespace, None, query).await?;
        let scored = self
            .store
            .query(namespace, &vector, top_k)
            .await
            .map_err(|error| GatewayError::backend(operation, namespace, None, error))?;
        Ok(scored
            .into_iter()
            .filter_map(|scored| match decode_memory(&scored.record) {
                Ok(record) => Some(MemoryMatch {
                    record,
                    score: scored.score,
                }),
                Err(error) => {
                    tracing::warn!(%error, "skipping undecodable memory in search results");
                    None
                }
            })
            .collect())
    }

    /// Similarity search over people by name and role.
    pub async fn search_people(
        &self,
        context: &CallContext,
        query: &str,
        top_k: Option<usize>,
    ) -> GatewayResult<Vec<PersonMatch>> {
        let operation = Operation::Read;
        let namespace = Namespace::People;
        let query = require_query(query)?;
        self.authorize(context, namespace, operation)?;
        let top_k = self.config.search.resolve_top_k(top_k);
        let vector = self.embed(operation, namespace, None, query).await?;
        let scored = self
            .store
            .query(namespace, &vector, top_k)
            .await
            .map_err(|error| GatewayError::backend(operation, namespace, None, error))?;
        Ok(scored
            .into_iter()
            .filter_map(|scored| match decode_person(&scored.record) {
                Ok(record) => Some(PersonMatch {
                    record,
                    score: scored.score,
                }),
                Err(error) => {
                    tracing::warn!(%error, "skipping undecodable person in search results");
                    None
                }
            })
            .collect())
    }

    pub async fn list_memories(
        &self,
        context: &CallContext,
        namespace: Namespace,
        page_token: Option<&str>,
    ) -> GatewayResult<RecordPage<MemoryRecord>> {
        ensure_memory_namespace(namespace)?;
        self.list_page(context, namespace, page_token, decode_memory)
            .await
    }

    pub async fn list_people(
        &self,
        context: &CallContext,
        page_token: Option<&str>,
    ) -> GatewayResult<RecordPage<PersonRecord>> {
        self.list_page(context, Namespace::People, page_token, decode_person)
            .await
    }

    /// Scans people pages for an identifier value, bounded by the configured page budget.
    #[tracing::instrument(
        name = "recall_memory.find_person_by_identifier",
        skip(self, context, identity),
        fields(caller = %context.caller_id())
    )]
    pub async fn find_person_by_identifier(
        &self,
        context: &CallContext,
        identity: &str,
    ) -> GatewayResult<Option<PersonRecord>> {
        let operation = Operation::Read;
        let namespace = Namespace::People;
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(GatewayError::Validation(
                "identifier cannot be empty".to_string(),
            ));
        }
        self.authorize(context, namespace, operation)?;

        let max_pages = self.config.search.identifier_scan_max_pages.max(1);
        let mut page_token: Option<String> = None;
        for _ in 0..max_pages {
            let page = self
                .store
                .list_paginated(namespace, page_token.as_deref())
                .await
                .map_err(|error| GatewayError::backend(operation, namespace, None, error))?;
            for stored in &page.records {
                match decode_person(stored) {
                    Ok(person) if person.has_identifier(identity) => return Ok(Some(person)),
                    Ok(_) => {}
                    Err(error) => tracing::warn!(%error, "skipping undecodable person"),
                }
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(None),
            }
        }
        tracing::warn!(max_pages, "identifier scan stopped at page budget");
        Ok(None)
    }

    /// Searches both memory namespaces concurrently; each side fails or is restricted independently.
    ///
    /// `top_k` bounds each side separately.
    #[tracing::instrument(
        name = "recall_memory.prefetch_context",
        skip(self, context, query, top_k),
        fields(caller = %context.caller_id())
    )]
    pub async fn prefetch_context(
        &self,
        context: &CallContext,
        query: &str,
        top_k: Option<usize>,
    ) -> GatewayResult<PrefetchContext> {
        let query = require_query(query)?;
        let (personal, professional) = tokio::join!(
            self.search_memories(context, Namespace::Personal, query, top_k),
            self.search_memories(context, Namespace::Professional, query, top_k),
        );
        Ok(PrefetchContext {
            personal: NamespaceLookup::from_result(personal),
            professional: NamespaceLookup::from_result(professional),
        })
    }

    fn authorize(
        &self,
        context: &CallContext,
        namespace: Namespace,
        operation: Operation,
    ) -> GatewayResult<()> {
        let decision = evaluate_access(
            &self.config.access,
            context.caller_id(),
            namespace,
            operation,
        );
        self.enforce(context, operation, namespace, decision)
    }

    fn authorize_record(
        &self,
        context: &CallContext,
        operation: Operation,
        namespace: Namespace,
        ownership: RecordOwnership<'_>,
    ) -> GatewayResult<()> {
        let decision = authorize_record_update(&self.config.access, context.caller_id(), ownership);
        self.enforce(context, operation, namespace, decision)
    }

    fn enforce(
        &self,
        context: &CallContext,
        operation: Operation,
        namespace: Namespace,
        decision: AccessDecision,
    ) -> GatewayResult<()> {
        if decision.is_allowed() {
            return Ok(());
        }
        tracing::warn!(
            caller = context.caller_id(),
            operation = %operation,
            namespace = %namespace,
            reason_code = decision.reason_code(),
            "request restricted"
        );
        Err(GatewayError::Restricted {
            operation,
            namespace,
        })
    }

    fn propose(
        &self,
        context: &CallContext,
        operation: Operation,
        namespace: Namespace,
        args: Value,
    ) -> Option<Proposal> {
        match self.gate.evaluate(context, operation, namespace, args) {
            GateDecision::Proposed(proposal) => Some(proposal),
            GateDecision::Confirmed(source) => {
                tracing::debug!(?source, "mutation confirmed");
                None
            }
        }
    }

    async fn embed(
        &self,
        operation: Operation,
        namespace: Namespace,
        record_id: Option<&str>,
        text: &str,
    ) -> GatewayResult<Vec<f32>> {
        self.embedder.embed(text).await.map_err(|error| match error {
            EmbeddingError::EmptyText => {
                GatewayError::Validation("cannot embed empty text".to_string())
            }
            error => GatewayError::backend(operation, namespace, record_id, error),
        })
    }

    async fn fetch_stored(
        &self,
        operation: Operation,
        namespace: Namespace,
        id: &str,
    ) -> GatewayResult<Option<StoredVector>> {
        let ids = [id.to_string()];
        let mut rows = self
            .store
            .fetch(&ids, namespace)
            .await
            .map_err(|error| GatewayError::backend(operation, namespace, Some(id), error))?;
        Ok(rows.remove(id))
    }

    async fn observe<R: LinkedRecord>(
        &self,
        operation: Operation,
        namespace: Namespace,
        id: &str,
    ) -> Option<R> {
        match self.fetch_stored(operation, namespace, id).await {
            Ok(Some(stored)) => match R::decode(&stored) {
                Ok(record) => Some(record),
                Err(error) => {
                    tracing::warn!(%error, "post-write read failed to decode");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(%error, "post-write read failed");
                None
            }
        }
    }

    async fn list_page<R>(
        &self,
        context: &CallContext,
        namespace: Namespace,
        page_token: Option<&str>,
        decode: fn(&StoredVector) -> Result<R, crate::error::CodecError>,
    ) -> GatewayResult<RecordPage<R>> {
        let operation = Operation::List;
        self.authorize(context, namespace, operation)?;
        let page = self
            .store
            .list_paginated(namespace, page_token)
            .await
            .map_err(|error| GatewayError::backend(operation, namespace, None, error))?;
        let records = page
            .records
            .iter()
            .filter_map(|stored| match decode(stored) {
                Ok(record) => Some(record),
                Err(error) => {
                    tracing::warn!(%error, "skipping undecodable record in listing");
                    None
                }
            })
            .collect();
        Ok(RecordPage {
            records,
            next_page_token: page.next_page_token,
        })
    }

    /// Locks `id` plus every record its links touch, re-reading under the lock.
    ///
    /// `targets_for` maps the current row to the related ids that must be held;
    /// when they change between attempts the locks are re-acquired.
    async fn lock_with_links<F>(
        &self,
        operation: Operation,
        namespace: Namespace,
        id: &str,
        mut targets_for: F,
    ) -> GatewayResult<(RecordLockGuard, Option<StoredVector>)>
    where
        F: FnMut(Option<&StoredVector>) -> GatewayResult<Vec<String>>,
    {
        let mut lock_targets = Vec::<String>::new();
        for attempt in 1..=LINK_LOCK_RETRIES {
            let guard = self
                .locks
                .lock_many(
                    std::iter::once((namespace, id))
                        .chain(lock_targets.iter().map(|target| (namespace, target.as_str()))),
                )
                .await;
            let current = self.fetch_stored(operation, namespace, id).await?;
            let needed = targets_for(current.as_ref())?;
            if needed.iter().all(|target| guard.covers(namespace, target)) {
                return Ok((guard, current));
            }
            tracing::debug!(attempt, "related records changed before locking; retrying");
            lock_targets = needed;
        }
        Err(GatewayError::LinkFailed {
            source_id: id.to_string(),
            target_id: lock_targets.first().cloned().unwrap_or_default(),
            partial: false,
            reason: "related records kept changing while acquiring locks".to_string(),
        })
    }

    async fn write_linked<R: LinkedRecord>(
        &self,
        operation: Operation,
        namespace: Namespace,
        before: Option<&R>,
        after: &R,
        vector: &[f32],
        now_ms: u64,
    ) -> GatewayResult<Vec<String>> {
        let before_edges = before.map(R::edges).unwrap_or_default();
        let plan = LinkPlan::between(&before_edges, &after.edges());
        let store = self.store.as_ref();
        let targets =
            prepare_targets::<R>(store, operation, namespace, after.record_id(), &plan, now_ms)
                .await?;
        let source = after.encode(vector)?;
        commit_linked(store, operation, namespace, source, &targets).await?;
        Ok(targets.into_iter().map(|change| change.id).collect())
    }

    async fn delete_linked<R: LinkedRecord>(
        &self,
        context: &CallContext,
        namespace: Namespace,
        id: &str,
    ) -> GatewayResult<Deleted> {
        let operation = Operation::Delete;
        let (_guard, current) = self
            .lock_with_links(operation, namespace, id, |stored| {
                Ok(stored
                    .and_then(|stored| R::decode(stored).ok())
                    .map(|record| edge_targets(&record.edges()))
                    .unwrap_or_default())
            })
            .await?;
        let existing = current
            .as_ref()
            .and_then(|stored| match R::decode(stored) {
                Ok(record) => Some(record),
                Err(error) => {
                    tracing::warn!(%error, "deleting record that fails to decode; links kept");
                    None
                }
            });

        self.store
            .delete(&[id.to_string()], namespace)
            .await
            .map_err(|error| GatewayError::backend(operation, namespace, Some(id), error))?;
        let attempts = self.await_absent(context, operation, namespace, id).await?;

        let report = match &existing {
            Some(record) => {
                strip_backlinks(
                    self.store.as_ref(),
                    namespace,
                    record,
                    current_unix_timestamp_ms(),
                )
                .await
            }
            None => UnlinkReport::default(),
        };
        if !report.failures.is_empty() {
            tracing::warn!(failures = report.failures.len(), "some reverse links were not removed");
        }
        Ok(Deleted {
            id: id.to_string(),
            namespace,
            already_absent: current.is_none(),
            attempts,
            unlinked: report.unlinked,
            unlink_failures: report.failures,
        })
    }

    async fn await_present(
        &self,
        context: &CallContext,
        operation: Operation,
        namespace: Namespace,
        id: &str,
    ) -> GatewayResult<usize> {
        self.await_visibility(context, operation, namespace, id, true)
            .await
    }

    async fn await_absent(
        &self,
        context: &CallContext,
        operation: Operation,
        namespace: Namespace,
        id: &str,
    ) -> GatewayResult<usize> {
        self.await_visibility(context, operation, namespace, id, false)
            .await
    }

    async fn await_visibility(
        &self,
        context: &CallContext,
        operation: Operation,
        namespace: Namespace,
        id: &str,
        expect_present: bool,
    ) -> GatewayResult<usize> {
        let store = self.store.as_ref();
        let ids = vec![id.to_string()];
        let outcome = poll_until(
            &self.config.verification.poll_policy(),
            self.clock.as_ref(),
            context.cancellation.as_ref(),
            move |_attempt| {
                let ids = ids.clone();
                async move {
                    let rows = store.fetch(&ids, namespace).await?;
                    let present = ids.iter().any(|id| rows.contains_key(id));
                    Ok::<_, StoreError>((present == expect_present).then_some(()))
                }
            },
        )
        .await
        .map_err(|error| GatewayError::backend(operation, namespace, Some(id), error))?;

        match outcome {
            PollOutcome::Converged { attempts, .. } => {
                tracing::debug!(attempts, expect_present, "write verified");
                Ok(attempts)
            }
            PollOutcome::Exhausted { attempts } => {
                tracing::warn!(attempts, expect_present, "write not reflected within budget");
                Err(GatewayError::VerificationTimeout {
                    operation,
                    namespace,
                    record_id: id.to_string(),
                    attempts,
                })
            }
            PollOutcome::Cancelled { attempts } => {
                tracing::warn!(attempts, "verification cancelled");
                Err(GatewayError::Cancelled {
                    operation,
                    namespace,
                    record_id: id.to_string(),
                })
            }
        }
    }
}

fn to_args<T: Serialize>(input: &T) -> GatewayResult<Value> {
    serde_json::to_value(input)
        .map_err(|error| GatewayError::Validation(format!("arguments cannot be encoded: {error}")))
}

fn ensure_memory_namespace(namespace: Namespace) -> GatewayResult<()> {
    if namespace.holds_memories() {
        return Ok(());
    }
    Err(GatewayError::Validation(format!(
        "namespace '{namespace}' does not hold memories"
    )))
}

fn require_id(id: &str, id_shape: fn(&str) -> bool, kind: RecordKind) -> GatewayResult<&str> {
    let id = id.trim();
    if id_shape(id) {
        return Ok(id);
    }
    Err(GatewayError::Validation(format!(
        "'{id}' is not a valid {} id",
        kind.as_str()
    )))
}

fn require_query(query: &str) -> GatewayResult<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(GatewayError::Validation(
            "search query cannot be empty".to_string(),
        ));
    }
    Ok(query)
}

fn not_found(kind: RecordKind, namespace: Namespace, id: &str) -> GatewayError {
    GatewayError::Validation(format!(
        "no {} '{id}' in namespace '{namespace}'",
        kind.as_str()
    ))
}

fn decode_existing<R: LinkedRecord>(
    stored: Option<&StoredVector>,
    namespace: Namespace,
    id: &str,
) -> GatewayResult<R> {
    let stored = stored.ok_or_else(|| not_found(R::KIND, namespace, id))?;
    Ok(R::decode(stored)?)
}

fn edge_targets(edges: &[LinkEdge]) -> Vec<String> {
    edges
        .iter()
        .map(|edge| edge.target_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn memory_edges(links: &[MemoryLink]) -> Vec<LinkEdge> {
    links
        .iter()
        .map(|link| LinkEdge::new(link.id.clone(), link.relation_type.clone()))
        .collect()
}

fn memory_links(edges: Vec<LinkEdge>) -> Vec<MemoryLink> {
    edges
        .into_iter()
        .map(|edge| MemoryLink {
            id: edge.target_id,
            relation_type: edge.relation_type,
        })
        .collect()
}

fn person_edges(relations: &[PersonRelation]) -> Vec<LinkEdge> {
    relations
        .iter()
        .map(|relation| {
            LinkEdge::new(
                relation.related_person_id.clone(),
                relation.relation_type.clone(),
            )
        })
        .collect()
}

fn person_relations(edges: Vec<LinkEdge>) -> Vec<PersonRelation> {
    edges
        .into_iter()
        .map(|edge| PersonRelation {
            related_person_id: edge.target_id,
            relation_type: edge.relation_type,
        })
        .collect()
}

fn normalize_tags(tags: BTreeSet<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn normalize_person_refs(people: Vec<String>) -> GatewayResult<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(people.len());
    for person in people {
        let person = person.trim().to_string();
        if !is_person_id(&person) {
            return Err(GatewayError::Validation(format!(
                "'{person}' is not a valid person id"
            )));
        }
        if seen.insert(person.clone()) {
            normalized.push(person);
        }
    }
    Ok(normalized)
}

fn normalize_identifiers(
    identifiers: Vec<PersonIdentifier>,
) -> GatewayResult<Vec<PersonIdentifier>> {
    let mut normalized = Vec::<PersonIdentifier>::with_capacity(identifiers.len());
    for identifier in identifiers {
        let identifier = PersonIdentifier {
            id_type: identifier.id_type.trim().to_string(),
            id_value: identifier.id_value.trim().to_string(),
        };
        if identifier.id_type.is_empty() || identifier.id_value.is_empty() {
            return Err(GatewayError::Validation(
                "identifiers need both id_type and id_value".to_string(),
            ));
        }
        if !normalized.contains(&identifier) {
            normalized.push(identifier);
        }
    }
    Ok(normalized)
}

fn normalize_new_memory(mut input: NewMemory) -> GatewayResult<NewMemory> {
    ensure_memory_namespace(input.namespace)?;
    input.short_description = input.short_description.trim().to_string();
    input.category = input.category.trim().to_string();
    if input.text.trim().is_empty() && input.short_description.is_empty() {
        return Err(GatewayError::Validation(
            "memory needs text or a short_description".to_string(),
        ));
    }
    input.tags = normalize_tags(input.tags);
    input.related_people = normalize_person_refs(input.related_people)?;
    let edges = normalize_edges(
        None,
        memory_edges(&input.related_memories),
        is_memory_id,
        RecordKind::Memory,
    )?;
    input.related_memories = memory_links(edges);
    Ok(input)
}

fn normalize_new_person(mut input: NewPerson) -> GatewayResult<NewPerson> {
    input.first_name = input.first_name.trim().to_string();
    input.last_name = input.last_name.trim().to_string();
    input.role = input.role.trim().to_string();
    if input.first_name.is_empty() && input.last_name.is_empty() {
        return Err(GatewayError::Validation(
            "person needs a first_name or last_name".to_string(),
        ));
    }
    input.identifiers = normalize_identifiers(input.identifiers)?;
    let edges = normalize_edges(
        None,
        person_edges(&input.relations),
        is_person_id,
        RecordKind::Person,
    )?;
    input.relations = person_relations(edges);
    Ok(input)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use recall_access::{AccessPolicyConfig, Namespace};
    use recall_core::{CooperativeCancellationToken, VirtualPollClock};
    use serde_json::{json, Map, Value};

    use super::{MemoryGateway, NamespaceLookup};
    use crate::codec::{decode_memory, decode_person, is_memory_id, is_person_id};
    use crate::config::GatewayConfig;
    use crate::confirmation::CallContext;
    use crate::embedding::HashEmbeddingProvider;
    use crate::error::GatewayError;
    use crate::records::{
        MemoryLink, MemoryRecord, NewMemory, NewPerson, PersonIdentifier, PersonRecord,
        PersonRelation,
    };
    use crate::store::{InMemoryVectorStore, WriteVisibility};

    const OWNER: &str = "owner@home.net";
    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@other.com";
    const ROOT: &str = "root@example.com";

    struct Harness {
        store: Arc<InMemoryVectorStore>,
        clock: Arc<VirtualPollClock>,
        gateway: MemoryGateway,
    }

    fn harness() -> Harness {
        harness_with_store(InMemoryVectorStore::new())
    }

    fn harness_with_store(store: InMemoryVectorStore) -> Harness {
        let store = Arc::new(store);
        let clock = Arc::new(VirtualPollClock::new());
        let config = GatewayConfig {
            access: AccessPolicyConfig {
                owner_identity: OWNER.to_string(),
                team_domain: "@example.com".to_string(),
                superusers: vec![ROOT.to_string()],
            },
            ..GatewayConfig::default()
        };
        let gateway = MemoryGateway::new(
            store.clone(),
            Arc::new(HashEmbeddingProvider::default()),
            config,
        )
        .with_poll_clock(clock.clone());
        Harness {
            store,
            clock,
            gateway,
        }
    }

    fn confirmed(caller: &str) -> CallContext {
        CallContext::new(caller).with_latest_message("YES, go ahead")
    }

    fn new_memory(namespace: Namespace, text: &str) -> NewMemory {
        NewMemory {
            namespace,
            text: text.to_string(),
            short_description: String::new(),
            category: "memory".to_string(),
            tags: BTreeSet::new(),
            related_people: Vec::new(),
            related_memories: Vec::new(),
        }
    }

    fn new_person(first_name: &str, identifier: &str) -> NewPerson {
        NewPerson {
            first_name: first_name.to_string(),
            last_name: String::new(),
            role: "engineer".to_string(),
            identifiers: vec![PersonIdentifier {
                id_type: "email".to_string(),
                id_value: identifier.to_string(),
            }],
            relations: Vec::new(),
        }
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    async fn create(harness: &Harness, caller: &str, input: NewMemory) -> MemoryRecord {
        harness
            .gateway
            .create_memory(&confirmed(caller), input)
            .await
            .expect("create")
            .executed()
            .expect("confirmed create executes")
            .record
    }

    async fn stored_memory(harness: &Harness, namespace: Namespace, id: &str) -> MemoryRecord {
        let row = harness
            .store
            .peek(namespace, id)
            .await
            .expect("row present");
        decode_memory(&row).expect("decode")
    }

    #[tokio::test]
    async fn functional_create_without_affirmation_is_proposed_with_zero_writes() {
        let harness = harness();
        let outcome = harness
            .gateway
            .create_memory(
                &CallContext::new(ALICE).with_latest_message("remember that I renewed my lease"),
                new_memory(Namespace::Professional, "Renewed lease"),
            )
            .await
            .expect("proposal");
        let proposal = outcome.proposal().expect("requires confirmation");
        assert_eq!(proposal.args["text"], "Renewed lease");
        assert_eq!(proposal.args["namespace"], "professional");
        assert_eq!(harness.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn functional_confirmed_create_writes_once_and_verifies() {
        let harness = harness();
        let outcome = harness
            .gateway
            .create_memory(
                &confirmed(ALICE),
                new_memory(Namespace::Professional, "Renewed lease"),
            )
            .await
            .expect("create");
        let created = outcome.executed().expect("executed");
        assert!(is_memory_id(&created.record.id));
        assert_eq!(created.record.owner_id, ALICE);
        assert_eq!(created.attempts, 1);
        assert_eq!(harness.store.upsert_calls(), 1);
        assert_eq!(
            stored_memory(&harness, Namespace::Professional, &created.record.id).await,
            created.record
        );
    }

    #[tokio::test]
    async fn functional_ticket_confirms_identical_resubmission() {
        let harness = harness();
        let input = new_memory(Namespace::Personal, "Dentist on Friday");
        let proposal = harness
            .gateway
            .create_memory(&CallContext::new(OWNER), input.clone())
            .await
            .expect("proposal")
            .proposal()
            .cloned()
            .expect("proposed");

        let mut altered = input.clone();
        altered.text = "Dentist on Monday".to_string();
        let outcome = harness
            .gateway
            .create_memory(
                &CallContext::new(OWNER).with_confirmation_ticket(proposal.ticket.clone()),
                altered,
            )
            .await
            .expect("altered call");
        assert!(outcome.proposal().is_some(), "ticket must not confirm other args");

        let outcome = harness
            .gateway
            .create_memory(
                &CallContext::new(OWNER).with_confirmation_ticket(proposal.ticket),
                input,
            )
            .await
            .expect("confirmed call");
        assert!(outcome.executed().is_some());
        assert_eq!(harness.store.upsert_calls(), 1);
    }

    #[tokio::test]
    async fn regression_create_verification_times_out_with_attempted_id() {
        let harness = harness();
        harness.store.set_write_visibility(WriteVisibility::Never);
        let error = harness
            .gateway
            .create_memory(&confirmed(ALICE), new_memory(Namespace::Professional, "Lost"))
            .await
            .expect_err("never visible");
        let GatewayError::VerificationTimeout {
            record_id,
            attempts,
            ..
        } = error
        else {
            panic!("expected verification timeout");
        };
        assert!(is_memory_id(&record_id));
        assert_eq!(attempts, 10);
        assert_eq!(harness.clock.sleep_count(), 9);
    }

    #[tokio::test]
    async fn functional_lagging_store_converges_within_budget() {
        let harness = harness();
        harness
            .store
            .set_write_visibility(WriteVisibility::AfterReads(3));
        let created = harness
            .gateway
            .create_memory(&confirmed(ALICE), new_memory(Namespace::Professional, "Lag"))
            .await
            .expect("create")
            .executed()
            .expect("executed");
        assert!(created.attempts > 1);
        assert!(created.attempts <= 10);
    }

    #[tokio::test]
    async fn regression_cancelled_verification_reports_cancelled() {
        let harness = harness();
        harness.store.set_write_visibility(WriteVisibility::Never);
        let token = CooperativeCancellationToken::new();
        token.cancel();
        let context = confirmed(ALICE).with_cancellation(token);
        let error = harness
            .gateway
            .create_memory(&context, new_memory(Namespace::Professional, "Cancel me"))
            .await
            .expect_err("cancelled");
        assert!(matches!(error, GatewayError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn regression_restricted_search_never_touches_store() {
        let harness = harness();
        let error = harness
            .gateway
            .search_memories(
                &CallContext::new(BOB),
                Namespace::Professional,
                "project deadline",
                None,
            )
            .await
            .expect_err("restricted");
        assert!(matches!(error, GatewayError::Restricted { .. }));
        assert_eq!(harness.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn regression_unknown_update_field_fails_before_gate_and_store() {
        let harness = harness();
        let error = harness
            .gateway
            .update_memory(
                &confirmed(ALICE),
                Namespace::Professional,
                "mem_2024_01_01_00000000",
                &fields(json!({ "unknown_field": "x" })),
            )
            .await
            .expect_err("validation");
        assert!(matches!(error, GatewayError::Validation(_)));
        assert_eq!(harness.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn regression_non_superuser_delete_is_restricted_with_zero_calls() {
        let harness = harness();
        let error = harness
            .gateway
            .delete_memory(
                &confirmed(ALICE),
                Namespace::Professional,
                "mem_2024_01_01_00000000",
            )
            .await
            .expect_err("restricted");
        assert!(matches!(error, GatewayError::Restricted { .. }));
        assert_eq!(harness.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn functional_double_delete_is_noop_success() {
        let harness = harness();
        let record = create(&harness, ALICE, new_memory(Namespace::Professional, "Temp")).await;

        let first = harness
            .gateway
            .delete_memory(&confirmed(ROOT), Namespace::Professional, &record.id)
            .await
            .expect("first delete")
            .executed()
            .expect("executed");
        assert!(!first.already_absent);
        assert!(harness.store.is_empty(Namespace::Professional).await);

        let second = harness
            .gateway
            .delete_memory(&confirmed(ROOT), Namespace::Professional, &record.id)
            .await
            .expect("second delete")
            .executed()
            .expect("executed");
        assert!(second.already_absent);
        assert_eq!(second.attempts, 1);
    }

    #[tokio::test]
    async fn functional_delete_without_affirmation_is_proposed() {
        let harness = harness();
        let outcome = harness
            .gateway
            .delete_memory(
                &CallContext::new(ROOT),
                Namespace::Professional,
                "mem_2024_01_01_00000000",
            )
            .await
            .expect("proposal");
        assert!(outcome.proposal().is_some());
        assert_eq!(harness.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn functional_created_link_is_bidirectional() {
        let harness = harness();
        let target = create(&harness, ALICE, new_memory(Namespace::Professional, "Kickoff")).await;
        let mut input = new_memory(Namespace::Professional, "Retro");
        input.related_memories = vec![MemoryLink {
            id: target.id.clone(),
            relation_type: "follows".to_string(),
        }];
        let source = create(&harness, ALICE, input).await;

        let target_after = stored_memory(&harness, Namespace::Professional, &target.id).await;
        assert_eq!(
            target_after.related_memories,
            vec![MemoryLink {
                id: source.id.clone(),
                relation_type: "precedes".to_string(),
            }]
        );
        let source_after = stored_memory(&harness, Namespace::Professional, &source.id).await;
        assert_eq!(source_after.related_memories.len(), 1);
    }

    #[tokio::test]
    async fn regression_link_to_missing_memory_is_validation_error() {
        let harness = harness();
        let mut input = new_memory(Namespace::Professional, "Dangling");
        input.related_memories = vec![MemoryLink {
            id: "mem_2024_01_01_0000beef".to_string(),
            relation_type: "related_to".to_string(),
        }];
        let error = harness
            .gateway
            .create_memory(&confirmed(ALICE), input)
            .await
            .expect_err("missing target");
        assert!(matches!(error, GatewayError::Validation(_)));
        assert_eq!(harness.store.mutation_calls(), 0);
    }

    #[tokio::test]
    async fn functional_update_relinks_and_returns_needs_verification() {
        let harness = harness();
        let first = create(&harness, ALICE, new_memory(Namespace::Professional, "One")).await;
        let second = create(&harness, ALICE, new_memory(Namespace::Professional, "Two")).await;
        let source = create(&harness, ALICE, new_memory(Namespace::Professional, "Hub")).await;

        let link_to = |id: &str| json!({ "related_memories": [{ "id": id, "relation_type": "related_to" }] });
        harness
            .gateway
            .update_memory(
                &confirmed(ALICE),
                Namespace::Professional,
                &source.id,
                &fields(link_to(&first.id)),
            )
            .await
            .expect("link first");
        let outcome = harness
            .gateway
            .update_memory(
                &confirmed(ALICE),
                Namespace::Professional,
                &source.id,
                &fields(link_to(&second.id)),
            )
            .await
            .expect("relink to second")
            .executed()
            .expect("executed");
        assert!(outcome.is_reflected());
        assert_eq!(outcome.relinked.len(), 2);
        assert!(stored_memory(&harness, Namespace::Professional, &first.id)
            .await
            .related_memories
            .is_empty());
        assert_eq!(
            stored_memory(&harness, Namespace::Professional, &second.id)
                .await
                .related_memories[0]
                .id,
            source.id
        );
    }

    #[tokio::test]
    async fn functional_update_reembeds_only_on_content_change() {
        let harness = harness();
        let record = create(&harness, ALICE, new_memory(Namespace::Professional, "Budget draft")).await;

        let tagged = harness
            .gateway
            .update_memory(
                &confirmed(ALICE),
                Namespace::Professional,
                &record.id,
                &fields(json!({ "tags": [" finance ", ""] })),
            )
            .await
            .expect("tag update")
            .executed()
            .expect("executed");
        assert_eq!(tagged.expected.embedding, record.embedding);
        assert_eq!(
            tagged.expected.tags,
            BTreeSet::from(["finance".to_string()])
        );
        assert!(tagged.expected.updated_at >= record.updated_at);

        let rewritten = harness
            .gateway
            .update_memory(
                &confirmed(ALICE),
                Namespace::Professional,
                &record.id,
                &fields(json!({ "text": "Budget approved by finance" })),
            )
            .await
            .expect("text update")
            .executed()
            .expect("executed");
        assert_ne!(rewritten.expected.embedding, record.embedding);
        assert_eq!(rewritten.observed, Some(rewritten.expected.clone()));
    }

    #[tokio::test]
    async fn regression_update_by_non_owner_is_restricted_after_confirmation() {
        let harness = harness();
        let record = create(&harness, ALICE, new_memory(Namespace::Professional, "Mine")).await;
        let upserts = harness.store.upsert_calls();
        let error = harness
            .gateway
            .update_memory(
                &confirmed("carol@example.com"),
                Namespace::Professional,
                &record.id,
                &fields(json!({ "text": "Theirs" })),
            )
            .await
            .expect_err("not owner");
        assert!(matches!(error, GatewayError::Restricted { .. }));
        assert_eq!(harness.store.upsert_calls(), upserts);
    }

    #[tokio::test]
    async fn regression_update_clearing_all_text_is_validation_without_write() {
        let harness = harness();
        let record = create(&harness, ALICE, new_memory(Namespace::Professional, "Standup notes")).await;
        let upserts = harness.store.upsert_calls();
        let error = harness
            .gateway
            .update_memory(
                &confirmed(ALICE),
                Namespace::Professional,
                &record.id,
                &fields(json!({ "text": "", "short_description": "   " })),
            )
            .await
            .expect_err("empty memory");
        assert!(matches!(error, GatewayError::Validation(_)), "{error}");
        assert!(!error.is_retryable());
        assert_eq!(harness.store.upsert_calls(), upserts);
        assert_eq!(
            stored_memory(&harness, Namespace::Professional, &record.id).await,
            record
        );
    }

    #[tokio::test]
    async fn functional_update_trims_short_description_and_category() {
        let harness = harness();
        let record = create(&harness, ALICE, new_memory(Namespace::Professional, "Weekly sync")).await;
        let updated = harness
            .gateway
            .update_memory(
                &confirmed(ALICE),
                Namespace::Professional,
                &record.id,
                &fields(json!({ "short_description": "  sync  ", "category": " meetings " })),
            )
            .await
            .expect("update")
            .executed()
            .expect("executed");
        assert_eq!(updated.expected.short_description, "sync");
        assert_eq!(updated.expected.category, "meetings");
        assert!(updated.is_reflected());
    }

    #[tokio::test]
    async fn functional_list_people_pages_with_token_and_restricts_outsiders() {
        let harness = harness_with_store(InMemoryVectorStore::with_page_size(1));
        let context = confirmed(OWNER);
        let mut created = BTreeSet::new();
        for (name, email) in [("Ana", "ana@example.com"), ("Ben", "ben@example.com")] {
            let person = harness
                .gateway
                .create_person(&context, new_person(name, email))
                .await
                .expect("create person")
                .executed()
                .expect("executed")
                .record;
            created.insert(person.id);
        }

        let reader = CallContext::new(ALICE);
        let first = harness
            .gateway
            .list_people(&reader, None)
            .await
            .expect("first page");
        assert_eq!(first.records.len(), 1);
        let token = first.next_page_token.clone().expect("second page token");
        let second = harness
            .gateway
            .list_people(&reader, Some(&token))
            .await
            .expect("second page");
        assert_eq!(second.records.len(), 1);
        assert!(second.next_page_token.is_none());

        let listed = first
            .records
            .iter()
            .chain(second.records.iter())
            .map(|person| person.id.clone())
            .collect::<BTreeSet<_>>();
        assert_eq!(listed, created);

        let calls = harness.store.total_calls();
        let error = harness
            .gateway
            .list_people(&CallContext::new(BOB), None)
            .await
            .expect_err("outsider");
        assert!(matches!(error, GatewayError::Restricted { .. }));
        assert_eq!(harness.store.total_calls(), calls);
    }

    #[tokio::test]
    async fn functional_person_lifecycle_with_relations_and_identifier_lookup() {
        let harness = harness();
        let context = confirmed(OWNER);
        let manager = harness
            .gateway
            .create_person(&context, new_person("Maya", "maya@example.com"))
            .await
            .expect("create manager")
            .executed()
            .expect("executed")
            .record;
        assert!(is_person_id(&manager.id));

        let mut report = new_person("Dave", "Dave@Example.com");
        report.relations = vec![PersonRelation {
            related_person_id: manager.id.clone(),
            relation_type: "reports_to".to_string(),
        }];
        let dave = harness
            .gateway
            .create_person(&context, report)
            .await
            .expect("create report")
            .executed()
            .expect("executed")
            .record;

        let manager_row = harness
            .store
            .peek(Namespace::People, &manager.id)
            .await
            .expect("manager row");
        let manager_after: PersonRecord = decode_person(&manager_row).expect("decode");
        assert_eq!(
            manager_after.relations,
            vec![PersonRelation {
                related_person_id: dave.id.clone(),
                relation_type: "manager_of".to_string(),
            }]
        );

        let found = harness
            .gateway
            .find_person_by_identifier(&CallContext::new(ALICE), " dave@example.com ")
            .await
            .expect("lookup")
            .expect("found");
        assert_eq!(found.id, dave.id);

        let updated = harness
            .gateway
            .update_person(
                &confirmed("dave@example.com"),
                &dave.id,
                &fields(json!({ "role": "staff engineer" })),
            )
            .await
            .expect("self update")
            .executed()
            .expect("executed");
        assert_eq!(updated.expected.role, "staff engineer");

        let deleted = harness
            .gateway
            .delete_person(&confirmed(ROOT), &dave.id)
            .await
            .expect("delete")
            .executed()
            .expect("executed");
        assert_eq!(deleted.unlinked, vec![manager.id.clone()]);
        let manager_row = harness
            .store
            .peek(Namespace::People, &manager.id)
            .await
            .expect("manager row");
        assert!(decode_person(&manager_row)
            .expect("decode")
            .relations
            .is_empty());
    }

    #[tokio::test]
    async fn functional_prefetch_reports_each_namespace_independently() {
        let harness = harness();
        create(&harness, OWNER, new_memory(Namespace::Personal, "Lease renewal signed")).await;
        create(&harness, ALICE, new_memory(Namespace::Professional, "Lease for office")).await;

        let context = harness
            .gateway
            .prefetch_context(&CallContext::new(ALICE), "lease", None)
            .await
            .expect("prefetch");
        assert_eq!(context.personal, NamespaceLookup::Restricted);
        assert_eq!(context.professional.matches().len(), 1);

        let context = harness
            .gateway
            .prefetch_context(&CallContext::new(ROOT), "lease", None)
            .await
            .expect("prefetch");
        assert_eq!(context.personal.matches().len(), 1);
        assert_eq!(context.professional.matches().len(), 1);
    }

    #[tokio::test]
    async fn functional_list_pages_and_store_outage_maps_to_unavailable() {
        let harness = harness();
        create(&harness, ALICE, new_memory(Namespace::Professional, "A")).await;
        create(&harness, ALICE, new_memory(Namespace::Professional, "B")).await;
        let page = harness
            .gateway
            .list_memories(&CallContext::new(ALICE), Namespace::Professional, None)
            .await
            .expect("list");
        assert_eq!(page.records.len(), 2);
        assert!(page.next_page_token.is_none());

        harness.store.set_unavailable(Some("maintenance"));
        let error = harness
            .gateway
            .get_memory(
                &CallContext::new(ALICE),
                Namespace::Professional,
                &page.records[0].id,
            )
            .await
            .expect_err("outage");
        assert!(error.is_retryable());
    }
}
