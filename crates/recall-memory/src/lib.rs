//! Write-gated memory and people store for Recall.
//!
//! Provides the record codec, store and embedding contracts with in-memory
//! implementations, the confirmation gate, per-record write locks, the
//! bidirectional link maintainer and the [`MemoryGateway`] that orchestrates
//! authorized, confirmed and verified mutations.

pub mod codec;
pub mod config;
pub mod confirmation;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod links;
pub mod locks;
pub mod records;
pub mod store;
pub mod update;

pub use codec::{
    decode_memory, decode_person, encode_memory, encode_person, format_record_id, is_memory_id,
    is_person_id, new_memory_id, new_person_id, MEMORY_ID_PREFIX, PERSON_ID_PREFIX,
};
pub use config::{
    load_gateway_config, validate_gateway_config, GatewayConfig, SearchConfig,
    VerificationConfig,
};
pub use confirmation::{
    canonical_json, AffirmationSource, CallContext, ConfirmationConfig, ConfirmationGate,
    ConfirmationState, GateDecision, GateOutcome, Proposal, REQUIRES_CONFIRMATION_STATUS,
};
pub use embedding::{cosine_similarity, embed_text_vector, EmbeddingProvider, HashEmbeddingProvider};
pub use error::{
    BackendError, CodecError, EmbeddingError, GatewayError, GatewayResult, StoreError,
    StoreResult,
};
pub use gateway::{
    Created, Deleted, MemoryGateway, MemoryMatch, NamespaceLookup, NeedsVerification,
    PersonMatch, PrefetchContext, RecordPage,
};
pub use links::{inverse_relation, LinkEdge, LinkPlan};
pub use locks::{RecordLockGuard, RecordLocks};
pub use records::{
    MemoryLink, MemoryRecord, NewMemory, NewPerson, PersonIdentifier, PersonRecord,
    PersonRelation, RecordKind,
};
pub use store::{
    InMemoryVectorStore, ListPage, Metadata, MetadataValue, ScoredVector, StoredVector,
    VectorStore, WriteVisibility,
};
pub use update::{MemoryUpdate, PersonUpdate, MEMORY_UPDATE_FIELDS, PERSON_UPDATE_FIELDS};
