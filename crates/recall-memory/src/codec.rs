//! Canonical record ids and conversion between typed records and store rows.
//!
//! Store metadata only carries scalars and string lists, so composite fields
//! (`related_memories`, `identifiers`, `relations`) travel as JSON-array
//! strings. All of that encoding lives here.

use std::collections::BTreeSet;

use recall_access::Namespace;
use recall_core::utc_date_stamp;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;
use crate::records::{MemoryRecord, PersonRecord, RecordKind};
use crate::store::{Metadata, MetadataValue, StoredVector};

pub const MEMORY_ID_PREFIX: &str = "mem";
pub const PERSON_ID_PREFIX: &str = "per";
const RECORD_ID_SUFFIX_LEN: usize = 8;

const FIELD_RECORD_TYPE: &str = "record_type";
const FIELD_OWNER_ID: &str = "owner_id";
const FIELD_NAMESPACE: &str = "namespace";
const FIELD_TEXT: &str = "text";
const FIELD_SHORT_DESCRIPTION: &str = "short_description";
const FIELD_CATEGORY: &str = "category";
const FIELD_TAGS: &str = "tags";
const FIELD_RELATED_PEOPLE: &str = "related_people";
const FIELD_RELATED_MEMORIES: &str = "related_memories";
const FIELD_FIRST_NAME: &str = "first_name";
const FIELD_LAST_NAME: &str = "last_name";
const FIELD_ROLE: &str = "role";
const FIELD_IDENTIFIERS: &str = "identifiers";
const FIELD_RELATIONS: &str = "relations";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_UPDATED_AT: &str = "updated_at";

/// Generates `mem_<YYYY>_<MM>_<DD>_<8-hex>` for today's UTC date.
pub fn new_memory_id() -> String {
    format_record_id(MEMORY_ID_PREFIX, &utc_date_stamp(), &random_hex_suffix())
}

/// Generates `per_<YYYY>_<MM>_<DD>_<8-hex>` for today's UTC date.
pub fn new_person_id() -> String {
    format_record_id(PERSON_ID_PREFIX, &utc_date_stamp(), &random_hex_suffix())
}

/// Joins an id prefix, a `YYYY_MM_DD` stamp and a hex suffix.
pub fn format_record_id(prefix: &str, date_stamp: &str, suffix: &str) -> String {
    format!("{prefix}_{date_stamp}_{suffix}")
}

fn random_hex_suffix() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(RECORD_ID_SUFFIX_LEN)
        .collect()
}

pub fn is_memory_id(id: &str) -> bool {
    has_record_id_shape(id, MEMORY_ID_PREFIX)
}

pub fn is_person_id(id: &str) -> bool {
    has_record_id_shape(id, PERSON_ID_PREFIX)
}

fn has_record_id_shape(id: &str, prefix: &str) -> bool {
    let parts = id.split('_').collect::<Vec<_>>();
    let [head, year, month, day, suffix] = parts.as_slice() else {
        return false;
    };
    let all_digits = |value: &str, len: usize| {
        value.len() == len && value.chars().all(|ch| ch.is_ascii_digit())
    };
    *head == prefix
        && all_digits(*year, 4)
        && all_digits(*month, 2)
        && all_digits(*day, 2)
        && suffix.len() == RECORD_ID_SUFFIX_LEN
        && suffix
            .chars()
            .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch))
}

/// Encodes a memory into a store row.
pub fn encode_memory(record: &MemoryRecord) -> Result<StoredVector, CodecError> {
    let mut metadata = Metadata::new();
    put_text(&mut metadata, FIELD_RECORD_TYPE, RecordKind::Memory.as_str());
    put_text(&mut metadata, FIELD_OWNER_ID, &record.owner_id);
    put_text(&mut metadata, FIELD_NAMESPACE, record.namespace.as_str());
    put_text(&mut metadata, FIELD_TEXT, &record.text);
    put_text(&mut metadata, FIELD_SHORT_DESCRIPTION, &record.short_description);
    put_text(&mut metadata, FIELD_CATEGORY, &record.category);
    metadata.insert(
        FIELD_TAGS.to_string(),
        MetadataValue::List(record.tags.iter().cloned().collect()),
    );
    metadata.insert(
        FIELD_RELATED_PEOPLE.to_string(),
        MetadataValue::List(record.related_people.clone()),
    );
    put_composite(
        &mut metadata,
        &record.id,
        FIELD_RELATED_MEMORIES,
        &record.related_memories,
    )?;
    put_timestamps(&mut metadata, record.created_at, record.updated_at);
    Ok(StoredVector {
        id: record.id.clone(),
        vector: record.embedding.clone(),
        metadata,
    })
}

/// Encodes a person into a store row carrying `vector`.
pub fn encode_person(record: &PersonRecord, vector: Vec<f32>) -> Result<StoredVector, CodecError> {
    let mut metadata = Metadata::new();
    put_text(&mut metadata, FIELD_RECORD_TYPE, RecordKind::Person.as_str());
    put_text(&mut metadata, FIELD_FIRST_NAME, &record.first_name);
    put_text(&mut metadata, FIELD_LAST_NAME, &record.last_name);
    put_text(&mut metadata, FIELD_ROLE, &record.role);
    put_composite(&mut metadata, &record.id, FIELD_IDENTIFIERS, &record.identifiers)?;
    put_composite(&mut metadata, &record.id, FIELD_RELATIONS, &record.relations)?;
    put_timestamps(&mut metadata, record.created_at, record.updated_at);
    Ok(StoredVector {
        id: record.id.clone(),
        vector,
        metadata,
    })
}

/// Decodes a store row into a memory.
pub fn decode_memory(stored: &StoredVector) -> Result<MemoryRecord, CodecError> {
    let id = stored.id.as_str();
    let metadata = &stored.metadata;
    ensure_record_kind(id, metadata, RecordKind::Memory)?;

    let owner_id = text_field(id, metadata, FIELD_OWNER_ID)?
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| CodecError::MissingField {
            record_id: id.to_string(),
            field: FIELD_OWNER_ID,
        })?;
    let raw_namespace =
        text_field(id, metadata, FIELD_NAMESPACE)?.ok_or_else(|| CodecError::MissingField {
            record_id: id.to_string(),
            field: FIELD_NAMESPACE,
        })?;
    let namespace = raw_namespace
        .parse::<Namespace>()
        .map_err(|error| CodecError::InvalidField {
            record_id: id.to_string(),
            field: FIELD_NAMESPACE,
            reason: error.to_string(),
        })?;
    if !namespace.holds_memories() {
        return Err(CodecError::InvalidField {
            record_id: id.to_string(),
            field: FIELD_NAMESPACE,
            reason: format!("namespace '{namespace}' does not hold memories"),
        });
    }

    let (created_at, updated_at) = timestamps(id, metadata)?;
    Ok(MemoryRecord {
        id: id.to_string(),
        owner_id,
        namespace,
        text: text_field(id, metadata, FIELD_TEXT)?.unwrap_or_default(),
        short_description: text_field(id, metadata, FIELD_SHORT_DESCRIPTION)?.unwrap_or_default(),
        category: text_field(id, metadata, FIELD_CATEGORY)?.unwrap_or_default(),
        tags: list_field(id, metadata, FIELD_TAGS)?
            .into_iter()
            .collect::<BTreeSet<_>>(),
        embedding: stored.vector.clone(),
        related_people: list_field(id, metadata, FIELD_RELATED_PEOPLE)?,
        related_memories: composite_field(id, metadata, FIELD_RELATED_MEMORIES)?,
        created_at,
        updated_at,
    })
}

/// Decodes a store row into a person.
pub fn decode_person(stored: &StoredVector) -> Result<PersonRecord, CodecError> {
    let id = stored.id.as_str();
    let metadata = &stored.metadata;
    ensure_record_kind(id, metadata, RecordKind::Person)?;
    let (created_at, updated_at) = timestamps(id, metadata)?;
    Ok(PersonRecord {
        id: id.to_string(),
        first_name: text_field(id, metadata, FIELD_FIRST_NAME)?.unwrap_or_default(),
        last_name: text_field(id, metadata, FIELD_LAST_NAME)?.unwrap_or_default(),
        role: text_field(id, metadata, FIELD_ROLE)?.unwrap_or_default(),
        identifiers: composite_field(id, metadata, FIELD_IDENTIFIERS)?,
        relations: composite_field(id, metadata, FIELD_RELATIONS)?,
        created_at,
        updated_at,
    })
}

fn put_text(metadata: &mut Metadata, key: &str, value: &str) {
    metadata.insert(key.to_string(), MetadataValue::Text(value.to_string()));
}

fn put_composite<T: Serialize>(
    metadata: &mut Metadata,
    record_id: &str,
    key: &'static str,
    values: &[T],
) -> Result<(), CodecError> {
    let encoded =
        serde_json::to_string(values).map_err(|source| CodecError::MalformedComposite {
            record_id: record_id.to_string(),
            field: key,
            source,
        })?;
    metadata.insert(key.to_string(), MetadataValue::Text(encoded));
    Ok(())
}

fn put_timestamps(metadata: &mut Metadata, created_at: u64, updated_at: u64) {
    metadata.insert(
        FIELD_CREATED_AT.to_string(),
        MetadataValue::Number(created_at as f64),
    );
    metadata.insert(
        FIELD_UPDATED_AT.to_string(),
        MetadataValue::Number(updated_at.max(created_at) as f64),
    );
}

fn ensure_record_kind(
    record_id: &str,
    metadata: &Metadata,
    expected: RecordKind,
) -> Result<(), CodecError> {
    match text_field(record_id, metadata, FIELD_RECORD_TYPE)? {
        Some(found) if found != expected.as_str() => Err(CodecError::WrongRecordType {
            record_id: record_id.to_string(),
            expected: expected.as_str(),
            found,
        }),
        _ => Ok(()),
    }
}

fn text_field(
    record_id: &str,
    metadata: &Metadata,
    key: &'static str,
) -> Result<Option<String>, CodecError> {
    match metadata.get(key) {
        None => Ok(None),
        Some(MetadataValue::Text(value)) => Ok(Some(value.clone())),
        Some(other) => Err(CodecError::InvalidField {
            record_id: record_id.to_string(),
            field: key,
            reason: format!("expected a string, found {other:?}"),
        }),
    }
}

fn list_field(
    record_id: &str,
    metadata: &Metadata,
    key: &'static str,
) -> Result<Vec<String>, CodecError> {
    match metadata.get(key) {
        None => Ok(Vec::new()),
        Some(MetadataValue::List(values)) => Ok(values.clone()),
        Some(MetadataValue::Text(value)) if value.trim().is_empty() => Ok(Vec::new()),
        Some(MetadataValue::Text(value)) => Ok(vec![value.clone()]),
        Some(other) => Err(CodecError::InvalidField {
            record_id: record_id.to_string(),
            field: key,
            reason: format!("expected a string list, found {other:?}"),
        }),
    }
}

fn composite_field<T: DeserializeOwned>(
    record_id: &str,
    metadata: &Metadata,
    key: &'static str,
) -> Result<Vec<T>, CodecError> {
    let Some(raw) = text_field(record_id, metadata, key)? else {
        return Ok(Vec::new());
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Vec<T>>(&raw).map_err(|source| CodecError::MalformedComposite {
        record_id: record_id.to_string(),
        field: key,
        source,
    })
}

fn timestamp_field(
    record_id: &str,
    metadata: &Metadata,
    key: &'static str,
) -> Result<Option<u64>, CodecError> {
    let invalid = |reason: String| CodecError::InvalidField {
        record_id: record_id.to_string(),
        field: key,
        reason,
    };
    match metadata.get(key) {
        None => Ok(None),
        Some(MetadataValue::Number(value)) if value.is_finite() && *value >= 0.0 => {
            Ok(Some(value.trunc() as u64))
        }
        Some(MetadataValue::Text(value)) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|error| invalid(error.to_string())),
        Some(other) => Err(invalid(format!(
            "expected a non-negative timestamp, found {other:?}"
        ))),
    }
}

fn timestamps(record_id: &str, metadata: &Metadata) -> Result<(u64, u64), CodecError> {
    let created_at = timestamp_field(record_id, metadata, FIELD_CREATED_AT)?.unwrap_or(0);
    let updated_at = timestamp_field(record_id, metadata, FIELD_UPDATED_AT)?
        .unwrap_or(created_at)
        .max(created_at);
    Ok((created_at, updated_at))
}
