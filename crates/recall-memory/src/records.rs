//! Typed memory and person records plus their creation inputs.

use std::collections::BTreeSet;

use recall_access::Namespace;
use serde::{Deserialize, Serialize};

/// Record kinds held by the store; written to metadata as `record_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Memory,
    Person,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Person => "person",
        }
    }
}

/// Outbound edge from one memory to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLink {
    pub id: String,
    pub relation_type: String,
}

/// Channel-specific handle for a person (email, chat handle, phone number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonIdentifier {
    pub id_type: String,
    pub id_value: String,
}

/// Outbound edge from one person to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRelation {
    pub related_person_id: String,
    pub relation_type: String,
}

/// Memory record as held by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub owner_id: String,
    pub namespace: Namespace,
    pub text: String,
    pub short_description: String,
    pub category: String,
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub related_people: Vec<String>,
    pub related_memories: Vec<MemoryLink>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl MemoryRecord {
    /// Text fed to the embedding provider: the body, or the summary when the body is blank.
    pub fn embedding_text(&self) -> &str {
        memory_embedding_text(&self.text, &self.short_description)
    }
}

pub(crate) fn memory_embedding_text<'a>(text: &'a str, short_description: &'a str) -> &'a str {
    if text.trim().is_empty() {
        short_description
    } else {
        text
    }
}

/// Person record as held by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub identifiers: Vec<PersonIdentifier>,
    pub relations: Vec<PersonRelation>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PersonRecord {
    pub fn identifier_values(&self) -> Vec<String> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.id_value.clone())
            .collect()
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    pub fn embedding_text(&self) -> String {
        person_embedding_text(&self.first_name, &self.last_name, &self.role)
    }

    /// Returns true when any identifier value equals `identity` (trimmed, case-insensitive).
    pub fn has_identifier(&self, identity: &str) -> bool {
        self.identifiers
            .iter()
            .any(|identifier| recall_access::identity_matches(&identifier.id_value, identity))
    }
}

pub(crate) fn person_embedding_text(first_name: &str, last_name: &str, role: &str) -> String {
    let name = format!("{} {}", first_name.trim(), last_name.trim());
    let name = name.trim();
    let role = role.trim();
    match (name.is_empty(), role.is_empty()) {
        (false, false) => format!("{name} ({role})"),
        (false, true) => name.to_string(),
        (true, false) => role.to_string(),
        (true, true) => String::new(),
    }
}

/// Caller-supplied fields for a new memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMemory {
    pub namespace: Namespace,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub related_people: Vec<String>,
    #[serde(default)]
    pub related_memories: Vec<MemoryLink>,
}

/// Caller-supplied fields for a new person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPerson {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub identifiers: Vec<PersonIdentifier>,
    #[serde(default)]
    pub relations: Vec<PersonRelation>,
}
