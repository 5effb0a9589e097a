//! Partial-update payloads restricted to per-record allow-lists.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;
use crate::records::{MemoryLink, MemoryRecord, PersonIdentifier, PersonRecord, PersonRelation};

pub const MEMORY_UPDATE_FIELDS: &[&str] = &[
    "text",
    "short_description",
    "category",
    "tags",
    "related_people",
    "related_memories",
];

pub const PERSON_UPDATE_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "role",
    "user_ids",
    "relations",
];

const DEFAULT_USER_ID_TYPE: &str = "user_id";

/// Rejects any key outside `allowed`; runs before authorization or confirmation.
pub fn ensure_allowed_fields(
    fields: &Map<String, Value>,
    allowed: &[&str],
) -> Result<(), GatewayError> {
    if fields.is_empty() {
        return Err(GatewayError::Validation(
            "update must set at least one field".to_string(),
        ));
    }
    let unknown = fields
        .keys()
        .filter(|key| !allowed.contains(&key.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(GatewayError::Validation(format!(
        "unsupported update field(s): {} (allowed: {})",
        unknown.join(", "),
        allowed.join(", ")
    )))
}

fn field<T: DeserializeOwned>(
    fields: &Map<String, Value>,
    key: &str,
) -> Result<Option<T>, GatewayError> {
    let Some(value) = fields.get(key) else {
        return Ok(None);
    };
    serde_json::from_value::<T>(value.clone())
        .map(Some)
        .map_err(|error| GatewayError::Validation(format!("invalid value for '{key}': {error}")))
}

/// Allow-listed memory changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_people: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_memories: Option<Vec<MemoryLink>>,
}

impl MemoryUpdate {
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, GatewayError> {
        ensure_allowed_fields(fields, MEMORY_UPDATE_FIELDS)?;
        Ok(Self {
            text: field(fields, "text")?,
            short_description: field(fields, "short_description")?,
            category: field(fields, "category")?,
            tags: field(fields, "tags")?,
            related_people: field(fields, "related_people")?,
            related_memories: field(fields, "related_memories")?,
        })
    }

    /// Applies the update in place; returns true when content-bearing fields changed.
    pub fn apply(&self, record: &mut MemoryRecord) -> bool {
        let mut content_changed = false;
        if let Some(text) = &self.text {
            content_changed |= record.text != *text;
            record.text = text.clone();
        }
        if let Some(short_description) = &self.short_description {
            content_changed |= record.short_description != *short_description;
            record.short_description = short_description.clone();
        }
        if let Some(category) = &self.category {
            record.category = category.clone();
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        if let Some(related_people) = &self.related_people {
            record.related_people = related_people.clone();
        }
        if let Some(related_memories) = &self.related_memories {
            record.related_memories = related_memories.clone();
        }
        content_changed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum UserIdInput {
    Bare(String),
    Typed(PersonIdentifier),
}

impl From<UserIdInput> for PersonIdentifier {
    fn from(input: UserIdInput) -> Self {
        match input {
            UserIdInput::Bare(id_value) => PersonIdentifier {
                id_type: DEFAULT_USER_ID_TYPE.to_string(),
                id_value,
            },
            UserIdInput::Typed(identifier) => identifier,
        }
    }
}

/// Allow-listed person changes; `user_ids` replaces the identifier list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersonUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<PersonIdentifier>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relations: Option<Vec<PersonRelation>>,
}

impl PersonUpdate {
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, GatewayError> {
        ensure_allowed_fields(fields, PERSON_UPDATE_FIELDS)?;
        let user_ids = field::<Vec<UserIdInput>>(fields, "user_ids")?.map(|inputs| {
            inputs
                .into_iter()
                .map(PersonIdentifier::from)
                .collect::<Vec<_>>()
        });
        if let Some(user_ids) = &user_ids {
            if user_ids
                .iter()
                .any(|identifier| identifier.id_value.trim().is_empty())
            {
                return Err(GatewayError::Validation(
                    "user_ids cannot contain empty values".to_string(),
                ));
            }
        }
        Ok(Self {
            first_name: field(fields, "first_name")?,
            last_name: field(fields, "last_name")?,
            role: field(fields, "role")?,
            user_ids,
            relations: field(fields, "relations")?,
        })
    }

    /// Applies the update in place; returns true when embedded fields changed.
    pub fn apply(&self, record: &mut PersonRecord) -> bool {
        let mut content_changed = false;
        if let Some(first_name) = &self.first_name {
            content_changed |= record.first_name != *first_name;
            record.first_name = first_name.clone();
        }
        if let Some(last_name) = &self.last_name {
            content_changed |= record.last_name != *last_name;
            record.last_name = last_name.clone();
        }
        if let Some(role) = &self.role {
            content_changed |= record.role != *role;
            record.role = role.clone();
        }
        if let Some(user_ids) = &self.user_ids {
            record.identifiers = user_ids.clone();
        }
        if let Some(relations) = &self.relations {
            record.relations = relations.clone();
        }
        content_changed
    }
}

#[cfg(test)]
mod tests {
    use recall_access::Namespace;
    use serde_json::{json, Map, Value};

    use super::{MemoryUpdate, PersonUpdate};
    use crate::error::GatewayError;
    use crate::records::{MemoryRecord, PersonRecord};

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    fn memory() -> MemoryRecord {
        MemoryRecord {
            id: "mem_2024_01_01_00000000".to_string(),
            owner_id: "alice@example.com".to_string(),
            namespace: Namespace::Professional,
            text: "Renewed lease".to_string(),
            short_description: "Lease renewal".to_string(),
            category: "memory".to_string(),
            tags: Default::default(),
            embedding: vec![1.0],
            related_people: Vec::new(),
            related_memories: Vec::new(),
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn unit_unknown_keys_are_rejected_with_allow_list() {
        let error = MemoryUpdate::from_fields(&fields(json!({ "unknown_field": "x" })))
            .expect_err("unknown key");
        let GatewayError::Validation(message) = error else {
            panic!("expected validation error");
        };
        assert!(message.contains("unknown_field"));
        assert!(message.contains("short_description"));

        let error = PersonUpdate::from_fields(&fields(json!({ "role": "lead", "owner_id": "x" })))
            .expect_err("owner_id is not updatable");
        assert!(error.to_string().contains("owner_id"));
    }

    #[test]
    fn unit_empty_and_mistyped_updates_are_rejected() {
        let error = MemoryUpdate::from_fields(&Map::new()).expect_err("empty");
        assert!(error.to_string().contains("at least one field"));
        let error =
            MemoryUpdate::from_fields(&fields(json!({ "tags": "lease" }))).expect_err("bad type");
        assert!(error.to_string().contains("invalid value for 'tags'"));
    }

    #[test]
    fn functional_memory_update_reports_content_changes_only_for_text_fields() {
        let mut record = memory();
        let update = MemoryUpdate::from_fields(&fields(json!({
            "category": "housing",
            "tags": ["lease", "home"]
        })))
        .expect("parse");
        assert!(!update.apply(&mut record));
        assert_eq!(record.category, "housing");
        assert_eq!(record.tags.len(), 2);

        let update = MemoryUpdate::from_fields(&fields(json!({ "text": "Renewed lease" })))
            .expect("parse");
        assert!(!update.apply(&mut record), "unchanged text does not re-embed");

        let update = MemoryUpdate::from_fields(&fields(json!({ "text": "Lease renewed for two years" })))
            .expect("parse");
        assert!(update.apply(&mut record));
    }

    #[test]
    fn functional_person_user_ids_accept_bare_and_typed_values() {
        let update = PersonUpdate::from_fields(&fields(json!({
            "user_ids": ["U123", { "id_type": "email", "id_value": "dave@example.com" }]
        })))
        .expect("parse");
        let mut person = PersonRecord {
            id: "per_2024_01_01_00000000".to_string(),
            first_name: "Dave".to_string(),
            last_name: String::new(),
            role: String::new(),
            identifiers: Vec::new(),
            relations: Vec::new(),
            created_at: 1,
            updated_at: 1,
        };
        assert!(!update.apply(&mut person));
        assert_eq!(person.identifiers.len(), 2);
        assert_eq!(person.identifiers[0].id_type, "user_id");
        assert_eq!(person.identifiers[1].id_type, "email");

        let error = PersonUpdate::from_fields(&fields(json!({ "user_ids": [" "] })))
            .expect_err("blank user id");
        assert!(error.to_string().contains("empty values"));
    }
}
