use super::*;

use recall_memory::{PersonIdentifier, PersonRelation};

use super::memory_tools::deleted_result;

const TICKET_SCHEMA_DESCRIPTION: &str =
    "Ticket returned by a previous proposal; resubmit it with identical arguments to confirm";

fn relations_schema() -> Value {
    json!({
        "type": "array",
        "description": "Outbound relations; the inverse relation (e.g. reports_to for manager_of) is written on each target",
        "items": {
            "type": "object",
            "properties": {
                "related_person_id": { "type": "string" },
                "relation_type": { "type": "string" }
            },
            "required": ["related_person_id", "relation_type"],
            "additionalProperties": false
        }
    })
}

pub struct CreatePersonTool {
    gateway: Arc<MemoryGateway>,
}

impl CreatePersonTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for CreatePersonTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_person".to_string(),
            description: "Add a person to the people directory. Gated by confirmation.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "first_name": { "type": "string" },
                    "last_name": { "type": "string" },
                    "role": { "type": "string" },
                    "identifiers": {
                        "type": "array",
                        "description": "Channel handles such as email or chat ids",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id_type": { "type": "string" },
                                "id_value": { "type": "string" }
                            },
                            "required": ["id_type", "id_value"],
                            "additionalProperties": false
                        }
                    },
                    "relations": relations_schema(),
                    "confirmation_ticket": { "type": "string", "description": TICKET_SCHEMA_DESCRIPTION }
                },
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "create_person";
        let parsed = parse_new_person(&arguments)
            .and_then(|input| Ok((input, context_with_ticket(context, &arguments)?)));
        let (input, context) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };
        let outcome = self.gateway.create_person(&context, input).await;
        gated_result(tool, outcome, |created| {
            ToolExecutionResult::ok(json!({
                "tool": tool,
                "status": STATUS_OK,
                "id": created.record.id,
                "person": person_json(&created.record),
                "verification_attempts": created.attempts,
                "linked": created.linked,
            }))
        })
    }
}

fn parse_new_person(arguments: &Value) -> Result<NewPerson, String> {
    Ok(NewPerson {
        first_name: optional_string(arguments, "first_name")?.unwrap_or_default(),
        last_name: optional_string(arguments, "last_name")?.unwrap_or_default(),
        role: optional_string(arguments, "role")?.unwrap_or_default(),
        identifiers: optional_array::<PersonIdentifier>(arguments, "identifiers")?,
        relations: optional_array::<PersonRelation>(arguments, "relations")?,
    })
}

pub struct UpdatePersonTool {
    gateway: Arc<MemoryGateway>,
}

impl UpdatePersonTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for UpdatePersonTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_person".to_string(),
            description: format!(
                "Update fields of a person. Allowed fields: {}. user_ids accepts plain strings or {{id_type, id_value}} objects.",
                recall_memory::PERSON_UPDATE_FIELDS.join(", ")
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Person id" },
                    "fields": {
                        "type": "object",
                        "propertyNames": { "enum": recall_memory::PERSON_UPDATE_FIELDS }
                    },
                    "confirmation_ticket": { "type": "string", "description": TICKET_SCHEMA_DESCRIPTION }
                },
                "required": ["id", "fields"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "update_person";
        let parsed = required_string(&arguments, "id").and_then(|id| {
            Ok((
                id,
                required_fields(&arguments)?,
                context_with_ticket(context, &arguments)?,
            ))
        });
        let (id, changes, context) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };
        let outcome = self.gateway.update_person(&context, &id, &changes).await;
        gated_result(tool, outcome, |result| {
            ToolExecutionResult::ok(json!({
                "tool": tool,
                "status": STATUS_NEEDS_VERIFICATION,
                "id": result.expected.id,
                "reflected": result.is_reflected(),
                "expected": person_json(&result.expected),
                "observed": result.observed.as_ref().map(person_json),
                "relinked": result.relinked,
            }))
        })
    }
}

pub struct DeletePersonTool {
    gateway: Arc<MemoryGateway>,
}

impl DeletePersonTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for DeletePersonTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_person".to_string(),
            description: "Delete a person and remove relations pointing at them. Superusers only.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "confirmation_ticket": { "type": "string", "description": TICKET_SCHEMA_DESCRIPTION }
                },
                "required": ["id"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "delete_person";
        let parsed = required_string(&arguments, "id")
            .and_then(|id| Ok((id, context_with_ticket(context, &arguments)?)));
        let (id, context) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };
        let outcome = self.gateway.delete_person(&context, &id).await;
        gated_result(tool, outcome, |deleted| deleted_result(tool, &deleted))
    }
}

pub struct GetPersonTool {
    gateway: Arc<MemoryGateway>,
}

impl GetPersonTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for GetPersonTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_person".to_string(),
            description: "Fetch one person by id".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "get_person";
        let id = match required_string(&arguments, "id") {
            Ok(id) => id,
            Err(error) => return invalid_arguments(tool, error),
        };
        match self.gateway.get_person(context, &id).await {
            Ok(record) => ToolExecutionResult::ok(json!({
                "tool": tool,
                "status": STATUS_OK,
                "id": id,
                "found": record.is_some(),
                "person": record.as_ref().map(person_json),
            })),
            Err(error) => gateway_error_result(tool, &error),
        }
    }
}

/// Looks a person up by exact identifier, or by similarity over names and roles.
pub struct FindPersonTool {
    gateway: Arc<MemoryGateway>,
}

impl FindPersonTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for FindPersonTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "find_person".to_string(),
            description: "Find people by an exact identifier (email, handle) or by a free-text query. Provide exactly one.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "identifier": { "type": "string" },
                    "query": { "type": "string" },
                    "top_k": { "type": "integer", "minimum": 1 }
                },
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "find_person";
        let parsed = optional_string(&arguments, "identifier").and_then(|identifier| {
            Ok((
                identifier,
                optional_string(&arguments, "query")?,
                optional_usize(&arguments, "top_k")?,
            ))
        });
        let (identifier, query, top_k) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };

        match (identifier, query) {
            (Some(identifier), None) => {
                match self
                    .gateway
                    .find_person_by_identifier(context, &identifier)
                    .await
                {
                    Ok(person) => ToolExecutionResult::ok(json!({
                        "tool": tool,
                        "status": STATUS_OK,
                        "identifier": identifier,
                        "found": person.is_some(),
                        "person": person.as_ref().map(person_json),
                    })),
                    Err(error) => gateway_error_result(tool, &error),
                }
            }
            (None, Some(query)) => match self.gateway.search_people(context, &query, top_k).await {
                Ok(matches) => ToolExecutionResult::ok(json!({
                    "tool": tool,
                    "status": STATUS_OK,
                    "query": query,
                    "matches": matches
                        .iter()
                        .map(|matched| json!({
                            "score": matched.score,
                            "person": person_json(&matched.record),
                        }))
                        .collect::<Vec<_>>(),
                })),
                Err(error) => gateway_error_result(tool, &error),
            },
            _ => invalid_arguments(tool, "provide exactly one of 'identifier' or 'query'"),
        }
    }
}
