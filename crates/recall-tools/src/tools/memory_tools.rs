use super::*;

use recall_memory::MemoryLink;

const NAMESPACE_SCHEMA_DESCRIPTION: &str = "Memory namespace: personal or professional";
const TICKET_SCHEMA_DESCRIPTION: &str =
    "Ticket returned by a previous proposal; resubmit it with identical arguments to confirm";

fn memory_link_schema() -> Value {
    json!({
        "type": "array",
        "description": "Outbound links to memories in the same namespace; the inverse edge is written on each target",
        "items": {
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Target memory id" },
                "relation_type": { "type": "string", "description": "Relation label, e.g. causes or precedes" }
            },
            "required": ["id", "relation_type"],
            "additionalProperties": false
        }
    })
}

/// Creates a memory after confirmation and waits until it is readable.
pub struct CreateMemoryTool {
    gateway: Arc<MemoryGateway>,
}

impl CreateMemoryTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for CreateMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_memory".to_string(),
            description: "Store a new memory. Returns a confirmation proposal until the user affirms the exact call.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string", "enum": ["personal", "professional"], "description": NAMESPACE_SCHEMA_DESCRIPTION },
                    "text": { "type": "string", "description": "Full memory text" },
                    "short_description": { "type": "string", "description": "One-line summary" },
                    "category": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "related_people": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Person ids mentioned by this memory"
                    },
                    "related_memories": memory_link_schema(),
                    "confirmation_ticket": { "type": "string", "description": TICKET_SCHEMA_DESCRIPTION }
                },
                "required": ["namespace"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "create_memory";
        let input = match parse_new_memory(&arguments) {
            Ok(input) => input,
            Err(error) => return invalid_arguments(tool, error),
        };
        let context = match context_with_ticket(context, &arguments) {
            Ok(context) => context,
            Err(error) => return invalid_arguments(tool, error),
        };
        let outcome = self.gateway.create_memory(&context, input).await;
        gated_result(tool, outcome, |created| {
            ToolExecutionResult::ok(json!({
                "tool": tool,
                "status": STATUS_OK,
                "id": created.record.id,
                "memory": memory_json(&created.record),
                "verification_attempts": created.attempts,
                "linked": created.linked,
            }))
        })
    }
}

fn parse_new_memory(arguments: &Value) -> Result<NewMemory, String> {
    Ok(NewMemory {
        namespace: required_namespace(arguments)?,
        text: optional_string(arguments, "text")?.unwrap_or_default(),
        short_description: optional_string(arguments, "short_description")?.unwrap_or_default(),
        category: optional_string(arguments, "category")?.unwrap_or_default(),
        tags: optional_array::<String>(arguments, "tags")?.into_iter().collect(),
        related_people: optional_array(arguments, "related_people")?,
        related_memories: optional_array::<MemoryLink>(arguments, "related_memories")?,
    })
}

/// Applies an allow-listed field patch to an existing memory.
pub struct UpdateMemoryTool {
    gateway: Arc<MemoryGateway>,
}

impl UpdateMemoryTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for UpdateMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_memory".to_string(),
            description: format!(
                "Update fields of an existing memory. Allowed fields: {}. The result is re-read once and reported as '{}'.",
                recall_memory::MEMORY_UPDATE_FIELDS.join(", "),
                STATUS_NEEDS_VERIFICATION
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string", "enum": ["personal", "professional"], "description": NAMESPACE_SCHEMA_DESCRIPTION },
                    "id": { "type": "string", "description": "Memory id" },
                    "fields": {
                        "type": "object",
                        "description": "Field names mapped to their new values",
                        "propertyNames": { "enum": recall_memory::MEMORY_UPDATE_FIELDS }
                    },
                    "confirmation_ticket": { "type": "string", "description": TICKET_SCHEMA_DESCRIPTION }
                },
                "required": ["namespace", "id", "fields"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "update_memory";
        let parsed = required_namespace(&arguments).and_then(|namespace| {
            Ok((
                namespace,
                required_string(&arguments, "id")?,
                required_fields(&arguments)?,
                context_with_ticket(context, &arguments)?,
            ))
        });
        let (namespace, id, changes, context) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };
        let outcome = self
            .gateway
            .update_memory(&context, namespace, &id, &changes)
            .await;
        gated_result(tool, outcome, |result| {
            ToolExecutionResult::ok(json!({
                "tool": tool,
                "status": STATUS_NEEDS_VERIFICATION,
                "id": result.expected.id,
                "reflected": result.is_reflected(),
                "expected": memory_json(&result.expected),
                "observed": result.observed.as_ref().map(memory_json),
                "relinked": result.relinked,
            }))
        })
    }
}

/// Deletes a memory (superuser only) and strips inbound links.
pub struct DeleteMemoryTool {
    gateway: Arc<MemoryGateway>,
}

impl DeleteMemoryTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for DeleteMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_memory".to_string(),
            description: "Delete a memory by id. Restricted to superusers and gated by confirmation.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string", "enum": ["personal", "professional"], "description": NAMESPACE_SCHEMA_DESCRIPTION },
                    "id": { "type": "string", "description": "Memory id" },
                    "confirmation_ticket": { "type": "string", "description": TICKET_SCHEMA_DESCRIPTION }
                },
                "required": ["namespace", "id"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "delete_memory";
        let parsed = required_namespace(&arguments).and_then(|namespace| {
            Ok((
                namespace,
                required_string(&arguments, "id")?,
                context_with_ticket(context, &arguments)?,
            ))
        });
        let (namespace, id, context) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };
        let outcome = self.gateway.delete_memory(&context, namespace, &id).await;
        gated_result(tool, outcome, |deleted| deleted_result(tool, &deleted))
    }
}

pub(super) fn deleted_result(tool: &str, deleted: &recall_memory::Deleted) -> ToolExecutionResult {
    ToolExecutionResult::ok(json!({
        "tool": tool,
        "status": STATUS_OK,
        "id": deleted.id,
        "namespace": deleted.namespace,
        "already_absent": deleted.already_absent,
        "verification_attempts": deleted.attempts,
        "unlinked": deleted.unlinked,
        "unlink_failures": deleted.unlink_failures,
    }))
}

/// Similarity search over one namespace, or both memory namespaces when none is named.
pub struct SearchMemoryTool {
    gateway: Arc<MemoryGateway>,
}

impl SearchMemoryTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for SearchMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_memory".to_string(),
            description: "Search memories by meaning. Omit namespace to search personal and professional together.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "namespace": { "type": "string", "enum": ["personal", "professional"], "description": NAMESPACE_SCHEMA_DESCRIPTION },
                    "top_k": { "type": "integer", "minimum": 1, "description": "Matches per namespace." }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "search_memory";
        let parsed = required_string(&arguments, "query").and_then(|query| {
            Ok((
                query,
                optional_namespace(&arguments)?,
                optional_usize(&arguments, "top_k")?,
            ))
        });
        let (query, namespace, top_k) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };

        let Some(namespace) = namespace else {
            return match self.gateway.prefetch_context(context, &query, top_k).await {
                Ok(prefetch) => ToolExecutionResult::ok(json!({
                    "tool": tool,
                    "status": STATUS_OK,
                    "query": query,
                    "personal": lookup_json(&prefetch.personal),
                    "professional": lookup_json(&prefetch.professional),
                })),
                Err(error) => gateway_error_result(tool, &error),
            };
        };

        match self
            .gateway
            .search_memories(context, namespace, &query, top_k)
            .await
        {
            Ok(matches) => ToolExecutionResult::ok(json!({
                "tool": tool,
                "status": STATUS_OK,
                "query": query,
                "namespace": namespace,
                "matches": matches.iter().map(match_json).collect::<Vec<_>>(),
            })),
            Err(error) => gateway_error_result(tool, &error),
        }
    }
}

fn match_json(matched: &recall_memory::MemoryMatch) -> Value {
    json!({
        "score": matched.score,
        "memory": memory_json(&matched.record),
    })
}

fn lookup_json(lookup: &recall_memory::NamespaceLookup) -> Value {
    match lookup {
        recall_memory::NamespaceLookup::Matches { matches } => json!({
            "status": STATUS_OK,
            "matches": matches.iter().map(match_json).collect::<Vec<_>>(),
        }),
        recall_memory::NamespaceLookup::Restricted => json!({ "status": STATUS_RESTRICTED }),
        recall_memory::NamespaceLookup::Failed {
            reason_code,
            message,
        } => json!({
            "status": STATUS_FAILED,
            "reason_code": reason_code,
            "error": message,
        }),
    }
}

pub struct GetMemoryTool {
    gateway: Arc<MemoryGateway>,
}

impl GetMemoryTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for GetMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_memory".to_string(),
            description: "Fetch one memory by id".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string", "enum": ["personal", "professional"], "description": NAMESPACE_SCHEMA_DESCRIPTION },
                    "id": { "type": "string" }
                },
                "required": ["namespace", "id"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "get_memory";
        let parsed = required_namespace(&arguments)
            .and_then(|namespace| Ok((namespace, required_string(&arguments, "id")?)));
        let (namespace, id) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };
        match self.gateway.get_memory(context, namespace, &id).await {
            Ok(record) => ToolExecutionResult::ok(json!({
                "tool": tool,
                "status": STATUS_OK,
                "id": id,
                "found": record.is_some(),
                "memory": record.as_ref().map(memory_json),
            })),
            Err(error) => gateway_error_result(tool, &error),
        }
    }
}

pub struct ListMemoriesTool {
    gateway: Arc<MemoryGateway>,
}

impl ListMemoriesTool {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RecallTool for ListMemoriesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_memories".to_string(),
            description: "List memories in a namespace one page at a time".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string", "enum": ["personal", "professional"], "description": NAMESPACE_SCHEMA_DESCRIPTION },
                    "page_token": { "type": "string", "description": "Token from a previous page" }
                },
                "required": ["namespace"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult {
        let tool = "list_memories";
        let parsed = required_namespace(&arguments)
            .and_then(|namespace| Ok((namespace, optional_string(&arguments, "page_token")?)));
        let (namespace, page_token) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => return invalid_arguments(tool, error),
        };
        match self
            .gateway
            .list_memories(context, namespace, page_token.as_deref())
            .await
        {
            Ok(page) => ToolExecutionResult::ok(json!({
                "tool": tool,
                "status": STATUS_OK,
                "namespace": namespace,
                "memories": page.records.iter().map(memory_json).collect::<Vec<_>>(),
                "next_page_token": page.next_page_token,
            })),
            Err(error) => gateway_error_result(tool, &error),
        }
    }
}
