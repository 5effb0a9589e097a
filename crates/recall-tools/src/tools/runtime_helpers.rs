//! Argument parsing and payload shaping shared by the memory and people tools.

use super::*;

pub const STATUS_OK: &str = "ok";
pub const STATUS_RESTRICTED: &str = "restricted";
pub const STATUS_NEEDS_VERIFICATION: &str = "needs verification";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_TIMEOUT: &str = "timeout";

const CONFIRMATION_TICKET_KEY: &str = "confirmation_ticket";

pub(super) fn required_string(arguments: &Value, key: &str) -> Result<String, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("missing required string argument '{key}'"))
}

pub(super) fn optional_string(arguments: &Value, key: &str) -> Result<Option<String>, String> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let Some(raw) = value.as_str() else {
        return Err(format!("optional argument '{key}' must be a string"));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_string()))
}

pub(super) fn optional_usize(arguments: &Value, key: &str) -> Result<Option<usize>, String> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    let parsed = value
        .as_u64()
        .ok_or_else(|| format!("optional argument '{key}' must be an integer"))?;
    if parsed == 0 {
        return Err(format!("optional argument '{key}' must be greater than 0"));
    }
    Ok(Some(usize::try_from(parsed).unwrap_or(usize::MAX)))
}

/// Deserializes an optional array argument; absent or null yields an empty list.
pub(super) fn optional_array<T: serde::de::DeserializeOwned>(
    arguments: &Value,
    key: &str,
) -> Result<Vec<T>, String> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value @ Value::Array(_)) => serde_json::from_value(value.clone())
            .map_err(|error| format!("argument '{key}' is malformed: {error}")),
        Some(_) => Err(format!("argument '{key}' must be an array")),
    }
}

pub(super) fn required_namespace(arguments: &Value) -> Result<Namespace, String> {
    optional_namespace(arguments)?
        .ok_or_else(|| "missing required string argument 'namespace'".to_string())
}

pub(super) fn optional_namespace(arguments: &Value) -> Result<Option<Namespace>, String> {
    optional_string(arguments, "namespace")?
        .map(|raw| raw.parse::<Namespace>().map_err(|error| error.to_string()))
        .transpose()
}

/// Reads the `fields` object carried by update tools.
pub(super) fn required_fields(arguments: &Value) -> Result<Map<String, Value>, String> {
    match arguments.get("fields") {
        Some(Value::Object(fields)) => Ok(fields.clone()),
        Some(_) => Err("'fields' must be an object of field names to new values".to_string()),
        None => Err("missing required object argument 'fields'".to_string()),
    }
}

/// Copies `context`, attaching the ticket carried in the arguments, if any.
pub(super) fn context_with_ticket(
    context: &CallContext,
    arguments: &Value,
) -> Result<CallContext, String> {
    let ticket = optional_string(arguments, CONFIRMATION_TICKET_KEY)?;
    let context = context.clone();
    Ok(match ticket {
        Some(ticket) => context.with_confirmation_ticket(ticket),
        None => context,
    })
}

pub(super) fn invalid_arguments(tool: &str, error: impl Into<String>) -> ToolExecutionResult {
    ToolExecutionResult::error(json!({
        "tool": tool,
        "status": STATUS_FAILED,
        "reason_code": "invalid_arguments",
        "error": error.into(),
    }))
}

fn proposal_result(tool: &str, proposal: &Proposal) -> ToolExecutionResult {
    let mut content = proposal.to_json();
    if let Some(object) = content.as_object_mut() {
        object.insert("tool".to_string(), json!(tool));
    }
    ToolExecutionResult::ok(content)
}

/// Maps a gateway error onto the `restricted`, `timeout` or `failed` payloads.
pub(super) fn gateway_error_result(tool: &str, error: &GatewayError) -> ToolExecutionResult {
    let status = match error {
        GatewayError::Restricted { .. } => STATUS_RESTRICTED,
        GatewayError::VerificationTimeout { .. } => STATUS_TIMEOUT,
        GatewayError::Validation(_)
        | GatewayError::StoreUnavailable { .. }
        | GatewayError::Cancelled { .. }
        | GatewayError::LinkFailed { .. }
        | GatewayError::Codec(_) => STATUS_FAILED,
    };
    let mut content = json!({
        "tool": tool,
        "status": status,
        "reason_code": error.reason_code(),
        "retryable": error.is_retryable(),
        "error": error.to_string(),
    });
    if let (Some(object), Some(record_id)) = (content.as_object_mut(), attempted_record_id(error)) {
        object.insert("record_id".to_string(), json!(record_id));
    }
    if status == STATUS_RESTRICTED {
        tracing::debug!(tool, "tool call restricted");
    } else {
        tracing::warn!(tool, status, reason_code = error.reason_code(), "tool call failed");
    }
    ToolExecutionResult::error(content)
}

fn attempted_record_id(error: &GatewayError) -> Option<&str> {
    match error {
        GatewayError::VerificationTimeout { record_id, .. }
        | GatewayError::Cancelled { record_id, .. } => Some(record_id),
        GatewayError::StoreUnavailable { record_id, .. } => record_id.as_deref(),
        GatewayError::LinkFailed { source_id, .. } => Some(source_id),
        GatewayError::Validation(_) | GatewayError::Restricted { .. } | GatewayError::Codec(_) => {
            None
        }
    }
}

/// Memory payload without the raw embedding.
pub(super) fn memory_json(record: &MemoryRecord) -> Value {
    json!({
        "id": record.id,
        "owner_id": record.owner_id,
        "namespace": record.namespace,
        "text": record.text,
        "short_description": record.short_description,
        "category": record.category,
        "tags": record.tags,
        "related_people": record.related_people,
        "related_memories": record.related_memories,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

pub(super) fn person_json(record: &PersonRecord) -> Value {
    json!({
        "id": record.id,
        "display_name": record.display_name(),
        "first_name": record.first_name,
        "last_name": record.last_name,
        "role": record.role,
        "identifiers": record.identifiers,
        "relations": record.relations,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

/// Shapes a gated mutation outcome into its tool payload.
pub(super) fn gated_result<T>(
    tool: &str,
    outcome: Result<GateOutcome<T>, GatewayError>,
    executed: impl FnOnce(T) -> ToolExecutionResult,
) -> ToolExecutionResult {
    match outcome {
        Ok(GateOutcome::RequiresConfirmation(proposal)) => proposal_result(tool, &proposal),
        Ok(GateOutcome::Executed(value)) => executed(value),
        Err(error) => gateway_error_result(tool, &error),
    }
}
