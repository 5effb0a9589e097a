use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use recall_access::Namespace;
use recall_memory::{
    CallContext, GateOutcome, GatewayError, MemoryGateway, MemoryRecord, NewMemory, NewPerson,
    PersonRecord, Proposal,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

mod memory_tools;
mod person_tools;
mod registry_core;
mod runtime_helpers;


pub use memory_tools::{
    CreateMemoryTool, DeleteMemoryTool, GetMemoryTool, ListMemoriesTool, SearchMemoryTool,
    UpdateMemoryTool,
};
pub use person_tools::{
    CreatePersonTool, DeletePersonTool, FindPersonTool, GetPersonTool, UpdatePersonTool,
};
pub use registry_core::{builtin_recall_tool_names, RecallToolRegistry};
pub use runtime_helpers::{
    STATUS_FAILED, STATUS_NEEDS_VERIFICATION, STATUS_OK, STATUS_RESTRICTED, STATUS_TIMEOUT,
};

use runtime_helpers::{
    context_with_ticket, gated_result, gateway_error_result, invalid_arguments, memory_json,
    optional_array, optional_namespace, optional_string, optional_usize, person_json,
    required_fields, required_namespace, required_string,
};

/// Name, description and JSON schema advertised for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Structured tool output handed back to the agent runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolExecutionResult {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }

    /// Returns the `status` field of the payload, when present.
    pub fn status(&self) -> Option<&str> {
        self.content.get("status").and_then(Value::as_str)
    }

    /// Converts the payload to text for insertion into a tool message.
    pub fn as_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Trait contract for a gateway-backed tool.
#[async_trait]
pub trait RecallTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, arguments: Value, context: &CallContext) -> ToolExecutionResult;
}
