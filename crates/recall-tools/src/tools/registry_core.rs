//! Built-in tool registration and name-based dispatch.

use super::*;

const BUILTIN_RECALL_TOOL_NAMES: &[&str] = &[
    "create_memory",
    "update_memory",
    "delete_memory",
    "search_memory",
    "get_memory",
    "list_memories",
    "create_person",
    "update_person",
    "delete_person",
    "get_person",
    "find_person",
];

/// Returns the names of every tool registered by [`RecallToolRegistry::new`].
pub fn builtin_recall_tool_names() -> &'static [&'static str] {
    BUILTIN_RECALL_TOOL_NAMES
}

/// Name-indexed set of tools sharing one [`MemoryGateway`].
pub struct RecallToolRegistry {
    tools: BTreeMap<String, Arc<dyn RecallTool>>,
}

impl RecallToolRegistry {
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        let mut registry = Self {
            tools: BTreeMap::new(),
        };
        registry.register(Arc::new(CreateMemoryTool::new(gateway.clone())));
        registry.register(Arc::new(UpdateMemoryTool::new(gateway.clone())));
        registry.register(Arc::new(DeleteMemoryTool::new(gateway.clone())));
        registry.register(Arc::new(SearchMemoryTool::new(gateway.clone())));
        registry.register(Arc::new(GetMemoryTool::new(gateway.clone())));
        registry.register(Arc::new(ListMemoriesTool::new(gateway.clone())));
        registry.register(Arc::new(CreatePersonTool::new(gateway.clone())));
        registry.register(Arc::new(UpdatePersonTool::new(gateway.clone())));
        registry.register(Arc::new(DeletePersonTool::new(gateway.clone())));
        registry.register(Arc::new(GetPersonTool::new(gateway.clone())));
        registry.register(Arc::new(FindPersonTool::new(gateway)));
        registry
    }

    /// Registers `tool` under its definition name, replacing any previous entry.
    pub fn register(&mut self, tool: Arc<dyn RecallTool>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "replaced previously registered tool");
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RecallTool>> {
        self.tools.get(name).cloned()
    }

    /// Executes the named tool; unknown names yield a `failed` payload.
    #[tracing::instrument(
        name = "recall_tools.dispatch",
        skip(self, arguments, context),
        fields(caller = %context.caller_id(), status = tracing::field::Empty)
    )]
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Value,
        context: &CallContext,
    ) -> ToolExecutionResult {
        let Some(tool) = self.tools.get(name) else {
            tracing::Span::current().record("status", STATUS_FAILED);
            return ToolExecutionResult::error(json!({
                "tool": name,
                "status": STATUS_FAILED,
                "reason_code": "unknown_tool",
                "error": format!("unknown tool '{name}'"),
            }));
        };
        let result = tool.execute(arguments, context).await;
        if let Some(status) = result.status() {
            tracing::Span::current().record("status", status);
        }
        result
    }
}
