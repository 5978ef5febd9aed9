pub mod add_memory;
pub mod conversation;
pub mod delete_memory;
pub mod memory_stats;
pub mod recall;
pub mod reflect;

use std::sync::Arc;

use add_memory::AddMemoryParams;
use chrono::{DateTime, Utc};
use conversation::{AppendMessageParams, CloseSessionParams, ExtractMemoriesParams};
use delete_memory::DeleteMemoryParams;
use memory_stats::MemoryStatsParams;
use recall::RecallParams;
use reflect::ReflectParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use serde::Serialize;

use neuromem::memory::conversation::Role;
use neuromem::memory::recall::RecallOptions;
use neuromem::memory::types::MemoryType;
use neuromem::NeuroMemory;

const MAX_RECALL_LIMIT: usize = 50;

/// MCP tool handler. Every tool is a thin call into the shared engine.
#[derive(Clone)]
pub struct NeuromemTools {
    tool_router: ToolRouter<Self>,
    engine: Arc<NeuroMemory>,
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

fn parse_type(raw: Option<&str>) -> Result<Option<MemoryType>, String> {
    raw.map(str::parse::<MemoryType>).transpose()
}

fn parse_instant(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("{field} must be an RFC 3339 timestamp: {e}"))
    })
    .transpose()
}

#[tool_router]
impl NeuromemTools {
    pub fn new(engine: Arc<NeuroMemory>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    #[tool(description = "Store a memory directly. It is embedded and becomes searchable immediately.")]
    async fn add_memory(&self, Parameters(params): Parameters<AddMemoryParams>) -> Result<String, String> {
        let memory_type = parse_type(params.r#type.as_deref())?;
        tracing::info!(
            owner = %params.user_id,
            content_len = params.content.len(),
            "add_memory called"
        );

        let memory = self
            .engine
            .add_memory(&params.user_id, &params.content, memory_type, params.metadata)
            .await
            .map_err(|e| format!("add failed: {e}"))?;
        tracing::info!(id = %memory.id, "memory stored");
        to_json(&memory)
    }

    #[tool(
        description = "Recall memories relevant to a query, ranked by relevance, recency and importance, merged with knowledge-graph facts."
    )]
    async fn recall(&self, Parameters(params): Parameters<RecallParams>) -> Result<String, String> {
        let limit = params
            .limit
            .unwrap_or(self.engine.config().retrieval.default_limit)
            .clamp(1, MAX_RECALL_LIMIT);
        let options = RecallOptions {
            memory_type: parse_type(params.r#type.as_deref())?,
            event_after: parse_instant("event_after", params.event_after.as_deref())?,
            event_before: parse_instant("event_before", params.event_before.as_deref())?,
            ..RecallOptions::with_limit(limit)
        };
        tracing::info!(owner = %params.user_id, query = %params.query, limit, "recall called");

        let result = self
            .engine
            .recall(&params.user_id, &params.query, options)
            .await
            .map_err(|e| format!("recall failed: {e}"))?;

        if params.merged_only.unwrap_or(false) {
            to_json(&serde_json::json!({
                "results": result.merged,
                "total": result.merged.len(),
            }))
        } else {
            to_json(&result)
        }
    }

    #[tool(
        description = "Append one conversation turn. Extraction runs automatically every N messages, after an idle period, or when the session closes."
    )]
    async fn append_message(&self, Parameters(params): Parameters<AppendMessageParams>) -> Result<String, String> {
        let role: Role = params.role.parse()?;
        let outcome = self
            .engine
            .append_message(
                &params.user_id,
                params.session_id.as_deref(),
                role,
                &params.content,
                params.metadata,
            )
            .await
            .map_err(|e| format!("append failed: {e}"))?;
        to_json(&outcome)
    }

    #[tool(description = "Close a conversation session and extract its remaining turns.")]
    async fn close_session(&self, Parameters(params): Parameters<CloseSessionParams>) -> Result<String, String> {
        let extraction = self
            .engine
            .close_session(&params.user_id, &params.session_id)
            .await
            .map_err(|e| format!("close failed: {e}"))?;
        to_json(&serde_json::json!({
            "session_id": params.session_id,
            "closed": true,
            "extraction": extraction,
        }))
    }

    #[tool(description = "Extract memories from all pending conversation turns now.")]
    async fn extract_memories(&self, Parameters(params): Parameters<ExtractMemoriesParams>) -> Result<String, String> {
        let stats = self
            .engine
            .extract_pending(&params.user_id, params.session_id.as_deref())
            .await
            .map_err(|e| format!("extraction failed: {e}"))?;
        tracing::info!(
            owner = %params.user_id,
            messages = stats.messages_processed,
            "extract_memories complete"
        );
        to_json(&stats)
    }

    #[tool(description = "Reflect on recent memories: generate insights and update the emotion profile.")]
    async fn reflect(&self, Parameters(params): Parameters<ReflectParams>) -> Result<String, String> {
        let result = self
            .engine
            .reflect(&params.user_id, params.limit)
            .await
            .map_err(|e| format!("reflection failed: {e}"))?;
        to_json(&result)
    }

    #[tool(description = "Delete one memory by id.")]
    async fn delete_memory(&self, Parameters(params): Parameters<DeleteMemoryParams>) -> Result<String, String> {
        let deleted = self
            .engine
            .delete_memory(&params.memory_id, &params.user_id)
            .await
            .map_err(|e| format!("delete failed: {e}"))?;
        to_json(&serde_json::json!({ "id": params.memory_id, "deleted": deleted }))
    }

    #[tool(description = "Memory statistics for one owner: counts by type, graph size, pending turns, storage size.")]
    async fn memory_stats(&self, Parameters(params): Parameters<MemoryStatsParams>) -> Result<String, String> {
        let stats = self
            .engine
            .stats(&params.user_id)
            .await
            .map_err(|e| format!("stats failed: {e}"))?;
        to_json(&stats)
    }
}

#[tool_handler]
impl ServerHandler for NeuromemTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "neuromem is a long-term memory server. Use append_message to log conversation turns, \
                 recall to retrieve relevant memories, and add_memory to store something directly."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
