//! MCP `recall` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecallParams {
    #[schemars(description = "Owner whose memories are searched")]
    pub user_id: String,

    #[schemars(description = "Natural language query")]
    pub query: String,

    /// Capped at 50.
    #[schemars(description = "Maximum number of merged results (1-50). Defaults to the configured limit.")]
    pub limit: Option<usize>,

    #[schemars(description = "Only memories of this type, e.g. 'fact' or 'episodic'")]
    pub r#type: Option<String>,

    #[schemars(description = "Only episodes at or after this RFC 3339 instant")]
    pub event_after: Option<String>,

    #[schemars(description = "Only episodes before this RFC 3339 instant")]
    pub event_before: Option<String>,

    #[schemars(
        description = "If true, return only the merged list (content, type, score, source) instead of the full breakdown"
    )]
    pub merged_only: Option<bool>,
}
