use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AddMemoryParams {
    #[schemars(description = "Owner of the memory (user id)")]
    pub user_id: String,

    #[schemars(description = "The natural language content of the memory")]
    pub content: String,

    #[schemars(
        description = "Memory type: 'general' (default), 'fact', 'preference', 'episodic', 'document', 'insight'"
    )]
    pub r#type: Option<String>,

    #[schemars(
        description = "Optional JSON metadata. 'importance' (1-10) weights ranking, 'timestamp' (RFC 3339) sets the event time"
    )]
    pub metadata: Option<serde_json::Value>,
}
