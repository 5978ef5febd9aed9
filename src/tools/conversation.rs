//! Parameters for the conversation tools: `append_message`, `close_session`
//! and `extract_memories`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AppendMessageParams {
    #[schemars(description = "Owner of the conversation")]
    pub user_id: String,

    #[schemars(description = "Session id. A new session is started when omitted.")]
    pub session_id: Option<String>,

    #[schemars(description = "Speaker: 'user', 'assistant' or 'system'")]
    pub role: String,

    #[schemars(description = "Message text")]
    pub content: String,

    #[schemars(
        description = "Optional JSON metadata. 'session_timestamp' (RFC 3339) overrides the turn time used for extraction"
    )]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CloseSessionParams {
    #[schemars(description = "Owner of the conversation")]
    pub user_id: String,

    #[schemars(description = "Session to close")]
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExtractMemoriesParams {
    #[schemars(description = "Owner whose pending turns are extracted")]
    pub user_id: String,

    #[schemars(description = "Restrict extraction to one session")]
    pub session_id: Option<String>,
}
