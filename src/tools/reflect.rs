use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReflectParams {
    #[schemars(description = "Owner to reflect on")]
    pub user_id: String,

    #[schemars(description = "Maximum number of memories to analyze in this run")]
    pub limit: Option<usize>,
}
