use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub identity: String,
    pub request: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    pub row_count: usize,
    pub elapsed_seconds: f64,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at_utc: String,
}
