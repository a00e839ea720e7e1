use serde::{Deserialize, Serialize};

use crate::core::{
    domain::ExecutionStatus,
    queue::{FailedJob, JobCounts},
};

#[derive(Debug, Default, Deserialize)]
pub struct CompileRequest {
    pub code: Option<String>,
    pub language: Option<String>,
    pub input: Option<serde_json::Value>,
}

impl CompileRequest {
    /// Non-string input is passed to the program as its JSON text.
    pub fn stdin(&self) -> Option<String> {
        match &self.input {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Every `/compile` reply carries `output`, whatever happened.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputBody {
    pub output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub output: String,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub queue: JobCounts,
    pub server: ServerInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub concurrency: usize,
    pub cpu_cores: usize,
    pub uptime_secs: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub counts: JobCounts,
    pub waiting_jobs: usize,
    pub active_jobs: usize,
    pub concurrency: usize,
    pub rate_limit_entries: usize,
    pub failed_jobs: Vec<FailedJob>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub languages: Vec<String>,
    pub endpoints: Endpoints,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub compile: &'static str,
    pub health: &'static str,
    pub stats: &'static str,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compile: "POST /compile",
            health: "GET /health",
            stats: "GET /stats",
        }
    }
}
