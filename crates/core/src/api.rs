use serde::{Deserialize, Serialize};

/// Body of `POST /initiate-upload`. The client sends its locally generated id
/// as `upload_id`; the server generates its own and returns it, and the reply
/// id is authoritative from then on.
#[derive(Debug, Clone, Serialize)]
pub struct InitiateRequest {
    pub total_size: u64,
    pub filename: String,
    pub upload_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateBody {
    pub status: String,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply to one chunk. The final chunk additionally carries `task_id` and a
/// confirmation message ("All chunks received, processing started.").
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkBody {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Reply to `GET /status/{task_id}`. Terminal failures put `error` at the top
/// level with `result` null; SUCCESS / PARTIAL_FAILURE put the payload (and a
/// possibly empty `error`) inside `result`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusBody {
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub result: Option<ResultBody>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultBody {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub stats_summary: Option<String>,
    #[serde(default)]
    pub ai_output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Processing,
    Success,
    PartialFailure,
    Failure,
    UnexpectedResult,
}

impl TaskStatus {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "STARTED" => Some(Self::Started),
            "PROCESSING" => Some(Self::Processing),
            "SUCCESS" => Some(Self::Success),
            "PARTIAL_FAILURE" => Some(Self::PartialFailure),
            "FAILURE" => Some(Self::Failure),
            "UNEXPECTED_RESULT" => Some(Self::UnexpectedResult),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Processing => "PROCESSING",
            Self::Success => "SUCCESS",
            Self::PartialFailure => "PARTIAL_FAILURE",
            Self::Failure => "FAILURE",
            Self::UnexpectedResult => "UNEXPECTED_RESULT",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::PartialFailure | Self::Failure | Self::UnexpectedResult
        )
    }
}

/// Final task payload handed to the caller. For PARTIAL_FAILURE both `output`
/// and `error` are populated; they are not mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub output: Option<String>,
    pub ai_output: Option<String>,
    pub stats_summary: Option<String>,
    pub error: Option<String>,
}

impl StatusBody {
    /// First non-empty error, preferring the one inside `result` over the
    /// top-level field. The server fills unused slots with empty strings.
    pub fn error_message(&self) -> Option<String> {
        self.result
            .as_ref()
            .and_then(|r| non_empty(r.error.as_deref()))
            .or_else(|| non_empty(self.error.as_deref()))
    }

    pub fn into_result(self, status: TaskStatus) -> TaskResult {
        let error = self.error_message();
        let result = self.result.unwrap_or_default();
        TaskResult {
            status,
            output: non_empty(result.output.as_deref()),
            ai_output: non_empty(result.ai_output.as_deref()),
            stats_summary: non_empty(result.stats_summary.as_deref()),
            error,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(|s| s.to_string())
}
