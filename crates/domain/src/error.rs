/// Shared error type used across all resilience-fabric crates.
///
/// Every variant carries a stable machine-readable reason code (see
/// [`Error::reason_code`]) so terminal task states can surface one, and is
/// classified as retryable or structural for the workflow retry policy.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("no LLM provider available: {0}")]
    LlmUnavailable(String),

    #[error("intent is ambiguous and needs human disposition")]
    IntentAmbiguous {
        /// Raw model output, preserved for the operator.
        raw: String,
    },

    #[error("schema validation failed: {0}")]
    SchemaInvalid(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("dangerous pattern detected: {0}")]
    DangerousPattern(String),

    #[error("quality score {total} below required {required}")]
    QualityInsufficient { total: u8, required: u8 },

    #[error("autonomy policy requires approval: {0}")]
    RequiresApproval(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("quota exceeded: {kind} ({used}/{limit})")]
    QuotaExceeded { kind: &'static str, used: u64, limit: u64 },

    #[error("feature disabled: {0}")]
    FeatureDisabled(String),

    #[error("circuit breaker open for {endpoint}, retry at {retry_at}")]
    BreakerOpen {
        endpoint: String,
        retry_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("rollback failed with {remaining} operations left on the stack")]
    RollbackFailed { remaining: usize },

    #[error("workflow timed out: {0}")]
    WorkflowTimeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the workflow retry policy may re-attempt the failed
    /// operation. Structural errors (schema, policy, authz) short-circuit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Http(_)
                | Error::Timeout(_)
                | Error::Provider { .. }
                | Error::BreakerOpen { .. }
                | Error::ToolFailed { .. }
        )
    }

    /// Stable machine-readable code recorded alongside terminal states.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Http(_) => "http_error",
            Error::Timeout(_) => "timeout",
            Error::Provider { .. } => "provider_error",
            Error::LlmUnavailable(_) => "llm_unavailable",
            Error::IntentAmbiguous { .. } => "intent_ambiguous",
            Error::SchemaInvalid(_) => "schema_invalid",
            Error::PolicyDenied(_) => "policy_denied",
            Error::DangerousPattern(_) => "dangerous_pattern",
            Error::QualityInsufficient { .. } => "quality_insufficient",
            Error::RequiresApproval(_) => "requires_approval",
            Error::RateLimited { .. } => "rate_limited",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::FeatureDisabled(_) => "feature_disabled",
            Error::BreakerOpen { .. } => "breaker_open",
            Error::ToolFailed { .. } => "tool_failed",
            Error::RollbackFailed { .. } => "rollback_failed",
            Error::WorkflowTimeout(_) => "workflow_timeout",
            Error::Cancelled => "cancelled",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Unauthorized(_) => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config_error",
            Error::Other(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::Timeout("t".into()).is_retryable());
        assert!(Error::Http("503".into()).is_retryable());
        assert!(Error::BreakerOpen {
            endpoint: "e".into(),
            retry_at: chrono::Utc::now(),
        }
        .is_retryable());
    }

    #[test]
    fn structural_errors_are_not_retryable() {
        assert!(!Error::SchemaInvalid("bad".into()).is_retryable());
        assert!(!Error::PolicyDenied("no".into()).is_retryable());
        assert!(!Error::Unauthorized("who".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(Error::Cancelled.reason_code(), "cancelled");
        assert_eq!(
            Error::DangerousPattern("rm -rf /".into()).reason_code(),
            "dangerous_pattern"
        );
        assert_eq!(
            Error::QuotaExceeded { kind: "tokens", used: 1, limit: 1 }.reason_code(),
            "quota_exceeded"
        );
    }
}
