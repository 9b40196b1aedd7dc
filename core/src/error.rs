use serde::Serialize;

/// Structured error payload, designed for agents rather than humans.
/// Carried as JSON-RPC `error.data` and printed on fatal startup errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    /// Machine-readable error code (see [`codes`])
    pub error: String,
    /// Agent-readable description of what went wrong
    pub message: String,
    /// Which argument caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Hint about how to recover
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

impl ErrorPayload {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }
}

/// Error codes used across the server
pub mod codes {
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const CREDENTIAL_STORE_ERROR: &str = "credential_store_error";
    pub const ADDRESS_PARSE_ERROR: &str = "address_parse_error";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const RESOURCE_NOT_FOUND: &str = "resource_not_found";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const BACKEND_ERROR: &str = "backend_error";
    pub const TRANSPORT_ERROR: &str = "transport_error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_fields_are_omitted_when_unset() {
        let payload = ErrorPayload::new(codes::VALIDATION_FAILED, "Missing required field 'title'");
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "error": "validation_failed",
                "message": "Missing required field 'title'"
            })
        );
    }

    #[test]
    fn builder_sets_field_and_hint() {
        let payload = ErrorPayload::new(codes::CONFIGURATION_ERROR, "no keyfile")
            .with_field("keyfile")
            .with_docs_hint("set GOOGLE_OAUTH_CREDENTIALS");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["field"], "keyfile");
        assert_eq!(value["docs_hint"], "set GOOGLE_OAUTH_CREDENTIALS");
    }
}
