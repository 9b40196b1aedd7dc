use gtasks_core::error::{ErrorPayload, codes};
use serde_json::{Map, Value};

/// Caller-side misuse of a tool. Surfaces as a protocol error, never as an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub docs_hint: Option<String>,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_FAILED, message)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let mut payload = ErrorPayload::new(self.code.as_str(), self.message.as_str());
        if let Some(field) = &self.field {
            payload = payload.with_field(field.as_str());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload = payload.with_docs_hint(docs_hint.as_str());
        }
        payload
    }
}

pub fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(ToolError::validation(format!("'{key}' must be a boolean")).with_field(key)),
    }
}

pub fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args.get(key).ok_or_else(|| {
        ToolError::validation(format!("Missing required field '{key}'")).with_field(key)
    })?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.clone()),
        Value::String(_) => {
            Err(ToolError::validation(format!("'{key}' must not be empty")).with_field(key))
        }
        Value::Null => {
            Err(ToolError::validation(format!("Missing required field '{key}'")).with_field(key))
        }
        _ => Err(ToolError::validation(format!("'{key}' must be a string")).with_field(key)),
    }
}

pub fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(ToolError::validation(format!("'{key}' must be a string")).with_field(key)),
    }
}

pub fn arg_string(args: &Map<String, Value>, key: &str, default: &str) -> Result<String, ToolError> {
    Ok(arg_optional_string(args, key)?.unwrap_or_else(|| default.to_string()))
}

/// Result limit: integers are clamped into `1..=ceiling`; negative,
/// fractional and non-numeric values are rejected.
pub fn arg_clamped_limit(
    args: &Map<String, Value>,
    key: &str,
    default: u32,
    ceiling: u32,
) -> Result<u32, ToolError> {
    let invalid = |what: &str| ToolError::validation(format!("'{key}' {what}")).with_field(key);
    let raw = match args.get(key) {
        None | Some(Value::Null) => return Ok(default),
        Some(Value::Number(n)) => n,
        Some(_) => return Err(invalid("must be a number")),
    };
    let value = if let Some(v) = raw.as_u64() {
        v
    } else if raw.as_i64().is_some() {
        return Err(invalid("must not be negative"));
    } else {
        match raw.as_f64() {
            Some(f) if f < 0.0 => return Err(invalid("must not be negative")),
            Some(f) if f.fract() == 0.0 && f.is_finite() => f as u64,
            _ => return Err(invalid("must be a whole number")),
        }
    };
    Ok(value.clamp(1, u64::from(ceiling)) as u32)
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
