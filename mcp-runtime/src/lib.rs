use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use gtasks_core::error::{ErrorPayload, codes};
use gtasks_core::uri::{
    AddressError, CALENDAR_URI_FORMAT, ResourceKind, ResourceUri, TASK_URI_FORMAT,
};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::{debug, error, info, warn};

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod google;
pub mod lifecycle;
pub mod oauth;
pub mod registry;
pub mod store;
pub mod tools;
pub mod transport;
mod util;

pub use config::RuntimeConfig;
pub use lifecycle::{CredentialError, CredentialLifecycleManager};

use backend::Backends;
use registry::{RegistryError, ResourceAddressRegistry, ResourceListing, TEXT_MIME};
use tools::{ToolDispatcher, tool_definitions};
use transport::{Framing, read_message, write_message};
use util::{ToolError, to_pretty_json};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "gtasks-mcp";

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum McpCommands {
    /// Serve Google Tasks and Calendar over MCP on stdio (default)
    Serve,
    /// Run the OAuth consent flow, store the credentials and exit
    Auth,
}

/// Locations and consent options shared by every command.
#[derive(Args, Clone, Debug, Default)]
pub struct RuntimeArgs {
    /// Directory holding credentials.json and gcp-oauth.keys.json
    #[arg(long, env = "GTASKS_MCP_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,
    /// Durable credential store (default: <config-dir>/credentials.json)
    #[arg(long, env = "GTASKS_MCP_CREDENTIALS_PATH")]
    pub credentials_path: Option<PathBuf>,
    /// Local OAuth client keyfile (default: <config-dir>/gcp-oauth.keys.json)
    #[arg(long, env = "GTASKS_MCP_KEYFILE")]
    pub keyfile: Option<PathBuf>,
    /// Print the consent URL without opening a browser
    #[arg(long)]
    pub no_browser: bool,
}

impl RuntimeArgs {
    pub fn into_config(self) -> RuntimeConfig {
        let dir = self.config_dir.unwrap_or_else(RuntimeConfig::default_dir);
        let mut config = RuntimeConfig::from_dir(dir).with_open_browser(!self.no_browser);
        if let Some(path) = self.credentials_path {
            config = config.with_credentials_path(path);
        }
        if let Some(path) = self.keyfile {
            config = config.with_local_keyfile(path);
        }
        config
    }
}

pub async fn run(config: RuntimeConfig, command: McpCommands) -> i32 {
    let manager = match CredentialLifecycleManager::from_config(&config) {
        Ok(manager) => manager,
        Err(err) => return report_fatal(&err.to_payload()),
    };

    match command {
        McpCommands::Auth => match manager.bootstrap().await {
            Ok(_) => {
                let payload = json!({
                    "status": "authenticated",
                    "credentials_path": manager.store().path().display().to_string(),
                });
                println!("{}", to_pretty_json(&payload));
                0
            }
            Err(err) => report_fatal(&err.to_payload()),
        },
        McpCommands::Serve => {
            let factory = match manager.ensure_authenticated().await {
                Ok(factory) => factory,
                Err(err) => return report_fatal(&err.to_payload()),
            };
            let server = McpServer::new(&factory.backends());
            info!(server = MCP_SERVER_NAME, "serving MCP over stdio");

            let mut reader = BufReader::new(tokio::io::stdin());
            let mut writer = tokio::io::stdout();
            match server.serve(&mut reader, &mut writer).await {
                Ok(()) => 0,
                Err(err) => report_fatal(&ErrorPayload::new(codes::TRANSPORT_ERROR, err)),
            }
        }
    }
}

fn report_fatal(payload: &ErrorPayload) -> i32 {
    error!(error = %payload.error, message = %payload.message, "fatal");
    let value = serde_json::to_value(payload).unwrap_or_else(|_| json!({}));
    eprintln!("{}", to_pretty_json(&value));
    1
}

pub struct McpServer {
    registry: Arc<ResourceAddressRegistry>,
    dispatcher: ToolDispatcher,
}

impl McpServer {
    pub fn new(backends: &Backends) -> Self {
        let registry = Arc::new(ResourceAddressRegistry::new(backends));
        Self {
            dispatcher: ToolDispatcher::new(backends, registry.clone()),
            registry,
        }
    }

    /// Serve until the reader reaches end of stream.
    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let message = read_message(reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(message) = message else {
                debug!("stdin closed");
                break;
            };

            let response = match message.payload {
                Ok(incoming) => self.handle_incoming_message(incoming).await,
                Err(err) => Some(error_response(
                    Value::Null,
                    RpcError::parse_error(format!("Parse error: {err}")),
                )),
            };
            if let Some(response) = response {
                write_response(writer, message.framing, &response).await?;
            }
        }
        Ok(())
    }

    /// A batch yields one array reply; a lone notification yields nothing.
    async fn handle_incoming_message(&self, incoming: Value) -> Option<Value> {
        let Some(batch) = incoming.as_array() else {
            return self.handle_single_message(incoming).await;
        };
        if batch.is_empty() {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Batch request must not be empty"),
            ));
        }
        let mut responses = Vec::new();
        for item in batch {
            if let Some(response) = self.handle_single_message(item.clone()).await {
                responses.push(response);
            }
        }
        if responses.is_empty() {
            None
        } else {
            Some(Value::Array(responses))
        }
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A response to a request we never send.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(method, params).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            debug!(method, "notification ignored");
            None
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => self.handle_resources_list(params).await,
            "resources/read" => self.handle_resources_read(params).await,
            "resources/templates/list" => Ok(self.resource_templates_payload()),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                },
                "resources": {
                    "listChanged": false
                },
                "prompts": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    fn resource_templates_payload(&self) -> Value {
        json!({
            "resourceTemplates": [
                {
                    "uriTemplate": TASK_URI_FORMAT,
                    "name": "Google Task",
                    "mimeType": TEXT_MIME
                },
                {
                    "uriTemplate": CALENDAR_URI_FORMAT,
                    "name": "Google Calendar event",
                    "mimeType": registry::JSON_MIME
                }
            ]
        })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let envelope = self.dispatcher.invoke(name, &args).await.map_err(|err| {
            warn!(tool = name, error = %err.code, message = %err.message, "tool call rejected");
            RpcError::from(err)
        })?;
        serde_json::to_value(envelope).map_err(|e| RpcError::internal(e.to_string()))
    }

    async fn handle_resources_list(&self, params: Value) -> Result<Value, RpcError> {
        let cursor = match params.get("cursor") {
            Some(Value::String(cursor)) => Some(cursor.clone()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(RpcError::invalid_params("'cursor' must be a string")),
        };

        let listing = self.registry.list(ResourceKind::Task, cursor).await?;
        let mut payload = json!({ "resources": [] });
        if let ResourceListing::Tasks(page) = &listing {
            payload["resources"] = page
                .items
                .iter()
                .filter_map(|task| {
                    let id = task.id.as_deref()?;
                    Some(json!({
                        "uri": ResourceUri::task(id).to_string(),
                        "name": task.title.as_deref().unwrap_or(id),
                        "mimeType": TEXT_MIME,
                    }))
                })
                .collect();
        }
        if let Some(next) = listing.next_cursor() {
            payload["nextCursor"] = Value::String(next.to_string());
        }
        Ok(payload)
    }

    async fn handle_resources_read(&self, params: Value) -> Result<Value, RpcError> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("resources/read requires string field 'uri'"))?;
        let contents = self.registry.read(uri).await?;
        Ok(json!({ "contents": [contents.to_value()] }))
    }
}

async fn write_response<W>(writer: &mut W, framing: Framing, response: &Value) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    write_message(writer, framing, response)
        .await
        .map_err(|e| format!("Failed to write MCP response: {e}"))
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }

    fn resource_not_found(message: impl Into<String>) -> Self {
        Self {
            code: -32002,
            message: message.into(),
            data: None,
        }
    }

    fn with_payload(mut self, payload: &ErrorPayload) -> Self {
        self.data = serde_json::to_value(payload).ok();
        self
    }
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        RpcError::invalid_params(err.message.clone()).with_payload(&err.to_payload())
    }
}

impl From<RegistryError> for RpcError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match &err {
            RegistryError::Address(AddressError::Malformed { .. }) => {
                RpcError::invalid_params(message.clone())
                    .with_payload(&ErrorPayload::new(codes::ADDRESS_PARSE_ERROR, message).with_field("uri"))
            }
            RegistryError::Address(AddressError::UnknownScheme(_)) | RegistryError::NotFound(_) => {
                RpcError::resource_not_found(message.clone())
                    .with_payload(&ErrorPayload::new(codes::RESOURCE_NOT_FOUND, message))
            }
            RegistryError::Backend(_) => RpcError::internal(message.clone())
                .with_payload(&ErrorPayload::new(codes::BACKEND_ERROR, message)),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}
