//! The relay core
//!
//! Decodes client frames, answers `ping`, `initialize`, `tools/list` and `resources/list`
//! locally, forwards `tools/call` to the tool executor when one is running, and routes the
//! executor's replies back to the client that asked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_mcp_sdk::schema::{
    CallToolRequestParams, Implementation, InitializeResult, ListResourcesResult,
    ListToolsResult, ProtocolVersion, ServerCapabilities, ServerCapabilitiesResources,
    ServerCapabilitiesTools,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::domain::tools::{build_tools_list, FallbackTools};
use crate::errors::ForwardError;
use crate::executor::{classify_line, ExecutorLine};
use crate::mcp::client::{ClientHandle, ClientId};
use crate::mcp::correlation::{CorrelationKey, CorrelationTable};
use crate::mcp::rpc::{
    parse_inbound, EnvelopeError, Inbound, Request, RequestId, Response, INTERNAL_ERROR,
    INVALID_PARAMS, JSONRPC_VERSION,
};

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

const TOOLS_CALL: &str = "tools/call";

/// Bound on handing a request to the executor when no forward timeout is configured.
const DEFAULT_WRITE_LIMIT: Duration = Duration::from_secs(30);

/// What to do with a message whose `jsonrpc` member is missing or not `"2.0"`, including
/// JSON values that are not objects at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionMismatchPolicy {
    /// Ignore the message without replying.
    #[default]
    Drop,
    /// Reply with an Invalid Request error.
    Reject,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub version_policy: VersionMismatchPolicy,
    pub forward_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            version_policy: VersionMismatchPolicy::Drop,
            forward_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Writable end of the executor's input stream.
pub type LineSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Locked separately from [`ExecutorState`] so a slow write never blocks status reads.
/// Emptied once a write is abandoned, since the stream may then hold a partial line.
type SharedSink = Arc<Mutex<Option<LineSink>>>;

enum ExecutorState {
    Disabled,
    Running { sink: SharedSink },
    Crashed { exit_code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorStatus {
    Disabled,
    Running,
    Crashed,
}

#[derive(Serialize)]
struct ForwardedRequest<'a> {
    jsonrpc: &'static str,
    id: CorrelationKey,
    method: &'static str,
    params: &'a Value,
}

pub struct Relay {
    correlations: CorrelationTable,
    executor: Mutex<ExecutorState>,
    tools: FallbackTools,
    settings: RelaySettings,
    next_client_id: AtomicU64,
}

impl Relay {
    pub fn new(tools: FallbackTools, settings: RelaySettings) -> Self {
        Self {
            correlations: CorrelationTable::new(),
            executor: Mutex::new(ExecutorState::Disabled),
            tools,
            settings,
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn correlations(&self) -> &CorrelationTable {
        &self.correlations
    }

    pub fn register_client(&self, outbound: mpsc::UnboundedSender<Value>) -> ClientHandle {
        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        ClientHandle::new(id, outbound)
    }

    /// Forgets every pending forward owned by the client so late replies are dropped.
    pub async fn client_disconnected(&self, client_id: ClientId) {
        let orphaned = self.correlations.remove_client(client_id).await;
        info!(client_id = %client_id, orphaned, "client disconnected");
    }

    pub async fn attach_executor(&self, sink: LineSink, pid: Option<u32>) {
        *self.executor.lock().await = ExecutorState::Running {
            sink: Arc::new(Mutex::new(Some(sink))),
        };
        debug!(pid = ?pid, "tool executor attached");
    }

    pub async fn executor_status(&self) -> ExecutorStatus {
        match &*self.executor.lock().await {
            ExecutorState::Disabled => ExecutorStatus::Disabled,
            ExecutorState::Running { .. } => ExecutorStatus::Running,
            ExecutorState::Crashed { .. } => ExecutorStatus::Crashed,
        }
    }

    pub async fn executor_exit_code(&self) -> Option<i32> {
        match &*self.executor.lock().await {
            ExecutorState::Crashed { exit_code } => *exit_code,
            ExecutorState::Disabled | ExecutorState::Running { .. } => None,
        }
    }

    /// Called once the executor process has terminated. Later calls use the built-in tools.
    pub async fn executor_exited(&self, exit_code: Option<i32>) {
        warn!(exit_code = ?exit_code, "tool executor exited, falling back to built-in tools");
        let mut executor = self.executor.lock().await;
        if !matches!(*executor, ExecutorState::Disabled) {
            *executor = ExecutorState::Crashed { exit_code };
        }
    }

    pub async fn executor_detached(&self) {
        *self.executor.lock().await = ExecutorState::Disabled;
    }

    async fn mark_crashed(&self) {
        let mut executor = self.executor.lock().await;
        if matches!(*executor, ExecutorState::Running { .. }) {
            *executor = ExecutorState::Crashed { exit_code: None };
        }
    }

    /// Fails every forward still waiting once the executor can no longer answer. Later calls
    /// use the built-in tools even if the process itself is still alive.
    pub async fn executor_output_closed(&self) {
        self.mark_crashed().await;
        for (key, entry) in self.correlations.drain().await {
            warn!(
                client_id = %entry.client.id(),
                correlation_key = key,
                "tool executor closed before replying"
            );
            entry.client.send(
                Response::error(
                    Some(entry.original_id),
                    INTERNAL_ERROR,
                    "Tool executor unavailable",
                    Some(json!(TOOLS_CALL)),
                )
                .into_value(),
            );
        }
    }

    /// Handles one text frame from a client. Returns the immediate reply, if any.
    pub async fn handle_frame(&self, client: &ClientHandle, frame: &str) -> Option<Value> {
        let payload: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(err) => {
                debug!(client_id = %client.id(), error = %err, "client frame is not valid JSON");
                return Some(Response::parse_error().into_value());
            }
        };

        let inbound = match parse_inbound(payload) {
            Ok(inbound) => inbound,
            Err(err @ (EnvelopeError::VersionMismatch { .. } | EnvelopeError::NotAnObject)) => {
                return match self.settings.version_policy {
                    VersionMismatchPolicy::Drop => {
                        debug!(client_id = %client.id(), error = %err, "dropping message without a jsonrpc 2.0 marker");
                        None
                    }
                    VersionMismatchPolicy::Reject => {
                        Some(Response::invalid_request(err.request_id()).into_value())
                    }
                };
            }
            Err(err) => {
                debug!(client_id = %client.id(), error = %err, "rejecting malformed envelope");
                return Some(Response::invalid_request(err.request_id()).into_value());
            }
        };

        match inbound {
            Inbound::Request(request) => self
                .handle_request(client, request)
                .await
                .map(Response::into_value),
            Inbound::Notification(notification) => {
                debug!(
                    client_id = %client.id(),
                    method = %notification.method,
                    "notification received"
                );
                None
            }
        }
    }

    async fn handle_request(&self, client: &ClientHandle, request: Request) -> Option<Response> {
        let Request { id, method, params } = request;

        let response = match method.as_str() {
            "ping" => Some(Response::result(id, json!("pong"))),
            "initialize" => Some(serialize_result(id, &initialize_result())),
            "tools/list" => Some(serialize_result(
                id,
                &ListToolsResult {
                    meta: None,
                    next_cursor: None,
                    tools: build_tools_list(),
                },
            )),
            "resources/list" => Some(serialize_result(
                id,
                &ListResourcesResult {
                    meta: None,
                    next_cursor: None,
                    resources: vec![],
                },
            )),
            TOOLS_CALL => self.handle_tools_call(client, id, params).await,
            _ => Some(Response::error(
                Some(id),
                INVALID_PARAMS,
                "Invalid params",
                Some(Value::String(method.clone())),
            )),
        };

        info!(
            client_id = %client.id(),
            method = %method,
            outcome = match &response {
                None => "forwarded",
                Some(response) if response.is_error() => "failure",
                Some(_) => "success",
            },
            "mcp action audited"
        );

        response
    }

    async fn handle_tools_call(
        &self,
        client: &ClientHandle,
        id: RequestId,
        params: Option<Value>,
    ) -> Option<Response> {
        let Some(params) =
            params.filter(|params| params.get("name").and_then(Value::as_str).is_some())
        else {
            return Some(invalid_tools_call(id));
        };

        match self.forward(client, &id, &params).await {
            Ok(key) => {
                info!(client_id = %client.id(), correlation_key = key, "tools/call forwarded to executor");
                self.arm_timeout(key);
                return None;
            }
            Err(ForwardError::Unavailable) => {}
            Err(ForwardError::Stalled) => {
                warn!(client_id = %client.id(), "tool executor stopped accepting requests");
                return Some(Response::error(
                    Some(id),
                    INTERNAL_ERROR,
                    "Request timed out",
                    Some(json!(TOOLS_CALL)),
                ));
            }
            Err(err @ ForwardError::Encode(_)) => {
                error!(client_id = %client.id(), error = %err, "failed to forward tools/call");
                return Some(Response::error(
                    Some(id),
                    INTERNAL_ERROR,
                    err.to_string(),
                    Some(json!(TOOLS_CALL)),
                ));
            }
            Err(err @ ForwardError::Write(_)) => {
                warn!(client_id = %client.id(), error = %err, "falling back to built-in tools");
            }
        }

        Some(self.call_fallback(id, params).await)
    }

    /// Records the correlation entry and writes the request line. No entry survives a failure.
    ///
    /// Waiting for the sink and writing share one deadline. A write that is cut short leaves
    /// the executor marked crashed.
    async fn forward(
        &self,
        client: &ClientHandle,
        id: &RequestId,
        params: &Value,
    ) -> Result<CorrelationKey, ForwardError> {
        let sink = match &*self.executor.lock().await {
            ExecutorState::Running { sink } => Arc::clone(sink),
            ExecutorState::Disabled | ExecutorState::Crashed { .. } => {
                return Err(ForwardError::Unavailable);
            }
        };
        let write_limit = self.settings.forward_timeout.unwrap_or(DEFAULT_WRITE_LIMIT);
        let deadline = Instant::now() + write_limit;

        let key = self.correlations.insert(client.clone(), id.clone()).await;
        let line = match encode_forward(key, params) {
            Ok(line) => line,
            Err(err) => {
                self.correlations.take(key).await;
                return Err(err.into());
            }
        };

        let Ok(mut sink) = timeout_at(deadline, sink.lock()).await else {
            self.correlations.take(key).await;
            return Err(ForwardError::Stalled);
        };
        let Some(writer) = sink.as_mut() else {
            self.correlations.take(key).await;
            return Err(ForwardError::Unavailable);
        };

        let written = timeout_at(deadline, write_line(writer, line)).await;
        let failure = match written {
            Ok(Ok(())) => return Ok(key),
            Ok(Err(err)) => ForwardError::Write(err),
            Err(_) => ForwardError::Stalled,
        };

        *sink = None;
        drop(sink);
        self.correlations.take(key).await;
        self.mark_crashed().await;
        Err(failure)
    }

    fn arm_timeout(&self, key: CorrelationKey) {
        let Some(timeout) = self.settings.forward_timeout else {
            return;
        };

        let correlations = self.correlations.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(entry) = correlations.take(key).await {
                warn!(
                    client_id = %entry.client.id(),
                    correlation_key = key,
                    elapsed_ms = entry.created_at.elapsed().as_millis(),
                    "forwarded request timed out"
                );
                entry.client.send(
                    Response::error(
                        Some(entry.original_id),
                        INTERNAL_ERROR,
                        "Request timed out",
                        Some(json!(TOOLS_CALL)),
                    )
                    .into_value(),
                );
            }
        });
    }

    async fn call_fallback(&self, id: RequestId, params: Value) -> Response {
        let call: CallToolRequestParams = match serde_json::from_value(params) {
            Ok(call) => call,
            Err(_) => return invalid_tools_call(id),
        };

        match self.tools.call(call).await {
            Ok(result) => serialize_result(id, &result),
            Err(err) => Response::error(
                Some(id),
                INVALID_PARAMS,
                err.to_string(),
                Some(json!(TOOLS_CALL)),
            ),
        }
    }

    /// Routes one line of executor output.
    pub async fn handle_executor_line(&self, line: &str) {
        match classify_line(line) {
            ExecutorLine::Blank => {}
            ExecutorLine::Diagnostic { line, reason } => {
                info!(line = %line, reason, "tool executor output");
            }
            ExecutorLine::Reply { key, message } => self.deliver_reply(key, message).await,
        }
    }

    async fn deliver_reply(&self, key: Option<CorrelationKey>, mut message: Map<String, Value>) {
        let entry = match key {
            Some(key) => self.correlations.take(key).await,
            None => None,
        };
        let Some(entry) = entry else {
            debug!(correlation_key = ?key, "dropping executor reply with no pending request");
            return;
        };

        message.insert("id".to_string(), entry.original_id.to_value());
        if entry.client.send(Value::Object(message)) {
            info!(
                client_id = %entry.client.id(),
                correlation_key = ?key,
                elapsed_ms = entry.created_at.elapsed().as_millis(),
                "executor reply delivered"
            );
        } else {
            debug!(client_id = %entry.client.id(), "client went away before executor reply");
        }
    }
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            resources: Some(ServerCapabilitiesResources {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            prompts: None,
            ..Default::default()
        },
        protocol_version: ProtocolVersion::V2024_11_05.into(),
        instructions: None,
        meta: None,
    }
}

fn serialize_result<T: Serialize>(id: RequestId, result: &T) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::result(id, value),
        Err(err) => {
            error!(error = %err, "failed to serialize result");
            Response::error(Some(id), INTERNAL_ERROR, "Internal error", None)
        }
    }
}

fn invalid_tools_call(id: RequestId) -> Response {
    Response::error(
        Some(id),
        INVALID_PARAMS,
        "Invalid params",
        Some(json!(TOOLS_CALL)),
    )
}

fn encode_forward(key: CorrelationKey, params: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ForwardedRequest {
        jsonrpc: JSONRPC_VERSION,
        id: key,
        method: TOOLS_CALL,
        params,
    })
}

async fn write_line(sink: &mut LineSink, line: String) -> std::io::Result<()> {
    let mut bytes = line.into_bytes();
    bytes.push(b'\n');
    sink.write_all(&bytes).await?;
    sink.flush().await
}
