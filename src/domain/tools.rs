//! Tool catalog and the built-in fallback tool set
//!
//! The catalog is what `tools/list` advertises. [`FallbackTools`] only runs calls locally
//! when no tool executor process is available.

use std::sync::Arc;

use rust_mcp_sdk::{
    macros,
    schema::{CallToolRequestParams, CallToolResult, ContentBlock, TextContent, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    content_fetcher::{ContentFetcher, HttpMethod},
    errors::ToolError,
};

pub const FETCH_PREVIEW_CHARS: usize = 1_000;

#[macros::mcp_tool(name = "addNumbers", description = "Add two numbers together")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct AddNumbersTool {
    /// First number
    pub a: f64,
    /// Second number
    pub b: f64,
}

#[macros::mcp_tool(name = "fetchContent", description = "Fetch content from a URL")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct FetchContentTool {
    /// URL to fetch
    pub url: String,
    /// HTTP method, GET or POST (defaults to GET)
    pub method: Option<String>,
}

#[macros::mcp_tool(
    name = "readFile",
    description = "Read file contents (simulated, no file system access)"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ReadFileTool {
    /// File path to read
    pub path: String,
}

pub fn build_tools_list() -> Vec<Tool> {
    vec![
        AddNumbersTool::tool(),
        FetchContentTool::tool(),
        ReadFileTool::tool(),
    ]
}

#[derive(Clone)]
pub struct FallbackTools {
    fetcher: Arc<dyn ContentFetcher>,
}

impl FallbackTools {
    pub fn new(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn call(&self, params: CallToolRequestParams) -> Result<CallToolResult, ToolError> {
        let arguments = params.arguments.unwrap_or_default();

        let text = match params.name.as_str() {
            "addNumbers" => add_numbers(&arguments)?,
            "fetchContent" => self.fetch_content(&arguments).await?,
            "readFile" => read_file(&arguments)?,
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };

        Ok(text_result(text))
    }

    async fn fetch_content(&self, arguments: &Map<String, Value>) -> Result<String, ToolError> {
        let url = arguments
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ToolError::InvalidArguments("url must be a non-empty string"))?;

        let method = match arguments.get("method") {
            None | Some(Value::Null) => HttpMethod::Get,
            Some(value) => value
                .as_str()
                .and_then(HttpMethod::parse)
                .ok_or(ToolError::InvalidArguments("method must be GET or POST"))?,
        };

        let body = self.fetcher.fetch(url, method).await?;
        Ok(preview(&body))
    }
}

fn add_numbers(arguments: &Map<String, Value>) -> Result<String, ToolError> {
    let a = arguments.get("a").and_then(Value::as_f64);
    let b = arguments.get("b").and_then(Value::as_f64);

    match (a, b) {
        (Some(a), Some(b)) => Ok(format_number(a + b)),
        _ => Err(ToolError::InvalidArguments("a and b must be numbers")),
    }
}

fn read_file(arguments: &Map<String, Value>) -> Result<String, ToolError> {
    let path = arguments
        .get("path")
        .and_then(Value::as_str)
        .filter(|path| !path.trim().is_empty())
        .ok_or(ToolError::InvalidArguments("path must be a non-empty string"))?;

    // Never touches the file system.
    Ok(format!(
        "Simulated contents of {path}\n(file system access is disabled in the browser relay)"
    ))
}

fn preview(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(FETCH_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Renders a sum the way a browser would print it: integral values carry no fraction.
fn format_number(value: f64) -> String {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        return format!("{}", value as i64);
    }

    value.to_string()
}

fn text_result(text: String) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text, None, None))],
        is_error: None,
        meta: None,
        structured_content: None,
    }
}
