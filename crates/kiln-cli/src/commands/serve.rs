//! `kiln serve` - line-delimited JSON-RPC 2.0 tool server over stdio
//!
//! Each stdin line is one request; each response is one stdout line.
//! Requests without an `id` are notifications and get no response.
//! Tool failures are reported inside the result (`isError: true`) so the
//! caller sees the message; only malformed traffic gets a JSON-RPC error.

use super::Gateway;
use anyhow::Result;
use kiln_gen::dispatch::route;
use kiln_gen::{
    best_variant, generate_references, read_status, GenerationOptions, ImageProvider, JobHandle,
    MeshModel, Variant, View,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

pub async fn run(gateway: Gateway) -> Result<()> {
    let server = ToolServer::new(gateway);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("tool server ready on stdio");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(response) = server.handle_line(line).await {
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    info!("stdin closed");
    server.drain().await;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Text content returned by a tool
struct ToolOutput {
    text: String,
    is_error: bool,
}

impl ToolOutput {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    fn into_value(self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateParams {
    #[serde(flatten)]
    options: GenerationOptions,
    #[serde(default, alias = "statusPath")]
    status_file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusParams {
    #[serde(alias = "statusPath")]
    status_file: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceParams {
    prompt: String,
    output_path: String,
    #[serde(default)]
    views: Option<Vec<String>>,
    #[serde(default)]
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantParams {
    model: String,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    image_count: Option<usize>,
    #[serde(default)]
    prefer_fast: Option<bool>,
}

pub struct ToolServer {
    gateway: Gateway,
    jobs: Mutex<Vec<JobHandle>>,
}

impl ToolServer {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Handle one request line, returning the response to write (if any)
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("unparseable request: {}", e);
                return Some(error_response(
                    Value::Null,
                    RpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
                ));
            }
        };

        let request: RpcRequest = match serde_json::from_value(raw.clone()) {
            Ok(r) => r,
            Err(e) => {
                let id = raw.get("id").cloned().unwrap_or(Value::Null);
                return Some(error_response(
                    id,
                    RpcError::new(INVALID_REQUEST, format!("Invalid request: {}", e)),
                ));
            }
        };

        debug!(method = %request.method, "request");
        let outcome = self.handle_method(&request.method, request.params).await;

        let id = request.id?;
        Some(match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(err) => error_response(id, err),
        })
    }

    async fn handle_method(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "kiln", "version": env!("CARGO_PKG_VERSION") },
            })),
            "notifications/initialized" | "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_definitions() })),
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("tools/call requires a tool name"))?;
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let output = self.call_tool(name, arguments).await?;
                Ok(output.into_value())
            }
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, RpcError> {
        info!(tool = name, "tool call");
        match name {
            "generate_3d_async" => Ok(self.generate_3d_async(parse_params(arguments)?).await),
            "get_job_status" => Ok(get_job_status(parse_params(arguments)?).await),
            "generate_reference_images" => {
                Ok(self.generate_reference_images(parse_params(arguments)?).await)
            }
            "select_variant" => Ok(recommend_variant(parse_params(arguments)?)),
            other => Err(RpcError::invalid_params(format!("Unknown tool: {}", other))),
        }
    }

    async fn generate_3d_async(&self, params: GenerateParams) -> ToolOutput {
        let status_path = params
            .status_file
            .map(PathBuf::from)
            .unwrap_or_else(|| self.gateway.new_status_path());

        let handle = match self
            .gateway
            .runner
            .start_async_generation(&params.options, &status_path)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return ToolOutput::error(format!("Failed to start generation: {}", e)),
        };

        let text = job_started_text(handle.id(), &status_path);

        let mut jobs = self.jobs.lock().await;
        jobs.retain(|job| !job.is_finished());
        jobs.push(handle);

        ToolOutput::ok(text)
    }

    async fn generate_reference_images(&self, params: ReferenceParams) -> ToolOutput {
        let provider = match params.provider.as_deref() {
            Some(raw) => match raw.parse::<ImageProvider>() {
                Ok(p) => p,
                Err(e) => return ToolOutput::error(e.to_string()),
            },
            None => self.gateway.runner.defaults().reference_provider,
        };

        let mut views = Vec::new();
        for raw in params.views.unwrap_or_default() {
            match raw.parse::<View>() {
                Ok(view) if !views.contains(&view) => views.push(view),
                Ok(_) => {}
                Err(e) => return ToolOutput::error(e.to_string()),
            }
        }
        if views.is_empty() {
            views = View::DEFAULT_REFERENCE_VIEWS.to_vec();
        }

        let images = self.gateway.runner.images();
        match generate_references(
            images.as_ref(),
            provider,
            &params.prompt,
            Path::new(&params.output_path),
            &views,
        )
        .await
        {
            Ok(refs) if refs.is_empty() => {
                ToolOutput::error("Reference generation produced no images")
            }
            Ok(refs) => {
                let body = json!({
                    "provider": provider,
                    "requested": views.len(),
                    "references": refs,
                });
                ToolOutput::ok(serde_json::to_string_pretty(&body).unwrap_or_default())
            }
            Err(e) => ToolOutput::error(format!("Reference generation failed: {}", e)),
        }
    }

    /// Wait for jobs still running when the input stream closes
    pub async fn drain(&self) {
        let jobs: Vec<JobHandle> = self.jobs.lock().await.drain(..).collect();
        let running = jobs.iter().filter(|j| !j.is_finished()).count();
        if running > 0 {
            info!("waiting for {} running job(s)", running);
        }
        for job in jobs {
            let id = job.id().to_string();
            if let Err(e) = job.wait().await {
                warn!(job = %id, "job task ended abnormally: {}", e);
            }
        }
    }
}

async fn get_job_status(params: StatusParams) -> ToolOutput {
    match read_status(&params.status_file).await {
        Ok(record) => match serde_json::to_string_pretty(&record) {
            Ok(text) => ToolOutput::ok(text),
            Err(e) => ToolOutput::error(e.to_string()),
        },
        Err(e) => ToolOutput::error(e.to_string()),
    }
}

fn recommend_variant(params: VariantParams) -> ToolOutput {
    let model: MeshModel = match params.model.parse() {
        Ok(m) => m,
        Err(e) => return ToolOutput::error(e.to_string()),
    };
    let requested = match params.variant.as_deref().map(str::parse::<Variant>).transpose() {
        Ok(v) => v,
        Err(e) => return ToolOutput::error(e.to_string()),
    };

    let chosen = best_variant(
        model,
        requested,
        params.image_count.unwrap_or(1),
        params.prefer_fast.unwrap_or(false),
    );
    let endpoint = route(model, chosen).ok().map(|r| r.endpoint);

    let body = json!({
        "model": model,
        "variant": chosen,
        "requested": requested,
        "substituted": requested.is_some_and(|r| r != chosen),
        "provider": model.provider(),
        "endpoint": endpoint,
    });
    ToolOutput::ok(serde_json::to_string_pretty(&body).unwrap_or_default())
}

fn job_started_text(id: &str, status_path: &Path) -> String {
    format!(
        "3D generation job {id} started.\n\
         Status file: {path}\n\
         \n\
         Read the status file (or call get_job_status) to follow progress. It is a JSON object:\n\
         - id: job id\n\
         - status: \"pending\" | \"processing\" | \"completed\" | \"failed\"\n\
         - progress: 0-100\n\
         - message: current stage\n\
         - startTime / endTime: ISO-8601 timestamps (endTime once finished)\n\
         - result: on completion; savedPaths, model, variant, format, metadata, autoGeneratedReferences\n\
         - error: on failure\n\
         - logs: timestamped log lines",
        id = id,
        path = status_path.display()
    )
}

fn parse_params<T: for<'de> Deserialize<'de>>(arguments: Value) -> Result<T, RpcError> {
    serde_json::from_value(arguments)
        .map_err(|e| RpcError::invalid_params(format!("Invalid arguments: {}", e)))
}

fn error_response(id: Value, err: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": err.code, "message": err.message },
    })
}

fn tool_definitions() -> Value {
    let models: Vec<&str> = MeshModel::ALL.iter().map(|m| m.as_str()).collect();
    let variants: Vec<&str> = Variant::ALL.iter().map(|v| v.as_str()).collect();
    let views: Vec<&str> = View::ALL.iter().map(|v| v.as_str()).collect();
    let providers: Vec<&str> = ImageProvider::ALL.iter().map(|p| p.as_str()).collect();

    json!([
        {
            "name": "generate_3d_async",
            "description": "Start a 3D mesh generation job from input images and/or a text prompt. Returns immediately with the path of a JSON status file that tracks the job.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Text description of the object" },
                    "inputImages": { "type": "array", "items": { "type": "string" }, "description": "Image file paths or data: URIs" },
                    "outputPath": { "type": "string", "description": "Where to save the mesh" },
                    "model": { "type": "string", "enum": models },
                    "variant": { "type": "string", "enum": variants },
                    "format": { "type": "string", "enum": ["glb", "obj"] },
                    "autoGenerateReferences": { "type": "boolean" },
                    "referenceViews": { "type": "array", "items": { "type": "string", "enum": views } },
                    "cleanupReferences": { "type": "boolean" },
                    "referenceProvider": { "type": "string", "enum": providers },
                    "preferFast": { "type": "boolean" },
                    "statusFile": { "type": "string", "description": "Status file path (defaults to a new file in the jobs directory)" }
                },
                "required": ["outputPath"]
            }
        },
        {
            "name": "get_job_status",
            "description": "Read the status record of a generation job",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "statusFile": { "type": "string" }
                },
                "required": ["statusFile"]
            }
        },
        {
            "name": "generate_reference_images",
            "description": "Generate view-consistent reference images from a prompt. The front view is generated first and conditions the others.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": { "type": "string" },
                    "outputPath": { "type": "string", "description": "Mesh path the reference files are named after" },
                    "views": { "type": "array", "items": { "type": "string", "enum": views } },
                    "provider": { "type": "string", "enum": providers }
                },
                "required": ["prompt", "outputPath"]
            }
        },
        {
            "name": "select_variant",
            "description": "Recommend a variant for a model, substituting a compatible one when the requested variant is unsupported",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "model": { "type": "string", "enum": models },
                    "variant": { "type": "string", "enum": variants },
                    "imageCount": { "type": "integer", "minimum": 0 },
                    "preferFast": { "type": "boolean" }
                },
                "required": ["model"]
            }
        }
    ])
}
