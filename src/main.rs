use std::process::ExitCode;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use mcp_guard::middleware::duration_ms;
use mcp_guard::models::JSONRPC_VERSION;
use mcp_guard::utils::StopReason;
use mcp_guard::{
    Config, ErrorHandler, MiddlewareError, MiddlewareResult, ProtocolMiddleware, RequestContext,
    RpcRequest, codes, metrics, utils,
};

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the protocol, so logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting MCP Guard v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the stdio server, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    let session_id = config
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(
        session_id = %session_id,
        default_timeout_ms = duration_ms(config.default_timeout),
        max_timeout_ms = duration_ms(config.max_timeout),
        max_params_bytes = config.max_params_bytes,
        "Configuration loaded"
    );

    let middleware = ProtocolMiddleware::from_config(&config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = utils::shutdown_signal();
    tokio::pin!(shutdown);

    info!("Reading newline-delimited JSON-RPC from stdin");
    let reason = loop {
        let line = tokio::select! {
            reason = &mut shutdown => break reason,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break StopReason::StdinClosed,
            Err(e) => {
                error!("Failed to read stdin: {e}");
                middleware.shutdown().await;
                return Err(exitcode::IOERR);
            }
        };

        let Some(reply) = serve_line(&middleware, &session_id, &line).await else {
            continue;
        };

        let mut bytes = reply.to_string().into_bytes();
        bytes.push(b'\n');
        if let Err(e) = write_reply(&mut stdout, &bytes).await {
            error!("Failed to write stdout: {e}");
            middleware.shutdown().await;
            return Err(exitcode::IOERR);
        }
    };

    info!(%reason, "Stopping stdio loop, cancelling pending timers...");
    middleware.shutdown().await;

    let stats = middleware.stats().await;
    info!(
        validations = stats.validation.total_validations,
        validation_errors = stats.validation.validation_errors,
        timeouts = stats.timeouts.total_timeouts,
        errors = stats.errors.total_errors,
        "Shutdown complete"
    );
    Ok(())
}

async fn write_reply(stdout: &mut tokio::io::Stdout, bytes: &[u8]) -> std::io::Result<()> {
    stdout.write_all(bytes).await?;
    stdout.flush().await
}

/// Handle one input line. Returns `None` for blank lines and notifications.
async fn serve_line(middleware: &ProtocolMiddleware, session_id: &str, line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            return Some(json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": null,
                "error": {"code": codes::PARSE_ERROR, "message": format!("Parse error: {e}")},
            }));
        }
    };

    // Notifications carry no id and get no reply
    if let Some(map) = raw.as_object()
        && !map.contains_key("id")
        && map.get("method").is_some_and(Value::is_string)
    {
        debug!(method = ?map.get("method"), "Ignoring notification");
        return None;
    }

    let id = raw.get("id").cloned().unwrap_or(Value::Null);
    let context = RequestContext::from_raw(&raw, Some(session_id.to_string()));

    let reply = match middleware.process_request(&raw, &context, catalog).await {
        Ok(result) => {
            let response = json!({"jsonrpc": JSONRPC_VERSION, "id": id.clone(), "result": result});
            serde_json::from_value::<RpcRequest>(raw)
                .map_err(MiddlewareError::from)
                .and_then(|request| middleware.process_response(&response, &request, &context))
        }
        Err(e) => Err(e),
    };

    Some(reply.unwrap_or_else(|e| error_reply(id, &e)))
}

fn error_reply(id: Value, error: &MiddlewareError) -> Value {
    let envelope = error
        .envelope()
        .cloned()
        .unwrap_or_else(|| ErrorHandler::format_mcp_error(error));
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "error": envelope})
}

/// Built-in handler: an MCP server with nothing registered.
async fn catalog(request: RpcRequest) -> MiddlewareResult<Value> {
    match request.method.as_str() {
        "tools/list" => Ok(json!({"tools": []})),
        "resources/list" => Ok(json!({"resources": []})),
        "prompts/list" => Ok(json!({"prompts": []})),
        "roots/list" => Ok(json!({"roots": []})),
        _ => Err(MiddlewareError::method_not_found(request.method)),
    }
}
