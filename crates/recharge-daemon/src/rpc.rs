//! JSON-RPC server over TCP.
//!
//! Accepts connections, reads one JSON-RPC request per line, and
//! dispatches method calls to the command handlers. Engine errors carry
//! the equivalent HTTP status in `error.data.http_status`.

use std::future::Future;
use std::sync::Arc;

use recharge_draw::DrawError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn bare(code: i32, message: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    fn with_status(code: i32, message: &str, http_status: u16, detail: String) -> Self {
        Self::bare(
            code,
            message,
            Some(serde_json::json!({ "http_status": http_status, "detail": detail })),
        )
    }

    pub fn parse_error() -> Self {
        Self::bare(-32700, "PARSE_ERROR", None)
    }

    pub fn invalid_request() -> Self {
        Self::bare(-32600, "INVALID_REQUEST", None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::bare(-32601, "METHOD_NOT_FOUND", Some(serde_json::json!({ "method": method })))
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::with_status(-32602, "INVALID_PARAMS", 400, detail.to_string())
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::with_status(-32603, "INTERNAL_ERROR", 500, detail.to_string())
    }

    /// HTTP status carried in `data`, if any.
    pub fn http_status(&self) -> Option<u64> {
        self.data
            .as_ref()
            .and_then(|d| d.get("http_status"))
            .and_then(|s| s.as_u64())
    }
}

impl From<DrawError> for RpcError {
    fn from(err: DrawError) -> Self {
        let detail = err.to_string();
        match err {
            DrawError::InvalidInput(_) => Self::with_status(-32602, "INVALID_INPUT", 400, detail),
            DrawError::InvalidDrawConfig(_) => {
                Self::with_status(-32602, "INVALID_DRAW_CONFIG", 400, detail)
            }
            DrawError::NotFound(_) => Self::with_status(-32004, "NOT_FOUND", 404, detail),
            DrawError::DuplicateDraw { .. } => {
                Self::with_status(-32009, "DUPLICATE_DRAW", 409, detail)
            }
            DrawError::InvalidState { .. } => {
                Self::with_status(-32010, "INVALID_STATE", 409, detail)
            }
            DrawError::AlreadyRunning(_) => {
                Self::with_status(-32011, "ALREADY_RUNNING", 409, detail)
            }
            DrawError::StorageUnavailable(_) => {
                Self::with_status(-32020, "STORAGE_UNAVAILABLE", 500, detail)
            }
            DrawError::Cancelled => Self::with_status(-32021, "CANCELLED", 500, detail),
            DrawError::DeadlineExceeded(_) => {
                Self::with_status(-32022, "DEADLINE_EXCEEDED", 500, detail)
            }
            DrawError::NotificationDispatchFailed(_) => {
                Self::with_status(-32030, "NOTIFICATION_DISPATCH_FAILED", 500, detail)
            }
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    listener: TcpListener,
}

impl RpcServer {
    /// Bind the listen address.
    pub async fn bind(state: Arc<DaemonState>, addr: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("JSON-RPC server listening on {}", listener.local_addr()?);
        Ok(Self { state, listener })
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!(%peer, "Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Requests on one connection share a cancellation signal that flips when
/// the client hangs up mid-request or the daemon starts shutting down.
async fn handle_connection(state: Arc<DaemonState>, stream: TcpStream) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let (cancel_tx, cancel) = watch::channel(*state.cancel.borrow());

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                let dispatch = dispatch_request(&state, request, &cancel);
                watch_peer(dispatch, &mut reader, state.cancel.clone(), &cancel_tx).await
            }
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        if *cancel.borrow() {
            debug!("client gone or daemon stopping, dropping response");
            break;
        }
        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Drive `dispatch` to completion while watching the peer and the daemon.
///
/// `cancel` is set when the peer reaches EOF (or errors) before the
/// response is ready, or when `shutdown` flips. The dispatch itself is
/// never dropped early so a running draw always reaches a terminal state.
async fn watch_peer<F, R>(
    dispatch: F,
    reader: &mut R,
    mut shutdown: watch::Receiver<bool>,
    cancel: &watch::Sender<bool>,
) -> F::Output
where
    F: Future,
    R: AsyncBufRead + Unpin,
{
    tokio::pin!(dispatch);
    let mut watching_peer = true;
    let mut watching_shutdown = true;

    loop {
        tokio::select! {
            output = &mut dispatch => return output,
            gone = peer_gone(reader), if watching_peer => {
                watching_peer = false;
                if gone {
                    debug!("client disconnected mid-request");
                    let _ = cancel.send(true);
                }
            }
            stopping = shutdown_requested(&mut shutdown), if watching_shutdown => {
                watching_shutdown = false;
                if stopping {
                    let _ = cancel.send(true);
                }
            }
        }
    }
}

/// `true` on EOF or a read error. Pipelined bytes mean the peer is alive.
async fn peer_gone<R: AsyncBufRead + Unpin>(reader: &mut R) -> bool {
    match reader.fill_buf().await {
        Ok(buf) => buf.is_empty(),
        Err(_) => true,
    }
}

/// Resolves `true` once shutdown is signalled, `false` if it never can be.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) -> bool {
    loop {
        let stopping = *rx.borrow_and_update();
        if stopping {
            return true;
        }
        if rx.changed().await.is_err() {
            return false;
        }
    }
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
///
/// `cancel` aborts long-running calls such as `execute_draw`.
pub async fn dispatch_request(
    state: &Arc<DaemonState>,
    request: RpcRequest,
    cancel: &watch::Receiver<bool>,
) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Draws
        "schedule_draw" => commands::draws::schedule_draw(state, params).await,
        "execute_draw" => commands::draws::execute_draw(state, params, cancel).await,
        "get_draw" => commands::draws::get_draw(state, params).await,
        "get_draws_by_date" => commands::draws::get_draws_by_date(state, params).await,
        "list_draws" => commands::draws::list_draws(state, params).await,
        "count_draws" => commands::draws::count_draws(state, params).await,
        "reschedule_draw" => commands::draws::reschedule_draw(state, params).await,
        "retry_notifications" => commands::draws::retry_notifications(state, params).await,
        "get_default_digits" => commands::draws::get_default_digits(state, params).await,

        // Subscribers
        "ingest_topup" => commands::subscribers::ingest_topup(state, params).await,
        "opt_in" => commands::subscribers::opt_in(state, params).await,
        "opt_out" => commands::subscribers::opt_out(state, params).await,
        "get_subscriber" => commands::subscribers::get_subscriber(state, params).await,
        "reset_points" => commands::subscribers::reset_points(state, params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => {
            if err.http_status().is_some_and(|s| s >= 500) {
                error!(method, code = err.code, "RPC call failed: {}", err.message);
            }
            RpcResponse::error(id, err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use recharge_types::DrawType;

    fn request(method: &str, params: serde_json::Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: serde_json::json!(1),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_draw_error_mapping() {
        let dup: RpcError = DrawError::DuplicateDraw {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
            draw_type: DrawType::Daily,
        }
        .into();
        assert_eq!(dup.message, "DUPLICATE_DRAW");
        assert_eq!(dup.http_status(), Some(409));

        let missing: RpcError = DrawError::NotFound("draw x".to_string()).into();
        assert_eq!(missing.http_status(), Some(404));

        let running: RpcError = DrawError::AlreadyRunning("x".to_string()).into();
        assert_eq!(running.http_status(), Some(409));

        let cancelled: RpcError = DrawError::Cancelled.into();
        assert_eq!(cancelled.http_status(), Some(500));

        let err = RpcError::method_not_found("unknown");
        assert_eq!(err.code, -32601);
        assert_eq!(err.http_status(), None);
    }

    #[test]
    fn test_rpc_response_shapes() {
        let ok = RpcResponse::success(serde_json::json!(1), serde_json::json!({"points": 3}));
        assert!(ok.result.is_some());
        assert!(ok.error.is_none());

        let err = RpcResponse::error(serde_json::json!(1), RpcError::internal_error("test"));
        let json = serde_json::to_value(&err).expect("serialize");
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["data"]["http_status"], 500);
    }

    #[tokio::test]
    async fn test_dispatch_schedule_and_get() {
        let state = crate::tests::memory_state();

        let scheduled = dispatch_request(
            &state,
            request("schedule_draw", serde_json::json!({"draw_date": "2024-01-01"})),
            &state.cancel,
        )
        .await;
        let draw = scheduled.result.expect("scheduled");
        assert_eq!(draw["status"], "SCHEDULED");
        assert_eq!(draw["draw_type"], "DAILY");
        assert_eq!(draw["eligible_digits"], serde_json::json!([0, 1]));

        let id = draw["id"].as_str().expect("id").to_string();
        let fetched = dispatch_request(&state, request("get_draw", serde_json::json!({"draw_id": id})), &state.cancel).await;
        assert_eq!(fetched.result.expect("fetched")["id"], draw["id"]);

        let dup = dispatch_request(
            &state,
            request("schedule_draw", serde_json::json!({"draw_date": "2024-01-01"})),
            &state.cancel,
        )
        .await;
        assert_eq!(dup.error.expect("duplicate").http_status(), Some(409));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_bad_requests() {
        let state = crate::tests::memory_state();

        let unknown = dispatch_request(&state, request("nope", serde_json::Value::Null), &state.cancel).await;
        assert_eq!(unknown.error.expect("error").code, -32601);

        let missing = dispatch_request(&state, request("get_draw", serde_json::Value::Null), &state.cancel).await;
        assert_eq!(missing.error.expect("error").code, -32602);

        let absent = dispatch_request(
            &state,
            request("get_draw", serde_json::json!({"draw_id": "missing"})),
            &state.cancel,
        )
        .await;
        assert_eq!(absent.error.expect("error").http_status(), Some(404));

        let mut old = request("get_draw", serde_json::Value::Null);
        old.jsonrpc = "1.0".to_string();
        assert_eq!(
            dispatch_request(&state, old, &state.cancel).await.error.expect("error").code,
            -32600
        );
    }

    #[tokio::test]
    async fn test_peer_hangup_cancels_in_flight_request() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let (cancel_tx, mut cancel) = watch::channel(false);
        drop(client);

        let saw_cancel = watch_peer(
            async move {
                let seen = cancel.wait_for(|c| *c).await.is_ok();
                seen
            },
            &mut reader,
            shutdown,
            &cancel_tx,
        )
        .await;
        assert!(saw_cancel);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_request() {
        let (_client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (cancel_tx, mut cancel) = watch::channel(false);
        shutdown_tx.send(true).expect("shutdown");

        let saw_cancel = watch_peer(
            async move {
                let seen = cancel.wait_for(|c| *c).await.is_ok();
                seen
            },
            &mut reader,
            shutdown,
            &cancel_tx,
        )
        .await;
        assert!(saw_cancel);
    }

    #[tokio::test]
    async fn test_pipelined_request_keeps_connection_live() {
        let (mut client, server) = tokio::io::duplex(256);
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"get_draw\"}\n")
            .await
            .expect("write");
        let mut reader = BufReader::new(server);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let (cancel_tx, cancel) = watch::channel(false);

        let value = watch_peer(
            async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                7
            },
            &mut reader,
            shutdown,
            &cancel_tx,
        )
        .await;
        assert_eq!(value, 7);
        assert!(!*cancel.borrow());

        // The pipelined line is still there for the next read.
        let mut next = String::new();
        reader.read_line(&mut next).await.expect("read");
        assert!(next.contains("get_draw"));
    }
}
