//! HTTP API for the settlement engine
//!
//! - `POST /api/payments` - process one inbound payment
//! - `POST /api/cycles/settle` - settle the active cycle (admin)
//! - `POST /api/cycles/open` - open the initial cycle (admin)
//! - `POST /api/deposits` - record fresh capital (admin)
//! - `GET /api/cycles/active` - active cycle share read-model
//! - `GET /health` - liveness plus ledger counters
//!
//! Admin endpoints take the caller credential from the `X-Admin-Token`
//! header. Errors map to statuses via [`EngineError::status_code`].

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::db::SettlementDb;
use crate::error::{EngineError, Result};
use crate::payment::{PaymentRequest, SubscriptionManager};
use crate::settlement::{DepositRequest, FundCycleEngine, SettleRequest};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// HTTP server state
pub struct HttpServer {
    bind_addr: SocketAddr,
    payments: Arc<SubscriptionManager>,
    cycles: Arc<FundCycleEngine>,
    db: Arc<SettlementDb>,
}

impl HttpServer {
    pub fn new(
        bind_addr: SocketAddr,
        payments: Arc<SubscriptionManager>,
        cycles: Arc<FundCycleEngine>,
        db: Arc<SettlementDb>,
    ) -> Self {
        Self {
            bind_addr,
            payments,
            cycles,
            db,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| EngineError::Config(format!("bind {}: {}", self.bind_addr, e)))?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener
                .accept()
                .await
                .map_err(|e| EngineError::Internal(format!("accept: {}", e)))?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let result = match (method, path.as_str()) {
            (Method::GET, "/health") => self.handle_health().await,
            (Method::POST, "/api/payments") => self.handle_payment(req).await,
            (Method::POST, "/api/cycles/settle") => self.handle_settle(req).await,
            (Method::POST, "/api/cycles/open") => self.handle_open_cycle(req).await,
            (Method::POST, "/api/deposits") => self.handle_deposit(req).await,
            (Method::GET, "/api/cycles/active") => self.handle_active_cycle().await,
            _ => not_found(&path),
        };

        Ok(match result {
            Ok(response) => response,
            Err(e) => error_response(&e),
        })
    }

    async fn handle_health(&self) -> Result<Response<Full<Bytes>>> {
        let stats = self.db.stats()?;
        json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "ok",
                "ledger": stats,
            }),
        )
    }

    async fn handle_payment(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let payment: PaymentRequest = read_json(req).await?;
        let receipt = self.payments.pay_for(payment).await?;
        json_response(StatusCode::CREATED, &receipt)
    }

    async fn handle_settle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let caller = admin_token(&req)?;
        let settle: SettleRequest = read_json(req).await?;
        let summary = self.cycles.settle_cycle(&caller, settle).await?;
        json_response(StatusCode::OK, &summary)
    }

    async fn handle_open_cycle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let caller = admin_token(&req)?;
        let cycle = self.cycles.open_initial_cycle(&caller).await?;
        json_response(StatusCode::CREATED, &cycle)
    }

    async fn handle_deposit(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let caller = admin_token(&req)?;
        let deposit: DepositRequest = read_json(req).await?;
        let row = self.cycles.record_deposit(&caller, deposit).await?;
        json_response(StatusCode::CREATED, &row)
    }

    async fn handle_active_cycle(&self) -> Result<Response<Full<Bytes>>> {
        let overview = self.cycles.active_cycle_overview().await?;
        json_response(StatusCode::OK, &overview)
    }
}

fn not_found(path: &str) -> Result<Response<Full<Bytes>>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "error": "not_found",
            "message": format!("no route for {}", path),
        }),
    )
}

/// Pull the admin credential off the request
fn admin_token(req: &Request<Incoming>) -> Result<String> {
    req.headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            EngineError::Unauthorized(format!("missing {} header", ADMIN_TOKEN_HEADER))
        })
}

/// Read and parse a JSON request body
async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = req
        .collect()
        .await
        .map_err(|e| EngineError::BadRequest(format!("failed to read body: {}", e)))?;
    let bytes = body.to_bytes();

    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::BadRequest(format!("invalid JSON body: {}", e)))
}

/// Serialize a value as a JSON response
fn json_response<T: serde::Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<Full<Bytes>>> {
    let body = serde_json::to_string(value)
        .map_err(|e| EngineError::Internal(format!("response serialize: {}", e)))?;

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| EngineError::Internal(format!("response build: {}", e)))
}

/// Render an [`EngineError`] as its mapped status with a JSON body
fn error_response(err: &EngineError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    if status.is_server_error() {
        warn!(error = %err, status = %status, "Request failed");
    } else {
        debug!(error = %err, status = %status, "Request rejected");
    }

    let body = serde_json::json!({
        "error": err.code(),
        "message": err.to_string(),
    })
    .to_string();

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("internal error"))))
}
