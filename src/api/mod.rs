//! HTTP API for intents, quotes and transfer status

use crate::chain::ChainProviders;
use crate::config::ApiConfig;
use crate::error::{EngineError, EngineResult};
use crate::intent::TransferIntent;
use crate::monitor::TransferRecord;
use crate::progress::ProgressReporter;
use crate::quote::TransferQuote;
use crate::router::{IntentEngine, IntentOutcome, TrackRequest};
use crate::sequencer::SequenceResult;
use crate::signer::Signer;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<IntentEngine>,
    pub providers: Option<Arc<ChainProviders>>,
    /// Server-side wallet; intent execution is disabled without one
    pub signer: Option<Arc<dyn Signer>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/intents/parse", post(parse_intent))
        .route("/intents/execute", post(execute_intent))
        .route("/quotes", get(get_quote))
        .route("/transfers", get(list_transfers))
        .route("/transfers/track", post(track_transfer))
        .route("/transfers/:tx_hash", get(get_transfer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> EngineResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Internal(format!("Failed to bind API server: {}", e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| EngineError::Internal(format!("API server error: {}", e)))?;

    Ok(())
}

/// Engine error rendered as a JSON response
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            EngineError::TransferNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::QuoteUnavailable { .. } | EngineError::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            EngineError::SubmissionFailed(_) | EngineError::Signer(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("API request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - RPC reachability of the configured chains
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = match &state.providers {
        Some(providers) => providers.health_check().await,
        None => Vec::new(),
    };
    let ready = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            active_transfers: state.engine.active_transfers().len(),
            chains: chain_health
                .into_iter()
                .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
                .collect(),
        }),
    )
}

async fn parse_intent(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Json<TransferIntent> {
    Json(state.engine.parse_intent(&request.command, request.current_chain_id))
}

async fn get_quote(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> ApiResult<TransferQuote> {
    let quote = state
        .engine
        .get_transfer_quote(
            query.source_chain_id,
            query.destination_chain_id,
            &query.asset,
            &query.amount,
        )
        .await?;
    Ok(Json(quote.as_ref().clone()))
}

async fn track_transfer(
    State(state): State<AppState>,
    Json(request): Json<TrackRequest>,
) -> ApiResult<TransferRecord> {
    let handle = state.engine.track_transfer(request).await?;
    let record = handle.current();
    // Monitoring outlives the request
    handle.detach();
    Ok(Json(record))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> ApiResult<TransferRecord> {
    let hash = H256::from_str(&tx_hash).map_err(|_| {
        EngineError::InvalidIntent(format!("Invalid transaction hash: {}", tx_hash))
    })?;
    match state.engine.transfer(hash).await? {
        Some(record) => Ok(Json(record)),
        None => Err(EngineError::TransferNotFound { tx_hash }.into()),
    }
}

async fn list_transfers(State(state): State<AppState>) -> Json<TransfersResponse> {
    Json(TransfersResponse {
        transfers: state.engine.active_transfers(),
    })
}

async fn execute_intent(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let signer = state.signer.clone().ok_or_else(|| {
        EngineError::UnsupportedOperation("No wallet is configured for execution".to_string())
    })?;

    let intent = state
        .engine
        .parse_intent(&request.command, request.current_chain_id);
    let outcome = state
        .engine
        .execute_intent(&intent, signer.as_ref(), ProgressReporter::noop())
        .await?;

    let response = match outcome {
        IntentOutcome::Transfer(funded) => {
            let response = ExecuteResponse::Transfer {
                source_tx_hash: funded.source_tx_hash,
                deposit_address: funded.deposit_address,
                record: funded.record(),
            };
            funded.handle.detach();
            response
        }
        IntentOutcome::Sequence(result) => ExecuteResponse::Sequence { result },
    };
    Ok(Json(response))
}

// Request and response types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest {
    command: String,
    #[serde(default)]
    current_chain_id: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteQuery {
    source_chain_id: u64,
    destination_chain_id: u64,
    asset: String,
    amount: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    ready: bool,
    active_transfers: usize,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct TransfersResponse {
    transfers: Vec<TransferRecord>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ExecuteResponse {
    #[serde(rename_all = "camelCase")]
    Transfer {
        source_tx_hash: H256,
        deposit_address: Address,
        record: TransferRecord,
    },
    Sequence {
        result: SequenceResult,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockTokenReader;
    use crate::chains::ChainRegistry;
    use crate::config::Settings;
    use crate::protocol::{MockBridgeProtocol, TransferFee};
    use crate::router::EngineComponents;
    use crate::store::MemoryTransferStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(protocol: MockBridgeProtocol) -> Router {
        let mut settings = Settings::default();
        settings.monitor.initial_delay_ms = 60_000;
        let engine = IntentEngine::new(
            &settings,
            Arc::new(ChainRegistry::builtin().clone()),
            EngineComponents {
                protocol: Arc::new(protocol),
                tokens: Arc::new(MockTokenReader::new()),
                store: Arc::new(MemoryTransferStore::new()),
                step_service: None,
            },
        );
        router(AppState {
            engine: Arc::new(engine),
            providers: None,
            signer: None,
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(app(MockBridgeProtocol::new()), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_parse_intent() {
        let (status, body) = send(
            app(MockBridgeProtocol::new()),
            post_json(
                "/intents/parse",
                json!({ "command": "bridge 100 USDC from Ethereum to Arbitrum" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "bridge");
        assert_eq!(body["sourceChainId"], 1);
        assert_eq!(body["destinationChainId"], 42161);
        assert_eq!(body["isCrossChain"], true);
    }

    #[tokio::test]
    async fn test_quote_endpoint() {
        let mut protocol = MockBridgeProtocol::new();
        protocol.expect_transfer_fee().returning(|_| {
            Ok(TransferFee {
                bridge_fee: 0.5,
                relayer_fee: 0.1,
            })
        });
        protocol.expect_estimate_gas_fee().returning(|_| Ok(0.25));

        let (status, body) = send(
            app(protocol),
            get("/quotes?sourceChainId=1&destinationChainId=42161&asset=usdc&amount=100"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalFee"], 0.75);
        assert_eq!(body["asset"], "USDC");

        let (status, _) = send(
            app(MockBridgeProtocol::new()),
            get("/quotes?sourceChainId=1&destinationChainId=1&asset=usdc&amount=100"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_track_then_get() {
        let app = app(MockBridgeProtocol::new());
        let hash = format!("{:?}", H256::repeat_byte(0x0c));

        let (status, body) = send(
            app.clone(),
            post_json(
                "/transfers/track",
                json!({
                    "txHash": hash,
                    "sourceChainId": 10,
                    "destinationChainId": 8453,
                    "asset": "USDC",
                    "amount": "5"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");

        let (status, body) = send(app.clone(), get(&format!("/transfers/{}", hash))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sourceChain"], 10);

        let (_, body) = send(app, get("/transfers")).await;
        assert_eq!(body["transfers"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_transfer_is_404() {
        let hash = format!("{:?}", H256::repeat_byte(0x0d));
        let (status, body) = send(
            app(MockBridgeProtocol::new()),
            get(&format!("/transfers/{}", hash)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let (status, _) = send(app(MockBridgeProtocol::new()), get("/transfers/0x1234")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execute_requires_wallet() {
        let (status, _) = send(
            app(MockBridgeProtocol::new()),
            post_json(
                "/intents/execute",
                json!({ "command": "bridge 100 USDC from Ethereum to Arbitrum" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
