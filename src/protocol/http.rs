//! JSON-over-HTTP implementation of the bridging protocol client

use super::{
    BridgeProtocol, DepositAddressRequest, MessageStatus, RecoveryProgress, RecoveryTicket,
    RouteRequest, TransferFee,
};
use crate::config::ProtocolConfig;
use crate::error::{EngineError, EngineResult, ProtocolError};

use async_trait::async_trait;
use ethers::types::{Address, H256};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for the protocol's REST API
pub struct HttpProtocolClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct GasEstimate {
    fee: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepositAddressResponse {
    deposit_address: Address,
}

#[derive(Deserialize)]
struct ChainStatus {
    active: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecoveryRequest<'a> {
    tx_hash: H256,
    source_chain: &'a str,
    destination_chain: &'a str,
}

impl HttpProtocolClient {
    pub fn new(config: &ProtocolConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build protocol client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<Response, ProtocolError> {
        debug!("GET {}", path);
        self.client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport_error)
    }

    async fn get_route<T: DeserializeOwned>(
        &self,
        path: &str,
        route: &RouteRequest,
    ) -> Result<T, ProtocolError> {
        debug!(
            "GET {} {} -> {} {} {}",
            path, route.source_chain, route.destination_chain, route.amount, route.asset
        );
        let response = self
            .client
            .get(self.url(path))
            .query(route)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProtocolError> {
        debug!("POST {}", path);
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

#[async_trait]
impl BridgeProtocol for HttpProtocolClient {
    async fn transfer_fee(&self, route: &RouteRequest) -> Result<TransferFee, ProtocolError> {
        self.get_route("/v1/fees", route).await
    }

    async fn estimate_gas_fee(&self, route: &RouteRequest) -> Result<f64, ProtocolError> {
        let estimate: GasEstimate = self.get_route("/v1/gas", route).await?;
        Ok(estimate.fee)
    }

    async fn deposit_address(
        &self,
        request: &DepositAddressRequest,
    ) -> Result<Address, ProtocolError> {
        let response: DepositAddressResponse = self.post("/v1/deposit-address", request).await?;
        Ok(response.deposit_address)
    }

    async fn transaction_status(&self, tx_hash: H256) -> Result<MessageStatus, ProtocolError> {
        let response = self.get(&format!("/v1/transactions/{:?}", tx_hash)).await?;
        // The indexer has not seen the source transaction yet
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(MessageStatus::not_found());
        }
        decode(response).await
    }

    async fn is_chain_active(&self, chain: &str) -> Result<bool, ProtocolError> {
        let response = self.get(&format!("/v1/chains/{}", chain)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let status: ChainStatus = decode(response).await?;
        Ok(status.active)
    }

    async fn recover(
        &self,
        tx_hash: H256,
        source_chain: &str,
        destination_chain: &str,
    ) -> Result<RecoveryTicket, ProtocolError> {
        let request = RecoveryRequest {
            tx_hash,
            source_chain,
            destination_chain,
        };
        self.post("/v1/recovery", &request).await
    }

    async fn recovery_status(&self, recovery_ref: &str) -> Result<RecoveryProgress, ProtocolError> {
        let response = self.get(&format!("/v1/recovery/{}", recovery_ref)).await?;
        decode(response).await
    }
}

pub(crate) fn transport_error(e: reqwest::Error) -> ProtocolError {
    ProtocolError::Transient(e.to_string())
}

pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProtocolError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ProtocolError::InvalidResponse(e.to_string()))
}

/// Map a non-success HTTP status onto the protocol error taxonomy
fn status_error(status: StatusCode, body: String) -> ProtocolError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ProtocolError::Transient(detail)
        }
        s if s.is_server_error() => ProtocolError::Transient(detail),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            ProtocolError::UnsupportedRoute(detail)
        }
        _ => ProtocolError::Rejected(detail),
    }
}
