//! External-service adapter (C1): the one place every chain RPC call,
//! MEV-bundle submission, enhanced-tx fetch, and AMM quote/router request
//! passes through, each wrapped by its own [`CircuitBreaker`].
//!
//! Modeled on this codebase's `reqwest::Client` + `RpcClient` pairing in
//! `jito_bundle_manager.rs`, generalized from a single Jito endpoint to the
//! handful of named dependencies the pipeline actually needs.

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::{CoreError, CoreResult};
use serde_json::Value;
use solana_client::rpc_client::RpcClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Thin, typed gateway over every outbound dependency. One breaker per
/// named service so a flaky bundle endpoint can't starve chain RPC calls.
pub struct ExternalAdapter {
    http: reqwest::Client,
    rpc: Arc<RpcClient>,
    bundle_endpoints: Vec<String>,
    rpc_breaker: CircuitBreaker,
    bundle_breakers: Vec<CircuitBreaker>,
    parser_breaker: CircuitBreaker,
    router_breaker: CircuitBreaker,
    enrichment_breaker: CircuitBreaker,
}

impl ExternalAdapter {
    pub fn new(rpc_url: &str, bundle_endpoints: Vec<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .gzip(true)
            .build()
            .expect("reqwest client builds with default TLS backend");

        let bundle_breakers = bundle_endpoints
            .iter()
            .enumerate()
            .map(|(i, _)| CircuitBreaker::new(format!("bundle-endpoint-{i}")))
            .collect();

        Self {
            rpc: Arc::new(RpcClient::new(rpc_url.to_string())),
            http,
            bundle_endpoints,
            rpc_breaker: CircuitBreaker::new("chain-rpc"),
            bundle_breakers,
            parser_breaker: CircuitBreaker::new("enhanced-tx-parser"),
            router_breaker: CircuitBreaker::new("amm-router"),
            enrichment_breaker: CircuitBreaker::new("token-enrichment"),
        }
    }

    /// Clone of the shared RPC client handle, cheap (`Arc`) and `'static`
    /// so callers can move it into `spawn_blocking`, and shareable with
    /// collaborators (e.g. the pool resolver) that need their own handle
    /// to the same client.
    pub fn rpc(&self) -> Arc<RpcClient> {
        Arc::clone(&self.rpc)
    }

    pub fn rpc_breaker(&self) -> &CircuitBreaker {
        &self.rpc_breaker
    }

    /// POST `sendBundle` to a single bundle endpoint by index, gated by
    /// that endpoint's own breaker.
    pub async fn send_bundle(&self, endpoint_idx: usize, signed_txs_b58: &[String]) -> CoreResult<String> {
        let breaker = &self.bundle_breakers[endpoint_idx];
        if !breaker.allow().await {
            return Err(CoreError::transient("bundle endpoint circuit breaker open"));
        }

        let endpoint = &self.bundle_endpoints[endpoint_idx];
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [signed_txs_b58],
        });

        let result = self
            .http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                breaker.record_success().await;
                let body: Value = response.json().await.map_err(|e| {
                    CoreError::transient(format!("bundle response did not parse: {e}"))
                })?;
                body["result"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::transient("bundle response missing result field"))
            }
            Ok(response) => {
                breaker.record_failure().await;
                let text = response.text().await.unwrap_or_default();
                warn!(endpoint, %text, "❌ bundle submission rejected");
                Err(CoreError::transient(format!("bundle submission rejected: {text}")))
            }
            Err(e) => {
                breaker.record_failure().await;
                error!(endpoint, error = %e, "❌ bundle endpoint unreachable");
                Err(CoreError::transient(format!("bundle endpoint unreachable: {e}")))
            }
        }
    }

    /// Poll `getBundleStatuses` for a single bundle id.
    pub async fn get_bundle_status(&self, endpoint_idx: usize, bundle_id: &str) -> CoreResult<Option<Value>> {
        let breaker = &self.bundle_breakers[endpoint_idx];
        if !breaker.allow().await {
            return Err(CoreError::transient("bundle endpoint circuit breaker open"));
        }

        let endpoint = &self.bundle_endpoints[endpoint_idx];
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBundleStatuses",
            "params": [[bundle_id]],
        });

        let response = match self.http.post(endpoint).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                breaker.record_failure().await;
                return Err(CoreError::transient(format!("bundle status poll failed: {e}")));
            }
        };

        if !response.status().is_success() {
            breaker.record_failure().await;
            return Err(CoreError::transient("bundle status poll returned non-2xx"));
        }
        breaker.record_success().await;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::transient(format!("bundle status did not parse: {e}")))?;
        Ok(body["result"]["value"].get(0).cloned())
    }

    /// Fetch an enhanced (parsed) transaction by signature from the
    /// configured enrichment endpoint, gated by its own breaker.
    pub async fn fetch_enhanced_transaction(&self, url: &str, signature: &str) -> CoreResult<Value> {
        if !self.parser_breaker.allow().await {
            return Err(CoreError::transient("enhanced-tx parser circuit breaker open"));
        }

        let result = self
            .http
            .get(url)
            .query(&[("signature", signature)])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.parser_breaker.record_success().await;
                response
                    .json()
                    .await
                    .map_err(|e| CoreError::transient(format!("enhanced-tx response did not parse: {e}")))
            }
            Ok(response) => {
                self.parser_breaker.record_failure().await;
                Err(CoreError::transient(format!(
                    "enhanced-tx fetch returned {}",
                    response.status()
                )))
            }
            Err(e) => {
                self.parser_breaker.record_failure().await;
                Err(CoreError::transient(format!("enhanced-tx endpoint unreachable: {e}")))
            }
        }
    }

    /// Fetch a pre-serialized swap transaction from a router-mediated
    /// quote API (used by the C5 router path).
    pub async fn fetch_router_swap_tx(&self, url: &str, body: &Value) -> CoreResult<Value> {
        if !self.router_breaker.allow().await {
            return Err(CoreError::transient("amm router circuit breaker open"));
        }

        let result = self.http.post(url).json(body).send().await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.router_breaker.record_success().await;
                response
                    .json()
                    .await
                    .map_err(|e| CoreError::transient(format!("router response did not parse: {e}")))
            }
            Ok(response) => {
                self.router_breaker.record_failure().await;
                Err(CoreError::transient(format!(
                    "router swap request returned {}",
                    response.status()
                )))
            }
            Err(e) => {
                self.router_breaker.record_failure().await;
                Err(CoreError::transient(format!("amm router unreachable: {e}")))
            }
        }
    }

    /// Fetch on-demand token-metadata enrichment (volume, holders, socials,
    /// LP/dev-paid flags) for a mint, gated by its own breaker so a flaky
    /// enrichment service can't starve the rest of the pipeline.
    pub async fn fetch_enrichment(&self, url: &str, mint: &str) -> CoreResult<Value> {
        if !self.enrichment_breaker.allow().await {
            return Err(CoreError::transient("enrichment circuit breaker open"));
        }

        let result = self.http.get(url).query(&[("mint", mint)]).send().await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.enrichment_breaker.record_success().await;
                response
                    .json()
                    .await
                    .map_err(|e| CoreError::transient(format!("enrichment response did not parse: {e}")))
            }
            Ok(response) => {
                self.enrichment_breaker.record_failure().await;
                Err(CoreError::transient(format!("enrichment fetch returned {}", response.status())))
            }
            Err(e) => {
                self.enrichment_breaker.record_failure().await;
                Err(CoreError::transient(format!("enrichment endpoint unreachable: {e}")))
            }
        }
    }

    pub fn bundle_endpoint_count(&self) -> usize {
        self.bundle_endpoints.len()
    }
}
