// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::OperatorMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, JsonRpcError, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use url::{ParseError, Url};

/// Minimum delay between two requests to the same provider
const MIN_REQUEST_DELAY_MS: u64 = 100;

const MAX_CONCURRENT_REQUESTS: usize = 4;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// HTTP JSON-RPC transport that records per-chain query metrics and
/// throttles requests so a burst of reads does not trip provider rate limits.
#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    chain: String,
    metrics: Arc<OperatorMetrics>,
    semaphore: Arc<Semaphore>,
    last_request_time: Arc<Mutex<Instant>>,
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        let _permit = self.semaphore.acquire().await.map_err(|e| {
            HttpClientError::JsonRpcError(JsonRpcError {
                code: -32000,
                message: format!("request limiter closed: {}", e),
                data: None,
            })
        })?;

        {
            let mut last_request = self.last_request_time.lock().await;
            let elapsed = Instant::now().saturating_duration_since(*last_request);
            let min_delay = Duration::from_millis(MIN_REQUEST_DELAY_MS);
            if elapsed < min_delay {
                tokio::time::sleep(min_delay - elapsed).await;
            }
            *last_request = Instant::now();
        }

        self.metrics
            .rpc_queries
            .with_label_values(&[&self.chain, method])
            .inc();
        let _guard = self
            .metrics
            .rpc_queries_latency
            .with_label_values(&[&self.chain, method])
            .start_timer();

        let mut result = self.inner.request(method, &params).await;
        let mut retry_count = 0;
        while retry_count < MAX_RATE_LIMIT_RETRIES && is_rate_limited(&result) {
            // 1s, 2s, 4s
            let backoff_duration = Duration::from_secs(1 << retry_count);
            tracing::warn!(
                "[{}] Rate limited on {}, retrying after {:?} (attempt {}/{})",
                self.chain,
                method,
                backoff_duration,
                retry_count + 1,
                MAX_RATE_LIMIT_RETRIES
            );
            tokio::time::sleep(backoff_duration).await;
            result = self.inner.request(method, &params).await;
            retry_count += 1;
        }

        // Revert responses still prove the node is reachable
        let connected = match &result {
            Ok(_) => true,
            Err(HttpClientError::JsonRpcError(_)) => true,
            Err(_) => false,
        };
        self.metrics
            .rpc_node_connected
            .with_label_values(&[&self.chain])
            .set(connected as i64);
        result
    }
}

fn is_rate_limited<R>(result: &Result<R, HttpClientError>) -> bool {
    match result {
        Ok(_) => false,
        Err(e) => {
            // Some providers answer with non-standard bodies, so match on the rendered error
            let error_str = format!("{:?}", e).to_lowercase();
            error_str.contains("rate limit")
                || error_str.contains("429")
                || error_str.contains("too many requests")
                || error_str.contains("quota exceeded")
                || error_str.contains("-32005")
        }
    }
}

impl MeteredEthHttpProvider {
    pub fn new(url: impl Into<Url>, chain: &str, metrics: Arc<OperatorMetrics>) -> Self {
        Self {
            inner: Http::new(url),
            chain: chain.to_string(),
            metrics,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
            last_request_time: Arc::new(Mutex::new(
                Instant::now() - Duration::from_millis(MIN_REQUEST_DELAY_MS),
            )),
        }
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    chain: &str,
    metrics: Arc<OperatorMetrics>,
) -> Result<Provider<MeteredEthHttpProvider>, ParseError> {
    let http_provider = MeteredEthHttpProvider::new(Url::parse(url)?, chain, metrics);
    Ok(Provider::new(http_provider))
}
