// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::BridgeMetrics;
use ethers::providers::{JsonRpcClient, Provider, PubsubClient, Ws, WsClientError};
use ethers::types::U256;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// JSON-RPC transport that counts and times every request by method.
#[derive(Debug, Clone)]
pub struct MeteredEthProvider<P> {
    inner: P,
    metrics: Arc<BridgeMetrics>,
}

impl<P> MeteredEthProvider<P> {
    pub fn new(inner: P, metrics: Arc<BridgeMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl<P: JsonRpcClient> JsonRpcClient for MeteredEthProvider<P> {
    type Error = P::Error;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, P::Error> {
        self.metrics
            .eth_rpc_queries
            .with_label_values(&[method])
            .inc();
        let _guard = self
            .metrics
            .eth_rpc_queries_latency
            .with_label_values(&[method])
            .start_timer();
        let result = self.inner.request(method, params).await;
        if result.is_err() {
            self.metrics
                .eth_rpc_errors
                .with_label_values(&[method])
                .inc();
        }
        result
    }
}

impl<P: PubsubClient> PubsubClient for MeteredEthProvider<P> {
    type NotificationStream = P::NotificationStream;

    fn subscribe<T: Into<U256>>(&self, id: T) -> Result<Self::NotificationStream, P::Error> {
        self.inner.subscribe(id)
    }

    fn unsubscribe<T: Into<U256>>(&self, id: T) -> Result<(), P::Error> {
        self.inner.unsubscribe(id)
    }
}

/// Opens a metered websocket session to the light node listening on `port`.
pub async fn connect_metered_ws(
    port: u16,
    metrics: Arc<BridgeMetrics>,
) -> Result<Provider<MeteredEthProvider<Ws>>, WsClientError> {
    let ws = Ws::connect(local_ws_url(port)).await?;
    Ok(Provider::new(MeteredEthProvider::new(ws, metrics)))
}

pub fn local_ws_url(port: u16) -> String {
    format!("ws://127.0.0.1:{}", port)
}
