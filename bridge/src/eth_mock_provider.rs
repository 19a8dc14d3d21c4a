// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A JSON-RPC client answering from canned responses, for tests.

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, MockError, PubsubClient};
use ethers::types::U256;
use futures::channel::mpsc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

type Response = Result<serde_json::Value, JsonRpcError>;
type Notifications = mpsc::UnboundedReceiver<Box<RawValue>>;

/// Feeds notifications into a subscription opened against the mock.
#[derive(Clone, Debug)]
pub struct SubscriptionFeed(mpsc::UnboundedSender<Box<RawValue>>);

impl SubscriptionFeed {
    pub fn notify<T: Serialize>(&self, item: &T) -> Result<(), serde_json::Error> {
        let raw = serde_json::value::to_raw_value(item)?;
        // the subscriber may already be gone
        let _ = self.0.unbounded_send(raw);
        Ok(())
    }
}

/// Responses are keyed by method and serialized params. Several responses
/// for one key are served in order, and the last one keeps being served.
/// A response registered with [`EthMockProvider::add_method_response`]
/// answers any params of that method that have no exact entry.
#[derive(Clone, Debug, Default)]
pub struct EthMockProvider {
    responses: Arc<Mutex<HashMap<(String, String), VecDeque<Response>>>>,
    method_responses: Arc<Mutex<HashMap<String, VecDeque<Response>>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    // feeds waiting for an `eth_subscribe`, by subscription kind
    pending_feeds: Arc<Mutex<HashMap<String, VecDeque<Notifications>>>>,
    active_feeds: Arc<Mutex<HashMap<U256, Notifications>>>,
    next_subscription_id: Arc<Mutex<u64>>,
}

impl EthMockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response<P: Serialize, R: Serialize>(
        &self,
        method: &str,
        params: P,
        response: R,
    ) -> Result<(), serde_json::Error> {
        let key = (method.to_string(), serde_json::to_string(&params)?);
        let value = serde_json::to_value(response)?;
        self.responses
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(Ok(value));
        Ok(())
    }

    /// Replaces every response queued for `method` with `params`.
    pub fn set_response<P: Serialize, R: Serialize>(
        &self,
        method: &str,
        params: P,
        response: R,
    ) -> Result<(), serde_json::Error> {
        let key = (method.to_string(), serde_json::to_string(&params)?);
        let value = serde_json::to_value(response)?;
        self.responses
            .lock()
            .unwrap()
            .insert(key, VecDeque::from([Ok(value)]));
        Ok(())
    }

    pub fn add_error_response<P: Serialize>(
        &self,
        method: &str,
        params: P,
        message: &str,
    ) -> Result<(), serde_json::Error> {
        let key = (method.to_string(), serde_json::to_string(&params)?);
        self.responses
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(Err(rpc_error(message)));
        Ok(())
    }

    pub fn add_method_response<R: Serialize>(
        &self,
        method: &str,
        response: R,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(response)?;
        self.method_responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(value));
        Ok(())
    }

    pub fn add_method_error_response(&self, method: &str, message: &str) {
        self.method_responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Err(rpc_error(message)));
    }

    /// Number of requests received for `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(method)
            .copied()
            .unwrap_or_default()
    }

    /// Prepares the next `eth_subscribe` of `kind` ("newHeads", "logs").
    pub fn add_subscription(&self, kind: &str) -> SubscriptionFeed {
        let (tx, rx) = mpsc::unbounded();
        self.pending_feeds
            .lock()
            .unwrap()
            .entry(kind.to_string())
            .or_default()
            .push_back(rx);
        SubscriptionFeed(tx)
    }

    fn open_subscription(&self, params: &str) -> Result<U256, MockError> {
        let params: serde_json::Value = serde_json::from_str(params)?;
        let kind = params[0].as_str().unwrap_or_default().to_string();
        let feed = self
            .pending_feeds
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(|feeds| feeds.pop_front())
            .ok_or(MockError::EmptyResponses)?;
        let mut next_id = self.next_subscription_id.lock().unwrap();
        *next_id += 1;
        let id = U256::from(*next_id);
        self.active_feeds.lock().unwrap().insert(id, feed);
        Ok(id)
    }

    fn next_response(&self, method: &str, params: &str) -> Option<Response> {
        let key = (method.to_string(), params.to_string());
        if let Some(queue) = self.responses.lock().unwrap().get_mut(&key) {
            return pop_sticky(queue);
        }
        self.method_responses
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(pop_sticky)
    }
}

fn pop_sticky(queue: &mut VecDeque<Response>) -> Option<Response> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

fn rpc_error(message: &str) -> JsonRpcError {
    JsonRpcError {
        code: -32000,
        message: message.to_string(),
        data: None,
    }
}

#[async_trait]
impl JsonRpcClient for EthMockProvider {
    type Error = MockError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, MockError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default() += 1;
        let params = serde_json::to_string(&params)?;
        if method == "eth_subscribe" {
            let id = self.open_subscription(&params)?;
            return Ok(serde_json::from_value(serde_json::to_value(id)?)?);
        }
        match self.next_response(method, &params) {
            Some(Ok(value)) => Ok(serde_json::from_value(value)?),
            Some(Err(e)) => Err(MockError::JsonRpcError(e)),
            None => {
                tracing::debug!("No mocked response for {} {}", method, params);
                Err(MockError::EmptyResponses)
            }
        }
    }
}

impl PubsubClient for EthMockProvider {
    type NotificationStream = Notifications;

    fn subscribe<T: Into<U256>>(&self, id: T) -> Result<Self::NotificationStream, MockError> {
        self.active_feeds
            .lock()
            .unwrap()
            .remove(&id.into())
            .ok_or(MockError::EmptyResponses)
    }

    fn unsubscribe<T: Into<U256>>(&self, id: T) -> Result<(), MockError> {
        self.active_feeds.lock().unwrap().remove(&id.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{Middleware, Provider};
    use ethers::types::{Block, TxHash, H256, U64};
    use futures::StreamExt;

    #[tokio::test]
    async fn test_responses_are_served_in_order_then_sticky() {
        let mock = EthMockProvider::new();
        mock.add_error_response("eth_blockNumber", (), "no suitable peers available")
            .unwrap();
        mock.add_response("eth_blockNumber", (), U64::from(5u64))
            .unwrap();
        let provider = Provider::new(mock.clone());

        let err = provider.get_block_number().await.unwrap_err();
        assert!(err.to_string().contains("no suitable peers available"));
        assert_eq!(provider.get_block_number().await.unwrap().as_u64(), 5);
        assert_eq!(provider.get_block_number().await.unwrap().as_u64(), 5);
        assert_eq!(mock.call_count("eth_blockNumber"), 3);
    }

    #[tokio::test]
    async fn test_method_response_fallback() {
        let mock = EthMockProvider::new();
        mock.add_method_response("eth_gasPrice", ethers::types::U256::from(7u64))
            .unwrap();
        let provider = Provider::new(mock.clone());
        assert_eq!(provider.get_gas_price().await.unwrap().as_u64(), 7);
        assert!(provider.get_chainid().await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_feed() {
        let mock = EthMockProvider::new();
        let feed = mock.add_subscription("newHeads");
        let provider = Provider::new(mock.clone());
        let mut heads = provider.subscribe_blocks().await.unwrap();

        let head = Block::<TxHash> {
            hash: Some(H256::repeat_byte(1)),
            number: Some(U64::from(12u64)),
            ..Default::default()
        };
        feed.notify(&head).unwrap();
        let received = heads.next().await.unwrap();
        assert_eq!(received.number, Some(U64::from(12u64)));

        drop(feed);
        assert!(heads.next().await.is_none());
        // only one feed was prepared
        assert!(provider.subscribe_blocks().await.is_err());
    }
}
