// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{BridgeError, BridgeResult};
use std::future::Future;
use std::time::Duration;

/// Delay between two attempts while the light client has no peers.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Runs `operation` until it returns something other than a no-peers error.
/// There is no attempt limit: callers block until peers show up.
pub async fn retry_on_no_peers<T, F, Fut>(name: &str, mut operation: F) -> BridgeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    let mut attempt = 0u64;
    loop {
        match operation().await {
            Err(e) if e.is_no_peers() => {
                attempt += 1;
                tracing::warn!(
                    "{} failed, no peers available (attempt {}), retrying in {:?}",
                    name,
                    attempt,
                    RETRY_DELAY
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

/// Like [`retry_on_no_peers`], with every attempt bounded by `timeout`. An
/// attempt that runs out of time fails the call.
pub async fn retry_on_no_peers_within<T, F, Fut>(
    name: &str,
    timeout: Duration,
    mut operation: F,
) -> BridgeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    retry_on_no_peers(name, || {
        let attempt = operation();
        async move {
            tokio::time::timeout(timeout, attempt).await.map_err(|_| {
                BridgeError::TransientProviderError(format!(
                    "{} timed out after {:?}",
                    name, timeout
                ))
            })?
        }
    })
    .await
}
