// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry,
};

const LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10., 20., 30., 60.,
];

#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    pub(crate) eth_rpc_queries: IntCounterVec,
    pub(crate) eth_rpc_queries_latency: HistogramVec,
    pub(crate) eth_rpc_errors: IntCounterVec,

    pub(crate) heads_refreshed: IntCounter,
    pub(crate) heads_dropped: IntCounter,
    pub(crate) last_seen_eth_head: IntGauge,

    pub(crate) mints_submitted: IntCounter,
    pub(crate) mints_failed: IntCounter,
    pub(crate) registrations_submitted: IntCounter,
    pub(crate) registrations_failed: IntCounter,
    pub(crate) last_processed_home_height: IntGauge,

    pub(crate) withdraw_events_observed: IntCounter,
    pub(crate) withdraw_redemptions_submitted: IntCounter,
    pub(crate) withdraw_redemptions_dropped: IntCounterVec,
    pub(crate) withdraw_redemptions_deferred: IntCounterVec,
    pub(crate) pending_withdraws: IntGauge,

    pub(crate) withdraw_validations: IntCounterVec,
}

impl BridgeMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            eth_rpc_queries: register_int_counter_vec_with_registry!(
                "bridge_eth_rpc_queries",
                "Total number of queries issued to the eth light node, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            eth_rpc_queries_latency: register_histogram_vec_with_registry!(
                "bridge_eth_rpc_queries_latency",
                "Latency of queries issued to the eth light node, by request type",
                &["type"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            eth_rpc_errors: register_int_counter_vec_with_registry!(
                "bridge_eth_rpc_errors",
                "Total number of failed queries to the eth light node, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            heads_refreshed: register_int_counter_with_registry!(
                "bridge_eth_heads_refreshed",
                "Total number of eth heads for which the contract cache was refreshed",
                registry,
            )
            .unwrap(),
            heads_dropped: register_int_counter_with_registry!(
                "bridge_eth_heads_dropped",
                "Total number of eth heads dropped because a refresh was in flight",
                registry,
            )
            .unwrap(),
            last_seen_eth_head: register_int_gauge_with_registry!(
                "bridge_last_seen_eth_head",
                "Number of the last eth head the bridge was notified of",
                registry,
            )
            .unwrap(),
            mints_submitted: register_int_counter_with_registry!(
                "bridge_mints_submitted",
                "Total number of mint transactions submitted to the token contract",
                registry,
            )
            .unwrap(),
            mints_failed: register_int_counter_with_registry!(
                "bridge_mints_failed",
                "Total number of mint transactions that failed to submit",
                registry,
            )
            .unwrap(),
            registrations_submitted: register_int_counter_with_registry!(
                "bridge_withdrawal_address_registrations_submitted",
                "Total number of withdrawal address registrations submitted",
                registry,
            )
            .unwrap(),
            registrations_failed: register_int_counter_with_registry!(
                "bridge_withdrawal_address_registrations_failed",
                "Total number of withdrawal address registrations that failed to submit",
                registry,
            )
            .unwrap(),
            last_processed_home_height: register_int_gauge_with_registry!(
                "bridge_last_processed_home_height",
                "Persisted height of the last home chain block processed by the bridge",
                registry,
            )
            .unwrap(),
            withdraw_events_observed: register_int_counter_with_registry!(
                "bridge_withdraw_events_observed",
                "Total number of withdraw events observed on the token contract",
                registry,
            )
            .unwrap(),
            withdraw_redemptions_submitted: register_int_counter_with_registry!(
                "bridge_withdraw_redemptions_submitted",
                "Total number of coin creation transactions submitted for withdrawals",
                registry,
            )
            .unwrap(),
            withdraw_redemptions_dropped: register_int_counter_vec_with_registry!(
                "bridge_withdraw_redemptions_dropped",
                "Total number of withdraw events that could not be redeemed, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            withdraw_redemptions_deferred: register_int_counter_vec_with_registry!(
                "bridge_withdraw_redemptions_deferred",
                "Total number of withdraw redemptions postponed to a later head, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            pending_withdraws: register_int_gauge_with_registry!(
                "bridge_pending_withdraws",
                "Number of withdraw events waiting to be redeemed",
                registry,
            )
            .unwrap(),
            withdraw_validations: register_int_counter_vec_with_registry!(
                "bridge_withdraw_validations",
                "Total number of coin creation validations, by outcome",
                &["outcome"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
