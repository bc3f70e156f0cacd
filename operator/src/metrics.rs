// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGaugeVec, Registry,
};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9,
    1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 6.0, 6.5, 7.0, 7.5, 8.0, 8.5, 9.0, 9.5,
    10., 15., 20., 25., 30., 35., 40., 45., 50., 60., 70., 80., 90., 100., 120.,
];

const RELAY_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.0, 5.0, 10., 20., 30., 45., 60., 90., 120., 180., 240., 300.,
];

#[derive(Clone, Debug)]
pub struct OperatorMetrics {
    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) rpc_node_connected: IntGaugeVec,

    pub(crate) last_indexed_block: IntGaugeVec,
    pub(crate) indexer_fetched_events: IntCounterVec,

    pub(crate) pending_commitments: IntGaugeVec,
    pub(crate) reconcile_errors: IntCounterVec,

    pub(crate) relay_outcomes: IntCounterVec,
    pub(crate) relay_errors: IntCounterVec,
    pub(crate) relay_latency: HistogramVec,
    pub(crate) permanently_failing_commitments: IntGaugeVec,

    pub(crate) poll_cycles: IntCounter,
}

impl OperatorMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            rpc_queries: register_int_counter_vec_with_registry!(
                "portal_operator_rpc_queries",
                "Total number of queries issued to chain providers, by chain and request type",
                &["chain", "type"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "portal_operator_rpc_queries_latency",
                "Latency of queries issued to chain providers, by chain and request type",
                &["chain", "type"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_node_connected: register_int_gauge_vec_with_registry!(
                "portal_operator_rpc_node_connected",
                "Whether the last request to the chain provider succeeded (1) or not (0)",
                &["chain"],
                registry,
            )
            .unwrap(),
            last_indexed_block: register_int_gauge_vec_with_registry!(
                "portal_operator_last_indexed_block",
                "The last block fetched by the event indexer, by chain and contract",
                &["chain", "contract"],
                registry,
            )
            .unwrap(),
            indexer_fetched_events: register_int_counter_vec_with_registry!(
                "portal_operator_indexer_fetched_events",
                "Number of events fetched from providers by the event indexer",
                &["chain"],
                registry,
            )
            .unwrap(),
            pending_commitments: register_int_gauge_vec_with_registry!(
                "portal_operator_pending_commitments",
                "Pending commitments found in the last poll cycle, by origin chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            reconcile_errors: register_int_counter_vec_with_registry!(
                "portal_operator_reconcile_errors",
                "Chains skipped during reconciliation because of an error",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
            relay_outcomes: register_int_counter_vec_with_registry!(
                "portal_operator_relay_outcomes",
                "Relay attempts by outcome",
                &["outcome"],
                registry,
            )
            .unwrap(),
            relay_errors: register_int_counter_vec_with_registry!(
                "portal_operator_relay_errors",
                "Relay attempts that failed with an error, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            relay_latency: register_histogram_vec_with_registry!(
                "portal_operator_relay_latency",
                "Time from first simulation to settled commitment, by destination chain",
                &["chain"],
                RELAY_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            permanently_failing_commitments: register_int_gauge_vec_with_registry!(
                "portal_operator_permanently_failing_commitments",
                "Commitments skipped for the rest of the process lifetime, by origin chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            poll_cycles: register_int_counter_with_registry!(
                "portal_operator_poll_cycles",
                "Number of completed poll cycles",
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
