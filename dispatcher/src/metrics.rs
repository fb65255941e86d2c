// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, IntCounterVec,
    IntGaugeVec, Registry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct DispatcherMetrics {
    /// Requests waiting (or executing) per worker shard.
    pub queue_depth: IntGaugeVec,
    /// Receipts written, by terminal status.
    pub receipts: IntCounterVec,
    /// Submissions rejected because a shard queue was full.
    pub rejected: IntCounterVec,
}

impl DispatcherMetrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            queue_depth: register_int_gauge_vec_with_registry!(
                "dispatcher_queue_depth",
                "Transactions queued or executing per worker shard",
                &["shard"],
                registry
            )
            .unwrap(),
            receipts: register_int_counter_vec_with_registry!(
                "dispatcher_receipts_total",
                "Receipts written by terminal status",
                &["status"],
                registry
            )
            .unwrap(),
            rejected: register_int_counter_vec_with_registry!(
                "dispatcher_rejected_total",
                "Submissions rejected by backpressure",
                &["shard"],
                registry
            )
            .unwrap(),
        })
    }

    pub fn for_tests() -> Arc<Self> {
        Self::new(&Registry::new())
    }
}
