// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct EventMetrics {
    /// Batches acknowledged by the sink, per stream.
    pub batches_delivered: IntCounterVec,
    /// Individual events acknowledged by the sink, per stream.
    pub events_delivered: IntCounterVec,
    /// Failed delivery attempts (retried or skipped), per stream.
    pub delivery_failures: IntCounterVec,
    /// The persisted checkpoint of each subscription.
    pub checkpoint_block: IntGaugeVec,
    /// Subscriptions currently attached across all streams.
    pub attached_subscriptions: IntGauge,
}

impl EventMetrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            batches_delivered: register_int_counter_vec_with_registry!(
                "eventstream_batches_delivered_total",
                "Batches acknowledged by the delivery sink",
                &["stream"],
                registry
            )
            .unwrap(),
            events_delivered: register_int_counter_vec_with_registry!(
                "eventstream_events_delivered_total",
                "Events acknowledged by the delivery sink",
                &["stream"],
                registry
            )
            .unwrap(),
            delivery_failures: register_int_counter_vec_with_registry!(
                "eventstream_delivery_failures_total",
                "Failed batch delivery attempts",
                &["stream"],
                registry
            )
            .unwrap(),
            checkpoint_block: register_int_gauge_vec_with_registry!(
                "eventstream_checkpoint_block",
                "Next undelivered block per subscription",
                &["subscription"],
                registry
            )
            .unwrap(),
            attached_subscriptions: register_int_gauge_with_registry!(
                "eventstream_attached_subscriptions",
                "Subscriptions currently attached to a running stream",
                registry
            )
            .unwrap(),
        })
    }

    /// A metrics instance wired to a throwaway registry, for tests.
    pub fn for_tests() -> Arc<Self> {
        Self::new(&Registry::new())
    }
}
