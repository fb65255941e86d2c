// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Callback invoked when an identity is enrolled or re-enrolled. The RPC
/// wrapper registers one to drop the signer's cached sessions; callers
/// reconstruct on next use.
pub trait SignerUpdateListener: Send + Sync {
    fn signer_updated(&self, signer: &str);
}

/// Per-signer cache of ledger session handles (gateway connections, channel
/// clients). A single lock guards the map; entries are built at most once
/// per signer until invalidated.
pub struct SessionCache<S> {
    sessions: Mutex<HashMap<String, Arc<S>>>,
}

impl<S> Default for SessionCache<S> {
    fn default() -> Self {
        SessionCache {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> SessionCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the signer's session, building it on first use.
    pub fn get_or_create<F>(&self, signer: &str, create: F) -> Arc<S>
    where
        F: FnOnce() -> S,
    {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(signer.to_string())
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    pub fn get(&self, signer: &str) -> Option<Arc<S>> {
        self.sessions.lock().get(signer).cloned()
    }

    /// Drop the signer's cached session. Live `Arc` holders finish their
    /// current call against the old session; new calls reconstruct.
    pub fn invalidate(&self, signer: &str) {
        if self.sessions.lock().remove(signer).is_some() {
            debug!(signer, "invalidated cached ledger session");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl<S: Send + Sync> SignerUpdateListener for SessionCache<S> {
    fn signer_updated(&self, signer: &str) {
        self.invalidate(signer);
    }
}
