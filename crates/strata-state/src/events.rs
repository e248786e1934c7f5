//! System event log.
//!
//! Every event is traced, kept in a bounded in-memory ring for quick
//! inspection, and persisted to the store for external audit. A failed
//! write is logged and never propagated: the event stream is advisory.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use strata_core::{SystemEvent, SystemEventKind};

use crate::store::StateStore;

/// Events kept in memory per log.
pub const MEMLOG_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct EventLog {
    schema: String,
    store: Option<StateStore>,
    memlog: Arc<Mutex<VecDeque<SystemEvent>>>,
    seq: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new(schema: &str, store: StateStore) -> Self {
        Self {
            schema: schema.to_string(),
            store: Some(store),
            memlog: Arc::new(Mutex::new(VecDeque::with_capacity(MEMLOG_CAPACITY))),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A log that only keeps the in-memory ring.
    pub fn in_memory(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            store: None,
            memlog: Arc::new(Mutex::new(VecDeque::with_capacity(MEMLOG_CAPACITY))),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record(&self, kind: SystemEventKind, detail: impl Into<String>) {
        let event = SystemEvent::now(kind, detail);
        info!(
            schema = %self.schema,
            event = ?event.kind,
            detail = %event.detail,
            "system event"
        );

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        if let Some(store) = &self.store
            && let Err(e) = store.append_event(&self.schema, seq, &event)
        {
            warn!(schema = %self.schema, error = %e, "failed to persist system event");
        }

        if let Ok(mut memlog) = self.memlog.lock() {
            if memlog.len() == MEMLOG_CAPACITY {
                memlog.pop_front();
            }
            memlog.push_back(event);
        }
    }

    /// In-memory events, oldest first.
    pub fn recent(&self) -> Vec<SystemEvent> {
        self.memlog
            .lock()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}
