//! Flow records: a bounded in-memory history of recent requests, exposed
//! through `/api/flows*` for operator visibility. Not persisted — restarts
//! start from an empty log.

use std::collections::VecDeque;

use tokio::sync::Mutex;

/// Oldest records are evicted once the log holds this many entries.
const MAX_FLOW_RECORDS: usize = 500;

#[derive(Debug, Clone, serde::Serialize)]
pub struct FlowRecord {
    pub id: String,
    pub protocol: String,
    pub account_id: Option<String>,
    pub upstream_model: String,
    pub status: u16,
    pub error_kind: Option<String>,
    pub duration_ms: u64,
    pub recorded_at_ms: u64,
}

pub struct FlowLog {
    records: Mutex<VecDeque<FlowRecord>>,
}

impl FlowLog {
    pub fn new() -> Self {
        Self { records: Mutex::new(VecDeque::with_capacity(MAX_FLOW_RECORDS)) }
    }

    pub async fn push(&self, record: FlowRecord) {
        let mut records = self.records.lock().await;
        if records.len() >= MAX_FLOW_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent first.
    pub async fn recent(&self, limit: usize) -> Vec<FlowRecord> {
        let records = self.records.lock().await;
        records.iter().rev().take(limit).cloned().collect()
    }

    pub async fn clear(&self) {
        self.records.lock().await.clear();
    }
}

impl Default for FlowLog {
    fn default() -> Self {
        Self::new()
    }
}
