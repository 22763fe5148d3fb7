//! In-memory retrieval metrics
//!
//! Keeps a bounded ring of recent query records plus per-engine health
//! counters. Everything returned to callers is a deep copy; the only
//! writer path takes the record mutex, per-engine stats live in a
//! concurrent map keyed by engine name.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

const RECORD_CAPACITY: usize = 1000;

/// Exponential moving average weight for per-engine latency/error rate.
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub result_count: usize,
    pub engines: Vec<String>,
    pub success: bool,
    pub cache_hit: bool,
}

/// Aggregate view over the record ring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    pub total: usize,
    pub avg_latency: Duration,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineHealth {
    Healthy,
    Degraded,
    Down,
}

impl EngineHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub handled: u64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub health_status: EngineHealth,
    pub last_check: DateTime<Utc>,
}

pub struct RetrievalMetrics {
    records: Mutex<VecDeque<QueryRecord>>,
    engines: DashMap<String, EngineStats>,
}

impl RetrievalMetrics {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(RECORD_CAPACITY)),
            engines: DashMap::new(),
        }
    }

    pub fn record_query(&self, record: QueryRecord) {
        let mut records = self.records.lock().expect("metrics lock poisoned");
        if records.len() >= RECORD_CAPACITY {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Fold one engine observation into the EMA counters.
    pub fn record_engine(&self, engine: &str, latency: Duration, success: bool) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let failure = if success { 0.0 } else { 1.0 };

        let mut entry = self.engines.entry(engine.to_string()).or_insert(EngineStats {
            handled: 0,
            avg_latency_ms: latency_ms,
            error_rate: 0.0,
            health_status: EngineHealth::Healthy,
            last_check: Utc::now(),
        });

        entry.handled += 1;
        entry.avg_latency_ms = entry.avg_latency_ms * (1.0 - EMA_ALPHA) + latency_ms * EMA_ALPHA;
        entry.error_rate = entry.error_rate * (1.0 - EMA_ALPHA) + failure * EMA_ALPHA;
        entry.health_status = if entry.error_rate > 0.5 {
            EngineHealth::Down
        } else if entry.error_rate > 0.1 {
            EngineHealth::Degraded
        } else {
            EngineHealth::Healthy
        };
        entry.last_check = Utc::now();
    }

    pub fn query_stats(&self) -> QueryStats {
        let records = self.records.lock().expect("metrics lock poisoned");
        let total = records.len();
        if total == 0 {
            return QueryStats::default();
        }

        let sum_latency: Duration = records.iter().map(|r| r.duration).sum();
        let successes = records.iter().filter(|r| r.success).count();
        let hits = records.iter().filter(|r| r.cache_hit).count();

        QueryStats {
            total,
            avg_latency: sum_latency / total as u32,
            success_rate: successes as f64 / total as f64,
            cache_hit_rate: hits as f64 / total as f64,
        }
    }

    /// Snapshot of per-engine stats, copied out of the map.
    pub fn engine_stats(&self) -> HashMap<String, EngineStats> {
        self.engines
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Copy of the most recent records, newest last.
    pub fn recent_records(&self, limit: usize) -> Vec<QueryRecord> {
        let records = self.records.lock().expect("metrics lock poisoned");
        records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .rev()
            .collect()
    }
}

impl Default for RetrievalMetrics {
    fn default() -> Self {
        Self::new()
    }
}
