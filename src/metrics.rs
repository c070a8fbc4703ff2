// Process-wide counters and the bounded validation event ring

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Capacity of the validation event ring; the oldest entry is evicted.
pub const EVENT_RING_CAPACITY: usize = 100;

/// Wire dialects tracked by the per-protocol counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Grpc,
    GrpcWeb,
    Connect,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::GrpcWeb => "grpc_web",
            Protocol::Connect => "connect",
        }
    }
}

/// One entry of the validation event ring.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationEvent {
    pub event_id: u64,
    pub type_name: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub emitted_at: i64,
}

#[derive(Default)]
struct ProtocolCounters {
    requests: AtomicU64,
    errors: AtomicU64,
}

/// Counters are monotonic within a process lifetime except through `reset`.
#[derive(Default)]
pub struct Metrics {
    validation_checks: AtomicU64,
    validation_failures: AtomicU64,
    validation_failures_by_type: Mutex<HashMap<String, u64>>,
    matching_attempts: AtomicU64,
    matching_matches: AtomicU64,
    matching_misses: AtomicU64,
    matches_by_rule: Mutex<HashMap<String, u64>>,
    grpc: ProtocolCounters,
    grpc_web: ProtocolCounters,
    connect: ProtocolCounters,
    next_event_id: AtomicU64,
    events: Mutex<VecDeque<ValidationEvent>>,
}

/// Point-in-time copy of every counter, suitable for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub validation: ValidationCounters,
    pub rule_matching: MatchingCounters,
    pub protocols: HashMap<String, ProtocolSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationCounters {
    pub checks_total: u64,
    pub failures_total: u64,
    pub failures_by_type: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchingCounters {
    pub attempts_total: u64,
    pub matches_total: u64,
    pub misses_total: u64,
    pub matches_by_rule: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, protocol: Protocol) {
        self.protocol(protocol).requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, protocol: Protocol) {
        self.protocol(protocol).errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match_attempt(&self) {
        self.matching_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self, rule_key: &str) {
        self.matching_matches.fetch_add(1, Ordering::Relaxed);
        let mut by_rule = self.matches_by_rule.lock().unwrap();
        *by_rule.entry(rule_key.to_string()).or_insert(0) += 1;
    }

    pub fn record_miss(&self) {
        self.matching_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_ok(&self, type_name: &str) {
        self.validation_checks.fetch_add(1, Ordering::Relaxed);
        self.push_event(type_name, "ok", None, None);
    }

    pub fn record_validation_failure(
        &self,
        type_name: &str,
        constraint_id: &str,
        message: &str,
    ) {
        self.validation_checks.fetch_add(1, Ordering::Relaxed);
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
        {
            let mut by_type = self.validation_failures_by_type.lock().unwrap();
            *by_type.entry(type_name.to_string()).or_insert(0) += 1;
        }
        self.push_event(type_name, "fail", Some(constraint_id), Some(message));
    }

    pub fn record_validation_unsupported(&self, type_name: &str, constraint_id: &str) {
        self.push_event(
            type_name,
            "unsupported_constraint",
            Some(constraint_id),
            None,
        );
    }

    fn push_event(
        &self,
        type_name: &str,
        result: &str,
        constraint_id: Option<&str>,
        message: Option<&str>,
    ) {
        let event = ValidationEvent {
            event_id: self.next_event_id.fetch_add(1, Ordering::Relaxed),
            type_name: type_name.to_string(),
            result: result.to_string(),
            constraint_id: constraint_id.map(|s| s.to_string()),
            message: message.map(|s| s.to_string()),
            emitted_at: Utc::now().timestamp_millis(),
        };

        let mut events = self.events.lock().unwrap();
        if events.len() == EVENT_RING_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn protocol(&self, protocol: Protocol) -> &ProtocolCounters {
        match protocol {
            Protocol::Grpc => &self.grpc,
            Protocol::GrpcWeb => &self.grpc_web,
            Protocol::Connect => &self.connect,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut protocols = HashMap::new();
        for p in [Protocol::Grpc, Protocol::GrpcWeb, Protocol::Connect] {
            let counters = self.protocol(p);
            protocols.insert(
                p.as_str().to_string(),
                ProtocolSnapshot {
                    requests_total: counters.requests.load(Ordering::Relaxed),
                    errors_total: counters.errors.load(Ordering::Relaxed),
                },
            );
        }

        MetricsSnapshot {
            validation: ValidationCounters {
                checks_total: self.validation_checks.load(Ordering::Relaxed),
                failures_total: self.validation_failures.load(Ordering::Relaxed),
                failures_by_type: self.validation_failures_by_type.lock().unwrap().clone(),
            },
            rule_matching: MatchingCounters {
                attempts_total: self.matching_attempts.load(Ordering::Relaxed),
                matches_total: self.matching_matches.load(Ordering::Relaxed),
                misses_total: self.matching_misses.load(Ordering::Relaxed),
                matches_by_rule: self.matches_by_rule.lock().unwrap().clone(),
            },
            protocols,
        }
    }

    pub fn recent_events(&self) -> Vec<ValidationEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    /// Zero every counter and drop all events. Test-only escape hatch.
    pub fn reset(&self) {
        self.validation_checks.store(0, Ordering::Relaxed);
        self.validation_failures.store(0, Ordering::Relaxed);
        self.validation_failures_by_type.lock().unwrap().clear();
        self.matching_attempts.store(0, Ordering::Relaxed);
        self.matching_matches.store(0, Ordering::Relaxed);
        self.matching_misses.store(0, Ordering::Relaxed);
        self.matches_by_rule.lock().unwrap().clear();
        for p in [Protocol::Grpc, Protocol::GrpcWeb, Protocol::Connect] {
            let counters = self.protocol(p);
            counters.requests.store(0, Ordering::Relaxed);
            counters.errors.store(0, Ordering::Relaxed);
        }
        self.next_event_id.store(0, Ordering::Relaxed);
        self.events.lock().unwrap().clear();
    }
}
