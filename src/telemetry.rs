use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Kind of pool lifecycle event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoolEventKind {
    Warmup,
    Reinit,
    Eviction,
    CreateFailed,
    Shutdown,
}

impl PoolEventKind {
    pub fn is_failure(self) -> bool {
        matches!(self, PoolEventKind::CreateFailed)
    }
}

/// A single recorded lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: PoolEventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Bounded, age-limited history of pool lifecycle events.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: Arc<RwLock<VecDeque<PoolEvent>>>,
    max_events: usize,
    max_age: ChronoDuration,
}

impl EventLog {
    pub fn new(max_events: usize, retention_hours: u64) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(max_events.max(1)))),
            max_events: max_events.max(1),
            max_age: ChronoDuration::hours(retention_hours as i64),
        }
    }

    pub async fn record(
        &self,
        kind: PoolEventKind,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        self.push(PoolEvent {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            details,
        })
        .await;
    }

    /// Append an event, dropping entries that are too old or over capacity.
    pub async fn push(&self, event: PoolEvent) {
        let mut events = self.events.write().await;

        let cutoff = Utc::now() - self.max_age;
        while events.front().is_some_and(|front| front.timestamp < cutoff) {
            events.pop_front();
        }

        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub async fn events(&self) -> Vec<PoolEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    pub async fn events_of(&self, kind: PoolEventKind) -> Vec<PoolEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    /// Events recorded within the last `minutes`.
    pub async fn events_since(&self, minutes: i64) -> Vec<PoolEvent> {
        let cutoff = Utc::now() - ChronoDuration::minutes(minutes);
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_is_bounded_by_capacity() {
        let log = EventLog::new(2, 24);
        log.record(PoolEventKind::Warmup, "one", None).await;
        log.record(PoolEventKind::Eviction, "two", None).await;
        log.record(PoolEventKind::Shutdown, "three", None).await;

        let events = log.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "two");
        assert_eq!(events[1].kind, PoolEventKind::Shutdown);
    }

    #[tokio::test]
    async fn expired_events_are_dropped_on_push() {
        let log = EventLog::new(10, 1);
        log.push(PoolEvent {
            timestamp: Utc::now() - ChronoDuration::hours(2),
            kind: PoolEventKind::Reinit,
            message: "old".to_string(),
            details: None,
        })
        .await;
        log.record(PoolEventKind::CreateFailed, "fresh", None).await;

        let events = log.events().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].kind.is_failure());
        assert_eq!(log.events_of(PoolEventKind::Reinit).await.len(), 0);
        assert_eq!(log.events_since(5).await.len(), 1);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let json = serde_json::to_string(&PoolEventKind::CreateFailed).unwrap();
        assert_eq!(json, "\"create_failed\"");
    }
}
