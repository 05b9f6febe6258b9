#![forbid(unsafe_code)]

//! Structured log events emitted by the caches.
//!
//! A capture layer records every event with its level and fields so tests
//! can check that failures are surfaced as warnings with the stream key.

use std::sync::{Arc, Mutex};

use feedsync_cache::{PagedCache, RangeCache, StreamReconciler};
use feedsync_core::{FetchError, Message, PushTransport, SpanSource, StreamKey, TimeRange, TransportError};
use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Test Infrastructure
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    message: String,
    fields: Vec<(String, String)>,
}

impl CapturedEvent {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.push((field.name().to_string(), value.to_string()));
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor {
            message: String::new(),
            fields: Vec::new(),
        };
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

fn with_captured_events<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let layer = EventCapture {
        events: events.clone(),
    };
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, f);
    events.lock().unwrap().clone()
}

fn warnings(events: &[CapturedEvent]) -> Vec<&CapturedEvent> {
    events
        .iter()
        .filter(|e| e.level == tracing::Level::WARN)
        .collect()
}

struct Failing;

impl SpanSource<Message> for Failing {
    fn fetch_items_in_span(&self, _key: &StreamKey, _span: TimeRange) -> Result<Vec<Message>, FetchError> {
        Err(FetchError::transient("connection reset"))
    }
}

struct Refusing;

impl PushTransport for Refusing {
    fn subscribe(&mut self, _key: &StreamKey) -> Result<(), TransportError> {
        Err(TransportError::new("forbidden"))
    }

    fn unsubscribe(&mut self, _key: &StreamKey) -> Result<(), TransportError> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn gap_failure_is_a_warning_with_stream_field() {
    let events = with_captured_events(|| {
        let mut cache: RangeCache<Message> = RangeCache::new();
        let span = TimeRange::new(0, 10).unwrap();
        assert!(cache.request_with(&StreamKey::new("g", "c"), span, &Failing).is_err());
    });

    let warns = warnings(&events);
    assert_eq!(warns.len(), 1, "events: {events:#?}");
    assert_eq!(warns[0].field("stream"), Some("g/c"));
    assert_eq!(warns[0].field("error"), Some("connection reset"));
    assert!(warns[0].message.contains("gap fetch failed"));
}

#[test]
fn page_failure_is_a_warning() {
    let events = with_captured_events(|| {
        let mut cache: PagedCache<Message> = PagedCache::new();
        let key = StreamKey::new("g", "c");
        let fetch = cache.begin_older(&key, 5).unwrap().unwrap();
        assert!(cache.complete(&fetch, Err(FetchError::permanent("404"))).is_err());
    });
    assert_eq!(warnings(&events).len(), 1);
}

#[test]
fn rejected_subscription_is_a_warning() {
    let events = with_captured_events(|| {
        let mut rec: StreamReconciler<Message, _> = StreamReconciler::new(Refusing);
        assert!(rec.subscribe(&StreamKey::new("g", "c")).is_err());
    });
    let warns = warnings(&events);
    assert_eq!(warns.len(), 1);
    assert_eq!(warns[0].field("reason"), Some("forbidden"));
}

#[test]
fn successful_fetch_emits_no_warning() {
    struct Empty;
    impl SpanSource<Message> for Empty {
        fn fetch_items_in_span(&self, _key: &StreamKey, _span: TimeRange) -> Result<Vec<Message>, FetchError> {
            Ok(Vec::new())
        }
    }

    let events = with_captured_events(|| {
        let mut cache: RangeCache<Message> = RangeCache::new();
        let span = TimeRange::new(0, 10).unwrap();
        cache.request_with(&StreamKey::new("g", "c"), span, &Empty).unwrap();
    });
    assert!(warnings(&events).is_empty());
    assert!(events.iter().any(|e| e.message.contains("span fetch issued")));
}
