#![forbid(unsafe_code)]

//! End-to-end runs of [`FeedRuntime`] with fetches on worker threads and
//! pushes delivered from a producer thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use feedsync_core::{GroupKey, Message, StreamKey};
use feedsync_runtime::testing::{RecordingTransport, ScriptedPages, TransportCall};
use feedsync_runtime::{FeedConfig, FeedRuntime};
use feedsync_viewport::{LayoutMode, ScrollSample};

const WAIT: Duration = Duration::from_secs(5);

type Runtime = FeedRuntime<Message, RecordingTransport, ScriptedPages<Message>>;

fn feed() -> GroupKey {
    GroupKey::from("feed")
}

fn stream() -> StreamKey {
    StreamKey::new("guild", "general")
}

fn message(t: i64) -> Message {
    Message::new(format!("m{t}"), t * 10).with_content("u1", format!("hello {t}"))
}

fn setup(n: i64) -> (Runtime, Arc<ScriptedPages<Message>>, RecordingTransport) {
    let source = Arc::new(ScriptedPages::new((1..=n).map(message).collect()));
    let transport = RecordingTransport::new();
    let config = FeedConfig::default().with_page_size(5);
    let rt = FeedRuntime::new(config, transport.clone(), Arc::clone(&source));
    (rt, source, transport)
}

fn ids(rt: &Runtime) -> Vec<String> {
    rt.items(&feed()).iter().map(|m| m.id.clone()).collect()
}

fn scroll_up() -> ScrollSample {
    ScrollSample {
        from_top: 0.0,
        from_bottom: 10_000.0,
    }
}

fn scroll_down() -> ScrollSample {
    ScrollSample {
        from_top: 10_000.0,
        from_bottom: 0.0,
    }
}

/// Pump until `done` holds or the deadline passes.
fn pump_until(rt: &mut Runtime, done: impl Fn(&Runtime) -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while !done(rt) {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        rt.pump_blocking(deadline - now);
    }
    true
}

#[test]
fn loads_history_then_streams_pushes() {
    let (mut rt, source, transport) = setup(20);
    rt.mount(feed(), stream(), 200.0, "timeline", LayoutMode::linear(-20.0, -10.0));
    assert!(rt.wait_idle(WAIT));

    assert_eq!(rt.items(&feed()).len(), 20);
    assert!(rt.orchestrator().reconciler().cache().reached_beginning(&stream()));
    assert_eq!(transport.log().calls(), [TransportCall::Subscribe(stream())]);

    let sink = rt.push_sink();
    let producer = thread::spawn(move || {
        for t in 21..=25 {
            source.publish(message(t));
            assert!(sink.deliver(stream(), message(t)));
        }
    });
    producer.join().unwrap();

    assert!(pump_until(&mut rt, |rt| rt.items(&feed()).len() == 25));
    assert_eq!(ids(&rt)[0], "m25");
    assert!(rt.subscription(&feed()).is_some_and(|s| s.is_streaming()));

    let visible = rt.visible_items(&feed());
    assert!(visible.contains(&"m25".to_string()));
    assert!(!visible.contains(&"m1".to_string()));
}

#[test]
fn scrolling_back_catches_up_after_missed_pushes() {
    let (mut rt, source, transport) = setup(20);
    rt.mount(feed(), stream(), 50.0, "timeline", LayoutMode::linear(-20.0, -10.0));
    assert!(rt.wait_idle(WAIT));
    assert_eq!(rt.items(&feed()).len(), 10);

    rt.on_scroll(&feed(), scroll_up());
    rt.on_scroll(&feed(), scroll_up());
    assert!(rt.wait_idle(WAIT));
    assert_eq!(transport.log().calls().last(), Some(&TransportCall::Unsubscribe(stream())));

    source.publish(message(21));
    source.publish(message(22));
    // a push that raced the unsubscribe is not merged
    assert!(rt.push_sink().deliver(stream(), message(21)));
    rt.pump();
    assert_eq!(ids(&rt)[0], "m20");

    rt.on_scroll(&feed(), scroll_down());
    rt.on_scroll(&feed(), scroll_down());
    assert!(rt.wait_idle(WAIT));

    assert_eq!(&ids(&rt)[..3], ["m22", "m21", "m20"]);
    assert_eq!(rt.items(&feed()).len(), 12);
    assert!(rt.subscription(&feed()).is_some_and(|s| s.is_streaming()));
    assert_eq!(transport.log().calls().last(), Some(&TransportCall::Subscribe(stream())));
    assert!(rt.take_errors().is_empty());
}

#[test]
fn retry_recovers_from_failed_first_page() {
    let (mut rt, source, _transport) = setup(3);
    source.fail_next(feedsync_core::FetchError::transient("503"));
    rt.mount(feed(), stream(), 200.0, "timeline", LayoutMode::linear(-20.0, -10.0));
    assert!(rt.wait_idle(WAIT));
    assert_eq!(rt.take_errors().len(), 1);
    assert!(rt.items(&feed()).is_empty());

    rt.retry(&feed());
    assert!(rt.wait_idle(WAIT));
    assert_eq!(ids(&rt), ["m3", "m2", "m1"]);
    assert!(rt.subscription(&feed()).is_some_and(|s| s.is_up_to_date));
}
