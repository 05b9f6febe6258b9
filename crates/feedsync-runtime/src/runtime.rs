#![forbid(unsafe_code)]

//! Threaded driver around [`Orchestrator`].
//!
//! The orchestrator never blocks. `FeedRuntime` runs the page fetches it
//! asks for on background threads and applies their results, together with
//! pushed items from any [`PushSink`], on the thread that calls
//! [`FeedRuntime::pump`]. All state mutation stays on that one thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use feedsync_cache::{PageDirection, PageFetch, StreamSubscription};
use feedsync_core::error::{FetchError, SyncError};
use feedsync_core::item::TimedItem;
use feedsync_core::key::{GroupKey, StreamKey};
use feedsync_core::source::{PageSource, PushTransport};
use feedsync_viewport::{LayoutMode, Measurement, ScrollSample, TransitionStart};

use crate::config::FeedConfig;
use crate::orchestrator::{FeedCmd, FeedMsg, Orchestrator};
use crate::task::{TaskPool, panic_message};

/// Handle for delivering pushed items into a [`FeedRuntime`] from any
/// thread (typically the push transport's reader).
#[derive(Debug)]
pub struct PushSink<T: TimedItem> {
    sender: mpsc::Sender<FeedMsg<T>>,
}

impl<T: TimedItem> Clone for PushSink<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: TimedItem> PushSink<T> {
    /// Queue `item` for `key`. Returns `false` once the runtime is gone.
    pub fn deliver(&self, key: StreamKey, item: T) -> bool {
        self.sender.send(FeedMsg::Push { key, item }).is_ok()
    }
}

/// Owns an [`Orchestrator`] and executes its commands.
pub struct FeedRuntime<T, P, S>
where
    T: TimedItem + Send + 'static,
    T::Id: Send,
    P: PushTransport,
    S: PageSource<T> + Send + Sync + 'static,
{
    orchestrator: Orchestrator<T, P>,
    source: Arc<S>,
    pool: TaskPool<FeedMsg<T>>,
    sender: mpsc::Sender<FeedMsg<T>>,
    receiver: mpsc::Receiver<FeedMsg<T>>,
    in_flight: usize,
    errors: Vec<SyncError>,
}

impl<T, P, S> std::fmt::Debug for FeedRuntime<T, P, S>
where
    T: TimedItem + Send + 'static,
    T::Id: Send,
    P: PushTransport,
    S: PageSource<T> + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRuntime")
            .field("orchestrator", &self.orchestrator)
            .field("in_flight", &self.in_flight)
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl<T, P, S> FeedRuntime<T, P, S>
where
    T: TimedItem + Send + 'static,
    T::Id: Send,
    P: PushTransport,
    S: PageSource<T> + Send + Sync + 'static,
{
    pub fn new(config: FeedConfig, transport: P, source: Arc<S>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            orchestrator: Orchestrator::new(config, transport),
            source,
            pool: TaskPool::new(sender.clone()),
            sender,
            receiver,
            in_flight: 0,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator<T, P> {
        &self.orchestrator
    }

    /// A sink the push transport can feed from its own thread.
    #[must_use]
    pub fn push_sink(&self) -> PushSink<T> {
        PushSink {
            sender: self.sender.clone(),
        }
    }

    /// Page fetches spawned but not yet applied.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Drain errors reported since the last call.
    pub fn take_errors(&mut self) -> Vec<SyncError> {
        std::mem::take(&mut self.errors)
    }

    #[must_use]
    pub fn items(&self, group: &GroupKey) -> &[T] {
        self.orchestrator.items(group)
    }

    #[must_use]
    pub fn subscription(&self, group: &GroupKey) -> Option<StreamSubscription> {
        self.orchestrator.subscription(group)
    }

    #[must_use]
    pub fn visible_items(&self, group: &GroupKey) -> Vec<T::Id> {
        self.orchestrator.visible_items(group)
    }

    #[must_use]
    pub fn position_of(&self, group: &GroupKey, id: &T::Id) -> Option<f64> {
        self.orchestrator.position_of(group, id)
    }

    pub fn mount(
        &mut self,
        group: GroupKey,
        stream: StreamKey,
        height: f64,
        mode_name: &str,
        mode: LayoutMode<T::Id>,
    ) {
        let cmds = self.orchestrator.mount(group, stream, height, mode_name, mode);
        self.execute(cmds);
    }

    pub fn add_layout_mode(&mut self, group: &GroupKey, name: &str, mode: LayoutMode<T::Id>) -> bool {
        self.orchestrator.add_layout_mode(group, name, mode)
    }

    pub fn on_scroll(&mut self, group: &GroupKey, sample: ScrollSample) {
        let cmds = self.orchestrator.on_scroll(group, sample);
        self.execute(cmds);
    }

    pub fn set_height(&mut self, group: &GroupKey, height: f64) {
        let cmds = self.orchestrator.set_height(group, height);
        self.execute(cmds);
    }

    pub fn set_visible(&mut self, group: &GroupKey, visible: bool) {
        let cmds = self.orchestrator.set_visible(group, visible);
        self.execute(cmds);
    }

    pub fn measure(&mut self, group: &GroupKey, mode: &str, id: T::Id, measurement: Measurement) {
        let cmds = self.orchestrator.measure(group, mode, id, measurement);
        self.execute(cmds);
    }

    pub fn switch_layout(
        &mut self,
        group: &GroupKey,
        to: &str,
        pivot: Option<&T::Id>,
    ) -> Result<Option<TransitionStart<T::Id>>, SyncError> {
        self.orchestrator.switch_layout(group, to, pivot)
    }

    pub fn tick(&mut self, dt: Duration) -> Vec<GroupKey> {
        self.orchestrator.tick(dt)
    }

    pub fn retry(&mut self, group: &GroupKey) {
        let cmds = self.orchestrator.retry(group);
        self.execute(cmds);
    }

    pub fn annotate(&mut self, group: &GroupKey, id: &T::Id, f: impl FnOnce(&mut T)) -> bool {
        self.orchestrator.annotate(group, id, f)
    }

    /// Apply every message that has already arrived. Returns how many.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(msg) = self.receiver.try_recv() {
            self.apply(msg);
            applied += 1;
        }
        self.pool.reap();
        applied
    }

    /// Wait up to `timeout` for one message, then drain the rest.
    pub fn pump_blocking(&mut self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(msg) => {
                self.apply(msg);
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    /// Pump until no page fetch is in flight or `timeout` passes. Returns
    /// whether the runtime went idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.pump();
        while self.in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_blocking(deadline - now);
        }
        true
    }

    fn apply(&mut self, msg: FeedMsg<T>) {
        if let FeedMsg::PageLoaded { fetch, result } = &msg {
            self.in_flight = self.in_flight.saturating_sub(1);
            crate::debug_trace!(
                "page applied: stream={} direction={:?} ok={} in_flight={}",
                fetch.key,
                fetch.direction,
                result.is_ok(),
                self.in_flight
            );
        }
        let cmds = self.orchestrator.update(msg);
        self.execute(cmds);
    }

    fn execute(&mut self, cmds: Vec<FeedCmd<T>>) {
        for cmd in cmds {
            match cmd {
                FeedCmd::Fetch(fetch) => self.spawn_fetch(fetch),
                FeedCmd::Report(err) => {
                    crate::debug_trace!("error reported: {}", err);
                    self.errors.push(err);
                }
            }
        }
    }

    fn spawn_fetch(&mut self, fetch: PageFetch<T>) {
        self.in_flight += 1;
        crate::debug_trace!(
            "page fetch spawned: stream={} direction={:?} in_flight={}",
            fetch.key,
            fetch.direction,
            self.in_flight
        );
        let source = Arc::clone(&self.source);
        let name = match fetch.direction {
            PageDirection::Older => "older",
            PageDirection::Newer => "newer",
        };
        self.pool.spawn(name, move || {
            // a panicking source still answers, so in_flight always drains
            let result = catch_unwind(AssertUnwindSafe(|| match fetch.direction {
                PageDirection::Older => {
                    source.fetch_older_items(&fetch.key, fetch.cursor.as_ref(), fetch.limit)
                }
                PageDirection::Newer => {
                    source.fetch_newer_items(&fetch.key, fetch.cursor.as_ref(), fetch.limit)
                }
            }))
            .unwrap_or_else(|payload| {
                let msg = panic_message(payload.as_ref());
                tracing::error!(stream = %fetch.key, "page source panicked: {msg}");
                Err(FetchError::permanent(format!("page source panicked: {msg}")))
            });
            FeedMsg::PageLoaded { fetch, result }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, ScriptedPages};
    use feedsync_core::item::Message;
    use std::sync::atomic::{AtomicBool, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    fn feed() -> GroupKey {
        GroupKey::from("feed")
    }

    fn stream() -> StreamKey {
        StreamKey::new("g", "c")
    }

    fn runtime(
        n: i64,
    ) -> FeedRuntime<Message, RecordingTransport, ScriptedPages<Message>> {
        let source = Arc::new(ScriptedPages::new(
            (1..=n).map(|t| Message::new(format!("m{t}"), t * 10)).collect(),
        ));
        FeedRuntime::new(FeedConfig::default().with_page_size(5), RecordingTransport::new(), source)
    }

    #[test]
    fn mount_loads_in_background() {
        let mut rt = runtime(3);
        rt.mount(feed(), stream(), 400.0, "timeline", LayoutMode::linear(-20.0, -10.0));
        assert_eq!(rt.in_flight(), 1);
        assert!(rt.wait_idle(WAIT));
        assert_eq!(rt.items(&feed()).len(), 3);
        assert!(rt.subscription(&feed()).is_some_and(|s| s.is_streaming()));
    }

    #[test]
    fn pushes_apply_on_pump() {
        let mut rt = runtime(3);
        rt.mount(feed(), stream(), 400.0, "timeline", LayoutMode::linear(-20.0, -10.0));
        assert!(rt.wait_idle(WAIT));

        let sink = rt.push_sink();
        let worker = std::thread::spawn(move || sink.deliver(stream(), Message::new("m4", 40)));
        assert!(worker.join().unwrap());
        assert_eq!(rt.pump_blocking(WAIT), 1);
        assert_eq!(rt.items(&feed())[0].id, "m4");
    }

    #[test]
    fn failures_are_collected() {
        let source = Arc::new(ScriptedPages::<Message>::new(Vec::new()));
        source.fail_next(FetchError::transient("offline"));
        let mut rt = FeedRuntime::new(FeedConfig::default(), RecordingTransport::new(), Arc::clone(&source));
        rt.mount(feed(), stream(), 400.0, "timeline", LayoutMode::linear(-20.0, -10.0));
        assert!(rt.wait_idle(WAIT));

        let errors = rt.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_retryable());
        assert!(rt.take_errors().is_empty());
    }

    #[test]
    fn dropped_runtime_rejects_pushes() {
        let rt = runtime(1);
        let sink = rt.push_sink();
        drop(rt);
        assert!(!sink.deliver(stream(), Message::new("late", 1)));
    }

    /// Panics on its first older-page fetch, then serves from `inner`.
    struct PanicsOnce {
        armed: AtomicBool,
        inner: ScriptedPages<Message>,
    }

    impl PageSource<Message> for PanicsOnce {
        fn fetch_older_items(
            &self,
            key: &StreamKey,
            before: Option<&String>,
            limit: usize,
        ) -> Result<Vec<Message>, FetchError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                panic!("history backend exploded");
            }
            self.inner.fetch_older_items(key, before, limit)
        }

        fn fetch_newer_items(
            &self,
            key: &StreamKey,
            after: Option<&String>,
            limit: usize,
        ) -> Result<Vec<Message>, FetchError> {
            self.inner.fetch_newer_items(key, after, limit)
        }
    }

    #[test]
    fn panicking_source_reports_failure_and_drains() {
        let source = Arc::new(PanicsOnce {
            armed: AtomicBool::new(true),
            inner: ScriptedPages::new((1..=3).map(|t| Message::new(format!("m{t}"), t * 10)).collect()),
        });
        let mut rt = FeedRuntime::new(FeedConfig::default(), RecordingTransport::new(), source);
        rt.mount(feed(), stream(), 400.0, "timeline", LayoutMode::linear(-20.0, -10.0));
        assert!(rt.wait_idle(WAIT));
        assert_eq!(rt.in_flight(), 0);

        let errors = rt.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].is_retryable());
        assert!(errors[0].to_string().contains("history backend exploded"));

        rt.retry(&feed());
        assert!(rt.wait_idle(WAIT));
        assert_eq!(rt.in_flight(), 0);
        assert_eq!(rt.items(&feed()).len(), 3);
    }
}
