//! Live order book
//!
//! Binds a REST snapshot to the streaming feed for one product. Events that
//! arrive while the snapshot is loading are queued; once the snapshot is in
//! place the queue drains through the same sequence-checked path the
//! running book uses, so pre-snapshot and duplicate events fall out
//! naturally.
//!
//! Two tasks per book: a listener consuming the feed subscription and an
//! engine consuming the action inbox. The engine is the only writer of the
//! book and its phase.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{info, warn};

use super::book::Book;
use crate::error::{QuoteError, Result};
use crate::feed::Feed;
use crate::metrics;
use crate::parser::{parse_decimal, Event, EventType};
use crate::products;
use crate::rest::ApiClient;

/// Reconciliation phase of a live book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    Loading,
    Synchronizing,
    Running,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::New => "new",
            Phase::Loading => "loading",
            Phase::Synchronizing => "synchronizing",
            Phase::Running => "running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Reset,
    Synchronize,
    Run,
}

struct BookState {
    phase: Phase,
    book: Option<Book>,
    dropped_messages: i64,
}

struct Inner {
    product_id: String,
    api: ApiClient,
    state: RwLock<BookState>,
    /// Events received before the book is running. Held only for O(1)
    /// append/pop so the listener never contends with an event apply.
    queue: Mutex<VecDeque<Event>>,
    actions: mpsc::Sender<Action>,
    errors: mpsc::Sender<QuoteError>,
    phase_signal: watch::Sender<Phase>,
    resync_dropped_threshold: Option<i64>,
}

/// One product's live order book
pub struct LiveBook {
    inner: Arc<Inner>,
    phase_watch: watch::Receiver<Phase>,
    errors: Mutex<Option<mpsc::Receiver<QuoteError>>>,
}

impl LiveBook {
    /// Subscribe to the feed, spawn the listener and engine tasks, and
    /// dispatch the initial reset.
    pub async fn open(
        api: ApiClient,
        feed: &Feed,
        product_id: &str,
        resync_dropped_threshold: Option<i64>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        if !products::is_valid_product_id(product_id) {
            return Err(QuoteError::InvalidProduct(product_id.to_string()));
        }

        let (actions, actions_rx) = mpsc::channel(4);
        let (errors, errors_rx) = mpsc::channel(64);
        let (phase_signal, phase_watch) = watch::channel(Phase::New);

        let inner = Arc::new(Inner {
            product_id: product_id.to_string(),
            api,
            state: RwLock::new(BookState {
                phase: Phase::New,
                book: None,
                dropped_messages: 0,
            }),
            queue: Mutex::new(VecDeque::new()),
            actions,
            errors,
            phase_signal,
            resync_dropped_threshold,
        });

        let events = feed.subscribe(product_id).await;
        tokio::spawn(Inner::listen(inner.clone(), events));
        tokio::spawn(Inner::run(inner.clone(), actions_rx, shutdown));

        inner.dispatch(Action::Reset);

        Ok(Self {
            inner,
            phase_watch,
            errors: Mutex::new(Some(errors_rx)),
        })
    }

    pub fn product_id(&self) -> &str {
        &self.inner.product_id
    }

    /// Thread-safe proxy for [`Book::quote`]. Fails with `NotReady` until
    /// the book is running, rather than answering from a stale or partial
    /// book.
    pub async fn quote(
        &self,
        action: &str,
        currency: &str,
        amount: f64,
        inverse: bool,
    ) -> Result<(f64, f64)> {
        let state = self.inner.state.read().await;
        if state.phase != Phase::Running {
            return Err(QuoteError::NotReady(self.inner.product_id.clone()));
        }
        let book = state
            .book
            .as_ref()
            .ok_or_else(|| QuoteError::NotReady(self.inner.product_id.clone()))?;
        book.quote(action, currency, amount, inverse)
    }

    /// Clear the book, fetch a fresh snapshot and re-synchronize. Returns
    /// immediately.
    pub fn reset(&self) {
        self.inner.dispatch(Action::Reset);
    }

    /// Total messages missed since the last reset
    pub async fn dropped_message_count(&self) -> i64 {
        self.inner.state.read().await.dropped_messages
    }

    pub fn phase(&self) -> Phase {
        *self.phase_watch.borrow()
    }

    /// Take the error outlet. Yields every non-fatal error observed while
    /// applying events or resetting; the host is expected to drain it.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<QuoteError>> {
        self.errors.lock().take()
    }

    /// Wait for the book to reach `running`, failing after the deadline
    pub async fn wait_until_running(&self, deadline: Duration) -> Result<()> {
        let mut phase = self.phase_watch.clone();
        tokio::time::timeout(deadline, phase.wait_for(|p| *p == Phase::Running))
            .await
            .map_err(|_| QuoteError::NotReady(self.inner.product_id.clone()))?
            .map_err(|_| QuoteError::Internal("live book engine stopped".to_string()))?;
        Ok(())
    }
}

impl Inner {
    /// Listener task: route each delivered event by phase
    async fn listen(self: Arc<Self>, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            let state = self.state.read().await;
            match state.phase {
                Phase::Running => {
                    drop(state);
                    if let Err(e) = self.handle(event).await {
                        self.report(e);
                    }
                }
                // the snapshot is still loading; hold the event for the
                // synchronize drain. The phase read guard is held across
                // the push so the engine cannot flip to running in between.
                _ => self.queue.lock().push_back(event),
            }
        }
        info!(product_id = %self.product_id, "feed subscription closed");
    }

    /// Engine task: the single consumer of the action inbox
    async fn run(
        self: Arc<Self>,
        mut actions: mpsc::Receiver<Action>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => {
                        if let Err(e) = self.act(action).await {
                            self.report(e);
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!(product_id = %self.product_id, "live book engine stopped");
    }

    /// Perform one action and its state transition
    async fn act(&self, action: Action) -> Result<()> {
        let phase = self.state.read().await.phase;
        match (phase, action) {
            (Phase::New, Action::Reset) => {
                self.do_reset().await?;
                self.set_phase(Phase::Loading).await;
                self.dispatch(Action::Synchronize);
            }
            (Phase::Loading, Action::Synchronize) => {
                self.set_phase(Phase::Synchronizing).await;
                self.drain_queue().await;
                self.dispatch(Action::Run);
            }
            (Phase::Synchronizing, Action::Run) => {
                self.finish_synchronizing().await;
            }
            (Phase::Running, Action::Reset) => {
                {
                    let mut state = self.state.write().await;
                    state.phase = Phase::New;
                    state.book = None;
                }
                let _ = self.phase_signal.send(Phase::New);
                self.do_reset().await?;
                self.set_phase(Phase::Loading).await;
                self.dispatch(Action::Synchronize);
            }
            _ => {}
        }
        Ok(())
    }

    /// Update the phase and notify watchers.
    async fn set_phase(&self, phase: Phase) {
        self.state.write().await.phase = phase;
        let _ = self.phase_signal.send(phase);
    }

    /// Clear counters and queue, then fetch and install a fresh level-3
    /// snapshot. On failure the book stays absent and the phase stays
    /// `new`; retrying is the host's call.
    async fn do_reset(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.phase = Phase::New;
            state.dropped_messages = 0;
        }
        let _ = self.phase_signal.send(Phase::New);
        self.queue.lock().clear();

        let raw = self.api.get_book(&self.product_id, 3).await?;
        let book = Book::from_raw(&raw)?;
        info!(
            product_id = %self.product_id,
            sequence = book.sequence(),
            "loaded order book snapshot"
        );

        self.state.write().await.book = Some(book);
        Ok(())
    }

    /// Apply queued events in arrival order. Per-event failures are
    /// reported and skipped.
    async fn drain_queue(&self) {
        loop {
            let event = self.queue.lock().pop_front();
            match event {
                Some(event) => {
                    if let Err(e) = self.handle(event).await {
                        self.report(e);
                    }
                }
                None => break,
            }
        }
    }

    /// Flip to `running` once the queue is verifiably empty. The phase is
    /// set under the book write lock while re-checking the queue, so an
    /// event enqueued concurrently is either drained here or handled live
    /// by the listener; none can strand in the queue.
    async fn finish_synchronizing(&self) {
        loop {
            self.drain_queue().await;
            let mut state = self.state.write().await;
            if self.queue.lock().is_empty() {
                state.phase = Phase::Running;
                let _ = self.phase_signal.send(Phase::Running);
                info!(product_id = %self.product_id, "order book running");
                break;
            }
        }
    }

    /// Apply one event to the book. Only the engine task calls this.
    async fn handle(&self, event: Event) -> Result<()> {
        // irrelevant product
        if event.product_id != self.product_id {
            return Ok(());
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(book) = state.book.as_mut() else {
            return Ok(());
        };

        // stale: at or before the snapshot cut, or a duplicate
        if event.sequence <= book.sequence() {
            return Ok(());
        }

        let gap = event.sequence - book.sequence() - 1;
        book.set_sequence(event.sequence);
        if gap > 0 {
            warn!(
                product_id = %self.product_id,
                dropped = gap,
                sequence = event.sequence,
                "missed feed messages"
            );
            state.dropped_messages += gap;
            metrics::DROPPED_MESSAGES
                .with_label_values(&[&self.product_id])
                .inc_by(gap as u64);

            if let Some(threshold) = self.resync_dropped_threshold {
                if state.phase == Phase::Running && state.dropped_messages > threshold {
                    warn!(
                        product_id = %self.product_id,
                        dropped = state.dropped_messages,
                        threshold,
                        "dropped messages exceeded threshold, resetting"
                    );
                    self.dispatch(Action::Reset);
                    return Ok(());
                }
            }
        }

        match event.kind {
            EventType::Open => {
                let price = parse_decimal(&event.price, "price")?;
                let size = parse_decimal(&event.remaining_size, "remaining_size")?;
                book.insert(&event.side, price, size, &event.order_id)?;
            }
            EventType::Done => book.delete(&event.order_id),
            EventType::Match => {
                // matches reference the resting order by maker_order_id
                let size = parse_decimal(&event.size, "size")?;
                book.match_size(&event.maker_order_id, size);
            }
            EventType::Change => {
                let size = parse_decimal(&event.new_size, "new_size")?;
                book.change(&event.order_id, size);
            }
            _ => return Ok(()),
        }

        metrics::EVENTS_APPLIED
            .with_label_values(&[&self.product_id, event.kind.as_str()])
            .inc();
        Ok(())
    }

    /// Best-effort action submission; the inbox is buffered so
    /// self-dispatched transitions never deadlock the engine.
    fn dispatch(&self, action: Action) {
        if self.actions.try_send(action).is_err() {
            warn!(
                product_id = %self.product_id,
                action = ?action,
                "action inbox unavailable, dropping action"
            );
        }
    }

    /// Report a non-fatal error on the outlet
    fn report(&self, err: QuoteError) {
        warn!(product_id = %self.product_id, error = %err, "live book error");
        let _ = self.errors.try_send(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBook {
        inner: Arc<Inner>,
        _actions: mpsc::Receiver<Action>,
        errors: mpsc::Receiver<QuoteError>,
        _phase: watch::Receiver<Phase>,
    }

    fn test_book(product_id: &str) -> TestBook {
        let (actions, actions_rx) = mpsc::channel(4);
        let (errors, errors_rx) = mpsc::channel(64);
        let (phase_signal, phase_rx) = watch::channel(Phase::New);
        let api = ApiClient::new("http://localhost:1", Duration::from_secs(1)).unwrap();

        TestBook {
            inner: Arc::new(Inner {
                product_id: product_id.to_string(),
                api,
                state: RwLock::new(BookState {
                    phase: Phase::New,
                    book: None,
                    dropped_messages: 0,
                }),
                queue: Mutex::new(VecDeque::new()),
                actions,
                errors,
                phase_signal,
                resync_dropped_threshold: None,
            }),
            _actions: actions_rx,
            errors: errors_rx,
            _phase: phase_rx,
        }
    }

    fn open_event(product_id: &str, sequence: i64, order_id: &str, price: &str) -> Event {
        Event {
            kind: EventType::Open,
            sequence,
            product_id: product_id.to_string(),
            order_id: order_id.to_string(),
            side: "buy".to_string(),
            price: price.to_string(),
            remaining_size: "1.0".to_string(),
            ..Default::default()
        }
    }

    async fn install_book(test: &TestBook, sequence: i64, phase: Phase) {
        let mut state = test.inner.state.write().await;
        state.book = Some(Book::new(sequence));
        state.phase = phase;
    }

    #[tokio::test]
    async fn test_stale_event_is_discarded() {
        let test = test_book("BTC-USD");
        install_book(&test, 100, Phase::Running).await;

        let event = open_event("BTC-USD", 100, "order-1", "100.0");
        test.inner.handle(event).await.unwrap();

        let state = test.inner.state.read().await;
        let book = state.book.as_ref().unwrap();
        assert_eq!(book.sequence(), 100);
        assert_eq!(book.depth(), (0, 0));
        assert_eq!(state.dropped_messages, 0);
    }

    #[tokio::test]
    async fn test_gap_is_counted_and_event_applied() {
        let test = test_book("BTC-USD");
        install_book(&test, 100, Phase::Running).await;

        let event = open_event("BTC-USD", 102, "order-1", "100.0");
        test.inner.handle(event).await.unwrap();

        let state = test.inner.state.read().await;
        let book = state.book.as_ref().unwrap();
        assert_eq!(book.sequence(), 102);
        assert_eq!(book.depth(), (1, 0));
        assert_eq!(state.dropped_messages, 1);
    }

    #[tokio::test]
    async fn test_other_products_are_ignored() {
        let test = test_book("BTC-USD");
        install_book(&test, 100, Phase::Running).await;

        let event = open_event("ETH-USD", 101, "order-1", "100.0");
        test.inner.handle(event).await.unwrap();

        let state = test.inner.state.read().await;
        assert_eq!(state.book.as_ref().unwrap().sequence(), 100);
    }

    #[tokio::test]
    async fn test_queue_drains_into_snapshot() {
        let test = test_book("BTC-USD");

        // events 5..=7 arrive while the snapshot is still loading
        for (sequence, order_id) in [(5, "order-5"), (6, "order-6"), (7, "order-7")] {
            test.inner
                .queue
                .lock()
                .push_back(open_event("BTC-USD", sequence, order_id, "50.0"));
        }

        // snapshot lands cut at sequence 4
        install_book(&test, 4, Phase::Synchronizing).await;
        test.inner.finish_synchronizing().await;

        let state = test.inner.state.read().await;
        let book = state.book.as_ref().unwrap();
        assert_eq!(state.phase, Phase::Running);
        assert_eq!(book.sequence(), 7);
        assert_eq!(book.depth(), (3, 0));
        assert_eq!(state.dropped_messages, 0);
        assert!(test.inner.queue.lock().is_empty());
    }

    #[tokio::test]
    async fn test_queued_pre_snapshot_events_fall_out() {
        let test = test_book("BTC-USD");

        // sequences 3 and 4 predate the snapshot cut and must not apply
        for (sequence, order_id) in [(3, "order-3"), (4, "order-4"), (5, "order-5")] {
            test.inner
                .queue
                .lock()
                .push_back(open_event("BTC-USD", sequence, order_id, "50.0"));
        }

        install_book(&test, 4, Phase::Synchronizing).await;
        test.inner.finish_synchronizing().await;

        let state = test.inner.state.read().await;
        let book = state.book.as_ref().unwrap();
        assert_eq!(book.sequence(), 5);
        assert_eq!(book.depth(), (1, 0));
        assert!(book.find("order-5").is_some());
        assert!(book.find("order-3").is_none());
    }

    #[tokio::test]
    async fn test_parse_failure_surfaces_after_sequence_advance() {
        let test = test_book("BTC-USD");
        install_book(&test, 100, Phase::Running).await;

        let mut event = open_event("BTC-USD", 101, "order-1", "not-a-price");
        event.remaining_size = "1.0".to_string();
        let err = test.inner.handle(event).await.unwrap_err();
        assert!(matches!(err, QuoteError::Decode(_)));

        // the sequence advanced before the parse, mirroring the feed cursor
        let state = test.inner.state.read().await;
        assert_eq!(state.book.as_ref().unwrap().sequence(), 101);
    }

    #[tokio::test]
    async fn test_drain_reports_and_continues_past_bad_events() {
        let mut test = test_book("BTC-USD");

        test.inner
            .queue
            .lock()
            .push_back(open_event("BTC-USD", 5, "order-5", "garbage"));
        test.inner
            .queue
            .lock()
            .push_back(open_event("BTC-USD", 6, "order-6", "50.0"));

        install_book(&test, 4, Phase::Synchronizing).await;
        test.inner.finish_synchronizing().await;

        let state = test.inner.state.read().await;
        let book = state.book.as_ref().unwrap();
        assert_eq!(state.phase, Phase::Running);
        assert_eq!(book.sequence(), 6);
        assert!(book.find("order-6").is_some());
        drop(state);

        let err = test.errors.try_recv().expect("decode error on the outlet");
        assert!(matches!(err, QuoteError::Decode(_)));
    }
}
