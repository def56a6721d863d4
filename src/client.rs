//! Live display client
//!
//! A [`LiveChannel`] delivers full snapshots one at a time over an mpsc feed.
//! [`DisplayClient`] owns the [`DisplayState`] and is its only writer: it
//! reconciles each snapshot as it arrives and sleeps until the earliest flash
//! deadline to sweep expired highlights, all on a single task.

use chrono::Utc;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::display::DisplayState;
use crate::error::VitalsError;
use crate::schema::RawSnapshot;
use crate::server::UPDATE_EVENT;
use crate::store::SnapshotStore;

/// Snapshots buffered between a channel and the display loop
pub const FEED_CAPACITY: usize = 16;

/// Error recorded when a started channel stops delivering
pub const CHANNEL_CLOSED: &str = "live channel closed";

/// Receiving end of a live channel
pub type SnapshotFeed = mpsc::Receiver<RawSnapshot>;

/// Source of live snapshots
pub trait LiveChannel: Send + Sync {
    /// Open the channel. Fails when the source cannot be reached.
    fn open(&self) -> BoxFuture<'_, Result<SnapshotFeed, VitalsError>>;
}

/// Channel fed directly by an in-process store
pub struct LocalChannel {
    store: Arc<dyn SnapshotStore>,
}

impl LocalChannel {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }
}

impl LiveChannel for LocalChannel {
    fn open(&self) -> BoxFuture<'_, Result<SnapshotFeed, VitalsError>> {
        Box::pin(async move {
            let mut updates = self.store.subscribe();
            let current = self.store.current().await;
            let (tx, rx) = mpsc::channel(FEED_CAPACITY);

            tokio::spawn(async move {
                if tx.send(current).await.is_err() {
                    return;
                }
                loop {
                    match updates.recv().await {
                        Ok(snapshot) => {
                            if tx.send(snapshot).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("local feed lagged, skipped {} record(s)", n);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            Ok(rx)
        })
    }
}

/// Channel reading server-sent events from the ingestion server
pub struct SseChannel {
    client: reqwest::Client,
    url: String,
}

impl SseChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl LiveChannel for SseChannel {
    fn open(&self) -> BoxFuture<'_, Result<SnapshotFeed, VitalsError>> {
        Box::pin(async move {
            let mut response = self
                .client
                .get(&self.url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await?
                .error_for_status()?;
            log::info!("connected to {}", self.url);

            let (tx, rx) = mpsc::channel(FEED_CAPACITY);
            tokio::spawn(async move {
                let mut decoder = SseDecoder::default();
                loop {
                    let chunk = match response.chunk().await {
                        Ok(Some(chunk)) => chunk,
                        Ok(None) => {
                            log::info!("push stream ended");
                            break;
                        }
                        Err(e) => {
                            log::warn!("push stream failed: {}", e);
                            break;
                        }
                    };

                    for event in decoder.push(&chunk) {
                        if event.event != UPDATE_EVENT {
                            continue;
                        }
                        match RawSnapshot::from_json(&event.data) {
                            Ok(snapshot) => {
                                if tx.send(snapshot).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => log::warn!("ignoring malformed update: {}", e),
                        }
                    }
                }
            });

            Ok(rx)
        })
    }
}

/// Fallback channel that fetches the current record on an interval
pub struct PollingChannel {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl PollingChannel {
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            interval,
        }
    }
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> Result<RawSnapshot, VitalsError> {
    let snapshot = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<RawSnapshot>()
        .await?;
    Ok(snapshot)
}

impl LiveChannel for PollingChannel {
    fn open(&self) -> BoxFuture<'_, Result<SnapshotFeed, VitalsError>> {
        Box::pin(async move {
            // The first fetch decides whether the channel opened
            let first = fetch_snapshot(&self.client, &self.url).await?;
            log::info!("polling {} every {:?}", self.url, self.interval);

            let (tx, rx) = mpsc::channel(FEED_CAPACITY);
            let client = self.client.clone();
            let url = self.url.clone();
            let interval = self.interval;

            tokio::spawn(async move {
                if tx.send(first).await.is_err() {
                    return;
                }
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match fetch_snapshot(&client, &url).await {
                        Ok(snapshot) => {
                            if tx.send(snapshot).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("poll failed: {}", e),
                    }
                }
            });

            Ok(rx)
        })
    }
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the frame has none
    pub event: String,
    pub data: String,
}

/// Largest event the decoder buffers; bigger events are dropped
pub const MAX_EVENT_BYTES: usize = 1 << 20;

/// Incremental decoder for a `text/event-stream` body.
///
/// Lines may end in `\r\n`, `\r` or `\n`, and may be split across chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    after_cr: bool,
    event: Option<String>,
    data: Vec<String>,
    pending_bytes: usize,
    oversized: bool,
}

impl SseDecoder {
    /// Feed raw bytes; returns every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            match byte {
                b'\r' => {
                    self.after_cr = true;
                    self.end_line(&mut events);
                }
                b'\n' => self.end_line(&mut events),
                _ if self.pending_bytes + self.line.len() >= MAX_EVENT_BYTES => {
                    self.oversized = true;
                }
                _ => self.line.push(byte),
            }
        }
        events
    }

    fn end_line(&mut self, events: &mut Vec<SseEvent>) {
        let line = std::mem::take(&mut self.line);
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if self.oversized {
            return;
        }
        let line = String::from_utf8_lossy(&line);

        // Comment lines carry keep-alives
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.pending_bytes += value.len() + 1;
                self.data.push(value.to_string());
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        self.pending_bytes = 0;

        if std::mem::take(&mut self.oversized) {
            log::warn!("dropping event larger than {} bytes", MAX_EVENT_BYTES);
            return;
        }
        if data.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        });
    }
}

/// Drives a [`DisplayState`] from a [`LiveChannel`]
pub struct DisplayClient<C> {
    channel: C,
    state: DisplayState,
}

impl<C: LiveChannel> DisplayClient<C> {
    pub fn new(channel: C, flash_duration: Duration) -> Self {
        Self {
            channel,
            state: DisplayState::new(flash_duration),
        }
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    /// Open the channel unless already started
    pub async fn start(&mut self) -> Option<SnapshotFeed> {
        if self.state.is_started() {
            return None;
        }
        let opened = self.channel.open().await;
        self.state.complete_start(opened)
    }

    /// Start and process snapshots until the channel closes.
    ///
    /// `render` is called with the state after start and after every change.
    /// A failed start, or a channel that closes once started, is recorded in
    /// the state, rendered once and returned as an error.
    pub async fn run<F>(&mut self, mut render: F) -> Result<(), VitalsError>
    where
        F: FnMut(&DisplayState),
    {
        let Some(mut feed) = self.start().await else {
            render(&self.state);
            let message = self.state.error().unwrap_or("display already started");
            return Err(VitalsError::Channel(message.to_string()));
        };
        render(&self.state);

        loop {
            let until_expiry = self
                .state
                .next_deadline()
                .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO));

            tokio::select! {
                received = feed.recv() => match received {
                    Some(snapshot) => {
                        self.state.load(Some(&snapshot), Utc::now());
                    }
                    None => {
                        self.state.record_error(CHANNEL_CLOSED);
                        render(&self.state);
                        return Err(VitalsError::Channel(CHANNEL_CLOSED.to_string()));
                    }
                },
                _ = sleep_or_pending(until_expiry) => {
                    self.state.expire(Utc::now());
                }
            }
            render(&self.state);
        }
    }
}

async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{keys, IngestBatch, MeasurementEntry};
    use crate::store::InMemorySnapshotStore;
    use crate::types::Field;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decoder_single_event() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"event: update\ndata: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "update".to_string(),
                data: "{\"a\":1}".to_string(),
            }]
        );
    }

    #[test]
    fn test_decoder_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: upd").is_empty());
        assert!(decoder.push(b"ate\r\ndata: line one\r\n").is_empty());
        let events = decoder.push(b"data: line two\r\n\r\n: keep-alive\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "update");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn test_decoder_defaults_and_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b":\n\ndata:x\n\nevent: ping\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".to_string(),
                data: "x".to_string(),
            }]
        );
    }

    #[test]
    fn test_decoder_bare_cr_line_endings() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"event: update\rdata: {}\r\rdata: next\r");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "update".to_string(),
                data: "{}".to_string(),
            }]
        );
        // A CR at the end of one chunk and LF at the start of the next is one line end
        assert!(decoder.push(b"\n").is_empty());
        let events = decoder.push(b"\n");
        assert_eq!(events[0].data, "next");
    }

    #[test]
    fn test_decoder_drops_oversized_event() {
        let mut decoder = SseDecoder::default();
        let mut huge = b"data: ".to_vec();
        huge.extend(std::iter::repeat(b'x').take(MAX_EVENT_BYTES + 10));
        assert!(decoder.push(&huge).is_empty());
        assert!(decoder.line.len() <= MAX_EVENT_BYTES);
        assert!(decoder.push(b"\n\n").is_empty());

        let events = decoder.push(b"event: update\ndata: ok\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }

    async fn next_state_where(
        rx: &mut mpsc::UnboundedReceiver<DisplayState>,
        predicate: impl Fn(&DisplayState) -> bool,
    ) -> DisplayState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = rx.recv().await.expect("client stopped");
                if predicate(&state) {
                    return state;
                }
            }
        })
        .await
        .expect("timed out waiting for display state")
    }

    #[tokio::test]
    async fn test_client_follows_local_store() {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(InMemorySnapshotStore::default());
        let channel = LocalChannel::new(store.clone());
        let mut client = DisplayClient::new(channel, Duration::from_millis(100));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            client
                .run(|state| {
                    let _ = tx.send(state.clone());
                })
                .await
        });

        // Seeded record arrives first
        let seeded = next_state_where(&mut rx, |s| s.view_model().weight == 250.0).await;
        assert!(seeded.is_started());
        assert!(seeded.flash_set().contains(Field::Weight));

        // Highlights decay on their own
        next_state_where(&mut rx, |s| s.flash_set().is_empty()).await;

        let batch = IngestBatch::default()
            .with_measurement(MeasurementEntry::new(keys::RESTING_HEART_RATE, "74", "Bpm"));
        store.ingest(batch).await.unwrap();

        let updated = next_state_where(&mut rx, |s| s.view_model().resting_heart_rate == 74.0).await;
        assert!(updated.flash_set().contains(Field::RestingHeartRate));
        assert!(!updated.flash_set().contains(Field::Weight));

        handle.abort();
    }

    #[tokio::test]
    async fn test_client_records_connection_failure() {
        let channel = SseChannel::new("http://127.0.0.1:1/updates");
        let mut client = DisplayClient::new(channel, Duration::from_millis(100));

        let mut rendered = Vec::new();
        let result = client.run(|state| rendered.push(state.clone())).await;

        assert!(matches!(result, Err(VitalsError::Channel(_))));
        assert!(!client.state().is_started());
        assert!(client.state().error().is_some());
        assert_eq!(rendered.len(), 1);
    }

    struct SingleSnapshotChannel(RawSnapshot);

    impl LiveChannel for SingleSnapshotChannel {
        fn open(&self) -> BoxFuture<'_, Result<SnapshotFeed, VitalsError>> {
            Box::pin(async move {
                let (tx, rx) = mpsc::channel(1);
                tx.try_send(self.0.clone())
                    .map_err(|e| VitalsError::Channel(e.to_string()))?;
                Ok(rx)
            })
        }
    }

    #[tokio::test]
    async fn test_client_records_closed_channel() {
        let channel = SingleSnapshotChannel(RawSnapshot::seeded());
        let mut client = DisplayClient::new(channel, Duration::from_millis(100));

        let mut rendered = Vec::new();
        let result = client.run(|state| rendered.push(state.clone())).await;

        match result {
            Err(VitalsError::Channel(message)) => assert_eq!(message, CHANNEL_CLOSED),
            other => panic!("expected a channel error, got {:?}", other),
        }
        assert_eq!(client.state().error(), Some(CHANNEL_CLOSED));
        assert!(!client.state().is_started());
        // The last snapshot stays on the board next to the error
        assert_eq!(client.state().view_model().weight, 250.0);

        let last = rendered.last().unwrap();
        assert_eq!(last.error(), Some(CHANNEL_CLOSED));
    }
}
