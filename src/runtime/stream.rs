//! Fragment channel between a backend producer task and the turn engine.
//!
//! The producer holds a [`FragmentSink`], the consumer a [`FragmentStream`].
//! Disposing the stream cancels a shared token and closes the channel; the
//! producer sees this on its next send (or via [`FragmentSink::disposed`]) and
//! stops. Disposal never blocks and may be repeated.

use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default number of fragments buffered between producer and consumer.
pub const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A response fragment; it may carry no text.
    Fragment(Option<String>),
    /// Terminal: the producer finished normally.
    Complete,
    /// Terminal: the producer failed.
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete | StreamEvent::Error(_))
    }
}

/// Create a connected sink/stream pair.
pub fn fragment_channel(capacity: usize) -> (FragmentSink, FragmentStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let token = CancellationToken::new();
    (
        FragmentSink {
            tx,
            token: token.clone(),
        },
        FragmentStream {
            rx,
            token,
            finished: false,
        },
    )
}

/// Run `producer` on its own task, feeding the returned stream.
pub fn spawn<F, Fut>(capacity: usize, producer: F) -> FragmentStream
where
    F: FnOnce(FragmentSink) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (sink, stream) = fragment_channel(capacity);
    tokio::spawn(producer(sink));
    stream
}

/// Producer half.
#[derive(Debug)]
pub struct FragmentSink {
    tx: mpsc::Sender<StreamEvent>,
    token: CancellationToken,
}

impl FragmentSink {
    /// Deliver an event. Returns `false` once the stream has been disposed.
    async fn send(&self, event: StreamEvent) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    pub async fn text(&self, text: impl Into<String>) -> bool {
        self.send(StreamEvent::Fragment(Some(text.into()))).await
    }

    /// A fragment without text, such as a keep-alive.
    pub async fn empty(&self) -> bool {
        self.send(StreamEvent::Fragment(None)).await
    }

    pub async fn complete(self) {
        self.send(StreamEvent::Complete).await;
    }

    pub async fn fail(self, reason: impl Into<String>) {
        self.send(StreamEvent::Error(reason.into())).await;
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the consumer disposes the stream.
    pub async fn disposed(&self) {
        self.token.cancelled().await;
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<StreamEvent>,
    token: CancellationToken,
    finished: bool,
}

impl FragmentStream {
    /// Next event, in producer order.
    ///
    /// Returns `None` after a terminal event or disposal. A producer that
    /// goes away without a terminal signal is reported as an error once.
    /// Cancel-safe.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished || self.token.is_cancelled() {
            return None;
        }
        let event = match self.rx.recv().await {
            Some(event) => event,
            None => StreamEvent::Error("Stream closed without a terminal signal".into()),
        };
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }

    /// Stop the producer and drop any queued fragments. Idempotent.
    pub fn dispose(&mut self) {
        if self.token.is_cancelled() {
            return;
        }
        tracing::debug!("Disposing fragment stream");
        self.token.cancel();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        self.dispose();
    }
}
