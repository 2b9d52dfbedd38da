//! Stream sink: the per-request NDJSON frame emitter.
//!
//! A sink is bound to one HTTP response body for its whole life. Emits from
//! any task funnel through an async mutex so `streamId` + `seq` stamping and
//! the channel send happen as one ordered step: per sink, `seq` is gap-free
//! and frames are totally ordered. The write buffer is bounded; a slow client
//! transparently throttles the emitting task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{frame_line, StreamEvent};

/// Max frames buffered towards the response body before emits start blocking.
pub(crate) const SINK_BUFFER_FRAMES: usize = 256;

/// Handle to the frame emitter of one stream. Cheap to clone; all clones
/// share the same writer, sequence counter, and closed flag.
#[derive(Clone, Debug)]
pub struct StreamSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    stream_id: String,
    closed: CancellationToken,
    writer: tokio::sync::Mutex<FrameWriter>,
    activity_frames: AtomicU64,
    last_activity: parking_lot::Mutex<Instant>,
}

#[derive(Debug)]
struct FrameWriter {
    seq: u64,
    tx: Option<mpsc::Sender<String>>,
}

impl StreamSink {
    /// Creates a sink plus the receiving end of its write buffer, which the
    /// HTTP adapter turns into the response body.
    pub(crate) fn new(stream_id: String) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SINK_BUFFER_FRAMES);
        let sink = Self {
            inner: Arc::new(SinkInner {
                stream_id,
                closed: CancellationToken::new(),
                writer: tokio::sync::Mutex::new(FrameWriter { seq: 0, tx: Some(tx) }),
                activity_frames: AtomicU64::new(0),
                last_activity: parking_lot::Mutex::new(Instant::now()),
            }),
        };
        (sink, rx)
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Token cancelled once the sink is closed, either explicitly or because
    /// the response body went away mid-write.
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    /// Count of handler-activity frames written so far and the time of the
    /// most recent one. Feeds the controller's first-event and idle timers.
    pub(crate) fn activity(&self) -> (u64, Instant) {
        (
            self.inner.activity_frames.load(Ordering::Acquire),
            *self.inner.last_activity.lock(),
        )
    }

    /// Stamps, serializes, and writes one frame.
    ///
    /// A closed sink swallows the frame silently: late writes from finalize
    /// paths and handlers that ignore cancellation must be tolerated. A
    /// write failure (client disconnect) closes the sink for good.
    pub async fn emit(&self, event: StreamEvent) {
        if self.is_closed() {
            return;
        }
        let mut writer = self.inner.writer.lock().await;
        if self.is_closed() {
            return;
        }
        let Some(tx) = writer.tx.clone() else {
            return;
        };

        let line = frame_line(&self.inner.stream_id, writer.seq, &event);
        tokio::select! {
            sent = tx.send(line) => {
                if sent.is_err() {
                    writer.tx = None;
                    self.inner.closed.cancel();
                    return;
                }
            }
            // close() unblocks emits stuck on a full buffer
            _ = self.inner.closed.cancelled() => {
                return;
            }
        }

        writer.seq += 1;
        if event.counts_as_activity() {
            self.inner.activity_frames.fetch_add(1, Ordering::Release);
            *self.inner.last_activity.lock() = Instant::now();
        }
    }

    /// Marks the sink closed and releases the writer so the response body
    /// ends. Emits nothing itself; idempotent.
    pub(crate) async fn close(&self) {
        self.inner.closed.cancel();
        self.inner.writer.lock().await.tx = None;
    }
}
