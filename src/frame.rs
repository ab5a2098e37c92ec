//! Per-cycle contact batching and frame delivery
//!
//! The processing thread pushes contact events into the current batch as
//! hands are processed. Once per cycle `drain_and_notify` turns the batch
//! into a [`Frame`] and hands it to the registered [`FrameSink`].
//!
//! ## Guarantees
//! - The batch lock is held only to push or to take the batch, never while
//!   a sink runs.
//! - A frame contains exactly the contacts of the cycle that produced it.
//! - A contact is delivered at most once.
//! - A frame a sink rejects is kept intact in a bounded backlog and retried,
//!   in order, before any newer frame.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::contact::Contact;
use crate::error::DeliveryError;

/// Default number of undeliverable frames kept for retry
pub const DEFAULT_BACKLOG_CAPACITY: usize = 64;

/// One batch of contacts delivered to the consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Monotonically increasing cycle number
    pub sequence: u64,
    /// Contacts in the order hands were processed
    pub contacts: Vec<Contact>,
}

/// A frame the sink could not accept, handed back to the aggregator
#[derive(Debug)]
pub struct Rejected {
    pub error: DeliveryError,
    pub frame: Frame,
}

/// Consumer side of the frame handoff
pub trait FrameSink: Send + Sync {
    /// Deliver one frame. On failure the frame must be returned untouched.
    fn deliver(&self, frame: Frame) -> Result<(), Rejected>;
}

/// Callback type for frame notifications
pub type FrameCallback = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Sink invoking a callback on the processing thread
pub struct CallbackSink {
    callback: FrameCallback,
}

impl CallbackSink {
    pub fn new(callback: FrameCallback) -> Self {
        Self { callback }
    }
}

impl FrameSink for CallbackSink {
    fn deliver(&self, frame: Frame) -> Result<(), Rejected> {
        (self.callback)(&frame);
        Ok(())
    }
}

/// Sink forwarding frames over a bounded Tokio channel
///
/// Never blocks the processing thread: a full channel rejects the frame so it
/// is retried next cycle.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<Frame>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiving end for the consumer
    pub fn channel(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<Frame>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&self, frame: Frame) -> Result<(), Rejected> {
        use tokio::sync::mpsc::error::TrySendError;

        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(frame) => Rejected {
                error: DeliveryError::Full,
                frame,
            },
            TrySendError::Closed(frame) => Rejected {
                error: DeliveryError::Disconnected,
                frame,
            },
        })
    }
}

/// Result of one `drain_and_notify` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainOutcome {
    /// Frames handed to the sink (backlog included)
    pub delivered: usize,
    /// Frames waiting in the backlog afterwards
    pub pending: usize,
    /// Frames discarded because the backlog overflowed
    pub dropped: usize,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FrameStats {
    pub frames_delivered: u64,
    pub contacts_delivered: u64,
    pub frames_dropped: u64,
}

/// Collects contact events for one cycle and delivers them as one frame
pub struct FrameAggregator {
    /// Contacts of the cycle in progress
    batch: Mutex<Vec<Contact>>,
    /// Rejected frames; this lock also serializes concurrent drains
    backlog: Mutex<VecDeque<Frame>>,
    backlog_capacity: usize,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
    always_notify: AtomicBool,
    /// Whether the previous attempt failed (to avoid repeating warnings)
    failing: AtomicBool,
    frames_delivered: AtomicU64,
    contacts_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

impl FrameAggregator {
    pub fn new(always_notify: bool) -> Self {
        Self::with_backlog_capacity(always_notify, DEFAULT_BACKLOG_CAPACITY)
    }

    pub fn with_backlog_capacity(always_notify: bool, backlog_capacity: usize) -> Self {
        Self {
            batch: Mutex::new(Vec::new()),
            backlog: Mutex::new(VecDeque::new()),
            backlog_capacity,
            sink: RwLock::new(None),
            always_notify: AtomicBool::new(always_notify),
            failing: AtomicBool::new(false),
            frames_delivered: AtomicU64::new(0),
            contacts_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Register the consumer (replaces any previous one)
    pub fn set_sink(&self, sink: Arc<dyn FrameSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Unregister the consumer; frames accumulate in the backlog meanwhile
    pub fn clear_sink(&self) {
        *self.sink.write() = None;
    }

    pub fn set_always_notify(&self, enabled: bool) {
        self.always_notify.store(enabled, Ordering::Relaxed);
    }

    pub fn always_notify(&self) -> bool {
        self.always_notify.load(Ordering::Relaxed)
    }

    /// Queue a contact event for the current cycle
    pub fn push(&self, contact: Contact) {
        trace!("Queue contact {} ({})", contact.id, contact.state);
        self.batch.lock().push(contact);
    }

    /// Contacts queued for the current cycle
    pub fn pending_contacts(&self) -> usize {
        self.batch.lock().len()
    }

    /// Frames waiting for redelivery
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            contacts_delivered: self.contacts_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the current cycle and deliver its frame
    ///
    /// An empty batch is only delivered when "always notify" is enabled.
    pub fn drain_and_notify(&self, timestamp: u64) -> DrainOutcome {
        let mut backlog = self.backlog.lock();
        let sink = self.sink.read().clone();
        let mut outcome = DrainOutcome::default();

        // Older frames go first so ordering survives a slow consumer
        while let Some(frame) = backlog.pop_front() {
            match self.try_deliver(sink.as_deref(), frame) {
                Ok(()) => outcome.delivered += 1,
                Err(frame) => {
                    backlog.push_front(frame);
                    break;
                }
            }
        }

        let contacts = std::mem::take(&mut *self.batch.lock());

        if !contacts.is_empty() || self.always_notify() {
            let frame = Frame {
                sequence: timestamp,
                contacts,
            };

            if backlog.is_empty() {
                match self.try_deliver(sink.as_deref(), frame) {
                    Ok(()) => outcome.delivered += 1,
                    Err(frame) => backlog.push_back(frame),
                }
            } else {
                backlog.push_back(frame);
            }
        }

        while backlog.len() > self.backlog_capacity {
            if let Some(frame) = backlog.pop_front() {
                warn!(
                    "Dropping undeliverable frame {} ({} contacts), backlog full",
                    frame.sequence,
                    frame.contacts.len()
                );
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                outcome.dropped += 1;
            }
        }

        outcome.pending = backlog.len();
        outcome
    }

    fn try_deliver(&self, sink: Option<&dyn FrameSink>, frame: Frame) -> Result<(), Frame> {
        let Some(sink) = sink else {
            if !self.failing.swap(true, Ordering::Relaxed) {
                debug!("No frame consumer registered, holding frames");
            }
            return Err(frame);
        };

        let sequence = frame.sequence;
        let contacts = frame.contacts.len() as u64;

        match sink.deliver(frame) {
            Ok(()) => {
                if self.failing.swap(false, Ordering::Relaxed) {
                    debug!("Frame delivery resumed at frame {}", sequence);
                }
                self.frames_delivered.fetch_add(1, Ordering::Relaxed);
                self.contacts_delivered.fetch_add(contacts, Ordering::Relaxed);
                trace!("Delivered frame {} with {} contacts", sequence, contacts);
                Ok(())
            }
            Err(rejected) => {
                if !self.failing.swap(true, Ordering::Relaxed) {
                    warn!(
                        "Frame {} not delivered ({}), keeping it for retry",
                        sequence, rejected.error
                    );
                }
                Err(rejected.frame)
            }
        }
    }
}

impl Default for FrameAggregator {
    fn default() -> Self {
        Self::new(false)
    }
}
