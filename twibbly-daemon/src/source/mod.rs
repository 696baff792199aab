//! Change sources
//!
//! A source discovers candidate entries and sends them to the coordinator as
//! [`CandidateBatch`]es over a bounded channel. Sources do not deduplicate;
//! the delivery tracker does.

mod poll;
mod realtime;

pub use poll::PollSource;
pub use realtime::RealtimeSource;

use crate::store::NameEntry;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Work channel capacity between sources and the coordinator
pub const CHANNEL_CAPACITY: usize = 16;

/// Which source produced a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrigin {
    /// Periodic scan for unprinted entries
    Poll,
    /// One insert event from the realtime channel
    Push,
    /// Scan after (re)joining the realtime channel
    CatchUp,
}

impl std::fmt::Display for BatchOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchOrigin::Poll => write!(f, "poll"),
            BatchOrigin::Push => write!(f, "push"),
            BatchOrigin::CatchUp => write!(f, "catch-up"),
        }
    }
}

/// Candidates handed to the coordinator in one unit
#[derive(Debug)]
pub struct CandidateBatch {
    pub origin: BatchOrigin,
    pub entries: Vec<NameEntry>,
    /// Signalled once every entry was handled
    pub ack: Option<oneshot::Sender<()>>,
}

impl CandidateBatch {
    pub fn new(origin: BatchOrigin, entries: Vec<NameEntry>) -> Self {
        Self {
            origin,
            entries,
            ack: None,
        }
    }

    /// Batch plus a receiver that resolves when the batch is done
    pub fn with_ack(origin: BatchOrigin, entries: Vec<NameEntry>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                origin,
                entries,
                ack: Some(tx),
            },
            rx,
        )
    }

    pub fn complete(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
    }
}

pub fn channel() -> (mpsc::Sender<CandidateBatch>, mpsc::Receiver<CandidateBatch>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Produces candidate entries until shutdown
#[async_trait]
pub trait ChangeSource: Send {
    fn name(&self) -> &'static str;

    /// Run until `shutdown` fires or the coordinator goes away
    async fn run(self: Box<Self>, tx: mpsc::Sender<CandidateBatch>, shutdown: CancellationToken);
}
