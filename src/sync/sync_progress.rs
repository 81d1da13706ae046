//! Utilities to track the progression of a sync

use std::fmt::{Display, Error, Formatter};

/// The successive phases of a sync run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    /// Looking for server-side contacts that are not known locally yet
    Discover,
    /// Applying remote changes to the local store
    Pull,
    /// Sending local changes to the server
    Push,
}

impl Display for SyncPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            SyncPhase::Discover => write!(f, "discover"),
            SyncPhase::Pull => write!(f, "pull"),
            SyncPhase::Push => write!(f, "push"),
        }
    }
}

/// An event that happens during a sync
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// Sync has not started
    NotStarted,
    /// Sync has just started but no vCard is handled yet
    Started,
    /// Sync is in progress
    InProgress {
        phase: SyncPhase,
        /// 1-based position inside the current phase
        current: usize,
        /// How many items the current phase has to look at
        total: usize,
        /// Display name of the contact being handled
        contact: String,
    },
    /// Sync is finished
    Finished { success: bool },
}

impl Display for SyncEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            SyncEvent::NotStarted => write!(f, "Not started"),
            SyncEvent::Started => write!(f, "Sync has started..."),
            SyncEvent::InProgress { phase, current, total, contact } =>
                write!(f, "[{} {}/{}] {}...", phase, current, total, contact),
            SyncEvent::Finished { success } => match success {
                true => write!(f, "Sync successfully finished"),
                false => write!(f, "Sync finished with errors"),
            },
        }
    }
}

impl Default for SyncEvent {
    fn default() -> Self {
        Self::NotStarted
    }
}


/// See [`feedback_channel`]
pub type FeedbackSender = tokio::sync::watch::Sender<SyncEvent>;
/// See [`feedback_channel`]
pub type FeedbackReceiver = tokio::sync::watch::Receiver<SyncEvent>;

/// Create a feedback channel, that can be used to retrieve the current progress of a sync operation
pub fn feedback_channel() -> (FeedbackSender, FeedbackReceiver) {
    tokio::sync::watch::channel(SyncEvent::default())
}


/// A structure that tracks the progression and the errors that happen during a sync
pub struct SyncProgress {
    n_errors: u32,
    feedback_channel: Option<FeedbackSender>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self { n_errors: 0, feedback_channel: None }
    }
    pub fn new_with_feedback_channel(channel: FeedbackSender) -> Self {
        Self { n_errors: 0, feedback_channel: Some(channel) }
    }

    pub fn is_success(&self) -> bool {
        self.n_errors == 0
    }

    /// Log an error and count it
    pub fn error(&mut self, text: &str) {
        log::error!("{}", text);
        self.n_errors += 1;
    }
    /// Log a warning. Warnings are recoverable, they do not make the sync fail
    pub fn warn(&mut self, text: &str) {
        log::warn!("{}", text);
    }
    /// Log an info
    pub fn info(&mut self, text: &str) {
        log::info!("{}", text);
    }
    /// Log a debug message
    pub fn debug(&mut self, text: &str) {
        log::debug!("{}", text);
    }
    /// Send an event as a feedback to the listener (if any)
    pub fn feedback(&mut self, event: SyncEvent) {
        self.feedback_channel
            .as_ref()
            .map(|sender| sender.send(event));
    }
}
