//! Feedback queue between the BLE thread and the UI frame loop.
//!
//! Producers hold a cloneable [`FeedbackSender`]. The UI owns the single
//! [`FeedbackQueue`] and drains it completely once per frame.

use crate::domain::models::{AppEvent, FeedbackMessage, MessageSeverity};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Create a connected sender/queue pair for one session.
pub fn feedback_queue() -> (FeedbackSender, FeedbackQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FeedbackSender { tx }, FeedbackQueue { rx })
}

#[derive(Debug, Clone)]
pub struct FeedbackSender {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl FeedbackSender {
    pub fn send(&self, event: AppEvent) {
        // The queue only closes once the UI has shut down.
        let _ = self.tx.send(event);
    }

    pub fn message(&self, text: impl Into<String>, severity: MessageSeverity) {
        let message = FeedbackMessage::new(text, severity);
        match severity {
            MessageSeverity::Warning | MessageSeverity::Error => warn!("{}", message.text()),
            _ => debug!("{}", message.text()),
        }
        self.send(AppEvent::Feedback(message));
    }

    pub fn info(&self, text: impl Into<String>) {
        self.message(text, MessageSeverity::Info);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.message(text, MessageSeverity::Success);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.message(text, MessageSeverity::Warning);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.message(text, MessageSeverity::Error);
    }
}

/// Where drained events end up. Implemented by the UI view state.
pub trait DisplaySink {
    fn append_line(&mut self, message: FeedbackMessage);
    fn scroll_to_bottom(&mut self);
    fn apply_event(&mut self, _event: AppEvent) {}
}

pub struct FeedbackQueue {
    rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl FeedbackQueue {
    /// Hand every queued event to `sink` in arrival order.
    ///
    /// Returns the number of events drained. The queue is empty afterwards.
    pub fn drain_into<S: DisplaySink>(&mut self, sink: &mut S) -> usize {
        let mut drained = 0;
        while let Ok(event) = self.rx.try_recv() {
            drained += 1;
            match event {
                AppEvent::Feedback(message) => {
                    sink.append_line(message);
                    sink.scroll_to_bottom();
                }
                other => sink.apply_event(other),
            }
        }
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// The visible text log of a session. Append-only.
#[derive(Debug, Clone)]
pub struct FeedbackLog {
    lines: Vec<FeedbackMessage>,
    scroll_pending: bool,
}

impl Default for FeedbackLog {
    fn default() -> Self {
        Self {
            lines: vec![FeedbackMessage::info("Start of run.")],
            scroll_pending: false,
        }
    }
}

impl FeedbackLog {
    pub fn lines(&self) -> &[FeedbackMessage] {
        &self.lines
    }

    /// Returns true once after new lines arrived.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_pending)
    }
}

impl DisplaySink for FeedbackLog {
    fn append_line(&mut self, message: FeedbackMessage) {
        self.lines.push(message);
    }

    fn scroll_to_bottom(&mut self) {
        self.scroll_pending = true;
    }
}
