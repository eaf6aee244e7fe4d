//! Result reporting.
//!
//! A session pushes card images, errors and progress events to a
//! [`ResultReporter`]. Reporters run on their own dispatcher thread, so a
//! slow consumer never holds the reader.

use std::sync::mpsc;

use crate::card::CardImage;
use crate::protocol::CardKind;
use crate::state::ScanPhase;

/// Progress events emitted by a scan session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Reader opened and initialised.
    DeviceReady {
        device_id: String,
        device_name: String,
    },
    /// Phase changed.
    PhaseChanged { from: ScanPhase, to: ScanPhase },
    /// A card answered the poll.
    TargetSelected { uid: String, kind: CardKind },
    /// The card was left alone because it was reported last cycle.
    RepeatSuppressed { uid: String },
    /// A requested write ran.
    WriteFinished {
        uid: String,
        pages_written: usize,
        error: Option<String>,
    },
    /// A requested write was not attempted on this kind of card.
    WriteSkipped { uid: String, kind: CardKind },
}

/// Consumer of session results.
///
/// `on_read` and `on_error` must return within the session's liveness
/// timeout, otherwise the session shuts the reader down.
pub trait ResultReporter: Send + Sync {
    /// A card was read. The image is handed over by value.
    fn on_read(&self, image: CardImage);

    /// The session has stopped. Called exactly once.
    fn on_stopped(&self);

    /// The session hit an error it cannot recover from.
    fn on_error(&self, message: &str);

    /// Progress notification.
    fn on_event(&self, _event: &ScanEvent) {}
}

/// Reporter that discards everything.
pub struct NullReporter;

impl ResultReporter for NullReporter {
    fn on_read(&self, _image: CardImage) {}

    fn on_stopped(&self) {}

    fn on_error(&self, _message: &str) {}
}

/// Reporter that logs using tracing.
pub struct TracingReporter;

impl ResultReporter for TracingReporter {
    fn on_read(&self, image: CardImage) {
        match &image.error {
            None => tracing::info!(
                device = %image.device_id,
                uid = %image.uid,
                kind = %image.kind,
                bytes = image.data.len(),
                "Card read"
            ),
            Some(error) => tracing::warn!(
                device = %image.device_id,
                uid = %image.uid,
                kind = %image.kind,
                bytes = image.data.len(),
                error = %error,
                "Card read incomplete"
            ),
        }
    }

    fn on_stopped(&self) {
        tracing::info!("Session stopped");
    }

    fn on_error(&self, message: &str) {
        tracing::error!("Session error: {}", message);
    }

    fn on_event(&self, event: &ScanEvent) {
        match event {
            ScanEvent::DeviceReady {
                device_id,
                device_name,
            } => {
                tracing::info!(device = %device_id, name = %device_name, "Reader ready");
            }
            ScanEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            ScanEvent::TargetSelected { uid, kind } => {
                tracing::debug!(uid = %uid, kind = %kind, "Target selected");
            }
            ScanEvent::RepeatSuppressed { uid } => {
                tracing::trace!(uid = %uid, "Repeat suppressed");
            }
            ScanEvent::WriteFinished {
                uid,
                pages_written,
                error,
            } => match error {
                None => tracing::info!(uid = %uid, pages = pages_written, "Write finished"),
                Some(e) => {
                    tracing::warn!(%uid, pages = pages_written, error = %e, "Write incomplete")
                }
            },
            ScanEvent::WriteSkipped { uid, kind } => {
                tracing::warn!(uid = %uid, kind = %kind, "Write not supported, skipped");
            }
        }
    }
}

/// Everything a [`ChannelReporter`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reported {
    Read(CardImage),
    Error(String),
    Stopped,
    Event(ScanEvent),
}

/// Reporter that forwards every callback into a channel.
pub struct ChannelReporter {
    tx: mpsc::Sender<Reported>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::Receiver<Reported>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ResultReporter for ChannelReporter {
    fn on_read(&self, image: CardImage) {
        let _ = self.tx.send(Reported::Read(image));
    }

    fn on_stopped(&self) {
        let _ = self.tx.send(Reported::Stopped);
    }

    fn on_error(&self, message: &str) {
        let _ = self.tx.send(Reported::Error(message.to_string()));
    }

    fn on_event(&self, event: &ScanEvent) {
        let _ = self.tx.send(Reported::Event(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_reporter_forwards_in_order() {
        let (reporter, rx) = ChannelReporter::new();
        reporter.on_event(&ScanEvent::PhaseChanged {
            from: ScanPhase::Idle,
            to: ScanPhase::Selecting,
        });
        reporter.on_error("gone");
        reporter.on_stopped();

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[1], Reported::Error("gone".to_string()));
        assert_eq!(got[2], Reported::Stopped);
    }
}
