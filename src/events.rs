use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::error::{AppError, FailureCode};
use crate::models::{DownloadRecord, Progress};

/// Severity of a user-visible message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// Backend -> front end events. A front end drains the receiver returned by
/// [`channel`] and switches on `event`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum AppEvent {
    /// A line for the status log.
    Log { level: Level, message: String },

    DownloadStarted {
        id: Uuid,
        url: String,
    },
    DownloadProgress {
        id: Uuid,
        progress: Progress,
    },
    DownloadPostProcessing {
        id: Uuid,
        step: String,
    },
    DownloadCompleted {
        id: Uuid,
        record: Option<DownloadRecord>,
    },
    DownloadFailed {
        id: Uuid,
        code: Option<FailureCode>,
        message: String,
    },

    QueueDrained {
        succeeded: usize,
        failed: usize,
    },

    ScheduleFired {
        entry_id: Uuid,
        url: String,
    },
}

pub type EventReceiver = UnboundedReceiver<AppEvent>;

/// Create a notifier and the receiver a front end listens on.
pub fn channel() -> (Notifier, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx: Some(tx) }, rx)
}

/// Sends events to the front end and mirrors user-visible messages to the log.
///
/// Sending never blocks and never fails: once the receiver is gone, events are
/// dropped and only the log keeps them.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<UnboundedSender<AppEvent>>,
}

impl Notifier {
    /// A notifier with no listener; messages only reach the log.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AppEvent) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.message(Level::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.message(Level::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.message(Level::Error, message.into());
    }

    fn message(&self, level: Level, message: String) {
        match level {
            Level::Info => log::info!("{}", message),
            Level::Warning => log::warn!("{}", message),
            Level::Error => log::error!("{}", message),
        }
        self.emit(AppEvent::Log { level, message });
    }

    /// Log a failed download and emit the matching failure event.
    pub fn download_failed(&self, id: Uuid, err: &AppError) {
        let code = match err {
            AppError::Extraction { code, .. } => Some(*code),
            _ => None,
        };
        self.error(format!("Error: {}", err));
        self.emit(AppEvent::DownloadFailed {
            id,
            code,
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_reach_the_channel() {
        let (notifier, mut rx) = channel();
        notifier.warn("Please enter a URL");

        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::Log {
                level: Level::Warning,
                message: "Please enter a URL".to_string()
            }
        );
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (notifier, rx) = channel();
        drop(rx);
        notifier.info("nobody listening");
        Notifier::detached().error("nor here");
    }

    #[test]
    fn failure_event_carries_the_code() {
        let (notifier, mut rx) = channel();
        let id = Uuid::new_v4();
        notifier.download_failed(
            id,
            &AppError::Extraction {
                code: FailureCode::GeoRestricted,
                message: "not available in your country".to_string(),
            },
        );

        // Log line first, then the structured event.
        assert!(matches!(rx.try_recv().unwrap(), AppEvent::Log { level: Level::Error, .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::DownloadFailed {
                id,
                code: Some(FailureCode::GeoRestricted),
                message: "not available in your country".to_string()
            }
        );
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(AppEvent::QueueDrained {
            succeeded: 2,
            failed: 1,
        })
        .unwrap();
        assert_eq!(json["event"], "QueueDrained");
        assert_eq!(json["data"]["succeeded"], 2);
    }
}
