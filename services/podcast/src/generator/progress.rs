//! services/podcast/src/generator/progress.rs

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Connecting,
    Connected,
    Starting,
    SessionStarted,
    Processing,
    ReceivingAudio,
    RoundStarted,
    RoundCompleted,
    Finalizing,
    Completed,
    Error,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProgressStatus::Connecting => "connecting",
            ProgressStatus::Connected => "connected",
            ProgressStatus::Starting => "starting",
            ProgressStatus::SessionStarted => "session_started",
            ProgressStatus::Processing => "processing",
            ProgressStatus::ReceivingAudio => "receiving_audio",
            ProgressStatus::RoundStarted => "round_started",
            ProgressStatus::RoundCompleted => "round_completed",
            ProgressStatus::Finalizing => "finalizing",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub status: ProgressStatus,
    pub message: String,
    /// 0 to 100.
    pub progress: u8,
}

/// Sends progress updates to an optional listener. A dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgressReporter {
    tx: Option<UnboundedSender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub(crate) fn new(tx: UnboundedSender<ProgressUpdate>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn report(&self, status: ProgressStatus, progress: u8, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressUpdate {
                status,
                message: message.into(),
                progress: progress.min(100),
            });
        }
    }
}

/// Percentage while audio chunks stream in: 50, creeping towards 80.
pub(crate) fn audio_progress(chunks: usize) -> u8 {
    (50 + chunks.saturating_mul(2)).min(80) as u8
}

/// Percentage at the start of `round_id`, capped at 85.
pub(crate) fn round_start_progress(round_id: i64) -> u8 {
    (60 + round_id.clamp(0, 5) * 5).min(85) as u8
}

/// Percentage at the end of `round_id`, capped at 90.
pub(crate) fn round_end_progress(round_id: i64) -> u8 {
    (70 + round_id.clamp(0, 4) * 5).min(90) as u8
}
