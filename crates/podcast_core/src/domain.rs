//! crates/podcast_core/src/domain.rs
//!
//! Defines the pure data structures of a podcast generation.
//! These structs are independent of the transport and the wire format.

use crate::aggregator::concat_chunks;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Sentinel for "no round completed yet".
pub const NO_ROUND: i64 = -1;

/// Round id the server uses for the closing music.
pub const TAIL_MUSIC_ROUND_ID: i64 = 9999;

pub const HEAD_MUSIC_SPEAKER: &str = "head_music";
pub const TAIL_MUSIC_SPEAKER: &str = "tail_music";

/// One closed voice turn, or a block of head/tail music.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub round_id: i64,
    pub speaker: String,
    /// Only populated when the caller asked for the script text.
    pub text: Option<String>,
    pub audio: Bytes,
}

impl Round {
    pub fn is_tail_music(&self) -> bool {
        self.round_id == TAIL_MUSIC_ROUND_ID
    }
}

/// A `{speaker, text}` pair of the generated script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: String,
    pub text: String,
}

/// The round currently streaming audio.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenRound {
    round_id: i64,
    speaker: String,
    text: Option<String>,
}

/// Resolves the display speaker for a round: missing speakers are head music,
/// and the tail-music round is always labelled as such.
pub fn resolve_speaker(round_id: i64, speaker: Option<&str>) -> String {
    if round_id == TAIL_MUSIC_ROUND_ID {
        return TAIL_MUSIC_SPEAKER.to_string();
    }
    match speaker {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => HEAD_MUSIC_SPEAKER.to_string(),
    }
}

//=========================================================================================
// GenerationSession
//=========================================================================================

/// Resume state of one generation request, kept across reconnect attempts.
#[derive(Debug)]
pub struct GenerationSession {
    task_id: Option<String>,
    last_completed_round_id: i64,
    retries_remaining: u32,
    rounds: Vec<Round>,
    pending_audio_chunks: Vec<Bytes>,
    open_round: Option<OpenRound>,
    transcript: Vec<TranscriptEntry>,
    committed_transcript: usize,
}

impl GenerationSession {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            task_id: None,
            last_completed_round_id: NO_ROUND,
            retries_remaining: retry_budget,
            rounds: Vec::new(),
            pending_audio_chunks: Vec::new(),
            open_round: None,
            transcript: Vec::new(),
            committed_transcript: 0,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Adopts `session_id` as the task id unless one was already assigned.
    pub fn adopt_task_id(&mut self, session_id: &str) {
        if self.task_id.is_none() {
            self.task_id = Some(session_id.to_string());
        }
    }

    pub fn last_completed_round_id(&self) -> i64 {
        self.last_completed_round_id
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Spends one attempt from the budget and returns what is left.
    pub fn consume_retry(&mut self) -> u32 {
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        self.retries_remaining
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn pending_chunk_count(&self) -> usize {
        self.pending_audio_chunks.len()
    }

    pub fn has_open_round(&self) -> bool {
        self.open_round.is_some()
    }

    pub fn open_round_id(&self) -> Option<i64> {
        self.open_round.as_ref().map(|round| round.round_id)
    }

    /// Drops everything belonging to a round that never closed, so a new
    /// connection attempt starts from the last completed round only.
    pub fn begin_attempt(&mut self) {
        self.pending_audio_chunks.clear();
        self.open_round = None;
        self.transcript.truncate(self.committed_transcript);
    }

    /// Marks a round as streaming. Returns the number of chunks discarded from a
    /// previous round that was never closed successfully.
    pub fn open_round(
        &mut self,
        round_id: i64,
        speaker: Option<&str>,
        text: Option<&str>,
        record_text: bool,
    ) -> usize {
        let discarded = self.pending_audio_chunks.len();
        self.pending_audio_chunks.clear();

        let speaker = resolve_speaker(round_id, speaker);
        let text = if record_text {
            let text = text.unwrap_or_default().to_string();
            self.transcript.push(TranscriptEntry {
                speaker: speaker.clone(),
                text: text.clone(),
            });
            Some(text)
        } else {
            None
        };

        self.open_round = Some(OpenRound {
            round_id,
            speaker,
            text,
        });
        discarded
    }

    pub fn push_audio(&mut self, chunk: Bytes) {
        self.pending_audio_chunks.push(chunk);
    }

    /// Closes the open round: joins its chunks, records it and advances the
    /// last completed round id. `None` when no round is open.
    pub fn close_round(&mut self) -> Option<&Round> {
        let open = self.open_round.take()?;
        let audio = concat_chunks(self.pending_audio_chunks.drain(..));

        self.last_completed_round_id = open.round_id;
        self.committed_transcript = self.transcript.len();
        self.rounds.push(Round {
            round_id: open.round_id,
            speaker: open.speaker,
            text: open.text,
            audio,
        });
        self.rounds.last()
    }

    /// Consumes the session into the caller-facing result.
    pub fn finish(self, format: impl Into<String>) -> PodcastOutput {
        let audio = concat_chunks(self.rounds.iter().map(|round| &round.audio));
        PodcastOutput {
            task_id: self.task_id,
            format: format.into(),
            audio,
            last_completed_round_id: self.last_completed_round_id,
            rounds: self.rounds,
            transcript: self.transcript,
        }
    }
}

/// The artifacts of a finished generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodcastOutput {
    pub task_id: Option<String>,
    /// Audio container format, e.g. `mp3`.
    pub format: String,
    /// Every round's audio, in completion order.
    pub audio: Bytes,
    pub last_completed_round_id: i64,
    pub rounds: Vec<Round>,
    /// Only populated when the script text was requested.
    pub transcript: Vec<TranscriptEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_a_round_advances_resume_point() {
        let mut session = GenerationSession::new(3);
        assert_eq!(session.last_completed_round_id(), NO_ROUND);

        session.open_round(0, Some("A"), None, false);
        session.push_audio(Bytes::from_static(&[1, 2]));
        session.push_audio(Bytes::from_static(&[3]));
        let round = session.close_round().unwrap();

        assert_eq!(round.round_id, 0);
        assert_eq!(round.speaker, "A");
        assert_eq!(round.audio.as_ref(), &[1, 2, 3]);
        assert_eq!(session.last_completed_round_id(), 0);
        assert_eq!(session.pending_chunk_count(), 0);
        assert!(!session.has_open_round());
    }

    #[test]
    fn close_without_open_round_is_a_no_op() {
        let mut session = GenerationSession::new(3);
        session.push_audio(Bytes::from_static(&[9]));
        assert!(session.close_round().is_none());
        assert_eq!(session.last_completed_round_id(), NO_ROUND);
        assert_eq!(session.pending_chunk_count(), 1);
    }

    #[test]
    fn speakers_fall_back_to_music_markers() {
        assert_eq!(resolve_speaker(0, None), HEAD_MUSIC_SPEAKER);
        assert_eq!(resolve_speaker(1, Some("")), HEAD_MUSIC_SPEAKER);
        assert_eq!(resolve_speaker(TAIL_MUSIC_ROUND_ID, Some("B")), TAIL_MUSIC_SPEAKER);
        assert_eq!(resolve_speaker(2, Some("B")), "B");
    }

    #[test]
    fn new_attempt_discards_unfinished_round() {
        let mut session = GenerationSession::new(3);
        session.open_round(0, Some("A"), Some("hi"), true);
        session.push_audio(Bytes::from_static(&[1]));
        session.close_round();

        session.open_round(1, Some("B"), Some("half"), true);
        session.push_audio(Bytes::from_static(&[2]));
        assert_eq!(session.transcript().len(), 2);

        session.begin_attempt();
        assert!(!session.has_open_round());
        assert_eq!(session.pending_chunk_count(), 0);
        assert_eq!(
            session.transcript(),
            &[TranscriptEntry {
                speaker: "A".into(),
                text: "hi".into()
            }]
        );
        assert_eq!(session.last_completed_round_id(), 0);
    }

    #[test]
    fn reopening_drops_chunks_of_failed_round() {
        let mut session = GenerationSession::new(3);
        session.open_round(4, Some("A"), None, false);
        session.push_audio(Bytes::from_static(&[7, 7]));
        assert_eq!(session.open_round(5, Some("B"), None, false), 1);
        session.push_audio(Bytes::from_static(&[8]));
        assert_eq!(session.close_round().unwrap().audio.as_ref(), &[8]);
    }

    #[test]
    fn finish_concatenates_rounds_in_completion_order() {
        let mut session = GenerationSession::new(3);
        session.adopt_task_id("task-1");
        session.adopt_task_id("task-2");
        for (id, bytes) in [(0, &[1u8][..]), (1, &[2, 3][..]), (TAIL_MUSIC_ROUND_ID, &[4][..])] {
            session.open_round(id, Some("A"), None, false);
            session.push_audio(Bytes::copy_from_slice(bytes));
            session.close_round();
        }

        let output = session.finish("wav");
        assert_eq!(output.task_id.as_deref(), Some("task-1"));
        assert_eq!(output.format, "wav");
        assert_eq!(output.audio.as_ref(), &[1, 2, 3, 4]);
        assert_eq!(output.rounds.len(), 3);
        assert!(output.rounds[2].is_tail_music());
        assert_eq!(output.last_completed_round_id, TAIL_MUSIC_ROUND_ID);
    }

    #[test]
    fn retry_budget_saturates_at_zero() {
        let mut session = GenerationSession::new(1);
        assert_eq!(session.consume_retry(), 0);
        assert_eq!(session.consume_retry(), 0);
        assert_eq!(session.retries_remaining(), 0);
    }
}
