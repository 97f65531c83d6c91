//! services/podcast/src/generator/orchestrator.rs
//!
//! Runs one podcast generation end to end: connection handshake, session
//! request, round streaming, teardown, and reconnect-and-resume until the
//! server has cleanly ended every round it started or the retry budget runs
//! out.

use super::dispatch::{DispatchQueue, DEFAULT_RECEIVE_TIMEOUT};
use super::progress::{
    audio_progress, round_end_progress, round_start_progress, ProgressReporter, ProgressStatus,
    ProgressUpdate,
};
use super::request::{PodcastParams, RetryInfo};
use crate::config::Config;
use crate::error::GenerationError;
use chrono::Utc;
use podcast_core::{
    codec,
    domain::NO_ROUND,
    frame::{Event, Message, MsgType},
    ports::{Connection, Connector, FrameSink},
    GenerationSession, PodcastOutput,
};
use serde::{de::DeserializeOwned, Deserialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Retry and timing policy of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorSettings {
    /// Total connection attempts, the first one included.
    pub retry_budget: u32,
    pub retry_backoff: Duration,
    pub receive_timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            retry_backoff: Duration::from_secs(1),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }
}

impl From<&Config> for GeneratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            retry_budget: config.retry_budget,
            retry_backoff: config.retry_backoff,
            receive_timeout: config.receive_timeout,
        }
    }
}

/// Where a single connection attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Connecting,
    ConnectionStarting,
    ConnectionEstablished,
    SessionStarting,
    SessionEstablished,
    Streaming,
    SessionFinishing,
    ConnectionFinishing,
    AttemptComplete,
}

/// How an attempt that reached `SessionFinished` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    RoundsExhaustedCleanly,
    /// A round was started but never cleanly ended.
    IncompleteRequiringRetry,
}

//=========================================================================================
// Server payloads
//=========================================================================================

#[derive(Debug, Default, Deserialize)]
struct RoundStartPayload {
    #[serde(default)]
    round_id: Option<i64>,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RoundEndPayload {
    #[serde(default)]
    is_error: Option<bool>,
}

impl RoundEndPayload {
    /// `null` and a missing flag both mean success.
    fn failed(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

/// Parses a JSON payload; an empty payload yields the default value.
fn parse_payload<T: DeserializeOwned + Default>(payload: &[u8]) -> Result<T, GenerationError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(payload)?)
}

//=========================================================================================
// Per-attempt connection
//=========================================================================================

/// Everything owned by one live connection. Dropping it stops the pump and
/// fails any pending receive, whichever way the attempt ended.
struct AttemptChannel {
    sink: Box<dyn FrameSink>,
    queue: DispatchQueue,
    pump: JoinHandle<()>,
}

impl AttemptChannel {
    fn open(connection: Connection, receive_timeout: Duration) -> Self {
        let Connection { sink, frames } = connection;
        let (queue, pump) = DispatchQueue::spawn(frames, receive_timeout);
        Self { sink, queue, pump }
    }

    async fn send(&mut self, msg: Message) -> Result<(), GenerationError> {
        debug!("Sending: {}", msg);
        let frame = codec::encode(&msg)?;
        self.sink.send(frame).await?;
        Ok(())
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("Closing the connection failed: {}", e);
        }
    }
}

impl Drop for AttemptChannel {
    fn drop(&mut self) {
        self.pump.abort();
        self.queue.close();
    }
}

fn advance(state: &mut AttemptState, next: AttemptState) {
    debug!("Attempt state: {:?} -> {:?}", state, next);
    *state = next;
}

//=========================================================================================
// PodcastGenerator
//=========================================================================================

pub struct PodcastGenerator {
    connector: Arc<dyn Connector>,
    settings: GeneratorSettings,
    progress: ProgressReporter,
}

impl PodcastGenerator {
    pub fn new(connector: Arc<dyn Connector>, settings: GeneratorSettings) -> Self {
        Self {
            connector,
            settings,
            progress: ProgressReporter::default(),
        }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<ProgressUpdate>) -> Self {
        self.progress = ProgressReporter::new(tx);
        self
    }

    /// Generates one podcast, reconnecting and resuming after failures.
    pub async fn generate(&self, params: &PodcastParams) -> Result<PodcastOutput, GenerationError> {
        params.validate()?;

        let input_id = params
            .input_id
            .clone()
            .unwrap_or_else(|| format!("podcast_{}", Utc::now().timestamp_millis()));
        let mut session = GenerationSession::new(self.settings.retry_budget);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            session.begin_attempt();
            info!(
                "Starting attempt {} for {} (last completed round {})",
                attempt,
                input_id,
                session.last_completed_round_id()
            );

            let failure = match self.run_attempt(&mut session, params, &input_id).await {
                Ok(AttemptOutcome::RoundsExhaustedCleanly) => {
                    return Ok(self.finalize(session, params));
                }
                Ok(AttemptOutcome::IncompleteRequiringRetry) => {
                    let round = session.open_round_id().unwrap_or(NO_ROUND);
                    warn!(
                        "Attempt {} ended with round {} unterminated; resuming after round {}",
                        attempt,
                        round,
                        session.last_completed_round_id()
                    );
                    GenerationError::Round {
                        round_id: round,
                        detail: "session finished before the round ended".to_string(),
                    }
                }
                Err(e) => {
                    error!("Attempt {} failed: {}", attempt, e);
                    e
                }
            };

            if session.consume_retry() == 0 {
                self.progress
                    .report(ProgressStatus::Error, 0, failure.to_string());
                if failure.is_connection() {
                    return Err(failure);
                }
                return Err(GenerationError::RetriesExhausted {
                    attempts: attempt,
                    last_error: failure.to_string(),
                });
            }

            info!(
                "Retrying in {:?} ({} attempts left)",
                self.settings.retry_backoff,
                session.retries_remaining()
            );
            tokio::time::sleep(self.settings.retry_backoff).await;
        }
    }

    async fn run_attempt(
        &self,
        session: &mut GenerationSession,
        params: &PodcastParams,
        input_id: &str,
    ) -> Result<AttemptOutcome, GenerationError> {
        let mut state = AttemptState::Connecting;
        debug!("Attempt state: {:?}", state);
        self.progress
            .report(ProgressStatus::Connecting, 10, "Connecting to the podcast service");

        let connection = self.connector.connect().await?;
        let mut channel = AttemptChannel::open(connection, self.settings.receive_timeout);

        let result = self
            .drive(&mut channel, &mut state, session, params, input_id)
            .await;
        if result.is_err() {
            debug!("Attempt aborted in state {:?}", state);
        }
        channel.shutdown().await;
        result
    }

    async fn drive(
        &self,
        channel: &mut AttemptChannel,
        state: &mut AttemptState,
        session: &mut GenerationSession,
        params: &PodcastParams,
        input_id: &str,
    ) -> Result<AttemptOutcome, GenerationError> {
        // --- Connection handshake ---
        advance(state, AttemptState::ConnectionStarting);
        channel
            .send(Message::client_event(Event::StartConnection).with_payload(&b"{}"[..]))
            .await?;
        let started = channel
            .queue
            .wait_for_event(MsgType::FullServerResponse, Event::ConnectionStarted)
            .await?;
        info!(
            "Connection started (connect id {})",
            started.connect_id().unwrap_or("-")
        );
        advance(state, AttemptState::ConnectionEstablished);
        self.progress
            .report(ProgressStatus::Connected, 20, "Connected");

        // --- Session request ---
        // Only a task started by an earlier attempt can be resumed.
        let retry = session.task_id().map(|task_id| RetryInfo {
            retry_task_id: task_id.to_string(),
            last_finished_round_id: session.last_completed_round_id(),
        });
        let session_id = Uuid::new_v4().to_string();
        session.adopt_task_id(&session_id);
        let payload = serde_json::to_vec(&params.to_request(input_id, retry))?;

        advance(state, AttemptState::SessionStarting);
        self.progress
            .report(ProgressStatus::Starting, 30, "Starting podcast session");
        channel
            .send(
                Message::client_event(Event::StartSession)
                    .with_event_id(Event::StartSession, session_id.as_str())
                    .with_payload(payload),
            )
            .await?;
        channel
            .queue
            .wait_for_event(MsgType::FullServerResponse, Event::SessionStarted)
            .await?;
        advance(state, AttemptState::SessionEstablished);
        self.progress
            .report(ProgressStatus::SessionStarted, 40, "Session started");

        channel
            .send(
                Message::client_event(Event::FinishSession)
                    .with_event_id(Event::FinishSession, session_id.as_str())
                    .with_payload(&b"{}"[..]),
            )
            .await?;

        // --- Rounds ---
        advance(state, AttemptState::Streaming);
        self.progress
            .report(ProgressStatus::Processing, 50, "Generating podcast");
        loop {
            let msg = channel.queue.receive().await?;
            self.handle_streamed(session, params, &msg)?;
            if msg.event() == Some(Event::SessionFinished) {
                break;
            }
        }
        advance(state, AttemptState::SessionFinishing);

        // --- Teardown handshake ---
        advance(state, AttemptState::ConnectionFinishing);
        channel
            .send(Message::client_event(Event::FinishConnection).with_payload(&b"{}"[..]))
            .await?;
        channel
            .queue
            .wait_for_event(MsgType::FullServerResponse, Event::ConnectionFinished)
            .await?;
        advance(state, AttemptState::AttemptComplete);

        Ok(if session.has_open_round() {
            AttemptOutcome::IncompleteRequiringRetry
        } else {
            AttemptOutcome::RoundsExhaustedCleanly
        })
    }

    /// Applies one frame received while rounds are streaming.
    fn handle_streamed(
        &self,
        session: &mut GenerationSession,
        params: &PodcastParams,
        msg: &Message,
    ) -> Result<(), GenerationError> {
        match (msg.msg_type(), msg.event()) {
            (MsgType::Error, _) => {
                return Err(GenerationError::Server {
                    code: msg.error_code(),
                    message: String::from_utf8_lossy(&msg.payload).into_owned(),
                });
            }
            (_, Some(Event::SessionFailed)) => {
                return Err(GenerationError::Server {
                    code: None,
                    message: String::from_utf8_lossy(&msg.payload).into_owned(),
                });
            }
            (MsgType::AudioOnlyServer, Some(Event::PodcastRoundResponse)) => {
                session.push_audio(msg.payload.clone());
                let chunks = session.pending_chunk_count();
                debug!("Audio chunk of {} bytes ({} pending)", msg.payload.len(), chunks);
                self.progress.report(
                    ProgressStatus::ReceivingAudio,
                    audio_progress(chunks),
                    format!("Received {} audio chunks", chunks),
                );
            }
            (MsgType::FullServerResponse, Some(Event::PodcastRoundStart)) => {
                let start: RoundStartPayload = parse_payload(&msg.payload)?;
                let round_id = start
                    .round_id
                    .unwrap_or_else(|| session.last_completed_round_id() + 1);
                let discarded = session.open_round(
                    round_id,
                    start.speaker.as_deref(),
                    start.text.as_deref(),
                    params.only_nlp_text,
                );
                if discarded > 0 {
                    warn!(
                        "Discarded {} audio chunks of a round that never ended",
                        discarded
                    );
                }
                info!("Round {} started", round_id);
                self.progress.report(
                    ProgressStatus::RoundStarted,
                    round_start_progress(round_id),
                    format!("Round {} started", round_id),
                );
            }
            (MsgType::FullServerResponse, Some(Event::PodcastRoundEnd)) => {
                let end: RoundEndPayload = parse_payload(&msg.payload)?;
                if end.failed() {
                    let err = GenerationError::Round {
                        round_id: session.open_round_id().unwrap_or(NO_ROUND),
                        detail: String::from_utf8_lossy(&msg.payload).into_owned(),
                    };
                    warn!("{}", err);
                    return Ok(());
                }
                match session.close_round() {
                    Some(round) => {
                        info!(
                            "Round {} ({}) completed with {} bytes of audio",
                            round.round_id,
                            round.speaker,
                            round.audio.len()
                        );
                        self.progress.report(
                            ProgressStatus::RoundCompleted,
                            round_end_progress(round.round_id),
                            format!("Round {} completed", round.round_id),
                        );
                    }
                    None => warn!("Round end received without a round in progress"),
                }
            }
            (MsgType::FullServerResponse, Some(Event::PodcastEnd)) => {
                info!(
                    "Podcast content complete: {}",
                    String::from_utf8_lossy(&msg.payload)
                );
                self.progress
                    .report(ProgressStatus::Finalizing, 95, "Finalizing podcast");
            }
            (_, Some(Event::SessionFinished)) => {
                debug!("Session finished");
            }
            _ => debug!("Ignoring frame: {}", msg),
        }
        Ok(())
    }

    fn finalize(&self, session: GenerationSession, params: &PodcastParams) -> PodcastOutput {
        let output = session.finish(params.format.as_str());
        info!(
            "Podcast generated: {} rounds, {} bytes of {} audio",
            output.rounds.len(),
            output.audio.len(),
            output.format
        );
        self.progress
            .report(ProgressStatus::Completed, 100, "Podcast generated");
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payloads_parse_as_defaults() {
        let end: RoundEndPayload = parse_payload(b"").unwrap();
        assert!(!end.failed());
        let start: RoundStartPayload = parse_payload(b" \n").unwrap();
        assert!(start.round_id.is_none());
    }

    #[test]
    fn round_payloads_tolerate_extra_fields() {
        let start: RoundStartPayload =
            parse_payload(br#"{"round_id":2,"speaker":"A","text":"hi","extra":1}"#).unwrap();
        assert_eq!(start.round_id, Some(2));
        assert_eq!(start.speaker.as_deref(), Some("A"));

        let end: RoundEndPayload = parse_payload(br#"{"is_error":true,"msg":"tts"}"#).unwrap();
        assert!(end.failed());
    }

    #[test]
    fn null_error_flag_means_success() {
        let end: RoundEndPayload = parse_payload(br#"{"is_error":null}"#).unwrap();
        assert!(!end.failed());
        let end: RoundEndPayload = parse_payload(br#"{"is_error":false}"#).unwrap();
        assert!(!end.failed());
    }

    #[test]
    fn malformed_payload_is_a_payload_error() {
        let err = parse_payload::<RoundEndPayload>(b"{not json").unwrap_err();
        assert!(matches!(err, GenerationError::Payload(_)));
    }

    #[test]
    fn settings_follow_config() {
        let config = Config::from_lookup(|key| match key {
            "PODCAST_APP_ID" => Some("app".to_string()),
            "PODCAST_ACCESS_KEY" => Some("secret".to_string()),
            "PODCAST_RETRY_BUDGET" => Some("5".to_string()),
            _ => None,
        })
        .unwrap();
        let settings = GeneratorSettings::from(&config);
        assert_eq!(settings.retry_budget, 5);
        assert_eq!(settings.receive_timeout, DEFAULT_RECEIVE_TIMEOUT);
        assert_eq!(GeneratorSettings::default().retry_budget, 3);
    }
}
