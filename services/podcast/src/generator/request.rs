//! services/podcast/src/generator/request.rs
//!
//! Caller-facing generation parameters and the JSON body of the
//! StartSession frame built from them.

use crate::error::GenerationError;
use serde::{Deserialize, Serialize};

/// Longest dialogue turn accepted in text-analysis mode, in characters.
pub const MAX_TURN_CHARS: usize = 300;

/// Output sample rate requested from the server.
pub const SAMPLE_RATE: u32 = 24_000;

/// How the server should turn the input into a dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Summarise free text or a URL into a two-speaker dialogue.
    #[default]
    TextAnalysis,
    /// Voice a dialogue script supplied by the caller.
    DialogueScript,
    /// Expand a short prompt into a dialogue.
    PromptExpansion,
}

impl Action {
    pub fn code(self) -> u8 {
        match self {
            Action::TextAnalysis => 0,
            Action::DialogueScript => 3,
            Action::PromptExpansion => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Action::TextAnalysis),
            3 => Some(Action::DialogueScript),
            4 => Some(Action::PromptExpansion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub speaker: String,
    pub text: String,
}

/// Input of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PodcastParams {
    /// Defaults to `podcast_<unix millis>` when absent.
    pub input_id: Option<String>,
    pub input_text: String,
    pub prompt_text: String,
    pub action: Action,
    pub random_order: bool,
    pub dialogue: Vec<DialogueTurn>,
    pub use_head_music: bool,
    pub use_tail_music: bool,
    pub input_url: String,
    pub return_audio_url: bool,
    /// Record the script text of every round alongside the audio.
    pub only_nlp_text: bool,
    pub format: String,
    pub speech_rate: i32,
}

impl Default for PodcastParams {
    fn default() -> Self {
        Self {
            input_id: None,
            input_text: String::new(),
            prompt_text: String::new(),
            action: Action::default(),
            random_order: false,
            dialogue: Vec::new(),
            use_head_music: true,
            use_tail_music: false,
            input_url: String::new(),
            return_audio_url: false,
            only_nlp_text: false,
            format: "mp3".to_string(),
            speech_rate: 0,
        }
    }
}

impl PodcastParams {
    /// Turns that carry text; blank ones are never sent.
    pub fn dialogue_turns(&self) -> Vec<DialogueTurn> {
        self.dialogue
            .iter()
            .filter(|turn| !turn.text.trim().is_empty())
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        let turns = self.dialogue_turns();
        if self.input_text.trim().is_empty()
            && self.input_url.trim().is_empty()
            && self.prompt_text.trim().is_empty()
            && turns.is_empty()
        {
            return Err(GenerationError::InvalidRequest(
                "one of input text, input URL, prompt or dialogue turns is required".to_string(),
            ));
        }

        if self.action == Action::TextAnalysis {
            if let Some(turn) = turns
                .iter()
                .find(|turn| turn.text.chars().count() > MAX_TURN_CHARS)
            {
                return Err(GenerationError::InvalidRequest(format!(
                    "dialogue turn of {} exceeds {} characters",
                    turn.speaker, MAX_TURN_CHARS
                )));
            }
        }

        if self.format.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "audio format must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the StartSession body. `retry` is set on resumed attempts only.
    pub fn to_request(&self, input_id: &str, retry: Option<RetryInfo>) -> PodcastRequest {
        PodcastRequest {
            input_id: input_id.to_string(),
            input_text: self.input_text.clone(),
            prompt_text: self.prompt_text.clone(),
            action: self.action.code(),
            speaker_info: SpeakerInfo {
                random_order: self.random_order,
            },
            nlp_texts: self.dialogue_turns(),
            use_head_music: self.use_head_music,
            use_tail_music: self.use_tail_music,
            input_info: InputInfo {
                input_url: self.input_url.clone(),
                return_audio_url: self.return_audio_url,
                only_nlp_text: self.only_nlp_text,
            },
            audio_config: AudioConfig {
                format: self.format.clone(),
                sample_rate: SAMPLE_RATE,
                speech_rate: self.speech_rate,
            },
            retry_info: retry,
        }
    }
}

//=========================================================================================
// Wire JSON
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastRequest {
    pub input_id: String,
    pub input_text: String,
    pub prompt_text: String,
    pub action: u8,
    pub speaker_info: SpeakerInfo,
    pub nlp_texts: Vec<DialogueTurn>,
    pub use_head_music: bool,
    pub use_tail_music: bool,
    pub input_info: InputInfo,
    pub audio_config: AudioConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerInfo {
    pub random_order: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputInfo {
    pub input_url: String,
    pub return_audio_url: bool,
    pub only_nlp_text: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub format: String,
    pub sample_rate: u32,
    pub speech_rate: i32,
}

/// Tells the server where to resume an interrupted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub retry_task_id: String,
    pub last_finished_round_id: i64,
}
