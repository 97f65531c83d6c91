//! services/podcast/src/bin/podcast.rs

use chrono::Utc;
use clap::Parser;
use podcast_core::PodcastOutput;
use podcast_lib::{
    adapters::WsConnector,
    config::Config,
    error::AppError,
    generator::{Action, DialogueTurn, GeneratorSettings, PodcastGenerator, PodcastParams},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "podcast", about = "Generate a multi-speaker podcast episode")]
struct Args {
    #[arg(long, help = "text to turn into a dialogue", conflicts_with = "text_file")]
    text: Option<String>,

    #[arg(long, help = "read the input text from a plain-text file")]
    text_file: Option<PathBuf>,

    #[arg(long, help = "web page to summarise")]
    url: Option<String>,

    #[arg(long, help = "prompt for prompt-expansion mode")]
    prompt: Option<String>,

    #[arg(
        long,
        default_value_t = 0,
        help = "0 = text analysis, 3 = dialogue script, 4 = prompt expansion"
    )]
    action: u8,

    #[arg(long = "dialogue", value_name = "SPEAKER=TEXT", help = "one dialogue turn (repeatable)")]
    dialogue: Vec<String>,

    #[arg(long, help = "let the server shuffle the speakers")]
    random_order: bool,

    #[arg(long, help = "skip the opening music")]
    no_head_music: bool,

    #[arg(long, help = "append closing music")]
    tail_music: bool,

    #[arg(long, help = "also record the script text of every round")]
    only_nlp_text: bool,

    #[arg(long, default_value = "mp3", help = "audio format")]
    format: String,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true, help = "speech rate, -50 to 100")]
    speech_rate: i32,

    #[arg(long, help = "write every round to its own file as well")]
    save_rounds: bool,

    #[arg(long, help = "request id (default: podcast_<millis>)")]
    input_id: Option<String>,
}

fn parse_turn(raw: &str) -> Result<DialogueTurn, AppError> {
    let (speaker, text) = raw
        .split_once('=')
        .ok_or_else(|| AppError::Internal(format!("dialogue turn '{}' is not SPEAKER=TEXT", raw)))?;
    Ok(DialogueTurn {
        speaker: speaker.trim().to_string(),
        text: text.trim().to_string(),
    })
}

async fn build_params(args: &Args) -> Result<PodcastParams, AppError> {
    let input_text = match (&args.text, &args.text_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path).await?,
        (None, None) => String::new(),
    };
    let action = Action::from_code(args.action)
        .ok_or_else(|| AppError::Internal(format!("unknown action {}", args.action)))?;
    let dialogue = args
        .dialogue
        .iter()
        .map(|raw| parse_turn(raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PodcastParams {
        input_id: args.input_id.clone(),
        input_text,
        prompt_text: args.prompt.clone().unwrap_or_default(),
        action,
        random_order: args.random_order,
        dialogue,
        use_head_music: !args.no_head_music,
        use_tail_music: args.tail_music,
        input_url: args.url.clone().unwrap_or_default(),
        only_nlp_text: args.only_nlp_text,
        format: args.format.clone(),
        speech_rate: args.speech_rate,
        ..Default::default()
    })
}

/// Writes the final audio (when there is any), the optional per-round files
/// and the transcript.
async fn write_artifacts(
    output_dir: &Path,
    output: &PodcastOutput,
    save_rounds: bool,
) -> Result<Vec<PathBuf>, AppError> {
    tokio::fs::create_dir_all(output_dir).await?;
    let stamp = Utc::now().timestamp_millis();
    let mut written = Vec::new();

    if !output.audio.is_empty() {
        let path = output_dir.join(format!("podcast_final_{}.{}", stamp, output.format));
        tokio::fs::write(&path, &output.audio).await?;
        written.push(path);
    }

    if save_rounds {
        for round in &output.rounds {
            let path = output_dir.join(format!(
                "{}_{}.{}",
                round.speaker, round.round_id, output.format
            ));
            tokio::fs::write(&path, &round.audio).await?;
            written.push(path);
        }
    }

    if !output.transcript.is_empty() {
        let path = output_dir.join(format!("podcast_final_{}.json", stamp));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&output.transcript)?).await?;
        written.push(path);
    }
    Ok(written)
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded.");

    let params = build_params(&args).await?;

    // --- 2. Wire the generator ---
    let connector = Arc::new(WsConnector::from_config(&config));
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
    let generator = PodcastGenerator::new(connector, GeneratorSettings::from(&config))
        .with_progress(progress_tx);

    let reporter = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            info!("[{:>3}%] {}: {}", update.progress, update.status, update.message);
        }
    });

    // --- 3. Generate & Save ---
    let result = generator.generate(&params).await;
    drop(generator);
    let _ = reporter.await;

    let output = result.map_err(|e| {
        error!("Podcast generation failed: {}", e);
        e
    })?;
    for path in write_artifacts(&config.output_dir, &output, args.save_rounds).await? {
        info!("Wrote {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use podcast_core::{Round, TranscriptEntry};

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("podcast-artifacts-{}", uuid::Uuid::new_v4()))
    }

    fn output(audio: &'static [u8], transcript: Vec<TranscriptEntry>) -> PodcastOutput {
        PodcastOutput {
            task_id: Some("task".to_string()),
            format: "mp3".to_string(),
            audio: Bytes::from_static(audio),
            last_completed_round_id: 0,
            rounds: vec![Round {
                round_id: 0,
                speaker: "A".to_string(),
                text: None,
                audio: Bytes::from_static(audio),
            }],
            transcript,
        }
    }

    #[tokio::test]
    async fn empty_audio_writes_only_the_transcript() {
        let dir = scratch_dir();
        let transcript = vec![TranscriptEntry {
            speaker: "A".to_string(),
            text: "hi".to_string(),
        }];

        let written = write_artifacts(&dir, &output(b"", transcript), false).await.unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(written[0].extension().and_then(|e| e.to_str()), Some("json"));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn audio_and_rounds_are_written() {
        let dir = scratch_dir();

        let written = write_artifacts(&dir, &output(&[1, 2, 3], Vec::new()), true)
            .await
            .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(tokio::fs::read(&written[0]).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(written[1].file_name().and_then(|n| n.to_str()), Some("A_0.mp3"));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
