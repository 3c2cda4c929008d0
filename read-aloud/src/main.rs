// read-aloud - Read text aloud through a Kokoro TTS server

mod audio;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::ReadAloudConfig;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tts_playback::{
    AudioStatus, Chunk, ChunkDisplay, Coordinator, LocalLauncher, Notification, PlaybackState,
    SpeakHandle, SpeechError, SpeechPipeline, TtsClient, UiSurface, language_code,
    validate_speed,
};

const SPEED_STEP: f32 = 0.25;
const MIN_SPEED: f32 = 0.5;
const MAX_SPEED: f32 = 3.0;

#[derive(Parser, Debug)]
#[command(name = "read-aloud")]
#[command(about = "Read text aloud through a Kokoro TTS server", long_about = None)]
#[command(version)]
struct Args {
    /// Text to read (reads stdin when omitted)
    text: Option<String>,

    /// Read the text from a file
    #[arg(short, long, conflicts_with = "text")]
    file: Option<PathBuf>,

    /// Voice to use (e.g. af_heart, bf_ema)
    #[arg(short, long)]
    voice: Option<String>,

    /// Playback speed multiplier
    #[arg(short, long)]
    speed: Option<f32>,

    /// Audio output: silent or speaker
    #[arg(short, long)]
    output: Option<String>,

    /// TTS server URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// Don't print the text of each chunk as it plays
    #[arg(long)]
    no_highlight: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List voices offered by the server
    Voices,
    /// Check that the server is up
    Health,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set default voice
    SetVoice {
        /// Voice id (e.g. af_heart)
        voice: String,
    },
    /// Set default playback speed
    SetSpeed {
        /// Speed multiplier (1.0 is normal)
        speed: f32,
    },
    /// Set the TTS server URL
    SetServer {
        /// Base URL (e.g. http://localhost:8000)
        url: String,
    },
    /// Set default audio output
    SetOutput {
        /// silent or speaker
        output: String,
    },
}

/// Terminal front end: renders chunk progress and relays notifications
struct Terminal {
    highlight: bool,
    total_chunks: AtomicUsize,
    events: mpsc::UnboundedSender<Notification>,
}

impl Terminal {
    fn new(highlight: bool, events: mpsc::UnboundedSender<Notification>) -> Self {
        Self {
            highlight,
            total_chunks: AtomicUsize::new(0),
            events,
        }
    }

    fn total(&self) -> usize {
        self.total_chunks.load(Ordering::SeqCst)
    }
}

impl ChunkDisplay for Terminal {
    fn loading(&self, total_chunks: usize) {
        self.total_chunks.store(total_chunks, Ordering::SeqCst);
        if total_chunks > 1 {
            eprintln!("Generating audio ({} chunks)...", total_chunks);
        } else {
            eprintln!("Generating audio...");
        }
    }

    fn chunk_skipped(&self, chunk: &Chunk, error: &SpeechError) {
        eprintln!(
            "Skipping chunk {}/{}: {}",
            chunk.index + 1,
            self.total(),
            error
        );
    }

    fn show_error(&self, error: &SpeechError) {
        if matches!(error, SpeechError::Transport(_)) {
            eprintln!("Is the TTS server running? Try `read-aloud health`.");
        }
    }
}

impl UiSurface for Terminal {
    fn name(&self) -> &str {
        "terminal"
    }

    fn notify(&self, notification: &Notification) -> tts_playback::Result<()> {
        match notification {
            Notification::AudioStarted {
                chunk_text,
                chunk_index,
            } => {
                let position = chunk_index.map(|i| i + 1).unwrap_or(1);
                match chunk_text {
                    Some(text) if self.highlight => {
                        println!("[{}/{}] {}", position, self.total(), text)
                    }
                    _ => println!("[{}/{}]", position, self.total()),
                }
            }
            Notification::AudioPaused => eprintln!("Paused"),
            Notification::AudioResumed => eprintln!("Resumed"),
            Notification::AudioEnded => {}
        }

        self.events
            .send(notification.clone())
            .map_err(|_| SpeechError::EngineUnavailable("terminal has closed".to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if let Some(Commands::Config { action }) = &args.command {
        return handle_config_command(action);
    }

    // Load configuration
    let config = ReadAloudConfig::load().context("Failed to load configuration")?;
    let client = TtsClient::new(&config.client_settings(args.server.as_deref()))
        .context("Failed to create TTS client")?;

    match &args.command {
        Some(Commands::Voices) => return list_voices(&client).await,
        Some(Commands::Health) => return check_health(&client).await,
        _ => {}
    }

    let (text, from_stdin) = read_input(&args)?;
    let voice = args.voice.as_deref().unwrap_or(&config.voice);
    let speed = args.speed.unwrap_or(config.speed);
    let output = args.output.as_deref().unwrap_or(&config.output);
    let highlight = config.highlight && !args.no_highlight;

    log::debug!("Server: {}", client.base_url());
    log::debug!("Voice: {}", voice);
    log::debug!("Speed: {}", speed);
    log::debug!("Output: {}", output);

    let host = audio::create_host(output, client.clone())?;
    let coordinator = Arc::new(
        Coordinator::new(Box::new(LocalLauncher::new(host)))
            .with_initial_speed(speed)
            .context("Invalid playback speed")?,
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let terminal = Arc::new(Terminal::new(highlight, events_tx));
    coordinator.register_surface(terminal.clone());

    let pipeline = SpeechPipeline::new(
        Arc::new(client),
        coordinator.clone(),
        config.pipeline_settings(),
    );

    let handle = pipeline
        .speak(&text, voice, terminal)
        .await
        .context("Failed to read text aloud")?;

    let interactive = !from_stdin && std::io::stdin().is_terminal();
    if interactive {
        eprintln!("Controls: p pause, r resume, s stop, + faster, - slower, ? status");
    }

    let result = wait_for_playback(&coordinator, handle, &mut events_rx, interactive).await;

    if let Err(e) = coordinator.shutdown_engine().await {
        log::debug!("Engine shutdown: {}", e);
    }
    result
}

/// Text from the argument, --file, or stdin. The flag is true for stdin.
fn read_input(args: &Args) -> Result<(String, bool)> {
    if let Some(text) = &args.text {
        return Ok((text.clone(), false));
    }

    if let Some(path) = &args.file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok((text, false));
    }

    if std::io::stdin().is_terminal() {
        anyhow::bail!("No text given. Pass text, use --file, or pipe text on stdin");
    }

    let text = std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?;
    Ok((text, true))
}

enum Control {
    Continue,
    Stop,
}

/// Run until the last chunk has played, the user stops, or Ctrl-C
async fn wait_for_playback(
    coordinator: &Coordinator,
    handle: SpeakHandle,
    events: &mut mpsc::UnboundedReceiver<Notification>,
    interactive: bool,
) -> Result<()> {
    let background = handle.finish_background();
    tokio::pin!(background);
    let mut background_done = false;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut lines = interactive.then(|| BufReader::new(tokio::io::stdin()).lines());

    loop {
        tokio::select! {
            report = &mut background, if !background_done => {
                background_done = true;
                if !report.skipped.is_empty() {
                    log::warn!("{} chunk(s) could not be generated", report.skipped.len());
                }
                // Playback may have drained the queue before generation finished
                if playback_finished(coordinator).await {
                    break;
                }
            }
            Some(notification) = events.recv() => {
                if notification == Notification::AudioEnded && background_done {
                    break;
                }
            }
            line = next_line(&mut lines) => match line {
                Some(line) => {
                    if let Control::Stop = handle_control(coordinator, line.trim()).await {
                        break;
                    }
                }
                None => lines = None,
            },
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                eprintln!("Stopping");
                if let Err(e) = coordinator.stop().await {
                    log::debug!("Stop after Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    Ok(())
}

async fn next_line(lines: &mut Option<Lines<BufReader<Stdin>>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn playback_finished(coordinator: &Coordinator) -> bool {
    match coordinator.status().await {
        Ok(status) => status.state == PlaybackState::Idle && status.queue_length == 0,
        Err(_) => true,
    }
}

async fn handle_control(coordinator: &Coordinator, command: &str) -> Control {
    let result = match command {
        "" => Ok(()),
        "p" | "pause" => coordinator.pause().await,
        "r" | "resume" => coordinator.resume().await,
        "s" | "stop" | "q" | "quit" => {
            if let Err(e) = coordinator.stop().await {
                log::debug!("Stop: {}", e);
            }
            return Control::Stop;
        }
        "+" | "faster" => change_speed(coordinator, SPEED_STEP).await,
        "-" | "slower" => change_speed(coordinator, -SPEED_STEP).await,
        "?" | "status" => coordinator.status().await.map(|status| {
            print_status(&AudioStatus::from(status), coordinator.speed());
        }),
        other => {
            eprintln!("Unknown control '{}'. Use p, r, s, +, - or ?", other);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}", e);
    }
    Control::Continue
}

async fn change_speed(coordinator: &Coordinator, step: f32) -> tts_playback::Result<()> {
    let speed = (coordinator.speed() + step).clamp(MIN_SPEED, MAX_SPEED);
    coordinator.set_speed(speed).await?;
    eprintln!("Speed: {:.2}x", speed);
    Ok(())
}

fn print_status(status: &AudioStatus, speed: f32) {
    let state = if status.is_playing {
        "playing"
    } else if status.is_paused {
        "paused"
    } else if status.has_audio {
        "loading"
    } else {
        "idle"
    };
    eprintln!(
        "Status: {}, {} chunk(s) queued, speed {:.2}x",
        state, status.queue_length, speed
    );
}

fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = ReadAloudConfig::load()?;
            println!("Configuration file: {:?}", ReadAloudConfig::config_path()?);
            println!();
            println!("server_url = \"{}\"", config.server_url);
            println!("voice = \"{}\"", config.voice);
            println!("speed = {}", config.speed);
            println!("output = \"{}\"", config.output);
            println!("highlight = {}", config.highlight);
            println!("chunk_threshold = {}", config.chunk_threshold);
            println!("max_chunk_size = {}", config.max_chunk_size);
            println!("pacing_ms = {}", config.pacing_ms);
            println!("request_timeout_secs = {}", config.request_timeout_secs);
        }
        ConfigAction::SetVoice { voice } => {
            language_code(voice)?;
            let mut config = ReadAloudConfig::load()?;
            config.voice = voice.clone();
            config.save()?;
            println!("Default voice set to: {}", voice);
        }
        ConfigAction::SetSpeed { speed } => {
            validate_speed(*speed)?;
            let mut config = ReadAloudConfig::load()?;
            config.speed = *speed;
            config.save()?;
            println!("Default speed set to: {}x", speed);
        }
        ConfigAction::SetServer { url } => {
            // Validate the URL parses
            let mut config = ReadAloudConfig::load()?;
            TtsClient::new(&config.client_settings(Some(url)))?;
            config.server_url = url.clone();
            config.save()?;
            println!("Server set to: {}", url);
        }
        ConfigAction::SetOutput { output } => {
            audio::validate_output(output)?;
            let mut config = ReadAloudConfig::load()?;
            config.output = output.clone();
            config.save()?;
            println!("Default output set to: {}", output);
        }
    }
    Ok(())
}

async fn check_health(client: &TtsClient) -> Result<()> {
    let health = client.health().await.context("Health check failed")?;

    println!("Server: {}", client.base_url());
    println!("Status: {}", health.status);
    if health.pipelines_loaded.is_empty() {
        println!("Pipelines loaded: (none)");
    } else {
        println!("Pipelines loaded: {}", health.pipelines_loaded.join(", "));
    }
    Ok(())
}

async fn list_voices(client: &TtsClient) -> Result<()> {
    let voices = client.voices().await.context("Failed to list voices")?;

    println!("Available voices on {}:", client.base_url());
    println!();

    for (lang, names) in voices {
        println!("  {} ({})", lang, language_name(&lang));
        for name in names {
            println!("    {}", name);
        }
    }

    Ok(())
}

fn language_name(code: &str) -> &str {
    match code {
        "a" => "American English",
        "b" => "British English",
        _ => "unknown",
    }
}
