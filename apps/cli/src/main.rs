use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use storyforge_core::{
    API_KEY_ENV_VAR, ActionOutcome, ApiKey, AspectRatio, CredentialGate, CredentialStore,
    FileCredentialStore, GeminiService, GenerationClient, ImageModel, MemoryCredentialStore,
    RunOutcome, ServiceConfig, SessionState, StoryboardOrchestrator, StoryboardRequest,
    VideoAspectRatio, VideoJob, VideoModel, VideoResolution, VideoState,
    format_storyboard_readable, get_config_dir, get_credential_path,
};
use tokio::sync::watch;

use crate::export::{export_storyboard, load_reference_image, write_video};

mod export;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for ImageModel (needed for clap ValueEnum)
#[derive(Clone, Copy, Default, ValueEnum)]
enum CliImageModel {
    #[default]
    Fast,
    Pro,
}

impl From<CliImageModel> for ImageModel {
    fn from(cli: CliImageModel) -> Self {
        match cli {
            CliImageModel::Fast => ImageModel::Fast,
            CliImageModel::Pro => ImageModel::Pro,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum CliAspectRatio {
    #[value(name = "1:1")]
    Square,
    #[value(name = "3:4")]
    Portrait,
    #[value(name = "4:3")]
    Landscape,
    #[value(name = "9:16")]
    Vertical,
    #[default]
    #[value(name = "16:9")]
    Widescreen,
}

impl From<CliAspectRatio> for AspectRatio {
    fn from(cli: CliAspectRatio) -> Self {
        match cli {
            CliAspectRatio::Square => AspectRatio::Square,
            CliAspectRatio::Portrait => AspectRatio::Portrait,
            CliAspectRatio::Landscape => AspectRatio::Landscape,
            CliAspectRatio::Vertical => AspectRatio::Vertical,
            CliAspectRatio::Widescreen => AspectRatio::Widescreen,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum CliVideoModel {
    #[default]
    Fast,
    Quality,
}

impl From<CliVideoModel> for VideoModel {
    fn from(cli: CliVideoModel) -> Self {
        match cli {
            CliVideoModel::Fast => VideoModel::Fast,
            CliVideoModel::Quality => VideoModel::Quality,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum CliVideoAspect {
    #[default]
    #[value(name = "16:9")]
    Widescreen,
    #[value(name = "9:16")]
    Vertical,
}

impl From<CliVideoAspect> for VideoAspectRatio {
    fn from(cli: CliVideoAspect) -> Self {
        match cli {
            CliVideoAspect::Widescreen => VideoAspectRatio::Widescreen,
            CliVideoAspect::Vertical => VideoAspectRatio::Vertical,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum CliResolution {
    #[default]
    #[value(name = "720p")]
    Hd,
    #[value(name = "1080p")]
    FullHd,
}

impl From<CliResolution> for VideoResolution {
    fn from(cli: CliResolution) -> Self {
        match cli {
            CliResolution::Hd => VideoResolution::Hd,
            CliResolution::FullHd => VideoResolution::FullHd,
        }
    }
}

#[derive(Parser)]
#[command(name = "storyforge")]
#[command(about = "Turn a topic into an AI storyboard, SEO titles and a short video")]
struct Cli {
    /// API key for this run only; overrides the saved key
    #[arg(long, global = true, env = API_KEY_ENV_VAR, hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct VideoArgs {
    /// Video model
    #[arg(id = "video_model", long = "video-model", default_value = "fast")]
    model: CliVideoModel,

    /// Video aspect ratio
    #[arg(id = "video_aspect", long = "video-aspect", default_value = "16:9")]
    aspect: CliVideoAspect,

    /// Video resolution
    #[arg(long = "video-resolution", default_value = "720p")]
    resolution: CliResolution,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a storyboard: scenes, images and titles
    Storyboard {
        /// What the story is about
        topic: String,

        /// Number of scenes (1-20)
        #[arg(short, long, default_value_t = 10)]
        scenes: usize,

        /// Image model
        #[arg(short, long, default_value = "fast")]
        model: CliImageModel,

        /// Image aspect ratio
        #[arg(short, long, default_value = "16:9")]
        aspect: CliAspectRatio,

        /// Image that keeps characters and style consistent
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Export images, storyboard.md and video into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Also generate a video from the topic
        #[arg(long)]
        video: bool,

        #[command(flatten)]
        video_args: VideoArgs,

        /// Give up on the video after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Rerun failed scene images up to this many times
        #[arg(long, value_name = "N", default_value_t = 0)]
        retry_failed: u32,
    },

    /// Generate ten SEO titles for a topic
    Titles {
        topic: String,
    },

    /// Generate a short video from a prompt
    Video {
        prompt: String,

        #[arg(short, long, default_value = "fast")]
        model: CliVideoModel,

        #[arg(short, long, default_value = "16:9")]
        aspect: CliVideoAspect,

        #[arg(long, default_value = "720p")]
        resolution: CliResolution,

        /// Starting frame for the video
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Output file (extension follows the returned format)
        #[arg(short, long, default_value = "video")]
        out: PathBuf,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Manage the saved API key
    Key {
        #[command(subcommand)]
        action: KeyCommand,
    },
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Save a key
    Set {
        key: String,

        /// Check the key against the service before saving
        #[arg(long)]
        test: bool,
    },
    /// Check a key without saving it
    Test { key: String },
    /// Delete the saved key
    Remove,
    /// Show whether a key is configured
    Status,
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn file_store() -> Arc<FileCredentialStore> {
    Arc::new(FileCredentialStore::new(get_credential_path(
        &get_config_dir(),
    )))
}

fn build_orchestrator(
    credentials: Arc<dyn CredentialStore>,
    config: ServiceConfig,
) -> StoryboardOrchestrator {
    let service = Arc::new(GeminiService::new(&config));
    let client = GenerationClient::new(service, credentials.clone(), config);
    StoryboardOrchestrator::new(Arc::new(client), CredentialGate::new(credentials))
}

fn print_setup_hint() {
    eprintln!(
        "{} No API key configured. Run {} or set {}.",
        style("Error:").red().bold(),
        style("storyforge key set <KEY>").cyan(),
        style(API_KEY_ENV_VAR).cyan()
    );
}

/// Mirror session snapshots into the spinner until the task is aborted
fn watch_storyboard(
    mut rx: watch::Receiver<Arc<SessionState>>,
    spinner: ProgressBar,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if state.is_generating_story {
                spinner.set_message("Writing story...");
            } else if !state.scenes.is_empty() {
                spinner.set_message(format!(
                    "Rendering scenes {}/{} {}",
                    state.scenes.len() - state.loading_count(),
                    state.scenes.len(),
                    style(format!("({} failed)", state.failed_count())).dim()
                ));
            }
        }
    })
}

async fn run_video(
    orchestrator: &StoryboardOrchestrator,
    job: &VideoJob,
    timeout: Option<u64>,
) -> Result<ActionOutcome> {
    let spinner = create_spinner("Generating video (this can take a few minutes)...");
    let step_start = Instant::now();

    let outcome = match timeout {
        Some(secs) => {
            match tokio::time::timeout(Duration::from_secs(secs), orchestrator.generate_video(job))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    spinner.finish_and_clear();
                    bail!("video generation timed out after {secs}s");
                }
            }
        }
        None => orchestrator.generate_video(job).await,
    };

    match &outcome {
        ActionOutcome::Succeeded => spinner.finish_with_message(format!(
            "{} Video generated {}",
            style("✓").green().bold(),
            style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
        )),
        ActionOutcome::Failed { reason } => spinner.finish_with_message(format!(
            "{} Video failed: {}",
            style("✗").red().bold(),
            reason
        )),
        _ => spinner.finish_and_clear(),
    }
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn storyboard(
    orchestrator: &StoryboardOrchestrator,
    topic: String,
    scenes: usize,
    model: CliImageModel,
    aspect: CliAspectRatio,
    reference: Option<PathBuf>,
    out: Option<PathBuf>,
    video: Option<(VideoArgs, Option<u64>)>,
    retry_failed: u32,
) -> Result<()> {
    let mut request = StoryboardRequest::new(topic.clone())
        .with_scene_count(scenes)
        .with_image_model(model.into())
        .with_aspect_ratio(aspect.into());
    let reference = match reference {
        Some(path) => Some(load_reference_image(&path).await?),
        None => None,
    };
    if let Some(image) = reference.clone() {
        request = request.with_reference_image(image);
    }

    let total_start = Instant::now();
    let spinner = create_spinner("Writing story...");
    let watcher = watch_storyboard(orchestrator.store().subscribe(), spinner.clone());
    let outcome = orchestrator.run_storyboard(request).await;
    watcher.abort();

    match outcome? {
        RunOutcome::SkippedMissingCredential => {
            spinner.finish_and_clear();
            print_setup_hint();
            std::process::exit(1);
        }
        RunOutcome::Abandoned { reason } => {
            spinner.finish_and_clear();
            bail!("story generation failed: {reason}");
        }
        RunOutcome::Completed { ready, failed } => {
            spinner.finish_with_message(format!(
                "{} Storyboard ready: {} scenes, {} failed {}",
                style("✓").green().bold(),
                ready,
                failed,
                style(format!("[{}]", format_duration(total_start.elapsed()))).dim()
            ));
        }
    }

    retry_failed_scenes(orchestrator, retry_failed).await?;

    if let Some((args, timeout)) = video {
        let job = VideoJob {
            model: args.model.into(),
            prompt: topic,
            aspect_ratio: args.aspect.into(),
            resolution: args.resolution.into(),
            reference_image: reference,
        };
        // a failed or timed-out video still leaves the storyboard to print
        if let Err(e) = run_video(orchestrator, &job, timeout).await {
            eprintln!("{} {}", style("Error:").red().bold(), e);
        }
    }

    let state = orchestrator.store().snapshot();
    println!("{}", style("─".repeat(60)).dim());
    println!("{}", format_storyboard_readable(&state));

    if let Some(out_dir) = out {
        let written = export_storyboard(&state, &out_dir).await?;
        println!(
            "{} {} {}",
            style("Saved:").dim(),
            written.len(),
            style(out_dir.display()).cyan()
        );
    }
    Ok(())
}

/// Retry failed scenes round by round until none are left or the rounds run out
async fn retry_failed_scenes(orchestrator: &StoryboardOrchestrator, rounds: u32) -> Result<()> {
    for round in 1..=rounds {
        let failed = orchestrator.store().snapshot().failed_count();
        if failed == 0 {
            break;
        }

        let spinner = create_spinner(&format!("Retrying {failed} failed scenes..."));
        let watcher = watch_storyboard(orchestrator.store().subscribe(), spinner.clone());
        let outcome = orchestrator.retry_failed_scenes().await;
        watcher.abort();

        match outcome? {
            RunOutcome::Completed { ready, failed } => spinner.finish_with_message(format!(
                "{} Retry {}/{}: {} recovered, {} still failing",
                style("↻").cyan().bold(),
                round,
                rounds,
                ready,
                failed
            )),
            _ => {
                spinner.finish_and_clear();
                break;
            }
        }
    }
    Ok(())
}

async fn key_command(action: KeyCommand, config: ServiceConfig) -> Result<()> {
    let store = file_store();

    match action {
        KeyCommand::Set { key, test } => {
            let key = ApiKey::new(key)?;
            if test {
                let spinner = create_spinner("Testing key...");
                let orchestrator = build_orchestrator(store.clone(), config);
                let ok = orchestrator.test_connection(&key).await;
                spinner.finish_and_clear();
                if !ok {
                    bail!("the service rejected this key; it was not saved");
                }
            }
            store.save(&key)?;
            println!(
                "{} Key saved to {}",
                style("✓").green().bold(),
                style(store.path().display()).dim()
            );
        }
        KeyCommand::Test { key } => {
            let key = ApiKey::new(key)?;
            let spinner = create_spinner("Testing key...");
            let orchestrator = build_orchestrator(Arc::new(MemoryCredentialStore::new()), config);
            let ok = orchestrator.test_connection(&key).await;
            spinner.finish_and_clear();
            if ok {
                println!("{} Key works", style("✓").green().bold());
            } else {
                println!("{} Key was rejected", style("✗").red().bold());
                std::process::exit(1);
            }
        }
        KeyCommand::Remove => {
            store.remove()?;
            println!("{} Key removed", style("✓").green().bold());
        }
        KeyCommand::Status => {
            if store.exists() {
                println!(
                    "{} Key configured at {}",
                    style("✓").green().bold(),
                    style(store.path().display()).dim()
                );
            } else {
                println!("{} No saved key", style("✗").yellow().bold());
            }
            if std::env::var_os(API_KEY_ENV_VAR).is_some() {
                println!(
                    "  {} is set and takes precedence",
                    style(API_KEY_ENV_VAR).cyan()
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::from_env()?;
    tracing::debug!(
        base_url = %config.base_url,
        language = %config.narrative_language,
        "configuration loaded"
    );

    if let Command::Key { action } = cli.command {
        return key_command(action, config).await;
    }

    let credentials: Arc<dyn CredentialStore> = match cli.api_key {
        Some(key) => Arc::new(MemoryCredentialStore::with_key(ApiKey::new(key)?)),
        None => file_store(),
    };
    let orchestrator = build_orchestrator(credentials, config);

    println!(
        "\n{}  {}\n",
        style("storyforge").cyan().bold(),
        style("Storyboard Generator").dim()
    );

    match cli.command {
        Command::Storyboard {
            topic,
            scenes,
            model,
            aspect,
            reference,
            out,
            video,
            video_args,
            timeout,
            retry_failed,
        } => {
            let video = video.then_some((video_args, timeout));
            storyboard(
                &orchestrator,
                topic,
                scenes,
                model,
                aspect,
                reference,
                out,
                video,
                retry_failed,
            )
            .await?;
        }
        Command::Titles { topic } => {
            let spinner = create_spinner("Generating titles...");
            let outcome = orchestrator.regenerate_titles(&topic).await?;
            spinner.finish_and_clear();
            match outcome {
                ActionOutcome::SkippedMissingCredential => {
                    print_setup_hint();
                    std::process::exit(1);
                }
                ActionOutcome::Failed { reason } => bail!("title generation failed: {reason}"),
                _ => {
                    for (i, title) in orchestrator.store().snapshot().titles.iter().enumerate() {
                        println!(
                            "{:>2}. {}\n    {}",
                            i + 1,
                            style(&title.english).bold(),
                            style(&title.localized).dim()
                        );
                    }
                }
            }
        }
        Command::Video {
            prompt,
            model,
            aspect,
            resolution,
            reference,
            out,
            timeout,
        } => {
            let reference_image = match reference {
                Some(path) => Some(load_reference_image(&path).await?),
                None => None,
            };
            let job = VideoJob {
                model: model.into(),
                prompt,
                aspect_ratio: aspect.into(),
                resolution: resolution.into(),
                reference_image,
            };

            match run_video(&orchestrator, &job, timeout).await? {
                ActionOutcome::SkippedMissingCredential => {
                    print_setup_hint();
                    std::process::exit(1);
                }
                ActionOutcome::Failed { reason } => bail!("video generation failed: {reason}"),
                _ => {
                    if let VideoState::Done(video) = &orchestrator.store().snapshot().video {
                        let path = write_video(video, &out).await?;
                        println!("{} {}", style("Saved:").dim(), style(path.display()).cyan());
                    }
                }
            }
        }
        Command::Key { .. } => unreachable!("handled before credentials are resolved"),
    }

    Ok(())
}
