use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use artvoice::audio::{CpalCapture, SpeakerElement};
use artvoice::playback::{
    ControllerConfig, Phase, PlaybackElement, PlaybackGroup, PlaybackState, TimelineElement,
};
use artvoice::settings::{self, AppSettings};
use artvoice::view::ElementFactory;
use artvoice::waveform::TextSurface;
use artvoice::{
    ArtworkId, AutoDecoder, ClipApi, ClipId, ClipLoader, ClipSource, ClipUploader, Recorder,
    SampleBuffer, Theme, WaveformView,
};

#[derive(Parser)]
#[command(name = "artvoice")]
#[command(about = "Record, list, visualize and play voice clips attached to artworks")]
struct Cli {
    /// Settings file (defaults to <config dir>/artvoice/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a clip from the default microphone
    Record {
        /// Artwork the clip belongs to
        #[arg(short, long)]
        artwork: u64,

        /// Also write the WAV to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many seconds instead of waiting for Enter
        #[arg(long)]
        seconds: Option<f64>,

        /// Keep the clip local
        #[arg(long)]
        no_upload: bool,
    },
    /// List the clips of an artwork
    List {
        #[arg(short, long)]
        artwork: u64,
    },
    /// Print the waveform of a clip
    Show {
        #[command(flatten)]
        source: SourceArgs,

        /// Columns (defaults to the configured canvas width, capped at 120)
        #[arg(long)]
        width: Option<usize>,

        #[arg(long, default_value_t = 12)]
        height: usize,

        /// light or dark (defaults to the configured theme)
        #[arg(long, value_parser = parse_theme)]
        theme: Option<Theme>,
    },
    /// Play a clip while drawing its progress
    Play {
        #[command(flatten)]
        source: SourceArgs,

        /// Advance the timeline without opening an output device
        #[arg(long)]
        silent: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Uploaded clip id
    #[arg(long)]
    clip: Option<u64>,

    /// Local audio file
    #[arg(long)]
    file: Option<PathBuf>,
}

fn parse_theme(s: &str) -> Result<Theme, String> {
    match s.to_ascii_lowercase().as_str() {
        "light" => Ok(Theme::Light),
        "dark" => Ok(Theme::Dark),
        other => Err(format!("unknown theme '{}' (expected light or dark)", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => settings::load_settings_from(path),
        None => settings::load_settings(),
    }
    .with_env_overrides();
    let api = ClipApi::new(settings.api_base_url.clone(), settings.auth_token.clone());

    match cli.command {
        Command::Record {
            artwork,
            output,
            seconds,
            no_upload,
        } => record(&api, ArtworkId(artwork), output, seconds, no_upload).await,
        Command::List { artwork } => list(&api, ArtworkId(artwork)).await,
        Command::Show {
            source,
            width,
            height,
            theme,
        } => {
            let width = width.unwrap_or(settings.canvas_width.min(120));
            show(&api, &settings, source, width, height, theme).await
        }
        Command::Play { source, silent } => play(&api, &settings, source, silent).await,
    }
}

async fn record(
    api: &ClipApi,
    artwork: ArtworkId,
    output: Option<PathBuf>,
    seconds: Option<f64>,
    no_upload: bool,
) -> Result<()> {
    let mut recorder = Recorder::new(CpalCapture::new(), artwork);
    recorder
        .start()
        .context("Could not start recording (is microphone access allowed?)")?;

    match seconds {
        Some(secs) => {
            println!("Recording for {:.1}s...", secs);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
        }
        None => {
            println!("Recording... press Enter to stop");
            tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)
            })
            .await
            .context("Failed waiting for Enter")?
            .context("Failed to read stdin")?;
        }
    }

    let clip = recorder
        .stop()?
        .context("Recorder produced no clip")?;
    let bytes = clip.bytes().context("Recorded clip has no bytes")?.to_vec();
    println!("Recorded {} bytes ({})", bytes.len(), clip.mime_type());

    if let Some(path) = output {
        std::fs::write(&path, &bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved to {}", path.display());
    }

    if no_upload {
        return Ok(());
    }

    let id = api
        .upload(artwork, bytes, clip.mime_type())
        .await
        .context("Upload failed")?;
    println!("Uploaded as clip {} ({})", id, api.clip_url(id));
    Ok(())
}

async fn list(api: &ClipApi, artwork: ArtworkId) -> Result<()> {
    let clips = api.list_clips(artwork).await?;
    if clips.is_empty() {
        println!("No clips for artwork {}", artwork);
        return Ok(());
    }
    for clip in clips {
        let created = clip
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:>6}  {:<16}  {}", clip.id, created, clip.filename);
    }
    Ok(())
}

fn clip_source(source: &SourceArgs) -> Result<ClipSource> {
    match (&source.clip, &source.file) {
        (Some(id), _) => Ok(ClipSource::Remote(ClipId(*id))),
        (None, Some(path)) => read_file(path),
        (None, None) => anyhow::bail!("Pass --clip or --file"),
    }
}

fn read_file(path: &Path) -> Result<ClipSource> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(ClipSource::memory(bytes))
}

fn text_view(
    api: &ClipApi,
    width: usize,
    height: usize,
    theme: Theme,
    config: ControllerConfig,
    factory: ElementFactory,
) -> (WaveformView<TextSurface>, ClipLoader<ClipApi, AutoDecoder>) {
    let loader = ClipLoader::new(Arc::new(api.clone()), Arc::new(AutoDecoder));
    let view = WaveformView::new(TextSurface::new(width, height), theme, config, factory);
    (view, loader)
}

async fn show(
    api: &ClipApi,
    settings: &AppSettings,
    source: SourceArgs,
    width: usize,
    height: usize,
    theme: Option<Theme>,
) -> Result<()> {
    let theme = theme.unwrap_or(settings.theme);
    let (mut view, loader) = text_view(
        api,
        width,
        height,
        theme,
        ControllerConfig::default(),
        timeline_factory(),
    );

    view.begin_load(&loader, clip_source(&source)?);
    view.wait_loaded().await.context("Could not load clip")?;
    view.refresh();

    if let Some(buffer) = view.buffer() {
        println!(
            "{} channel(s), {} Hz, {:.2}s",
            buffer.channel_count(),
            buffer.sample_rate(),
            buffer.duration()
        );
    }
    print!("{}", view.surface());
    Ok(())
}

async fn play(
    api: &ClipApi,
    settings: &AppSettings,
    source: SourceArgs,
    silent: bool,
) -> Result<()> {
    let factory = if silent {
        timeline_factory()
    } else {
        speaker_factory()
    };
    let group = PlaybackGroup::new();
    let config =
        ControllerConfig::for_policy(settings.playback_policy, &group, settings.frame_interval());
    let (mut view, loader) = text_view(api, 60, 8, settings.theme, config, factory);

    view.begin_load(&loader, clip_source(&source)?);
    view.wait_loaded().await.context("Could not load clip")?;

    let mut states = view.subscribe().context("Clip has no playback controller")?;
    view.toggle().await.context("Clip cannot be played")?;

    let mut stdout = std::io::stdout();
    loop {
        if states.changed().await.is_err() {
            break;
        }
        let state = *states.borrow_and_update();
        view.refresh();
        print_progress(&mut stdout, &state)?;
        // Idle again means playback failed or was preempted
        if matches!(state.phase, Phase::Ended | Phase::Idle) {
            break;
        }
    }

    println!();
    print!("{}", view.surface());
    view.teardown();
    Ok(())
}

fn print_progress(out: &mut impl Write, state: &PlaybackState) -> Result<()> {
    const BAR: usize = 40;
    let ratio = artvoice::waveform::progress_ratio(state.current_time, state.duration);
    let filled = artvoice::waveform::progress_columns(BAR, ratio);
    write!(
        out,
        "\r[{}{}] {:>6.2}s / {:.2}s",
        "#".repeat(filled),
        "-".repeat(BAR - filled),
        state.current_time,
        state.duration
    )?;
    out.flush()?;
    Ok(())
}

fn timeline_factory() -> ElementFactory {
    Box::new(|buffer: Arc<SampleBuffer>| -> Arc<dyn PlaybackElement> {
        Arc::new(TimelineElement::new(buffer.duration()))
    })
}

fn speaker_factory() -> ElementFactory {
    Box::new(|buffer: Arc<SampleBuffer>| -> Arc<dyn PlaybackElement> {
        match SpeakerElement::open(buffer.clone()) {
            Ok(speaker) => Arc::new(speaker),
            Err(e) => {
                log::warn!("No audio output ({}), playing silently", e);
                Arc::new(TimelineElement::new(buffer.duration()))
            }
        }
    })
}
