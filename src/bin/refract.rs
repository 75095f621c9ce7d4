use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use refract::{
    EncoderSettings, FfmpegLogLevel, ImageBatch, JobFile, Origin, PixelFormat, ProgressHandler, ProgressInfo,
    RefractError, TransformChain, TransformConfiguration, TransformKind, TransformOptions,
    VideoCodec, VideoTransformEngine,
};

const CLI_AFTER_HELP: &str = "Examples:\n  refract transform input.mp4 output.mp4 --kind blur --sigma 3 --progress\n  refract transform input.mp4 mirrored.mp4 --kind mirror --origin 0.3,0.5 --fps-cap 24\n  refract transform --config job.json --workers 8\n  refract image photos/ out/ --kind invert\n  refract probe input.mp4 --json\n  refract completions zsh > _refract";

const PROGRESS_STEPS: u64 = 1000;

#[derive(Debug, Parser)]
#[command(
    name = "refract",
    version,
    about = "Transform every frame of a video in parallel batches",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, debug).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Frames transformed in parallel per batch.
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Pixel format handed to the transform (rgb8, rgba8, gray8).
    #[arg(long, global = true)]
    pixel_format: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Transform a video file frame by frame.
    #[command(
        about = "Transform a video",
        after_help = "Examples:\n  refract transform in.mp4 out.mp4 --kind grayscale\n  refract transform in.mp4 out.mkv --kind brighten --amount -30 --codec h265 --crf 26"
    )]
    Transform {
        /// Input video path. Overrides the job file's input.
        input: Option<PathBuf>,
        /// Output video path. Overrides the job file's output.
        output: Option<PathBuf>,
        /// Transform kind: grayscale | invert | flip-horizontal | flip-vertical |
        /// rotate-180 | blur | brighten | mirror.
        #[arg(long)]
        kind: Option<String>,
        /// Blur standard deviation in pixels.
        #[arg(long, default_value_t = 2.0)]
        sigma: f32,
        /// Brightness offset.
        #[arg(long, default_value_t = 20, allow_hyphen_values = true)]
        amount: i32,
        /// Origin for mirror as X,Y in [0, 1].
        #[arg(long)]
        origin: Option<String>,
        /// JSON job file listing inputs, outputs and a transform chain.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Cap the output frame rate.
        #[arg(long)]
        fps_cap: Option<f64>,
        /// Render width (height follows the aspect ratio if omitted).
        #[arg(long)]
        width: Option<u32>,
        /// Render height (width follows the aspect ratio if omitted).
        #[arg(long)]
        height: Option<u32>,
        /// Output codec: h264 | h265 | mpeg4.
        #[arg(long, default_value = "h264")]
        codec: String,
        /// Constant rate factor (0-51, lower is better).
        #[arg(long)]
        crf: Option<u32>,
    },

    /// Apply transforms to an image or a directory of images.
    #[command(
        about = "Transform still images",
        after_help = "Examples:\n  refract image photo.jpg out/ --kind blur --sigma 4\n  refract image --config images.json --clear"
    )]
    Image {
        /// Input image or directory. Overrides the job file's input.
        input: Option<PathBuf>,
        /// Output directory. Overrides the job file's output.
        output: Option<PathBuf>,
        /// Transform kind, as for `transform`.
        #[arg(long)]
        kind: Option<String>,
        /// Blur standard deviation in pixels.
        #[arg(long, default_value_t = 2.0)]
        sigma: f32,
        /// Brightness offset.
        #[arg(long, default_value_t = 20, allow_hyphen_values = true)]
        amount: i32,
        /// Origin for mirror as X,Y in [0, 1].
        #[arg(long)]
        origin: Option<String>,
        /// JSON job file listing the input, the output directory and transforms.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Remove the output directory before writing.
        #[arg(long)]
        clear: bool,
    },

    /// Print geometry, frame rate and tracks of a video.
    #[command(about = "Print video stream information")]
    Probe {
        /// Input video path.
        input: PathBuf,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions.
    #[command(about = "Generate shell completion scripts")]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_pixel_format(value: &str) -> Option<PixelFormat> {
    match value.to_ascii_lowercase().as_str() {
        "rgb8" | "rgb" => Some(PixelFormat::Rgb8),
        "rgba8" | "rgba" => Some(PixelFormat::Rgba8),
        "gray8" | "gray" | "greyscale" | "grayscale" => Some(PixelFormat::Gray8),
        _ => None,
    }
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "debug" => Some(FfmpegLogLevel::Debug),
        _ => None,
    }
}

fn parse_codec(value: &str) -> Option<VideoCodec> {
    match value.to_ascii_lowercase().as_str() {
        "h264" | "avc" => Some(VideoCodec::H264),
        "h265" | "hevc" => Some(VideoCodec::H265),
        "mpeg4" => Some(VideoCodec::Mpeg4),
        _ => None,
    }
}

fn parse_origin(value: &str) -> Result<Origin, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("--origin expects X,Y, got {value}"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<f32>()
            .map_err(|_| format!("--origin component {part:?} is not a number"))
    };
    Ok(Origin::new(parse(x)?, parse(y)?))
}

fn parse_kind(value: &str, sigma: f32, amount: i32) -> Option<TransformKind> {
    match value.to_ascii_lowercase().replace('_', "-").as_str() {
        "grayscale" | "greyscale" => Some(TransformKind::Grayscale),
        "invert" => Some(TransformKind::Invert),
        "flip-horizontal" | "fliph" => Some(TransformKind::FlipHorizontal),
        "flip-vertical" | "flipv" => Some(TransformKind::FlipVertical),
        "rotate-180" | "rotate180" => Some(TransformKind::Rotate180),
        "blur" => Some(TransformKind::Blur { sigma }),
        "brighten" => Some(TransformKind::Brighten { amount }),
        "mirror" => Some(TransformKind::Mirror),
        _ => None,
    }
}

fn transform_list(
    job: Option<&JobFile>,
    kind: Option<String>,
    sigma: f32,
    amount: i32,
    origin: Option<String>,
) -> Result<Vec<TransformConfiguration>, Box<dyn std::error::Error>> {
    match (job, kind) {
        (Some(_), Some(_)) => Err("use either --kind or --config, not both".into()),
        (Some(job), None) => Ok(job.transforms.clone()),
        (None, Some(kind)) => {
            let kind = parse_kind(&kind, sigma, amount)
                .ok_or(format!("unsupported --kind: {kind}"))?;
            let mut configuration = TransformConfiguration::new(kind);
            if let Some(origin) = &origin {
                configuration = configuration.with_origin(parse_origin(origin)?);
            }
            configuration.validate()?;
            Ok(vec![configuration])
        }
        (None, None) => Err("--kind or --config is required".into()),
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn init_logging(global: &GlobalOptions) {
    let default_filter = if global.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        refract::set_ffmpeg_log_level(parsed);
    }
    if global.workers == Some(0) {
        return Err("--workers must be greater than 0".into());
    }
    Ok(())
}

fn apply_cli_options(
    global: &GlobalOptions,
    mut options: TransformOptions,
) -> Result<TransformOptions, Box<dyn std::error::Error>> {
    if let Some(workers) = global.workers {
        options = options.with_workers(workers);
    }
    if let Some(pixel_str) = &global.pixel_format {
        let pixel = parse_pixel_format(pixel_str)
            .ok_or(format!("unsupported --pixel-format: {pixel_str}"))?;
        options = options.with_pixel_format(pixel);
    }
    Ok(options)
}

#[derive(Clone)]
struct TerminalProgress {
    bar: Option<ProgressBar>,
}

impl TerminalProgress {
    fn new(enabled: bool) -> Result<Self, Box<dyn std::error::Error>> {
        if !enabled {
            return Ok(Self { bar: None });
        }
        let bar = ProgressBar::new(PROGRESS_STEPS);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {bar:40.cyan/blue} {percent:>3}% {msg}",
        )?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar: Some(bar) })
    }

    fn finish(&self, message: &'static str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message);
        }
    }
}

impl ProgressHandler for TerminalProgress {
    fn on_progress(&mut self, info: &ProgressInfo) -> bool {
        if let Some(bar) = &self.bar {
            bar.set_position((info.fraction * PROGRESS_STEPS as f32) as u64);
            let remaining = info
                .estimated_remaining
                .map(|eta| format!(", ~{}s left", eta.as_secs()))
                .unwrap_or_default();
            bar.set_message(format!("{} frames{remaining}", info.frames_written));
        }
        true
    }
}

#[allow(clippy::too_many_arguments)]
fn transform_command(
    global: &GlobalOptions,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    kind: Option<String>,
    sigma: f32,
    amount: i32,
    origin: Option<String>,
    config: Option<PathBuf>,
    fps_cap: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    codec: String,
    crf: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = config.map(JobFile::from_path).transpose()?;
    let mut options = match &job {
        Some(job) => job.apply_to(TransformOptions::new()),
        None => TransformOptions::new(),
    };
    options = apply_cli_options(global, options)?;

    let chain = TransformChain::new(transform_list(job.as_ref(), kind, sigma, amount, origin)?);

    if let Some(cap) = fps_cap {
        if !cap.is_finite() || cap <= 0.0 {
            return Err("--fps-cap must be a positive number".into());
        }
        options = options.with_frame_rate_cap(cap);
    }
    if width.is_some() || height.is_some() {
        options = options.with_resolution(width, height);
    }

    let codec = parse_codec(&codec).ok_or(format!("unsupported --codec: {codec}"))?;
    let mut encoder = EncoderSettings::default().with_codec(codec);
    if let Some(crf) = crf {
        if crf > 51 {
            return Err("--crf must be between 0 and 51".into());
        }
        encoder = encoder.with_crf(crf);
    }
    options = options.with_encoder(encoder);

    let input = input
        .or_else(|| job.as_ref().map(|job| job.input.clone()))
        .ok_or("an input path is required")?;
    let output = output
        .or_else(|| job.as_ref().map(|job| job.output.clone()))
        .ok_or("an output path is required")?;
    let overwrite = global.overwrite || job.as_ref().is_some_and(|job| job.overwrite);
    ensure_writable_path(&output, overwrite)?;

    if global.verbose {
        eprintln!(
            "{} {} -> {} ({}, {} workers)",
            "transform".cyan().bold(),
            input.display(),
            output.display(),
            chain.name(),
            options.workers(),
        );
    }

    let progress = TerminalProgress::new(global.progress)?;
    let engine = VideoTransformEngine::new(options);
    let outcome = engine.transform_blocking(&input, &output, Arc::new(chain), progress.clone());

    match outcome {
        Ok(()) => {
            progress.finish("done");
            println!(
                "{} {}",
                "success:".green().bold(),
                format!("Wrote {}", output.display()).green()
            );
            Ok(())
        }
        Err(RefractError::Cancelled) => {
            progress.finish("cancelled");
            Err("transform was cancelled; partial output removed".into())
        }
        Err(error) => {
            progress.finish("failed");
            Err(error.into())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn image_command(
    global: &GlobalOptions,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    kind: Option<String>,
    sigma: f32,
    amount: i32,
    origin: Option<String>,
    config: Option<PathBuf>,
    clear: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = config.map(JobFile::from_path).transpose()?;
    let transforms = transform_list(job.as_ref(), kind, sigma, amount, origin)?;
    let clear = clear || job.as_ref().is_some_and(|job| job.clear_output_directory);

    let input = input
        .or_else(|| job.as_ref().map(|job| job.input.clone()))
        .ok_or("an input image or directory is required")?;
    let output = output
        .or_else(|| job.as_ref().map(|job| job.output.clone()))
        .ok_or("an output directory is required")?;

    if global.verbose {
        eprintln!(
            "{} {} -> {} ({} transforms)",
            "image".cyan().bold(),
            input.display(),
            output.display(),
            transforms.len(),
        );
    }

    let report = ImageBatch::new(transforms)
        .with_clear_output_directory(clear)
        .run(&input, &output)?;

    for (path, error) in &report.failed {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            format!("could not handle {}: {error}", path.display()).yellow()
        );
    }
    println!(
        "{} {}",
        "success:".green().bold(),
        format!("Wrote {} images to {}", report.written.len(), output.display()).green()
    );
    Ok(())
}

fn probe_command(input: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let probe = refract::probe(input)?;
    if json {
        let payload = json!({
            "width": probe.stream.width,
            "height": probe.stream.height,
            "fps": probe.stream.frames_per_second,
            "frame_count": probe.stream.frame_count,
            "rotation": probe.stream.rotation,
            "duration_seconds": probe.duration_seconds,
            "video_codec": probe.video_codec,
            "audio_codec": probe.audio_codec,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Video: {}x{} @ {:.2} fps [{}]",
            probe.stream.width,
            probe.stream.height,
            probe.stream.frames_per_second,
            probe.video_codec,
        );
        match probe.stream.frame_count {
            Some(count) => println!("Frames: {count}"),
            None => println!("Frames: unknown"),
        }
        if probe.stream.rotation != 0 {
            println!("Rotation: {} degrees", probe.stream.rotation);
        }
        println!("Duration: {:.2}s", probe.duration_seconds);
        match &probe.audio_codec {
            Some(codec) => println!("Audio: [{codec}]"),
            None => println!("Audio: none"),
        }
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.global);
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Transform {
            input,
            output,
            kind,
            sigma,
            amount,
            origin,
            config,
            fps_cap,
            width,
            height,
            codec,
            crf,
        } => transform_command(
            &cli.global,
            input,
            output,
            kind,
            sigma,
            amount,
            origin,
            config,
            fps_cap,
            width,
            height,
            codec,
            crf,
        )?,
        Commands::Image {
            input,
            output,
            kind,
            sigma,
            amount,
            origin,
            config,
            clear,
        } => image_command(
            &cli.global,
            input,
            output,
            kind,
            sigma,
            amount,
            origin,
            config,
            clear,
        )?,
        Commands::Probe { input, json } => probe_command(&input, json)?,
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "refract", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
