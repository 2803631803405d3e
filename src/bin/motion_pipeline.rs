//! motion_pipeline - run motion detection over a video stream
//!
//! This binary:
//! 1. Loads configuration (file named by MOTION_PIPELINE_CONFIG, MOTION_* env, flags)
//! 2. Opens the input (`stub://name`, an image directory, or a video file)
//! 3. Runs the staged pipeline, or the sequential baseline with `--mode baseline`
//! 4. Writes annotated PNGs to `--output-dir`, or logs each frame
//! 5. Prints a run summary; Ctrl-C stops the run cleanly

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

use motion_pipeline::config::render_interval_from_fps;
use motion_pipeline::{
    run_sequential, source_from_config, AppConfig, CancellationToken, DropPolicy,
    FrameDiffDetector, ImageDirTarget, LogTarget, Pipeline, RenderTarget, RunReport,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Source, detector and sink on separate threads.
    Pipeline,
    /// One sequential loop on the main thread.
    Baseline,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect motion in a video stream")]
struct Args {
    /// Input: stub://<name>, a directory of images, or a video file.
    #[arg(long)]
    input: Option<String>,

    #[arg(long, value_enum, default_value_t = Mode::Pipeline)]
    mode: Mode,

    /// Capacity of each stage channel.
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// What a full channel does with new frames.
    #[arg(long, value_enum)]
    drop_policy: Option<DropPolicy>,

    /// Cap the render rate (0 renders as fast as frames arrive).
    #[arg(long, value_name = "FPS")]
    render_fps: Option<f64>,

    /// Smallest motion region kept, in pixels at detection scale.
    #[arg(long)]
    min_area: Option<u32>,

    /// Write annotated frames as PNGs into this directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,

    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE")]
    ui: ui::UiMode,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    summary_json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let ui = ui::Ui::new(args.ui, std::io::stderr().is_terminal());
    log::debug!("progress output: {}", if ui.is_pretty() { "pretty" } else { "plain" });

    let source = source_from_config(&config.source)?;
    let detector = FrameDiffDetector::new(config.pipeline.sensitivity.clone())?;
    let target: Box<dyn RenderTarget> = match &config.output_dir {
        Some(dir) => Box::new(ImageDirTarget::new(dir.clone())),
        None => Box::new(LogTarget::new()),
    };

    let mut step = ui.step(match args.mode {
        Mode::Pipeline => "running staged pipeline",
        Mode::Baseline => "running sequential baseline",
    });
    step.set_detail(&config.source.uri);

    let result = match args.mode {
        Mode::Pipeline => {
            let pipeline = Pipeline::new(config.pipeline.clone(), source, detector, target)?;
            install_ctrlc(pipeline.cancellation_token());
            pipeline.run()
        }
        Mode::Baseline => {
            let cancel = CancellationToken::new();
            install_ctrlc(cancel.clone());
            run_sequential(&config.pipeline, source, detector, target, &cancel)
        }
    };
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            step.fail();
            drop(step);
            return Err(e.into());
        }
    };
    drop(step);

    if args.summary_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::load()?;
    if let Some(input) = &args.input {
        config.source.uri = input.clone();
    }
    if let Some(frames) = args.frames {
        config.source.frame_limit = Some(frames);
    }
    if let Some(capacity) = args.channel_capacity {
        config.pipeline.channel_capacity = capacity;
    }
    if let Some(policy) = args.drop_policy {
        config.pipeline.drop_policy = policy;
    }
    if let Some(fps) = args.render_fps {
        config.pipeline.target_render_interval = render_interval_from_fps(fps)?;
    }
    if let Some(min_area) = args.min_area {
        config.pipeline.sensitivity.min_area = min_area;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = Some(dir.clone());
    }
    config.pipeline.validate()?;
    Ok(config)
}

fn install_ctrlc(cancel: CancellationToken) {
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping...");
        cancel.cancel();
    })
    .expect("error setting Ctrl-C handler");
}

fn print_summary(report: &RunReport) {
    println!(
        "frames: {} read, {} rendered, {} dropped, {} detection failures",
        report.source.frames_in,
        report.frames_rendered(),
        report.frames_dropped(),
        report.detector.transient_failures
    );
    println!(
        "elapsed: {:.2}s ({:.1} fps){}",
        report.elapsed.as_secs_f64(),
        report.throughput_fps(),
        if report.was_cancelled() { ", cancelled" } else { "" }
    );
    for (name, stats) in [
        ("frames", report.frames_channel),
        ("annotated", report.annotated_channel),
    ] {
        if let Some(stats) = stats {
            println!(
                "channel {}: capacity {}, high water {}, dropped {}",
                name, stats.capacity, stats.high_water, stats.dropped
            );
        }
    }
    let states: Vec<String> = report.transitions.iter().map(|s| s.to_string()).collect();
    println!("lifecycle: {}", states.join(" -> "));
}
