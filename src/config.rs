use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::DropPolicy;
use crate::detect::MotionSensitivity;
use crate::error::PipelineError;
use crate::ingest::SourceConfig;

const DEFAULT_INPUT: &str = "stub://demo";
const DEFAULT_CHANNEL_CAPACITY: usize = 4;
const DEFAULT_CANCEL_POLL_MS: u64 = 50;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

// ----------------------------------------------------------------------------
// Runtime options
// ----------------------------------------------------------------------------

/// Options for one pipeline (or baseline) run.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Capacity of each of the two hand-off channels. Must be positive.
    pub channel_capacity: usize,
    /// What a full channel does with a new item.
    pub drop_policy: DropPolicy,
    /// Minimum spacing between renders; `None` renders as fast as frames arrive.
    pub target_render_interval: Option<Duration>,
    /// Longest a blocked stage goes without checking for cancellation.
    pub cancel_poll_interval: Duration,
    /// Consecutive per-frame failures before a stage gives up.
    pub max_consecutive_failures: u32,
    /// Soft per-frame detection deadline.
    pub detection_timeout: Option<Duration>,
    /// Passed through to the detection operation.
    pub sensitivity: MotionSensitivity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            drop_policy: DropPolicy::Block,
            target_render_interval: None,
            cancel_poll_interval: Duration::from_millis(DEFAULT_CANCEL_POLL_MS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            detection_timeout: None,
            sensitivity: MotionSensitivity::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.channel_capacity == 0 {
            return Err(PipelineError::config(
                "channel_capacity must be a positive integer",
            ));
        }
        if self.cancel_poll_interval.is_zero() {
            return Err(PipelineError::config(
                "cancel_poll_interval must be greater than zero",
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(PipelineError::config(
                "max_consecutive_failures must be at least 1",
            ));
        }
        if self.target_render_interval.is_some_and(|d| d.is_zero()) {
            return Err(PipelineError::config(
                "target_render_interval must be greater than zero when set",
            ));
        }
        if self.detection_timeout.is_some_and(|d| d.is_zero()) {
            return Err(PipelineError::config(
                "detection_timeout must be greater than zero when set",
            ));
        }
        self.sensitivity
            .validate()
            .map_err(|e| PipelineError::config(format!("detection sensitivity: {:#}", e)))
    }
}

/// Render interval for a target frame rate. Zero means unpaced.
pub fn render_interval_from_fps(fps: f64) -> Result<Option<Duration>, PipelineError> {
    if !fps.is_finite() || fps < 0.0 {
        return Err(PipelineError::config(format!(
            "render fps must be a finite value >= 0, got {}",
            fps
        )));
    }
    if fps == 0.0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs_f64(1.0 / fps)))
}

// ----------------------------------------------------------------------------
// Application config (file + environment)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    input: Option<String>,
    frames: Option<u64>,
    output_dir: Option<PathBuf>,
    pipeline: Option<PipelineConfigFile>,
    detection: Option<MotionSensitivity>,
    synthetic: Option<SyntheticConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    channel_capacity: Option<usize>,
    drop_policy: Option<DropPolicy>,
    render_fps: Option<f64>,
    cancel_poll_ms: Option<u64>,
    max_consecutive_failures: Option<u32>,
    detection_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SyntheticConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    seed: Option<u64>,
}

/// Everything the `motion_pipeline` binary needs to build a run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    /// Write annotated PNGs here; `None` logs frames instead.
    pub output_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Defaults, then the file named by `MOTION_PIPELINE_CONFIG`, then `MOTION_*`
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MOTION_PIPELINE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let pipeline_file = file.pipeline.unwrap_or_default();
        let synthetic = file.synthetic.unwrap_or_default();
        let source = SourceConfig {
            uri: file.input.unwrap_or_else(|| DEFAULT_INPUT.to_string()),
            frame_limit: file.frames,
            width: synthetic.width.unwrap_or(DEFAULT_WIDTH),
            height: synthetic.height.unwrap_or(DEFAULT_HEIGHT),
            seed: synthetic.seed.unwrap_or(0),
        };
        let target_render_interval = match pipeline_file.render_fps {
            Some(fps) => render_interval_from_fps(fps)?,
            None => None,
        };
        let pipeline = PipelineConfig {
            channel_capacity: pipeline_file
                .channel_capacity
                .unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            drop_policy: pipeline_file.drop_policy.unwrap_or_default(),
            target_render_interval,
            cancel_poll_interval: Duration::from_millis(
                pipeline_file
                    .cancel_poll_ms
                    .unwrap_or(DEFAULT_CANCEL_POLL_MS),
            ),
            max_consecutive_failures: pipeline_file
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            detection_timeout: pipeline_file
                .detection_timeout_ms
                .map(Duration::from_millis),
            sensitivity: file.detection.unwrap_or_default(),
        };
        Ok(Self {
            source,
            pipeline,
            output_dir: file.output_dir,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(input) = std::env::var("MOTION_INPUT") {
            if !input.trim().is_empty() {
                self.source.uri = input;
            }
        }
        if let Ok(capacity) = std::env::var("MOTION_CHANNEL_CAPACITY") {
            self.pipeline.channel_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("MOTION_CHANNEL_CAPACITY must be a positive integer"))?;
        }
        if let Ok(policy) = std::env::var("MOTION_DROP_POLICY") {
            self.pipeline.drop_policy = policy.parse()?;
        }
        if let Ok(fps) = std::env::var("MOTION_RENDER_FPS") {
            let fps: f64 = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("MOTION_RENDER_FPS must be a number"))?;
            self.pipeline.target_render_interval = render_interval_from_fps(fps)?;
        }
        if let Ok(min_area) = std::env::var("MOTION_MIN_AREA") {
            self.pipeline.sensitivity.min_area = min_area
                .trim()
                .parse()
                .map_err(|_| anyhow!("MOTION_MIN_AREA must be an integer number of pixels"))?;
        }
        if let Ok(dir) = std::env::var("MOTION_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("input must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
