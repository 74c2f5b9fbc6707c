use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Accepted `camera.fps` range. Also bounds the polling interval.
const MIN_FPS: f64 = 0.1;
const MAX_FPS: f64 = 120.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tempo: TempoConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_command")]
    pub command: String,
    #[serde(default = "default_extractor_args")]
    pub args: Vec<String>,
    #[serde(default = "default_min_hand_confidence")]
    pub min_hand_confidence: f32,
    #[serde(default = "default_max_hands")]
    pub max_hands: usize,
    #[serde(default = "default_extract_timeout_ms")]
    pub timeout_ms: u64,
}

/// Thresholds for the rule-based gesture classifier.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Samples whose confidence falls below this are labelled `None`.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// PIP joint angle at or above which a finger counts as fully extended.
    #[serde(default = "default_extended_angle")]
    pub extended_angle_deg: f32,
    /// PIP joint angle at or below which a finger counts as fully curled.
    #[serde(default = "default_curled_angle")]
    pub curled_angle_deg: f32,
    /// Maximum tilt from vertical for an open palm to read as up or down.
    #[serde(default = "default_orientation_tolerance")]
    pub orientation_tolerance_deg: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_rate_step")]
    pub rate_step: f64,
    #[serde(default = "default_min_rate")]
    pub min_rate: f64,
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Consecutive extraction failures before the classifier is reported degraded.
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TempoConfig {
    #[serde(default = "default_trajectory_len")]
    pub trajectory_len: usize,
    #[serde(default = "default_movement_threshold")]
    pub movement_threshold: f32,
    #[serde(default = "default_curvature_threshold")]
    pub curvature_threshold: f32,
    #[serde(default = "default_speed_threshold")]
    pub speed_threshold: f32,
    #[serde(default = "default_speedy_threshold")]
    pub speedy_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            command: default_extractor_command(),
            args: default_extractor_args(),
            min_hand_confidence: default_min_hand_confidence(),
            max_hands: default_max_hands(),
            timeout_ms: default_extract_timeout_ms(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            extended_angle_deg: default_extended_angle(),
            curled_angle_deg: default_curled_angle(),
            orientation_tolerance_deg: default_orientation_tolerance(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            rate_step: default_rate_step(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            degraded_after: default_degraded_after(),
        }
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            trajectory_len: default_trajectory_len(),
            movement_threshold: default_movement_threshold(),
            curvature_threshold: default_curvature_threshold(),
            speed_threshold: default_speed_threshold(),
            speedy_threshold: default_speedy_threshold(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.camera.mode.as_str(), "mjpeg" | "polling") {
            return Err(ConfigError::Invalid(format!(
                "camera.mode must be 'mjpeg' or 'polling', got '{}'",
                self.camera.mode
            )));
        }
        if !(MIN_FPS..=MAX_FPS).contains(&self.camera.fps) {
            return Err(ConfigError::Invalid(format!(
                "camera.fps must be within [{MIN_FPS}, {MAX_FPS}], got {}",
                self.camera.fps
            )));
        }
        if self.extractor.command.trim().is_empty() {
            return Err(ConfigError::Invalid("extractor.command must not be empty".into()));
        }
        if self.extractor.max_hands == 0 {
            return Err(ConfigError::Invalid("extractor.max_hands must be at least 1".into()));
        }
        let t = &self.tempo;
        for (name, value) in [
            ("extractor.min_hand_confidence", self.extractor.min_hand_confidence),
            ("classifier.min_confidence", self.classifier.min_confidence),
            ("tempo.movement_threshold", t.movement_threshold),
            ("tempo.curvature_threshold", t.curvature_threshold),
            ("tempo.speed_threshold", t.speed_threshold),
            ("tempo.speedy_threshold", t.speedy_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be within [0, 1]")));
            }
        }
        if self.classifier.curled_angle_deg >= self.classifier.extended_angle_deg {
            return Err(ConfigError::Invalid(
                "classifier.curled_angle_deg must be below extended_angle_deg".into(),
            ));
        }
        let p = &self.playback;
        if !(p.min_rate > 0.0) || !(p.rate_step > 0.0) || p.min_rate > p.max_rate {
            return Err(ConfigError::Invalid(format!(
                "playback rates must satisfy 0 < min_rate <= max_rate and rate_step > 0 \
                 (min_rate={}, max_rate={}, rate_step={})",
                p.min_rate, p.max_rate, p.rate_step
            )));
        }
        if t.speed_threshold >= t.speedy_threshold {
            return Err(ConfigError::Invalid(
                "tempo.speed_threshold must be below speedy_threshold".into(),
            ));
        }
        if t.trajectory_len < 3 {
            return Err(ConfigError::Invalid("tempo.trajectory_len must be at least 3".into()));
        }
        if self.pipeline.degraded_after == 0 {
            return Err(ConfigError::Invalid("pipeline.degraded_after must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_fps() -> f64 {
    15.0
}
fn default_extractor_command() -> String {
    "python3".into()
}
fn default_extractor_args() -> Vec<String> {
    vec!["models/hand_landmarks.py".into()]
}
fn default_min_hand_confidence() -> f32 {
    0.7
}
fn default_max_hands() -> usize {
    2
}
fn default_extract_timeout_ms() -> u64 {
    500
}
fn default_min_confidence() -> f32 {
    0.6
}
fn default_extended_angle() -> f32 {
    160.0
}
fn default_curled_angle() -> f32 {
    90.0
}
fn default_orientation_tolerance() -> f32 {
    45.0
}
fn default_window_ms() -> u64 {
    300
}
fn default_rate_step() -> f64 {
    0.25
}
fn default_min_rate() -> f64 {
    0.25
}
fn default_max_rate() -> f64 {
    2.0
}
fn default_degraded_after() -> u32 {
    3
}
fn default_trajectory_len() -> usize {
    10
}
fn default_movement_threshold() -> f32 {
    0.03
}
fn default_curvature_threshold() -> f32 {
    0.05
}
fn default_speed_threshold() -> f32 {
    0.125
}
fn default_speedy_threshold() -> f32 {
    0.25
}
fn default_bind() -> String {
    "127.0.0.1:8080".into()
}
fn default_log_level() -> String {
    "info".into()
}
