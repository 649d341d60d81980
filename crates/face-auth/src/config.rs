//! Engine configuration: built-in defaults, then an optional TOML file, then environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::decision::{DecisionMode, DecisionPolicy};
use crate::protocol::DetectionFallback;
use crate::simulated::SIMULATED_EMBEDDING_DIM;
use crate::types::{AuthError, AuthResult};

pub const ENV_THRESHOLD: &str = "FACIAL_AUTH_THRESHOLD";
pub const ENV_EMOTION_WEIGHT: &str = "FACIAL_EMOTION_WEIGHT";
pub const ENV_DECISION_MODE: &str = "FACIAL_DECISION_MODE";
pub const ENV_IDENTITY_FLOOR: &str = "FACIAL_IDENTITY_FLOOR";
pub const ENV_LENIENCY_FLOOR: &str = "FACIAL_LENIENCY_FLOOR";
pub const ENV_DETECTION_FALLBACK: &str = "FACIAL_DETECTION_FALLBACK";
pub const ENV_MODEL_DIR: &str = "FACIAL_MODEL_DIR";
pub const ENV_DATA_DIR: &str = "FACIAL_DATA_DIR";

pub const DEFAULT_VERIFY_DISTANCE: f32 = 0.40;
pub const DEFAULT_STREAM_MIN_FRAMES: usize = 5;
const DEFAULT_DATA_DIR: &str = ".face-auth";

/// Raw contents of a TOML configuration file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub threshold: Option<f32>,
    pub expression_weight: Option<f32>,
    pub decision_mode: Option<DecisionMode>,
    pub identity_floor: Option<f32>,
    pub leniency_floor: Option<f32>,
    pub identity_weight: Option<f32>,
    pub expression_bonus: Option<f32>,
    pub detection_fallback: Option<DetectionFallback>,
    pub model_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub embedding_dim: Option<usize>,
    pub verify_distance: Option<f32>,
    pub stream_min_frames: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub policy: DecisionPolicy,
    pub detection_fallback: DetectionFallback,
    pub model_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub embedding_dim: usize,
    pub verify_distance: f32,
    pub stream_min_frames: usize,
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(DEFAULT_DATA_DIR)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> AuthResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AuthError::InvalidConfig(format!("{key}: cannot parse '{value}'")))
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

impl EngineConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        let defaults = DecisionPolicy::default();
        Self {
            policy: DecisionPolicy {
                threshold: raw.threshold.unwrap_or(defaults.threshold),
                expression_weight: raw.expression_weight.unwrap_or(defaults.expression_weight),
                identity_floor: raw.identity_floor.unwrap_or(defaults.identity_floor),
                leniency_floor: raw.leniency_floor.unwrap_or(defaults.leniency_floor),
                identity_weight: raw.identity_weight.unwrap_or(defaults.identity_weight),
                expression_bonus: raw.expression_bonus.unwrap_or(defaults.expression_bonus),
                mode: raw.decision_mode.unwrap_or(defaults.mode),
            },
            detection_fallback: raw.detection_fallback.unwrap_or_default(),
            model_dir: raw.model_dir,
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
            embedding_dim: raw.embedding_dim.unwrap_or(SIMULATED_EMBEDDING_DIM),
            verify_distance: raw.verify_distance.unwrap_or(DEFAULT_VERIFY_DISTANCE),
            stream_min_frames: raw.stream_min_frames.unwrap_or(DEFAULT_STREAM_MIN_FRAMES),
        }
    }

    /// Parse a TOML file into its raw form.
    pub fn read_file(path: &Path) -> AuthResult<ConfigFile> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AuthError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            AuthError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Resolve the full configuration from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> AuthResult<Self> {
        let raw = match path {
            Some(p) => Self::read_file(p)?,
            None => ConfigFile::default(),
        };
        let mut config = Self::from_raw(raw);
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        if let Some(p) = path {
            tracing::info!("Configuration loaded from {}", p.display());
        }
        Ok(config)
    }

    /// Overlay environment variables, looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> AuthResult<()> {
        if let Some(v) = lookup(ENV_THRESHOLD) {
            self.policy.threshold = parse_env(ENV_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(ENV_EMOTION_WEIGHT) {
            self.policy.expression_weight = parse_env(ENV_EMOTION_WEIGHT, &v)?;
        }
        if let Some(v) = lookup(ENV_DECISION_MODE) {
            self.policy.mode = v.parse()?;
        }
        if let Some(v) = lookup(ENV_IDENTITY_FLOOR) {
            self.policy.identity_floor = parse_env(ENV_IDENTITY_FLOOR, &v)?;
        }
        if let Some(v) = lookup(ENV_LENIENCY_FLOOR) {
            self.policy.leniency_floor = parse_env(ENV_LENIENCY_FLOOR, &v)?;
        }
        if let Some(v) = lookup(ENV_DETECTION_FALLBACK) {
            self.detection_fallback = v.parse()?;
        }
        if let Some(v) = lookup(ENV_MODEL_DIR).filter(|v| !v.trim().is_empty()) {
            self.model_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> AuthResult<()> {
        self.policy.validate()?;
        if self.embedding_dim == 0 {
            return Err(AuthError::InvalidConfig(
                "embedding_dim must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.verify_distance) {
            return Err(AuthError::InvalidConfig(format!(
                "verify_distance must be within [0, 2], got {}",
                self.verify_distance
            )));
        }
        if self.stream_min_frames == 0 {
            return Err(AuthError::InvalidConfig(
                "stream_min_frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.policy, DecisionPolicy::default());
        assert_eq!(config.detection_fallback, DetectionFallback::Substitute);
        assert!(config.model_dir.is_none());
        assert_eq!(config.embedding_dim, 128);
        assert_eq!(config.stream_min_frames, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face-auth.toml");
        fs::write(
            &path,
            "threshold = 0.75\ndecision_mode = \"identity_gated\"\ndetection_fallback = \"fail_closed\"\nmodel_dir = \"/opt/models\"\n",
        )
        .unwrap();
        let config = EngineConfig::from_raw(EngineConfig::read_file(&path).unwrap());
        assert_eq!(config.policy.threshold, 0.75);
        assert_eq!(config.policy.mode, DecisionMode::IdentityGated);
        assert_eq!(config.detection_fallback, DetectionFallback::FailClosed);
        assert_eq!(config.model_dir, Some(PathBuf::from("/opt/models")));
        assert_eq!(config.policy.expression_weight, 0.3);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "treshold = 0.5\n").unwrap();
        assert!(matches!(
            EngineConfig::read_file(&path),
            Err(AuthError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let raw = ConfigFile {
            threshold: Some(0.7),
            ..ConfigFile::default()
        };
        let mut config = EngineConfig::from_raw(raw);
        let env: HashMap<&str, &str> = [
            (ENV_THRESHOLD, "0.65"),
            (ENV_EMOTION_WEIGHT, "0.4"),
            (ENV_DECISION_MODE, "identity_gated"),
            (ENV_DATA_DIR, "/tmp/face-data"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.policy.threshold, 0.65);
        assert_eq!(config.policy.expression_weight, 0.4);
        assert_eq!(config.policy.mode, DecisionMode::IdentityGated);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/face-data"));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env(|k| (k == ENV_THRESHOLD).then(|| "high".to_string()))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig(_)));
    }

    #[test]
    fn test_out_of_range_fails_validation() {
        let mut config = EngineConfig::default();
        config.policy.expression_weight = 1.2;
        assert!(config.validate().is_err());
        let mut config = EngineConfig::default();
        config.stream_min_frames = 0;
        assert!(config.validate().is_err());
    }
}
