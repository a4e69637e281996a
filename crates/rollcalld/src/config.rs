use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid bind address {0:?}")]
    Bind(String),
    #[error("{name} must be a finite distance above zero, got {value}")]
    Threshold { name: &'static str, value: f32 },
}

/// Where subject records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// One JSON file per subject under `<data_dir>/descriptors`.
    Fs,
    /// In-process only; lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fs" | "file" | "files" => Ok(Self::Fs),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:3000).
    pub bind: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root for descriptor files and face images.
    pub data_dir: PathBuf,
    pub storage: StorageBackend,
    /// Length every descriptor must have.
    pub descriptor_dim: usize,
    /// Enrollment is refused when any stored descriptor is closer than this.
    ///
    /// The 0.6 default is the Euclidean cut-off used with 128-d face-api
    /// descriptors. The bundled ArcFace model emits unit-length 512-d vectors,
    /// where 0.6 means cosine similarity of at least 0.82; that is strict, and
    /// deployments using it typically want 1.0 to 1.1 (cosine 0.5 to 0.4).
    pub duplicate_threshold: f32,
    /// Login matches only below this distance. Calibrated like
    /// [`Config::duplicate_threshold`].
    pub recognition_threshold: f32,
    /// Whether accepted captures are written to the faces directory.
    pub store_images: bool,
    /// Passphrase for sealing stored images; plaintext PNG when unset.
    pub image_key: Option<String>,
    /// Maximum request body size in MiB.
    pub body_limit_mb: usize,
}

/// Optional TOML overlay, named by `ROLLCALL_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub storage: Option<String>,
    pub descriptor_dim: Option<usize>,
    pub duplicate_threshold: Option<f32>,
    pub recognition_threshold: Option<f32>,
    pub store_images: Option<bool>,
    pub image_key: Option<String>,
    pub body_limit_mb: Option<usize>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load from `ROLLCALL_*` environment variables, over the optional
    /// `ROLLCALL_CONFIG` file, over defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => {
                tracing::info!(path = %path, "loading config file");
                FileConfig::from_path(Path::new(&path))?
            }
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge defaults, file values, and environment lookups (highest precedence).
    ///
    /// Malformed environment values fall back to the lower layer.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = env("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| {
                let data_home = env("XDG_DATA_HOME").map(PathBuf::from).unwrap_or_else(|| {
                    let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                });
                data_home.join("rollcall")
            });

        let model_dir = env("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let bind_raw = file.bind.unwrap_or_else(|| DEFAULT_BIND.to_string());
        let file_bind: SocketAddr = bind_raw.parse().map_err(|_| ConfigError::Bind(bind_raw))?;

        let storage = env("ROLLCALL_STORAGE")
            .or(file.storage)
            .map(|s| {
                s.parse().unwrap_or_else(|_| {
                    tracing::warn!(value = %s, "unknown storage backend, using fs");
                    StorageBackend::Fs
                })
            })
            .unwrap_or(StorageBackend::Fs);

        let duplicate_threshold = threshold(
            "duplicate_threshold",
            env_parse(&env, "ROLLCALL_DUPLICATE_THRESHOLD").or(file.duplicate_threshold),
        )?;
        let recognition_threshold = threshold(
            "recognition_threshold",
            env_parse(&env, "ROLLCALL_RECOGNITION_THRESHOLD").or(file.recognition_threshold),
        )?;

        Ok(Self {
            bind: env_parse(&env, "ROLLCALL_BIND").unwrap_or(file_bind),
            model_dir,
            data_dir,
            storage,
            descriptor_dim: env_parse(&env, "ROLLCALL_DESCRIPTOR_DIM")
                .or(file.descriptor_dim)
                .unwrap_or(512),
            duplicate_threshold,
            recognition_threshold,
            store_images: env("ROLLCALL_STORE_IMAGES")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .or(file.store_images)
                .unwrap_or(true),
            image_key: env("ROLLCALL_IMAGE_KEY")
                .or(file.image_key)
                .filter(|k| !k.is_empty()),
            body_limit_mb: env_parse(&env, "ROLLCALL_BODY_LIMIT_MB")
                .or(file.body_limit_mb)
                .unwrap_or(10),
        })
    }

    pub fn descriptors_dir(&self) -> PathBuf {
        self.data_dir.join("descriptors")
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.data_dir.join("faces")
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb.saturating_mul(1024 * 1024)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

/// Rejects thresholds under which nothing could ever match.
fn threshold(name: &'static str, value: Option<f32>) -> Result<f32, ConfigError> {
    let value = value.unwrap_or(DEFAULT_THRESHOLD);
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::Threshold { name, value })
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed value");
            None
        }
    }
}
