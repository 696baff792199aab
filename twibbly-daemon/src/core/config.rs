use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use twibbly_printer::{
    ArtifactFormat, BackendKind, BackendOptions, GeometryError, LabelGeometry, Orientation,
};

/// Configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid label geometry: {0}")]
    Geometry(#[from] GeometryError),
}

/// Where the record store lives and which rows belong to us
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    pub key: String,
    pub session_id: String,
    pub table: String,
}

/// Label stock and rendering options
#[derive(Debug, Clone)]
pub struct LabelConfig {
    pub geometry: LabelGeometry,
    /// `None` follows the backend's preference
    pub format: Option<ArtifactFormat>,
    pub debug: bool,
    pub font_path: Option<PathBuf>,
    pub font_bold_path: Option<PathBuf>,
}

/// How new records are discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSourceKind {
    Poll,
    Realtime,
}

/// Daemon configuration
///
/// # Environment
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | STORE_URL (NEXT_PUBLIC_SUPABASE_URL) | required | record store base URL |
/// | STORE_KEY (NEXT_PUBLIC_SUPABASE_ANON_KEY) | required | API key |
/// | SESSION_ID | required | session whose entries are printed |
/// | STORE_TABLE | name_entries | table name |
/// | PRINTER_NAME | OS default | preferred printer |
/// | PRINT_BACKEND | auto | auto, gdi, cups, external |
/// | CUPS_SERVER | localhost:631 | CUPS host:port |
/// | EXTERNAL_PRINT_PROGRAM | SumatraPDF.exe / lp | external print program |
/// | EXTERNAL_PRINT_ARGS | platform template | `{printer}` `{file}` `{title}` tokens |
/// | LABEL_WIDTH_MM / LABEL_HEIGHT_MM | 52 / 60 | label size |
/// | MARGIN_MM | 3 | safe margin |
/// | LABEL_DPI | 300 | raster resolution |
/// | LABEL_ROTATE | false | text along the label height |
/// | LABEL_FORMAT | auto | auto, bitmap, pdf |
/// | LABEL_DEBUG | false | draw boundary outlines |
/// | LABEL_FONT_PATH / LABEL_FONT_BOLD_PATH | system fonts | TrueType/OpenType files |
/// | CHANGE_SOURCE | poll | poll or realtime |
/// | POLL_INTERVAL_SECONDS | 2 | poll cadence |
/// | RETRY_PAUSE_SECONDS | 3 | pause after a failed dispatch |
/// | WORK_DIR | ./twibbly-data | ledger and transient artifacts |
///
/// # Example
///
/// ```ignore
/// SESSION_ID=demo PRINTER_NAME="DYMO LabelWriter 450" cargo run --bin twibbly
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub printer_name: Option<String>,
    /// `None` picks the host's native backend
    pub backend: Option<BackendKind>,
    pub backend_options: BackendOptions,
    pub label: LabelConfig,
    pub change_source: ChangeSourceKind,
    pub poll_interval: Duration,
    pub retry_pause: Duration,
    pub work_dir: PathBuf,
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(get);

        let store = StoreConfig {
            url: env
                .first(&["STORE_URL", "NEXT_PUBLIC_SUPABASE_URL"])
                .ok_or(ConfigError::Missing("STORE_URL"))?
                .trim_end_matches('/')
                .to_string(),
            key: env
                .first(&["STORE_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"])
                .ok_or(ConfigError::Missing("STORE_KEY"))?,
            session_id: env
                .text("SESSION_ID")
                .ok_or(ConfigError::Missing("SESSION_ID"))?,
            table: env
                .text("STORE_TABLE")
                .unwrap_or_else(|| "name_entries".into()),
        };

        let backend = match env.text("PRINT_BACKEND") {
            None => None,
            Some(v) if v.eq_ignore_ascii_case("auto") => None,
            Some(v) => Some(v.parse::<BackendKind>().map_err(|reason| ConfigError::Invalid {
                key: "PRINT_BACKEND",
                value: v.clone(),
                reason,
            })?),
        };

        let mut backend_options = BackendOptions::default();
        if let Some(server) = env.text("CUPS_SERVER") {
            backend_options.cups_server = server;
        }
        if let Some(program) = env.text("EXTERNAL_PRINT_PROGRAM") {
            backend_options.external_program = program;
        }
        if let Some(args) = env.text("EXTERNAL_PRINT_ARGS") {
            backend_options.external_args = args.split_whitespace().map(str::to_string).collect();
        }

        let orientation = if env.flag("LABEL_ROTATE")? {
            Orientation::Rotated
        } else {
            Orientation::Upright
        };
        let geometry = LabelGeometry::new(
            env.number("LABEL_WIDTH_MM", 52.0)?,
            env.number("LABEL_HEIGHT_MM", 60.0)?,
            env.number("MARGIN_MM", 3.0)?,
        )?
        .with_dpi(env.number("LABEL_DPI", 300.0)?)?
        .with_orientation(orientation);

        let format = match env.text("LABEL_FORMAT").as_deref() {
            None | Some("auto") => None,
            Some("bitmap") | Some("png") => Some(ArtifactFormat::Bitmap),
            Some("pdf") | Some("document") => Some(ArtifactFormat::Document),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LABEL_FORMAT",
                    value: other.to_string(),
                    reason: "expected auto, bitmap or pdf".into(),
                });
            }
        };

        let label = LabelConfig {
            geometry,
            format,
            debug: env.flag("LABEL_DEBUG")?,
            font_path: env.text("LABEL_FONT_PATH").map(PathBuf::from),
            font_bold_path: env.text("LABEL_FONT_BOLD_PATH").map(PathBuf::from),
        };

        let change_source = match env.text("CHANGE_SOURCE").as_deref() {
            None | Some("poll") => ChangeSourceKind::Poll,
            Some("realtime") | Some("push") => ChangeSourceKind::Realtime,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CHANGE_SOURCE",
                    value: other.to_string(),
                    reason: "expected poll or realtime".into(),
                });
            }
        };

        let poll_interval = env.seconds("POLL_INTERVAL_SECONDS", 2.0)?;
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL_SECONDS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            store,
            printer_name: env.text("PRINTER_NAME"),
            backend,
            backend_options,
            label,
            change_source,
            poll_interval,
            retry_pause: env.seconds("RETRY_PAUSE_SECONDS", 3.0)?,
            work_dir: PathBuf::from(
                env.text("WORK_DIR")
                    .unwrap_or_else(|| "./twibbly-data".into()),
            ),
        })
    }

    /// Local ledger database file
    pub fn ledger_path(&self) -> PathBuf {
        self.work_dir.join("delivery.redb")
    }

    /// Directory for transient label files
    pub fn artifact_dir(&self) -> PathBuf {
        self.work_dir.join("spool")
    }
}

/// Logging options, readable before the rest of the configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub dir: Option<String>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            dir: std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty()),
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Trimmed, non-empty value
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.text(k))
    }

    fn number(&self, key: &'static str, default: f32) -> Result<f32, ConfigError> {
        match self.text(key) {
            None => Ok(default),
            Some(v) => v.parse::<f32>().map_err(|e| ConfigError::Invalid {
                key,
                value: v.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn seconds(&self, key: &'static str, default: f32) -> Result<Duration, ConfigError> {
        let secs = self.number(key, default)?;
        Duration::try_from_secs_f32(secs).map_err(|e| ConfigError::Invalid {
            key,
            value: secs.to_string(),
            reason: e.to_string(),
        })
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        match self.text(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
            Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
            Some(other) => Err(ConfigError::Invalid {
                key,
                value: other.to_string(),
                reason: "expected true or false".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("NEXT_PUBLIC_SUPABASE_URL", "https://demo.supabase.co/"),
        ("NEXT_PUBLIC_SUPABASE_ANON_KEY", "anon"),
        ("SESSION_ID", "s-1"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.store.url, "https://demo.supabase.co");
        assert_eq!(config.store.table, "name_entries");
        assert_eq!(config.label.geometry.width_mm(), 52.0);
        assert_eq!(config.label.geometry.height_mm(), 60.0);
        assert_eq!(config.label.geometry.margin_mm(), 3.0);
        assert_eq!(config.change_source, ChangeSourceKind::Poll);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.retry_pause, Duration::from_secs(3));
        assert!(config.backend.is_none());
        assert!(config.printer_name.is_none());
    }

    #[test]
    fn test_missing_session_is_fatal() {
        let err = load(&REQUIRED[..2]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SESSION_ID")));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PRINTER_NAME", "DYMO LabelWriter 450"),
            ("PRINT_BACKEND", "external"),
            ("EXTERNAL_PRINT_ARGS", "-print-to {printer} -silent {file}"),
            ("LABEL_WIDTH_MM", "36"),
            ("LABEL_HEIGHT_MM", "89"),
            ("MARGIN_MM", "2"),
            ("LABEL_ROTATE", "true"),
            ("LABEL_FORMAT", "pdf"),
            ("CHANGE_SOURCE", "realtime"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.printer_name.as_deref(), Some("DYMO LabelWriter 450"));
        assert_eq!(config.backend, Some(BackendKind::External));
        assert_eq!(config.backend_options.external_args.len(), 4);
        assert_eq!(config.label.geometry.orientation(), Orientation::Rotated);
        assert_eq!(config.label.format, Some(ArtifactFormat::Document));
        assert_eq!(config.change_source, ChangeSourceKind::Realtime);
    }

    #[test]
    fn test_invalid_geometry_is_config_error() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MARGIN_MM", "40"));
        assert!(matches!(load(&pairs), Err(ConfigError::Geometry(_))));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("LABEL_DPI", "abc"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "LABEL_DPI", .. })
        ));
    }
}
