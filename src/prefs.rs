use crate::config::BLOCK_SIZES;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PREFS_HEADER: &str = "# reactive_visuals prefs v1";

/// Session choices carried over to the next launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppPrefs {
    /// Monitor source id last captured from.
    pub device: Option<String>,
    pub preset: Option<String>,
    pub block_size: Option<u32>,
    /// Whether audio-reactive mode was on at exit.
    pub reactive: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefsError {
    #[error("prefs I/O: {0}")]
    Io(String),
    #[error("prefs line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl AppPrefs {
    /// Missing file or no path means "no prefs yet", not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, PrefsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(PrefsError::Io(format!("read {}: {e}", path.display()))),
        }
    }

    /// `key=value` lines; unknown keys are skipped so older builds can read newer files.
    pub fn parse(text: &str) -> Result<Self, PrefsError> {
        let mut prefs = Self::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(PrefsError::Parse {
                    line: idx + 1,
                    message: format!("expected key=value, got '{line}'"),
                });
            };
            prefs
                .set(key.trim(), value.trim())
                .map_err(|message| PrefsError::Parse {
                    line: idx + 1,
                    message,
                })?;
        }
        Ok(prefs)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let text = (!value.is_empty()).then(|| value.to_string());
        match key {
            "device" => self.device = text,
            "preset" => self.preset = text,
            "block_size" => {
                self.block_size = match text {
                    None => None,
                    Some(v) => match v.parse::<u32>() {
                        Ok(n) if BLOCK_SIZES.contains(&n) => Some(n),
                        _ => return Err(format!("unsupported block size '{v}'")),
                    },
                }
            }
            "reactive" => {
                self.reactive = match value {
                    "" => None,
                    "on" => Some(true),
                    "off" => Some(false),
                    other => return Err(format!("reactive must be on/off, got '{other}'")),
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let reactive = match self.reactive {
            Some(true) => "on",
            Some(false) => "off",
            None => "",
        };
        format!(
            "{PREFS_HEADER}\ndevice={}\npreset={}\nblock_size={}\nreactive={reactive}\n",
            self.device.as_deref().unwrap_or(""),
            self.preset.as_deref().unwrap_or(""),
            self.block_size.map(|b| b.to_string()).unwrap_or_default(),
        )
    }

    /// Writes through a sibling temp file so a crash never leaves half a file.
    pub fn save(&self, path: Option<&Path>) -> Result<(), PrefsError> {
        let Some(path) = path else {
            return Ok(());
        };
        let io = |what: &str, e: std::io::Error| PrefsError::Io(format!("{what} {}: {e}", path.display()));
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io("create dir for", e))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_text()).map_err(|e| io("write", e))?;
        std::fs::rename(&tmp, path).map_err(|e| io("replace", e))
    }
}

fn config_home() -> Option<PathBuf> {
    let non_empty = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
    non_empty("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| non_empty("HOME").map(|h| PathBuf::from(h).join(".config")))
}

pub fn prefs_storage_path() -> Option<PathBuf> {
    config_home().map(|d| d.join("reactive_visuals").join("prefs.txt"))
}
