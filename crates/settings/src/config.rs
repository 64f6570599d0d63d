use gpxview_runexec::ToolCommand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_VERSION: u32 = 1;
const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_CONVERTER: &str = "gpxinfo";
const DEFAULT_PYTHON: &str = "python3";
const MAP_SCRIPT: &str = "gpx2html.py";
const ELEVATION_SCRIPT: &str = "plot_track_elevation.py";

pub const ENV_CONFIG: &str = "GPXVIEW_CONFIG";
pub const ENV_CONVERTER: &str = "GPXVIEW_CONVERTER";
pub const ENV_PYTHON: &str = "GPXVIEW_PYTHON";
pub const ENV_SCRIPTS_DIR: &str = "GPXVIEW_SCRIPTS_DIR";
pub const ENV_MAP_SCRIPT: &str = "GPXVIEW_MAP_SCRIPT";
pub const ENV_ELEVATION_SCRIPT: &str = "GPXVIEW_ELEVATION_SCRIPT";
pub const ENV_VIEWER: &str = "GPXVIEW_VIEWER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize configuration {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write configuration {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Which external programs the viewer calls and how long it waits for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_converter")]
    pub converter: ToolCommand,
    #[serde(default = "default_map")]
    pub map: ToolCommand,
    #[serde(default = "default_elevation")]
    pub elevation: ToolCommand,
    /// Opener for produced documents and images; `null` disables viewing.
    #[serde(default = "default_viewer")]
    pub viewer: Option<ToolCommand>,
    /// Per-invocation limit; `0` waits indefinitely.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    /// Overrides the track/segment header regex.
    #[serde(default)]
    pub header_pattern: Option<String>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_converter() -> ToolCommand {
    ToolCommand::new(DEFAULT_CONVERTER)
}

fn default_map() -> ToolCommand {
    ToolCommand::new(DEFAULT_PYTHON).with_args([bundled_script(MAP_SCRIPT)])
}

fn default_elevation() -> ToolCommand {
    ToolCommand::new(DEFAULT_PYTHON).with_args([bundled_script(ELEVATION_SCRIPT)])
}

fn bundled_script(name: &str) -> String {
    match default_scripts_dir() {
        Some(dir) => dir.join(name).to_string_lossy().into_owned(),
        None => name.to_string(),
    }
}

/// Locates the bundled helper scripts.
///
/// Looks for `scripts/` beside the executable, then `../share/gpxview/scripts`
/// for installed layouts, then the `scripts/` directory of the source tree.
pub fn default_scripts_dir() -> Option<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    find_scripts_dir(exe_dir.as_deref())
}

fn find_scripts_dir(exe_dir: Option<&Path>) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = exe_dir {
        candidates.push(dir.join("scripts"));
        candidates.push(dir.join("..").join("share").join("gpxview").join("scripts"));
    }
    candidates.push(Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scripts"));
    candidates
        .into_iter()
        .find(|dir| dir.join(MAP_SCRIPT).is_file() && dir.join(ELEVATION_SCRIPT).is_file())
        .map(|dir| fs::canonicalize(&dir).unwrap_or(dir))
}

fn default_viewer() -> Option<ToolCommand> {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };
    Some(ToolCommand::new(opener))
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            converter: default_converter(),
            map: default_map(),
            elevation: default_elevation(),
            viewer: default_viewer(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            artifact_dir: None,
            header_pattern: None,
        }
    }
}

impl ViewerConfig {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = CONFIG_VERSION;
        }
        if self.converter.program.trim().is_empty() {
            self.converter = default_converter();
        }
        if self.map.program.trim().is_empty() {
            self.map = default_map();
        }
        if self.elevation.program.trim().is_empty() {
            self.elevation = default_elevation();
        }
        if self
            .viewer
            .as_ref()
            .is_some_and(|viewer| viewer.program.trim().is_empty())
        {
            self.viewer = None;
        }
        if self
            .header_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.trim().is_empty())
        {
            self.header_pattern = None;
        }
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(converter) = lookup(ENV_CONVERTER) {
            self.converter = ToolCommand::new(converter);
        }
        if let Some(python) = lookup(ENV_PYTHON) {
            self.map.program = python.clone();
            self.elevation.program = python;
        }
        if let Some(dir) = lookup(ENV_SCRIPTS_DIR) {
            let dir = PathBuf::from(dir);
            replace_script(&mut self.map, &dir.join(MAP_SCRIPT));
            replace_script(&mut self.elevation, &dir.join(ELEVATION_SCRIPT));
        }
        if let Some(script) = lookup(ENV_MAP_SCRIPT) {
            replace_script(&mut self.map, Path::new(&script));
        }
        if let Some(script) = lookup(ENV_ELEVATION_SCRIPT) {
            replace_script(&mut self.elevation, Path::new(&script));
        }
        if let Some(viewer) = lookup(ENV_VIEWER) {
            self.viewer = Some(ToolCommand::new(viewer));
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    /// Directory receiving generated maps and images.
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("gpxview"))
    }
}

// The script is the last configured argument; anything before it (interpreter
// flags) is kept.
fn replace_script(command: &mut ToolCommand, script: &Path) {
    let script = script.to_string_lossy().into_owned();
    match command.args.last_mut() {
        Some(last) => *last = script,
        None => command.args.push(script),
    }
}

/// Resolves the configuration path from the environment.
pub fn default_config_path<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(explicit) = lookup(ENV_CONFIG) {
        return Some(PathBuf::from(explicit));
    }
    let base = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("gpxview").join("config.json"))
}

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    data: ViewerConfig,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, config: ViewerConfig) -> Self {
        Self {
            path: path.into(),
            data: config,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut data = ViewerConfig::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: ViewerConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn into_config(self) -> ViewerConfig {
        self.data
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload =
            serde_json::to_string_pretty(&self.data).map_err(|source| ConfigError::Serialize {
                path: self.path.clone(),
                source,
            })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| ConfigError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_tools_and_scripts() {
        let mut config = ViewerConfig::default();
        config.apply_env(env(&[
            (ENV_CONVERTER, "/opt/bin/gpxinfo"),
            (ENV_PYTHON, "/usr/bin/python3.12"),
            (ENV_SCRIPTS_DIR, "/usr/share/gpxview"),
            (ENV_ELEVATION_SCRIPT, "/tmp/plot.py"),
        ]));
        assert_eq!(config.converter, ToolCommand::new("/opt/bin/gpxinfo"));
        assert_eq!(config.map.program, "/usr/bin/python3.12");
        assert_eq!(config.map.args, vec!["/usr/share/gpxview/gpx2html.py"]);
        assert_eq!(config.elevation.args, vec!["/tmp/plot.py"]);
    }

    #[test]
    fn default_scripts_resolve_to_the_bundled_directory() {
        let config = ViewerConfig::default();
        let map = PathBuf::from(config.map.args.last().unwrap());
        let elevation = PathBuf::from(config.elevation.args.last().unwrap());
        assert!(map.is_absolute(), "{}", map.display());
        assert!(map.is_file());
        assert!(map.ends_with(MAP_SCRIPT));
        assert!(elevation.ends_with(ELEVATION_SCRIPT));
        assert!(elevation.is_file());
    }

    #[test]
    fn scripts_beside_the_executable_win() {
        let temp = tempfile::tempdir().unwrap();
        let bin = temp.path().join("bin");
        let scripts = bin.join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join(MAP_SCRIPT), "").unwrap();
        fs::write(scripts.join(ELEVATION_SCRIPT), "").unwrap();

        let found = find_scripts_dir(Some(&bin)).unwrap();
        assert_eq!(found, fs::canonicalize(&scripts).unwrap());

        // An incomplete directory is skipped in favour of the source tree.
        fs::remove_file(scripts.join(ELEVATION_SCRIPT)).unwrap();
        let fallback = find_scripts_dir(Some(&bin)).unwrap();
        assert_ne!(fallback, fs::canonicalize(&scripts).unwrap());
        assert!(fallback.join(MAP_SCRIPT).is_file());
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = ViewerConfig::default();
        config.apply_env(env(&[(ENV_CONVERTER, "  ")]));
        assert_eq!(config.converter, default_converter());
    }

    #[test]
    fn zero_timeout_disables_the_limit() {
        let mut config = ViewerConfig::default();
        assert_eq!(config.timeout(), Some(Duration::from_secs(120)));
        config.timeout_seconds = 0;
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn config_path_prefers_explicit_then_xdg_then_home() {
        assert_eq!(
            default_config_path(env(&[(ENV_CONFIG, "/etc/gpxview.json"), ("HOME", "/home/a")])),
            Some(PathBuf::from("/etc/gpxview.json"))
        );
        assert_eq!(
            default_config_path(env(&[("XDG_CONFIG_HOME", "/xdg"), ("HOME", "/home/a")])),
            Some(PathBuf::from("/xdg/gpxview/config.json"))
        );
        assert_eq!(
            default_config_path(env(&[("HOME", "/home/a")])),
            Some(PathBuf::from("/home/a/.config/gpxview/config.json"))
        );
        assert_eq!(default_config_path(env(&[])), None);
    }
}
