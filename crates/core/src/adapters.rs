//! Pluggable collaborators: converter, map and elevation renderers, viewer.
//! （可替換的協作元件：轉換器、地圖與高度剖面產生器、檢視器。）
//!
//! Each strategy is a trait with a default implementation that shells out
//! to an external program through `gpxview_runexec`. Plain closures also
//! implement the traits, which keeps tests free of real tools.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gpxview_routes::{RouteKey, RouteScanner, ScanError};
use gpxview_runexec::{run, RunError, ToolCommand};
use gpxview_settings::ViewerConfig;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ToolFailure;

/// Outcome of converting a GPX file to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionResult {
    Success(String),
    Failure(ToolFailure),
}

impl ConversionResult {
    /// Text to show: the converter output, or a one-line diagnostic.
    pub fn text(&self) -> String {
        match self {
            ConversionResult::Success(text) => text.clone(),
            ConversionResult::Failure(failure) => failure.diagnostic_line(),
        }
    }

    pub fn failure(&self) -> Option<&ToolFailure> {
        match self {
            ConversionResult::Success(_) => None,
            ConversionResult::Failure(failure) => Some(failure),
        }
    }
}

/// The viewer cannot present an artifact; callers report its path instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no viewer available for {path}: {reason}")]
pub struct DisplayUnavailable {
    pub path: PathBuf,
    pub reason: String,
}

pub trait Converter: Send + Sync {
    fn convert(&self, source: &Path) -> ConversionResult;
}

pub trait MapRenderer: Send + Sync {
    /// Writes a viewable document for `key` to `output`.
    fn render_map(&self, source: &Path, key: RouteKey, output: &Path) -> Result<(), ToolFailure>;
}

pub trait ElevationRenderer: Send + Sync {
    /// Writes an elevation-profile image for `key` to `output`.
    fn render_elevation(
        &self,
        source: &Path,
        key: RouteKey,
        output: &Path,
    ) -> Result<(), ToolFailure>;
}

pub trait Viewer: Send + Sync {
    fn show_document(&self, path: &Path) -> Result<(), DisplayUnavailable>;
    fn show_image(&self, path: &Path) -> Result<(), DisplayUnavailable>;
}

impl<F> Converter for F
where
    F: Fn(&Path) -> ConversionResult + Send + Sync,
{
    fn convert(&self, source: &Path) -> ConversionResult {
        self(source)
    }
}

impl<F> MapRenderer for F
where
    F: Fn(&Path, RouteKey, &Path) -> Result<(), ToolFailure> + Send + Sync,
{
    fn render_map(&self, source: &Path, key: RouteKey, output: &Path) -> Result<(), ToolFailure> {
        self(source, key, output)
    }
}

impl<F> ElevationRenderer for F
where
    F: Fn(&Path, RouteKey, &Path) -> Result<(), ToolFailure> + Send + Sync,
{
    fn render_elevation(
        &self,
        source: &Path,
        key: RouteKey,
        output: &Path,
    ) -> Result<(), ToolFailure> {
        self(source, key, output)
    }
}

/// Runs the pretty-printer with the source path as its last argument.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    pub command: ToolCommand,
    pub timeout: Option<Duration>,
}

impl Converter for CommandConverter {
    fn convert(&self, source: &Path) -> ConversionResult {
        let invocation = self
            .command
            .invocation()
            .arg(source)
            .with_timeout(self.timeout);
        match run(&invocation) {
            Ok(output) if output.success() => ConversionResult::Success(output.stdout_text()),
            Ok(output) => {
                let failure = ToolFailure::Exit {
                    tool: self.command.tool_name(),
                    state: output.state,
                    diagnostics: output.diagnostics(),
                };
                warn!(%failure, "conversion failed");
                ConversionResult::Failure(failure)
            }
            Err(err) => {
                let failure = invocation_failure(&self.command, err);
                warn!(%failure, "conversion failed");
                ConversionResult::Failure(failure)
            }
        }
    }
}

/// Runs a helper script as `<script> <source> <track> <segment> <output>`.
/// Used for both map pages and elevation images.
#[derive(Debug, Clone)]
pub struct RouteScript {
    pub command: ToolCommand,
    pub timeout: Option<Duration>,
}

impl RouteScript {
    fn render(&self, source: &Path, key: RouteKey, output: &Path) -> Result<(), ToolFailure> {
        let invocation = self
            .command
            .invocation()
            .arg(source)
            .arg(key.track.to_string())
            .arg(key.segment.to_string())
            .arg(output)
            .with_timeout(self.timeout);
        let result = run(&invocation).map_err(|err| invocation_failure(&self.command, err))?;
        if result.success() {
            debug!(route = %key, output = %output.display(), "route artifact written");
            Ok(())
        } else {
            Err(ToolFailure::Exit {
                tool: self.command.tool_name(),
                state: result.state,
                diagnostics: result.diagnostics(),
            })
        }
    }
}

impl MapRenderer for RouteScript {
    fn render_map(&self, source: &Path, key: RouteKey, output: &Path) -> Result<(), ToolFailure> {
        self.render(source, key, output)
    }
}

impl ElevationRenderer for RouteScript {
    fn render_elevation(
        &self,
        source: &Path,
        key: RouteKey,
        output: &Path,
    ) -> Result<(), ToolFailure> {
        self.render(source, key, output)
    }
}

/// Opens artifacts with an external opener such as `xdg-open`.
#[derive(Debug, Clone, Default)]
pub struct CommandViewer {
    pub command: Option<ToolCommand>,
    pub timeout: Option<Duration>,
}

impl CommandViewer {
    fn open(&self, path: &Path) -> Result<(), DisplayUnavailable> {
        let unavailable = |reason: String| DisplayUnavailable {
            path: path.to_path_buf(),
            reason,
        };
        let command = self
            .command
            .as_ref()
            .ok_or_else(|| unavailable("no viewer configured".to_string()))?;
        let invocation = command.invocation().arg(path).with_timeout(self.timeout);
        match run(&invocation) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(unavailable(format!(
                "{} ended with {}",
                command.tool_name(),
                output.state
            ))),
            Err(err) => Err(unavailable(err.to_string())),
        }
    }
}

impl Viewer for CommandViewer {
    fn show_document(&self, path: &Path) -> Result<(), DisplayUnavailable> {
        self.open(path)
    }

    fn show_image(&self, path: &Path) -> Result<(), DisplayUnavailable> {
        self.open(path)
    }
}

fn invocation_failure(command: &ToolCommand, err: RunError) -> ToolFailure {
    let message = match err {
        RunError::Spawn { source, .. } => source.to_string(),
        other => other.to_string(),
    };
    ToolFailure::Invocation {
        tool: command.tool_name(),
        message,
    }
}

/// The strategies a route view and its dispatcher work with.
/// （路線檢視與分派器所使用的策略組合。）
pub struct Collaborators {
    pub converter: Box<dyn Converter>,
    pub map: Box<dyn MapRenderer>,
    pub elevation: Box<dyn ElevationRenderer>,
    pub viewer: Box<dyn Viewer>,
    pub scanner: RouteScanner,
    pub artifact_dir: PathBuf,
}

impl Collaborators {
    /// Wires the command-backed defaults described by `config`.
    pub fn from_config(config: &ViewerConfig) -> Result<Self, ScanError> {
        let timeout = config.timeout();
        let scanner = match &config.header_pattern {
            Some(pattern) => RouteScanner::with_pattern(pattern)?,
            None => RouteScanner::default(),
        };
        Ok(Self {
            converter: Box::new(CommandConverter {
                command: config.converter.clone(),
                timeout,
            }),
            map: Box::new(RouteScript {
                command: config.map.clone(),
                timeout,
            }),
            elevation: Box::new(RouteScript {
                command: config.elevation.clone(),
                timeout,
            }),
            viewer: Box::new(CommandViewer {
                command: config.viewer.clone(),
                timeout,
            }),
            scanner,
            artifact_dir: config.artifact_dir(),
        })
    }

    pub fn with_converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converter = Box::new(converter);
        self
    }

    pub fn with_map(mut self, map: impl MapRenderer + 'static) -> Self {
        self.map = Box::new(map);
        self
    }

    pub fn with_elevation(mut self, elevation: impl ElevationRenderer + 'static) -> Self {
        self.elevation = Box::new(elevation);
        self
    }

    pub fn with_viewer(mut self, viewer: impl Viewer + 'static) -> Self {
        self.viewer = Box::new(viewer);
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }
}
