use std::io;
use std::path::PathBuf;

use gpxview_routes::ScanError;
use gpxview_runexec::ExitState;
use thiserror::Error;

use crate::annotate::AffordanceId;
use crate::view::SourceState;

/// Failure of one external collaborator, recovered at the adapter boundary.
/// （外部協作工具的失敗，由轉接層處理。）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolFailure {
    #[error("{tool} could not be run: {message}")]
    Invocation { tool: String, message: String },
    #[error("{tool} failed with {state}")]
    Exit {
        tool: String,
        state: ExitState,
        /// Captured stderr/stdout of the tool.
        diagnostics: String,
    },
}

impl ToolFailure {
    pub fn tool(&self) -> &str {
        match self {
            ToolFailure::Invocation { tool, .. } | ToolFailure::Exit { tool, .. } => tool,
        }
    }

    /// Whatever the tool printed, empty for invocation failures.
    pub fn diagnostics(&self) -> &str {
        match self {
            ToolFailure::Invocation { .. } => "",
            ToolFailure::Exit { diagnostics, .. } => diagnostics,
        }
    }

    /// The failure as exactly one line, suitable for replacing the view text.
    pub fn diagnostic_line(&self) -> String {
        self.to_string().replace(&['\r', '\n'][..], " ")
    }
}

/// Errors surfaced by the route view and the action dispatcher.
/// （路線檢視與動作分派器回報的錯誤。）
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("{tool} could not be run: {message}")]
    ToolInvocationFailure { tool: String, message: String },
    #[error("{tool} failed with {state}{}", format_diagnostics(.diagnostics))]
    ToolExitFailure {
        tool: String,
        state: ExitState,
        diagnostics: String,
    },
    #[error("refusing to overwrite GPX source {path} with the rendered view")]
    PersistRejected { path: PathBuf },
    #[error("GPX source {path} changed on disk since it was read ({state:?}); reload first")]
    SourceChanged { path: PathBuf, state: SourceState },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("no affordance with id {0}")]
    UnknownAffordance(AffordanceId),
    #[error("view shows raw GPX; actions are only available on the rendered view")]
    NotRendered,
    #[error("no route labelled '{0}' in the current view")]
    UnknownLabel(String),
    #[error("edit range {start}..{end} is not valid for a view of {len} bytes")]
    InvalidRange { start: usize, end: usize, len: usize },
}

fn format_diagnostics(diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(":\n{diagnostics}")
    }
}

impl ViewError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ViewError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<ToolFailure> for ViewError {
    fn from(failure: ToolFailure) -> Self {
        match failure {
            ToolFailure::Invocation { tool, message } => {
                ViewError::ToolInvocationFailure { tool, message }
            }
            ToolFailure::Exit {
                tool,
                state,
                diagnostics,
            } => ViewError::ToolExitFailure {
                tool,
                state,
                diagnostics,
            },
        }
    }
}
