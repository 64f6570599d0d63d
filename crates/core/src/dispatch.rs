use std::fs;
use std::path::{Path, PathBuf};

use gpxview_routes::RouteKey;
use tracing::{info, warn};

use crate::adapters::Collaborators;
use crate::annotate::{AffordanceId, AffordanceKind};
use crate::error::ViewError;
use crate::view::{RouteView, SharedRouteView, ViewMode};

/// How a produced artifact reached the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shown {
    /// The viewer opened it.
    Opened(PathBuf),
    /// No viewer could; the path is reported instead.
    Fallback { path: PathBuf, reason: String },
}

impl Shown {
    pub fn path(&self) -> &Path {
        match self {
            Shown::Opened(path) | Shown::Fallback { path, .. } => path,
        }
    }
}

/// Result of activating an affordance or choosing a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Map(Shown),
    Elevation(Shown),
    /// The elevation image is already in the view; nothing ran.
    AlreadyRendered,
}

/// Routes user actions to the map and elevation collaborators.
/// （將使用者動作分派到地圖與高度剖面工具。）
pub struct ActionDispatcher<'a> {
    tools: &'a Collaborators,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(tools: &'a Collaborators) -> Self {
        Self { tools }
    }

    /// Generates the map page for `key` and opens it.
    pub fn show_map(&self, key: RouteKey, source: &Path) -> Result<Shown, ViewError> {
        let output = self.artifact_path(source, key, "html")?;
        self.tools.map.render_map(source, key, &output)?;
        info!(route = %key, path = %output.display(), "map generated");
        Ok(self.present(&output, ArtifactKind::Document))
    }

    /// Renders the elevation profile behind `id` once and inserts it below
    /// the affordance. Later activations return [`Activation::AlreadyRendered`].
    pub fn show_elevation(
        &self,
        view: &mut RouteView,
        id: AffordanceId,
    ) -> Result<Activation, ViewError> {
        if view.mode() != ViewMode::Rendered {
            return Err(ViewError::NotRendered);
        }
        let affordance = view.affordance(id)?;
        if affordance.already_rendered() {
            return Ok(Activation::AlreadyRendered);
        }
        let key = affordance.key;

        let output = self.artifact_path(view.source(), key, "png")?;
        self.tools
            .elevation
            .render_elevation(view.source(), key, &output)?;
        view.insert_image(id, &output)?;
        info!(route = %key, path = %output.display(), "elevation profile inserted");
        Ok(Activation::Elevation(
            self.present(&output, ArtifactKind::Image),
        ))
    }

    /// Elevation profile for a key, with or without an affordance in the view.
    pub fn show_elevation_for(
        &self,
        view: &mut RouteView,
        key: RouteKey,
    ) -> Result<Activation, ViewError> {
        if let Some(id) = view
            .affordance_for(key, AffordanceKind::ShowElevation)
            .map(|affordance| affordance.id)
        {
            return self.show_elevation(view, id);
        }
        let output = self.artifact_path(view.source(), key, "png")?;
        self.tools
            .elevation
            .render_elevation(view.source(), key, &output)?;
        Ok(Activation::Elevation(
            self.present(&output, ArtifactKind::Image),
        ))
    }

    /// Runs whatever action the affordance stands for.
    pub fn activate(&self, view: &mut RouteView, id: AffordanceId) -> Result<Activation, ViewError> {
        if view.mode() != ViewMode::Rendered {
            return Err(ViewError::NotRendered);
        }
        let (kind, key) = {
            let affordance = view.affordance(id)?;
            (affordance.kind, affordance.key)
        };
        match kind {
            AffordanceKind::ShowMap => self.show_map(key, view.source()).map(Activation::Map),
            AffordanceKind::ShowElevation => self.show_elevation(view, id),
        }
    }

    /// Activates under the document lock, so duplicate concurrent requests
    /// for one affordance run the tool once.
    pub fn activate_shared(
        &self,
        view: &SharedRouteView,
        id: AffordanceId,
    ) -> Result<Activation, ViewError> {
        let mut guard = view.lock();
        self.activate(&mut guard, id)
    }

    /// Header labels of the current text, for a selection menu.
    pub fn menu(&self, view: &RouteView) -> Result<Vec<String>, ViewError> {
        Ok(view
            .routes(&self.tools.scanner)?
            .into_iter()
            .map(|found| found.header_text)
            .collect())
    }

    /// Re-scans the view and maps a menu choice back to its key.
    pub fn resolve(&self, view: &RouteView, label: &str) -> Result<RouteKey, ViewError> {
        let wanted = label.trim();
        view.routes(&self.tools.scanner)?
            .into_iter()
            .find(|found| found.header_text == wanted)
            .map(|found| found.key)
            .ok_or_else(|| ViewError::UnknownLabel(wanted.to_string()))
    }

    /// Menu-driven dispatch: resolve `label` against fresh text, then act.
    pub fn select(
        &self,
        view: &mut RouteView,
        label: &str,
        kind: AffordanceKind,
    ) -> Result<Activation, ViewError> {
        let key = self.resolve(view, label)?;
        match kind {
            AffordanceKind::ShowMap => self.show_map(key, view.source()).map(Activation::Map),
            AffordanceKind::ShowElevation => self.show_elevation_for(view, key),
        }
    }

    fn artifact_path(
        &self,
        source: &Path,
        key: RouteKey,
        extension: &str,
    ) -> Result<PathBuf, ViewError> {
        let dir = &self.tools.artifact_dir;
        fs::create_dir_all(dir).map_err(|err| ViewError::io(dir, err))?;
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "route".to_string());
        Ok(dir.join(format!(
            "{stem}-track{}-segment{}.{extension}",
            key.track, key.segment
        )))
    }

    fn present(&self, path: &Path, kind: ArtifactKind) -> Shown {
        let shown = match kind {
            ArtifactKind::Document => self.tools.viewer.show_document(path),
            ArtifactKind::Image => self.tools.viewer.show_image(path),
        };
        match shown {
            Ok(()) => Shown::Opened(path.to_path_buf()),
            Err(unavailable) => {
                warn!(%unavailable, "showing artifact path instead");
                Shown::Fallback {
                    path: unavailable.path,
                    reason: unavailable.reason,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ArtifactKind {
    Document,
    Image,
}
