use std::fs::{self, Metadata};
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use gpxview_routes::{build_outline, OutlineEntry, RouteKey, RouteMatch, RouteScanner};
use tracing::{debug, info, warn};

use crate::adapters::Collaborators;
use crate::annotate::{annotate, line_end, Affordance, AffordanceId, AffordanceKind};
use crate::error::{ToolFailure, ViewError};

/// 目前顯示的是轉換後文字還是原始 GPX。 / Whether the view shows converter output or raw GPX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Rendered,
    Raw,
}

/// 來源檔案自開啟後的狀態。 / State of the source file since it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Unchanged,
    Modified,
    Removed,
}

/// 插入在高度剖面按鈕下方的圖片。 / Image line inserted below an elevation affordance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub affordance: AffordanceId,
    pub key: RouteKey,
    pub path: PathBuf,
    /// Byte offset of the image line in the current text.
    pub position: usize,
}

impl InlineImage {
    pub fn line(indent: &str, path: &Path) -> String {
        format!("{indent}[Elevation profile: {}]\n", path.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileSignature {
    len: u64,
    modified_nanos: Option<u128>,
}

impl FileSignature {
    fn from_metadata(metadata: &Metadata) -> Self {
        let modified_nanos = metadata.modified().ok().and_then(system_time_to_nanos);
        Self {
            len: metadata.len(),
            modified_nanos,
        }
    }
}

/// 以唯讀方式檢視 GPX 檔案的文件模型。 / Document model presenting a GPX file without ever writing to it.
///
/// The raw bytes are captured on open so that reverting never depends on
/// the file still being readable.
#[derive(Debug, Clone)]
pub struct RouteView {
    source: PathBuf,
    raw: Vec<u8>,
    on_disk_signature: Option<FileSignature>,
    mode: ViewMode,
    text: String,
    affordances: Vec<Affordance>,
    images: Vec<InlineImage>,
    conversion_failure: Option<ToolFailure>,
    is_dirty: bool,
}

impl RouteView {
    /// 讀取來源並產生轉換後的檢視。 / Reads the source and renders it through the converter.
    pub fn open(source: impl AsRef<Path>, tools: &Collaborators) -> Result<Self, ViewError> {
        let source = source.as_ref().to_path_buf();
        let (raw, signature) = read_source(&source)?;
        let mut view = Self {
            source,
            raw,
            on_disk_signature: Some(signature),
            mode: ViewMode::Rendered,
            text: String::new(),
            affordances: Vec::new(),
            images: Vec::new(),
            conversion_failure: None,
            is_dirty: false,
        };
        view.render(tools)?;
        Ok(view)
    }

    /// 只讀取原始 GPX，不經過轉換器。 / Opens the source in raw mode without running the converter.
    pub fn open_raw(source: impl AsRef<Path>) -> Result<Self, ViewError> {
        let source = source.as_ref().to_path_buf();
        let (raw, signature) = read_source(&source)?;
        Ok(Self {
            text: String::from_utf8_lossy(&raw).into_owned(),
            source,
            raw,
            on_disk_signature: Some(signature),
            mode: ViewMode::Raw,
            affordances: Vec::new(),
            images: Vec::new(),
            conversion_failure: None,
            is_dirty: false,
        })
    }

    /// 重新讀取來源並重新轉換，捨棄舊的按鈕與圖片。 / Re-reads and re-converts the source, discarding old affordances and images.
    pub fn reload(&mut self, tools: &Collaborators) -> Result<(), ViewError> {
        let (raw, signature) = read_source(&self.source)?;
        self.raw = raw;
        self.on_disk_signature = Some(signature);
        self.render(tools)
    }

    fn render(&mut self, tools: &Collaborators) -> Result<(), ViewError> {
        let conversion = tools.converter.convert(&self.source);
        let text = conversion.text();
        let matches = tools.scanner.scan(&text)?;
        let annotated = annotate(&text, &matches);
        debug!(
            source = %self.source.display(),
            routes = matches.len(),
            "rendered view"
        );

        self.conversion_failure = conversion.failure().cloned();
        self.text = annotated.text;
        self.affordances = annotated.affordances;
        self.images.clear();
        self.mode = ViewMode::Rendered;
        self.is_dirty = false;
        Ok(())
    }

    /// 回到原始 GPX 內容，捨棄未儲存的修改。 / Shows the original GPX bytes again, dropping unsaved edits.
    pub fn revert_to_raw(&mut self) -> &[u8] {
        self.text = String::from_utf8_lossy(&self.raw).into_owned();
        self.affordances.clear();
        self.images.clear();
        self.mode = ViewMode::Raw;
        self.is_dirty = false;
        &self.raw
    }

    /// 將目前內容寫到指定路徑；拒絕以轉換後文字覆寫來源。 / Writes the view to `target`; rendered text may never replace the source.
    ///
    /// A raw view goes back over its source only when edited, and only while
    /// the file on disk is still the one that was read.
    pub fn persist_to(&mut self, target: impl AsRef<Path>) -> Result<(), ViewError> {
        let target = target.as_ref();
        let over_source = same_file(target, &self.source);
        if self.mode == ViewMode::Rendered && over_source {
            warn!(path = %target.display(), "rejected write of rendered view over its source");
            return Err(ViewError::PersistRejected {
                path: target.to_path_buf(),
            });
        }
        if over_source {
            let state = self.check_source_state()?;
            if state != SourceState::Unchanged {
                warn!(path = %target.display(), ?state, "source changed since it was read");
                return Err(ViewError::SourceChanged {
                    path: target.to_path_buf(),
                    state,
                });
            }
            if !self.is_dirty {
                debug!(path = %target.display(), "raw view unchanged; nothing to write");
                return Ok(());
            }
        }

        let bytes = if self.mode == ViewMode::Raw && !self.is_dirty {
            self.raw.as_slice()
        } else {
            self.text.as_bytes()
        };
        fs::write(target, bytes).map_err(|err| ViewError::io(target, err))?;
        info!(path = %target.display(), "view written");
        self.is_dirty = false;
        Ok(())
    }

    /// 取代一段文字並調整之後的按鈕位置。 / Replaces `range` with `replacement`, shifting later affordances.
    ///
    /// Affordances and images overlapping the edited range are dropped.
    pub fn edit(&mut self, range: Range<usize>, replacement: &str) -> Result<(), ViewError> {
        let len = self.text.len();
        if range.start > range.end
            || range.end > len
            || !self.text.is_char_boundary(range.start)
            || !self.text.is_char_boundary(range.end)
        {
            return Err(ViewError::InvalidRange {
                start: range.start,
                end: range.end,
                len,
            });
        }

        self.text.replace_range(range.clone(), replacement);
        let shift = |position: usize| position - (range.end - range.start) + replacement.len();
        let label_end = |affordance: &Affordance| affordance.span().end;

        self.affordances.retain_mut(|affordance| {
            if affordance.position >= range.end {
                affordance.position = shift(affordance.position);
                true
            } else {
                label_end(affordance) <= range.start
            }
        });
        let live: Vec<AffordanceId> = self.affordances.iter().map(|a| a.id).collect();
        self.images.retain_mut(|image| {
            if !live.contains(&image.affordance) {
                return false;
            }
            if image.position >= range.end {
                image.position = shift(image.position);
                true
            } else {
                image.position < range.start
                    && line_end(&self.text, image.position) <= range.start
            }
        });
        self.is_dirty = true;
        Ok(())
    }

    /// 在高度剖面按鈕的那一行之後插入圖片行。 / Inserts the image line right below an elevation affordance.
    ///
    /// Not a user edit: the dirty flag is left as it was.
    pub(crate) fn insert_image(
        &mut self,
        id: AffordanceId,
        path: &Path,
    ) -> Result<InlineImage, ViewError> {
        let affordance = self.affordance(id)?.clone();
        let line_start = self.text[..affordance.position]
            .rfind('\n')
            .map_or(0, |index| index + 1);
        let indent: String = self.text[line_start..]
            .chars()
            .take_while(|ch| *ch == ' ' || *ch == '\t')
            .collect();
        let at = line_end(&self.text, affordance.position);
        let mut line = InlineImage::line(&indent, path);
        if !self.text[..at].ends_with('\n') {
            line.insert(0, '\n');
        }
        self.text.insert_str(at, &line);

        for other in &mut self.affordances {
            if other.position >= at {
                other.position += line.len();
            }
            if other.id == id {
                other.already_rendered = true;
            }
        }
        for image in &mut self.images {
            if image.position >= at {
                image.position += line.len();
            }
        }
        let image = InlineImage {
            affordance: id,
            key: affordance.key,
            path: path.to_path_buf(),
            position: if line.starts_with('\n') { at + 1 } else { at },
        };
        self.images.push(image.clone());
        self.images.sort_by_key(|image| image.position);
        Ok(image)
    }

    /// 以目前文字重新掃描路線標頭。 / Scans the current text afresh.
    pub fn routes(&self, scanner: &RouteScanner) -> Result<Vec<RouteMatch>, ViewError> {
        if self.mode == ViewMode::Raw {
            return Ok(Vec::new());
        }
        Ok(scanner.scan(&self.text)?)
    }

    /// 大綱面板使用的 (標籤, 位置) 清單。 / `(label, position)` entries for an outline panel.
    pub fn outline(&self, scanner: &RouteScanner) -> Result<Vec<OutlineEntry>, ViewError> {
        let matches = self.routes(scanner)?;
        let file_name = self
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(build_outline(&self.text, file_name.as_deref(), &matches))
    }

    /// 檢查來源檔案是否在開啟後被修改。 / Checks whether the source changed on disk since it was read.
    pub fn check_source_state(&self) -> Result<SourceState, ViewError> {
        match fs::metadata(&self.source) {
            Ok(metadata) => {
                let signature = FileSignature::from_metadata(&metadata);
                if self
                    .on_disk_signature
                    .map_or(true, |stored| stored != signature)
                {
                    Ok(SourceState::Modified)
                } else {
                    Ok(SourceState::Unchanged)
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(SourceState::Removed),
            Err(err) => Err(ViewError::io(&self.source, err)),
        }
    }

    pub fn affordance(&self, id: AffordanceId) -> Result<&Affordance, ViewError> {
        self.affordances
            .iter()
            .find(|affordance| affordance.id == id)
            .ok_or(ViewError::UnknownAffordance(id))
    }

    /// First affordance of `kind` bound to `key`, if the view has one.
    pub fn affordance_for(&self, key: RouteKey, kind: AffordanceKind) -> Option<&Affordance> {
        self.affordances
            .iter()
            .find(|affordance| affordance.key == key && affordance.kind == kind)
    }

    /// Affordance whose label covers `offset`.
    pub fn affordance_at(&self, offset: usize) -> Option<&Affordance> {
        self.affordances
            .iter()
            .find(|affordance| affordance.span().contains(&offset))
    }

    pub fn affordances(&self) -> &[Affordance] {
        &self.affordances
    }

    pub fn images(&self) -> &[InlineImage] {
        &self.images
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Why the last conversion fell back to a diagnostic line.
    pub fn conversion_failure(&self) -> Option<&ToolFailure> {
        self.conversion_failure.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }
}

/// 以文件層級的鎖保護的共享檢視。 / A view shared behind a document-scoped lock.
#[derive(Debug, Clone)]
pub struct SharedRouteView {
    inner: Arc<Mutex<RouteView>>,
}

impl SharedRouteView {
    pub fn new(view: RouteView) -> Self {
        Self {
            inner: Arc::new(Mutex::new(view)),
        }
    }

    /// Locks the document; a poisoned lock still yields the view.
    pub fn lock(&self) -> MutexGuard<'_, RouteView> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_source(path: &Path) -> Result<(Vec<u8>, FileSignature), ViewError> {
    let raw = fs::read(path).map_err(|err| ViewError::io(path, err))?;
    let metadata = fs::metadata(path).map_err(|err| ViewError::io(path, err))?;
    Ok((raw, FileSignature::from_metadata(&metadata)))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (canonical(a), canonical(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

// Canonicalizes through the parent so not-yet-existing targets compare too.
fn canonical(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = fs::canonicalize(path) {
        return Some(resolved);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::canonicalize(parent).ok().map(|dir| dir.join(name))
}

fn system_time_to_nanos(time: SystemTime) -> Option<u128> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{CommandViewer, ConversionResult};
    use std::thread;
    use std::time::Duration;

    const GPXINFO: &str = "File: ride.gpx\n    Track #0, Segment #0\n        Points: 3\n    Track #1, Segment #0\n";
    const RAW: &[u8] = b"<?xml version=\"1.0\"?>\r\n<gpx><trk><trkseg/></trk></gpx>\r\n";

    fn tools(output: &'static str) -> Collaborators {
        Collaborators::from_config(&Default::default())
            .unwrap()
            .with_converter(move |_: &Path| ConversionResult::Success(output.to_string()))
            .with_viewer(CommandViewer::default())
    }

    fn source(dir: &Path) -> PathBuf {
        let path = dir.join("ride.gpx");
        fs::write(&path, RAW).unwrap();
        path
    }

    #[test]
    fn open_renders_and_annotates_without_marking_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let view = RouteView::open(source(dir.path()), &tools(GPXINFO)).unwrap();
        assert_eq!(view.mode(), ViewMode::Rendered);
        assert!(!view.is_dirty());
        assert_eq!(view.affordances().len(), 4);
        assert!(view
            .text()
            .starts_with("File: ride.gpx\n    Track #0, Segment #0\n    [Show map] [Show elevation profile]\n\n"));
        assert!(view.conversion_failure().is_none());
    }

    #[test]
    fn persisting_rendered_text_over_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path());
        let mut view = RouteView::open(&path, &tools(GPXINFO)).unwrap();

        let err = view.persist_to(&path).unwrap_err();
        assert!(matches!(err, ViewError::PersistRejected { .. }));
        // Same file through a different spelling.
        let dotted = dir.path().join(".").join("ride.gpx");
        assert!(matches!(
            view.persist_to(&dotted),
            Err(ViewError::PersistRejected { .. })
        ));
        assert_eq!(fs::read(&path).unwrap(), RAW);
    }

    #[test]
    fn persisting_elsewhere_writes_the_rendered_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut view = RouteView::open(source(dir.path()), &tools(GPXINFO)).unwrap();
        let target = dir.path().join("ride.txt");
        view.persist_to(&target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), view.text());
    }

    #[test]
    fn revert_restores_exact_bytes_and_discards_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path());
        let mut view = RouteView::open(&path, &tools(GPXINFO)).unwrap();
        view.edit(0..4, "Fichier").unwrap();
        assert!(view.is_dirty());

        let raw = view.revert_to_raw().to_vec();
        assert_eq!(raw, RAW);
        assert_eq!(view.mode(), ViewMode::Raw);
        assert!(view.affordances().is_empty());
        assert!(!view.is_dirty());

        // Raw mode may be saved back; the bytes are untouched.
        view.persist_to(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), RAW);
    }

    #[test]
    fn raw_save_never_clobbers_a_newer_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path());
        let mut view = RouteView::open_raw(&path).unwrap();

        thread::sleep(Duration::from_millis(10));
        fs::write(&path, b"<gpx>NEW DATA</gpx>").unwrap();
        let err = view.persist_to(&path).unwrap_err();
        assert!(matches!(
            err,
            ViewError::SourceChanged {
                state: SourceState::Modified,
                ..
            }
        ));
        assert_eq!(fs::read(&path).unwrap(), b"<gpx>NEW DATA</gpx>");

        // An edited raw view is refused as well until reloaded.
        view.edit(0..0, "<!-- note -->").unwrap();
        assert!(matches!(
            view.persist_to(&path),
            Err(ViewError::SourceChanged { .. })
        ));

        fs::remove_file(&path).unwrap();
        assert!(matches!(
            view.persist_to(&path),
            Err(ViewError::SourceChanged {
                state: SourceState::Removed,
                ..
            })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn open_raw_skips_the_converter() {
        let dir = tempfile::tempdir().unwrap();
        let view = RouteView::open_raw(source(dir.path())).unwrap();
        assert_eq!(view.mode(), ViewMode::Raw);
        assert_eq!(view.raw_bytes(), RAW);
        assert!(view.affordances().is_empty());
        assert!(view.routes(&RouteScanner::default()).unwrap().is_empty());
        assert!(matches!(
            RouteView::open_raw(dir.path().join("missing.gpx")),
            Err(ViewError::Io { .. })
        ));
    }

    #[test]
    fn reload_discards_previous_affordances() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(GPXINFO);
        let mut view = RouteView::open(source(dir.path()), &tools).unwrap();
        let first = view.text().to_string();
        view.revert_to_raw();
        view.reload(&tools).unwrap();
        assert_eq!(view.text(), first);
        assert_eq!(view.affordances().len(), 4);
        view.reload(&tools).unwrap();
        assert_eq!(view.text(), first);
    }

    #[test]
    fn edits_shift_later_affordances_and_drop_touched_ones() {
        let dir = tempfile::tempdir().unwrap();
        let mut view = RouteView::open(source(dir.path()), &tools(GPXINFO)).unwrap();
        let first_map = view.affordances()[0].clone();

        // Insert before everything: all positions move.
        view.edit(0..0, "# note\n").unwrap();
        assert_eq!(view.affordances().len(), 4);
        for affordance in view.affordances() {
            assert_eq!(&view.text()[affordance.span()], affordance.label());
        }

        // Delete the first map label itself.
        let span = view.affordance(first_map.id).unwrap().span();
        view.edit(span, "").unwrap();
        assert!(view.affordance(first_map.id).is_err());
        assert_eq!(view.affordances().len(), 3);
        for affordance in view.affordances() {
            assert_eq!(&view.text()[affordance.span()], affordance.label());
        }
    }

    #[test]
    fn edit_rejects_ranges_outside_the_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut view = RouteView::open(source(dir.path()), &tools(GPXINFO)).unwrap();
        let len = view.text().len();
        assert!(matches!(
            view.edit(len..len + 1, "x"),
            Err(ViewError::InvalidRange { .. })
        ));
    }

    #[test]
    fn outline_lists_file_then_routes_at_current_positions() {
        let dir = tempfile::tempdir().unwrap();
        let view = RouteView::open(source(dir.path()), &tools(GPXINFO)).unwrap();
        let outline = view.outline(&RouteScanner::default()).unwrap();
        let labels: Vec<_> = outline.iter().map(|entry| entry.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["File: ride.gpx", "Track #0, Segment #0", "Track #1, Segment #0"]
        );
        for entry in &outline[1..] {
            assert!(view.text()[entry.position..].starts_with(&entry.label));
        }
    }

    #[test]
    fn source_state_tracks_modification_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path());
        let tools = tools(GPXINFO);
        let mut view = RouteView::open(&path, &tools).unwrap();
        assert_eq!(view.check_source_state().unwrap(), SourceState::Unchanged);

        thread::sleep(Duration::from_millis(10));
        fs::write(&path, b"<gpx/>\n<!-- longer -->").unwrap();
        assert_eq!(view.check_source_state().unwrap(), SourceState::Modified);
        view.reload(&tools).unwrap();
        assert_eq!(view.check_source_state().unwrap(), SourceState::Unchanged);
        assert_eq!(view.raw_bytes(), b"<gpx/>\n<!-- longer -->");

        fs::remove_file(&path).unwrap();
        assert_eq!(view.check_source_state().unwrap(), SourceState::Removed);
    }
}
