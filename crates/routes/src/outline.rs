use crate::key::RouteKey;
use crate::scanner::RouteMatch;

/// Prefix the converter uses for its file summary line.
pub const FILE_HEADER_PREFIX: &str = "File:";

/// Classifies an entry shown in an outline or navigation panel.
/// （大綱或導覽面板中條目的類型。）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutlineKind {
    File,
    Route(RouteKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub label: String,
    pub position: usize,
    pub kind: OutlineKind,
}

impl OutlineEntry {
    pub fn new(label: impl Into<String>, position: usize, kind: OutlineKind) -> Self {
        Self {
            label: label.into(),
            position,
            kind,
        }
    }
}

/// Builds the `(label, position)` list for `text`.
///
/// The first entry describes the file: the converter's `File:` line when
/// present above the first route, otherwise `file_name` at offset zero.
/// No file entry is produced for empty text.
pub fn build_outline(
    text: &str,
    file_name: Option<&str>,
    matches: &[RouteMatch],
) -> Vec<OutlineEntry> {
    let mut entries = Vec::with_capacity(matches.len() + 1);
    let first_route = matches.first().map_or(text.len(), RouteMatch::line_start);

    if let Some((position, line)) = find_file_header(&text[..first_route]) {
        entries.push(OutlineEntry::new(line, position, OutlineKind::File));
    } else if let Some(name) = file_name.filter(|_| !text.is_empty()) {
        entries.push(OutlineEntry::new(name, 0, OutlineKind::File));
    }

    entries.extend(matches.iter().map(|found| {
        OutlineEntry::new(
            found.header_text.clone(),
            found.position,
            OutlineKind::Route(found.key),
        )
    }));
    entries
}

fn find_file_header(text: &str) -> Option<(usize, &str)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        let trimmed = line.trim();
        if trimmed.starts_with(FILE_HEADER_PREFIX) {
            return Some((offset + indent, trimmed));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::scan;

    #[test]
    fn file_line_becomes_the_first_entry() {
        let text = "File: ride.gpx\n    Track #0, Segment #0\n";
        let matches = scan(text).unwrap();
        let outline = build_outline(text, Some("ride.gpx"), &matches);
        assert_eq!(outline.len(), 2);
        assert_eq!(outline[0].label, "File: ride.gpx");
        assert_eq!(outline[0].position, 0);
        assert_eq!(outline[0].kind, OutlineKind::File);
        assert_eq!(outline[1].label, "Track #0, Segment #0");
        assert_eq!(outline[1].position, 19);
        assert_eq!(outline[1].kind, OutlineKind::Route(RouteKey::new(0, 0)));
    }

    #[test]
    fn file_name_is_used_without_a_file_line() {
        let text = "Track #1 Segment #0\n";
        let matches = scan(text).unwrap();
        let outline = build_outline(text, Some("walk.gpx"), &matches);
        assert_eq!(outline[0], OutlineEntry::new("walk.gpx", 0, OutlineKind::File));
        assert_eq!(outline.len(), 2);
    }

    #[test]
    fn empty_text_has_an_empty_outline() {
        assert!(build_outline("", Some("walk.gpx"), &[]).is_empty());
    }

    #[test]
    fn file_line_after_routes_is_ignored() {
        let text = "Track #0 Segment #0\nFile: late\n";
        let matches = scan(text).unwrap();
        let outline = build_outline(text, None, &matches);
        assert_eq!(outline.len(), 1);
        assert_eq!(outline[0].kind, OutlineKind::Route(RouteKey::new(0, 0)));
    }
}
