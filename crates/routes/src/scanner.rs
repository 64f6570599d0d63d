use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::key::RouteKey;

/// Header shape emitted by the converter for every segment dump.
///
/// `Track #` must follow the line's indentation directly; the lazy gap
/// stops at the first `Segment #` token on the same line.
pub const DEFAULT_HEADER_PATTERN: &str =
    r"(?m)^(?P<indent>[ \t]*)(?P<header>Track #(?P<track>[0-9]+)[^\n]*?Segment #(?P<segment>[0-9]+))";

const REQUIRED_GROUPS: [&str; 4] = ["indent", "header", "track", "segment"];

static DEFAULT_SCANNER: Lazy<RouteScanner> = Lazy::new(|| {
    RouteScanner::with_pattern(DEFAULT_HEADER_PATTERN)
        .expect("default header pattern must compile with every required group")
});

/// Errors raised while building a scanner or reading its matches.
/// （建立掃描器或讀取比對結果時可能發生的錯誤。）
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid header pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("header pattern is missing the named group '{0}'")]
    MissingGroup(&'static str),
    #[error("header at byte {position} is not directly preceded by its indent group")]
    Layout { position: usize },
    #[error("header at byte {position} carries an unreadable {field} index '{digits}'")]
    Index {
        position: usize,
        field: &'static str,
        digits: String,
    },
}

/// One track/segment header found in converter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Header phrase from `Track #` through the segment digits.
    pub header_text: String,
    /// Byte offset of `header_text` inside the scanned text.
    pub position: usize,
    /// Leading whitespace of the header line.
    pub indent: String,
    pub key: RouteKey,
}

impl RouteMatch {
    pub fn track(&self) -> u32 {
        self.key.track
    }

    pub fn segment(&self) -> u32 {
        self.key.segment
    }

    /// Byte offset where the header line begins (before indentation).
    pub fn line_start(&self) -> usize {
        self.position - self.indent.len()
    }
}

/// Line-oriented scanner locating segment headers.
/// （以行為單位尋找區段標頭的掃描器。）
#[derive(Debug, Clone)]
pub struct RouteScanner {
    regex: Regex,
}

impl Default for RouteScanner {
    fn default() -> Self {
        DEFAULT_SCANNER.clone()
    }
}

impl RouteScanner {
    /// Builds a scanner from a custom pattern. The pattern must define the
    /// `indent`, `header`, `track` and `segment` named groups.
    pub fn with_pattern(pattern: &str) -> Result<Self, ScanError> {
        let regex = Regex::new(pattern)?;
        for group in REQUIRED_GROUPS {
            if !regex.capture_names().flatten().any(|name| name == group) {
                return Err(ScanError::MissingGroup(group));
            }
        }
        Ok(Self { regex })
    }

    /// Returns every header in top-to-bottom order. Repeated keys are kept.
    pub fn scan(&self, text: &str) -> Result<Vec<RouteMatch>, ScanError> {
        self.regex
            .captures_iter(text)
            .map(|capture| build_match(&capture))
            .collect()
    }

    /// Lists the header labels of the current text, for selection menus.
    pub fn labels(&self, text: &str) -> Result<Vec<String>, ScanError> {
        Ok(self
            .scan(text)?
            .into_iter()
            .map(|found| found.header_text)
            .collect())
    }

    /// Re-scans `text` and maps a chosen label back to its key.
    pub fn resolve_label(&self, text: &str, label: &str) -> Result<Option<RouteKey>, ScanError> {
        let wanted = label.trim();
        Ok(self
            .scan(text)?
            .into_iter()
            .find(|found| found.header_text == wanted)
            .map(|found| found.key))
    }
}

/// Scans with the default converter header shape.
pub fn scan(text: &str) -> Result<Vec<RouteMatch>, ScanError> {
    DEFAULT_SCANNER.scan(text)
}

fn build_match(capture: &Captures<'_>) -> Result<RouteMatch, ScanError> {
    // Group presence is validated in `with_pattern`.
    let header = capture
        .name("header")
        .ok_or(ScanError::MissingGroup("header"))?;
    let position = header.start();
    let indent = match capture.name("indent") {
        Some(indent) if indent.end() == position => indent.as_str(),
        Some(_) => return Err(ScanError::Layout { position }),
        None => "",
    };
    let track = parse_index(capture, "track", position)?;
    let segment = parse_index(capture, "segment", position)?;

    Ok(RouteMatch {
        header_text: header.as_str().to_string(),
        position,
        indent: indent.to_string(),
        key: RouteKey::new(track, segment),
    })
}

fn parse_index(
    capture: &Captures<'_>,
    field: &'static str,
    position: usize,
) -> Result<u32, ScanError> {
    let digits = capture
        .name(field)
        .ok_or(ScanError::MissingGroup(field))?
        .as_str();
    digits.parse::<u32>().map_err(|_| ScanError::Index {
        position,
        field,
        digits: digits.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indented_header_is_split_from_its_indentation() {
        let matches = scan("  Track #3 blah Segment #12").unwrap();
        assert_eq!(matches.len(), 1);
        let found = &matches[0];
        assert_eq!(found.header_text, "Track #3 blah Segment #12");
        assert_eq!(found.indent, "  ");
        assert_eq!(found.position, 2);
        assert_eq!(found.line_start(), 0);
        assert_eq!((found.track(), found.segment()), (3, 12));
    }

    #[test]
    fn empty_text_has_no_routes() {
        assert!(scan("").unwrap().is_empty());
    }

    #[test]
    fn track_without_segment_does_not_match() {
        assert!(scan("Track #3, 2 segments\n").unwrap().is_empty());
    }

    #[test]
    fn header_cannot_span_lines() {
        assert!(scan("Track #1\nSegment #2\n").unwrap().is_empty());
    }

    #[test]
    fn matches_are_in_text_order_and_keep_duplicates() {
        let text = "\
File: ride.gpx
    Track #0, Segment #0
        Length 2D: 1.2km
    Track #0, Segment #1
    Track #1, Segment #0
    Track #0, Segment #1
";
        let keys: Vec<_> = scan(text)
            .unwrap()
            .into_iter()
            .map(|found| (found.track(), found.segment()))
            .collect();
        assert_eq!(keys, vec![(0, 0), (0, 1), (1, 0), (0, 1)]);
    }

    #[test]
    fn positions_point_at_the_header() {
        let text = "intro\n\tTrack #2 Segment #5\n";
        let found = &scan(text).unwrap()[0];
        assert_eq!(&text[found.position..found.position + 7], "Track #");
        assert_eq!(found.indent, "\t");
    }

    #[test]
    fn overflowing_index_is_reported() {
        let err = scan("Track #99999999999 Segment #1").unwrap_err();
        assert!(matches!(err, ScanError::Index { field: "track", .. }));
    }

    #[test]
    fn custom_pattern_requires_named_groups() {
        let err = RouteScanner::with_pattern(r"Track #(?P<track>\d+)").unwrap_err();
        assert!(matches!(err, ScanError::MissingGroup(_)));
    }

    #[test]
    fn indent_group_must_sit_right_before_the_header() {
        let scanner = RouteScanner::with_pattern(
            r"(?m)^(?P<header>Track #(?P<track>\d+) Segment #(?P<segment>\d+))(?P<indent>[ \t]*)",
        )
        .unwrap();
        let err = scanner.scan("Track #0 Segment #1      \n").unwrap_err();
        assert!(matches!(err, ScanError::Layout { position: 0 }));
    }

    #[test]
    fn first_segment_token_on_a_line_wins() {
        let found = scan("  Track #1, Segment #2 (was Segment #7)\n").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].header_text, "Track #1, Segment #2");
        assert_eq!(found[0].key, RouteKey::new(1, 2));
    }

    #[test]
    fn labels_resolve_back_to_keys() {
        let scanner = RouteScanner::default();
        let text = "Track #0, Segment #0\n  Track #4, Segment #2\n";
        let labels = scanner.labels(text).unwrap();
        assert_eq!(labels, vec!["Track #0, Segment #0", "Track #4, Segment #2"]);
        assert_eq!(
            scanner.resolve_label(text, " Track #4, Segment #2 ").unwrap(),
            Some(RouteKey::new(4, 2))
        );
        assert_eq!(scanner.resolve_label(text, "Track #9").unwrap(), None);
    }
}
