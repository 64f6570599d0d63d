use std::fmt;
use std::ops::Range;

use gpxview_routes::{RouteKey, RouteMatch};

pub const SHOW_MAP_LABEL: &str = "[Show map]";
pub const SHOW_ELEVATION_LABEL: &str = "[Show elevation profile]";

/// Stable handle of an affordance within one annotate pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AffordanceId(pub usize);

impl fmt::Display for AffordanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffordanceKind {
    ShowMap,
    ShowElevation,
}

impl AffordanceKind {
    pub fn label(self) -> &'static str {
        match self {
            AffordanceKind::ShowMap => SHOW_MAP_LABEL,
            AffordanceKind::ShowElevation => SHOW_ELEVATION_LABEL,
        }
    }
}

/// An activatable span of the rendered text bound to one route.
/// （繫結到單一路線、可觸發的文字區段。）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affordance {
    pub id: AffordanceId,
    pub key: RouteKey,
    pub kind: AffordanceKind,
    /// Byte offset of the label in the current text.
    pub position: usize,
    pub(crate) already_rendered: bool,
}

impl Affordance {
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    pub fn span(&self) -> Range<usize> {
        self.position..self.position + self.label().len()
    }

    /// Set once an elevation image has been inserted for this affordance.
    pub fn already_rendered(&self) -> bool {
        self.already_rendered
    }
}

/// Converter text decorated with affordance lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotated {
    pub text: String,
    pub affordances: Vec<Affordance>,
}

/// Inserts a `[Show map] [Show elevation profile]` line plus a blank line
/// after every matched header, keeping the header's indentation.
///
/// Insertion points are taken from the original text and applied top to
/// bottom, so recorded positions refer to the decorated text exactly.
pub fn annotate(text: &str, matches: &[RouteMatch]) -> Annotated {
    let mut ordered: Vec<&RouteMatch> = matches.iter().collect();
    ordered.sort_by_key(|found| found.position);

    let mut out = String::with_capacity(text.len() + matches.len() * 48);
    let mut affordances = Vec::with_capacity(matches.len() * 2);
    let mut cursor = 0;

    for found in ordered {
        let insert_at = line_end(text, found.position);
        // Two matches on one line share the insertion point.
        if insert_at > cursor {
            out.push_str(&text[cursor..insert_at]);
            cursor = insert_at;
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }

        out.push_str(&found.indent);
        for (index, kind) in [AffordanceKind::ShowMap, AffordanceKind::ShowElevation]
            .into_iter()
            .enumerate()
        {
            if index > 0 {
                out.push(' ');
            }
            affordances.push(Affordance {
                id: AffordanceId(affordances.len()),
                key: found.key,
                kind,
                position: out.len(),
                already_rendered: false,
            });
            out.push_str(kind.label());
        }
        out.push_str("\n\n");
    }
    out.push_str(&text[cursor..]);

    Annotated {
        text: out,
        affordances,
    }
}

/// Offset just past the newline ending the line that holds `position`.
pub(crate) fn line_end(text: &str, position: usize) -> usize {
    text[position..]
        .find('\n')
        .map_or(text.len(), |offset| position + offset + 1)
}
