//! Route discovery over the text produced by a GPX pretty-printer.
//! （在 GPX 轉換器輸出的文字中尋找軌跡與區段。）
//!
//! The scanner is a pure function of its input: the same text always
//! yields the same ordered list of [`RouteMatch`] values, so callers can
//! re-scan freely after edits instead of tracking stale positions.

mod key;
mod outline;
mod scanner;

pub use key::{RouteKey, RouteKeyParseError};
pub use outline::{build_outline, OutlineEntry, OutlineKind, FILE_HEADER_PREFIX};
pub use scanner::{scan, RouteMatch, RouteScanner, ScanError, DEFAULT_HEADER_PATTERN};
