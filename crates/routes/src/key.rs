use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Identifies one segment of one track inside a GPX file.
/// （識別 GPX 檔案中某條軌跡的某個區段。）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteKey {
    pub track: u32,
    pub segment: u32,
}

impl RouteKey {
    pub fn new(track: u32, segment: u32) -> Self {
        Self { track, segment }
    }

    /// Human readable label in the converter's own wording.
    pub fn label(&self) -> String {
        format!("Track #{}, Segment #{}", self.track, self.segment)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.track, self.segment)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteKeyParseError {
    #[error("route key '{0}' must look like TRACK:SEGMENT")]
    Shape(String),
    #[error("route key component '{0}' is not a non-negative integer")]
    Component(String),
}

impl FromStr for RouteKey {
    type Err = RouteKeyParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (track, segment) = trimmed
            .split_once(&[':', '/', ','][..])
            .ok_or_else(|| RouteKeyParseError::Shape(trimmed.to_string()))?;
        let parse = |part: &str| {
            let part = part.trim();
            part.parse::<u32>()
                .map_err(|_| RouteKeyParseError::Component(part.to_string()))
        };
        Ok(Self::new(parse(track)?, parse(segment)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let key = RouteKey::new(4, 17);
        assert_eq!(key.to_string(), "4:17");
        assert_eq!("4:17".parse::<RouteKey>().unwrap(), key);
        assert_eq!(" 4 / 17 ".parse::<RouteKey>().unwrap(), key);
        assert_eq!("4,17".parse::<RouteKey>().unwrap(), key);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "417".parse::<RouteKey>(),
            Err(RouteKeyParseError::Shape(_))
        ));
        assert!(matches!(
            "-1:2".parse::<RouteKey>(),
            Err(RouteKeyParseError::Component(_))
        ));
    }

    #[test]
    fn label_matches_converter_wording() {
        assert_eq!(RouteKey::new(0, 2).label(), "Track #0, Segment #2");
    }
}
