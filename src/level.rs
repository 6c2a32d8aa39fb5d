use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    #[serde(alias = "warn")]
    Warning,
    Info,
    Other,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Error, Level::Warning, Level::Info, Level::Other];

    pub fn label(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Other => "other",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Level::Error),
            "warning" | "warn" => Ok(Level::Warning),
            "info" => Ok(Level::Info),
            "other" => Ok(Level::Other),
            other => Err(format!("unknown level '{other}'")),
        }
    }
}

// Checked in order; the first rule that matches decides the level.
static LEVEL_RULES: LazyLock<[(Level, Regex); 3]> = LazyLock::new(|| {
    [
        (Level::Error, Regex::new(r"(?i)\berror\b").unwrap()),
        (Level::Warning, Regex::new(r"(?i)\bwarn(ing)?\b").unwrap()),
        (Level::Info, Regex::new(r"(?i)\binfo\b").unwrap()),
    ]
});

pub fn classify(text: &str) -> Level {
    LEVEL_RULES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(level, _)| *level)
        .unwrap_or(Level::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_levels() {
        assert_eq!(classify("ERROR: disk full"), Level::Error);
        assert_eq!(classify("[warn] slow query"), Level::Warning);
        assert_eq!(classify("Warning - retrying"), Level::Warning);
        assert_eq!(classify("info started"), Level::Info);
        assert_eq!(classify("plain text"), Level::Other);
    }

    #[test]
    fn test_priority() {
        assert_eq!(classify("INFO: recovered from error"), Level::Error);
        assert_eq!(classify("info: warn threshold reached"), Level::Warning);
        assert_eq!(classify("warning: error budget low, info follows"), Level::Error);
    }

    #[test]
    fn test_whole_words_only() {
        assert_eq!(classify("errors=0 information warned"), Level::Other);
        assert_eq!(classify("no_error_here"), Level::Other);
        assert_eq!(classify("code=error;"), Level::Error);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!("WARN".parse::<Level>(), Ok(Level::Warning));
        assert_eq!("other".parse::<Level>(), Ok(Level::Other));
        assert!("fatal".parse::<Level>().is_err());
    }
}
