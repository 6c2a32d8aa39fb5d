use super::log_state::LogEntry;
use crate::keyword::{highlight_ranges, matches_keywords, tokenize};
use crate::level::Level;
use crate::transform::{compile_content_transform_with, CompiledTransform, TransformLimits};

/// An entry as it should be displayed: transformed text plus the byte ranges
/// of that text to highlight.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLine {
    pub line_number: u64,
    pub level: Level,
    pub text: String,
    pub ranges: Vec<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct FilterState {
    filter_tokens: Vec<String>,
    highlight_tokens: Vec<String>,
    levels: Vec<Level>,
    transform: CompiledTransform,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            filter_tokens: Vec::new(),
            highlight_tokens: Vec::new(),
            levels: Level::ALL.to_vec(),
            transform: CompiledTransform::default(),
        }
    }
}

impl FilterState {
    pub fn set_filter(&mut self, raw: &str) {
        self.filter_tokens = tokenize(raw);
    }

    pub fn set_highlight(&mut self, raw: &str) {
        self.highlight_tokens = tokenize(raw);
    }

    /// Restricts the visible levels. An empty list shows every level.
    pub fn set_levels(&mut self, levels: &[Level]) {
        self.levels = if levels.is_empty() {
            Level::ALL.to_vec()
        } else {
            levels.to_vec()
        };
    }

    /// Recompiles the transform. Returns the compile diagnostic, if any.
    pub fn set_transform(&mut self, source: &str, limits: TransformLimits) -> Option<&str> {
        self.transform = compile_content_transform_with(source, limits);
        self.transform.error()
    }

    pub fn filter_tokens(&self) -> &[String] {
        &self.filter_tokens
    }

    pub fn highlight_tokens(&self) -> &[String] {
        &self.highlight_tokens
    }

    pub fn transform(&self) -> &CompiledTransform {
        &self.transform
    }

    pub fn shows_level(&self, level: Level) -> bool {
        self.levels.contains(&level)
    }

    /// Renders `entry` if it passes the level and keyword filters. Keywords
    /// are matched against the transformed text, which is what gets shown.
    pub fn render(&self, entry: &LogEntry) -> Option<RenderedLine> {
        if !self.shows_level(entry.level) {
            return None;
        }
        let text = self.transform.apply(&entry.text);
        if !matches_keywords(&text, &self.filter_tokens) {
            return None;
        }
        let ranges = highlight_ranges(&text, &self.highlight_tokens);
        Some(RenderedLine {
            line_number: entry.line_number,
            level: entry.level,
            text,
            ranges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn entry(text: &str, level: Level) -> LogEntry {
        LogEntry {
            id: 1,
            line_number: 12,
            text: text.to_string(),
            level,
            timestamp: Local::now(),
        }
    }

    #[test]
    fn test_default_shows_everything() {
        let state = FilterState::default();
        let rendered = state.render(&entry("hello", Level::Other)).unwrap();
        assert_eq!(rendered.text, "hello");
        assert_eq!(rendered.line_number, 12);
        assert!(rendered.ranges.is_empty());
    }

    #[test]
    fn test_level_filter() {
        let mut state = FilterState::default();
        state.set_levels(&[Level::Error, Level::Warning]);
        assert!(state.render(&entry("x", Level::Info)).is_none());
        assert!(state.render(&entry("x", Level::Error)).is_some());
        state.set_levels(&[]);
        assert!(state.render(&entry("x", Level::Info)).is_some());
    }

    #[test]
    fn test_filter_and_highlight_use_transformed_text() {
        let mut state = FilterState::default();
        assert!(state
            .set_transform("line => line.replace('raw', 'cooked')", TransformLimits::default())
            .is_none());
        state.set_filter("cooked");
        state.set_highlight("COOKED");

        let rendered = state.render(&entry("a raw egg", Level::Other)).unwrap();
        assert_eq!(rendered.text, "a cooked egg");
        assert_eq!(rendered.ranges, vec![(2, 8)]);

        state.set_filter("raw");
        assert!(state.render(&entry("a raw egg", Level::Other)).is_none());
    }

    #[test]
    fn test_bad_transform_reports_and_passes_through() {
        let mut state = FilterState::default();
        let error = state.set_transform("return (", TransformLimits::default());
        assert!(error.is_some());
        let rendered = state.render(&entry("same", Level::Other)).unwrap();
        assert_eq!(rendered.text, "same");
    }
}
