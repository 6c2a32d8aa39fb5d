use crate::constants::LINE_NUMBER_WIDTH;
use crate::core::RenderedLine;
use crate::level::Level;
use crossterm::style::{Attribute, Color, ContentStyle, StyledContent, Stylize};
use std::fmt::Write as _;

/// A run of text that is either entirely highlighted or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub highlighted: bool,
}

/// Splits `text` at the given ranges, which must be sorted and disjoint.
/// Ranges that run past the end or split a character are clamped.
pub fn segments<'a>(text: &'a str, ranges: &[(usize, usize)]) -> Vec<Segment<'a>> {
    let mut out = Vec::with_capacity(ranges.len() * 2 + 1);
    let mut pos = 0;
    for &(start, end) in ranges {
        let start = floor_char_boundary(text, start.max(pos));
        let end = floor_char_boundary(text, end);
        if start >= end {
            continue;
        }
        if start > pos {
            out.push(Segment {
                text: &text[pos..start],
                highlighted: false,
            });
        }
        out.push(Segment {
            text: &text[start..end],
            highlighted: true,
        });
        pos = end;
    }
    if pos < text.len() || out.is_empty() {
        out.push(Segment {
            text: &text[pos..],
            highlighted: false,
        });
    }
    out
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

pub fn highlight_style() -> ContentStyle {
    ContentStyle::new()
        .with(Color::Black)
        .on(Color::Yellow)
        .attribute(Attribute::Bold)
}

pub fn level_color(level: Level) -> Option<Color> {
    match level {
        Level::Error => Some(Color::Red),
        Level::Warning => Some(Color::Yellow),
        Level::Info => Some(Color::Green),
        Level::Other => None,
    }
}

fn gutter(line: &RenderedLine) -> StyledContent<String> {
    let number = format!("{:>width$} ", line.line_number, width = LINE_NUMBER_WIDTH);
    match level_color(line.level) {
        Some(color) => number.with(color),
        None => number.dark_grey(),
    }
}

/// Renders a line as it should appear on a terminal. With `color` off the
/// output is plain text with the same layout.
pub fn paint(line: &RenderedLine, color: bool) -> String {
    let mut out = String::with_capacity(line.text.len() + LINE_NUMBER_WIDTH + 16);
    if !color {
        let _ = write!(out, "{:>width$} {}", line.line_number, line.text, width = LINE_NUMBER_WIDTH);
        return out;
    }

    let _ = write!(out, "{}", gutter(line));
    let style = highlight_style();
    for segment in segments(&line.text, &line.ranges) {
        if segment.highlighted {
            let _ = write!(out, "{}", style.apply(segment.text));
        } else {
            out.push_str(segment.text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(text: &str, ranges: Vec<(usize, usize)>) -> RenderedLine {
        RenderedLine {
            line_number: 42,
            level: Level::Error,
            text: text.to_string(),
            ranges,
        }
    }

    #[test]
    fn test_segments_split_at_ranges() {
        let segs = segments("foo bar baz", &[(0, 3), (8, 11)]);
        let texts: Vec<(&str, bool)> = segs.iter().map(|s| (s.text, s.highlighted)).collect();
        assert_eq!(texts, vec![("foo", true), (" bar ", false), ("baz", true)]);
    }

    #[test]
    fn test_segments_without_ranges() {
        assert_eq!(
            segments("plain", &[]),
            vec![Segment {
                text: "plain",
                highlighted: false
            }]
        );
        assert_eq!(segments("", &[]).len(), 1);
    }

    #[test]
    fn test_segments_clamp_bad_ranges() {
        let segs = segments("héllo", &[(1, 2), (4, 99)]);
        let joined: String = segs.iter().map(|s| s.text).collect();
        assert_eq!(joined, "héllo");
    }

    #[test]
    fn test_paint_plain() {
        let line = rendered("ERROR boom", vec![(0, 5)]);
        assert_eq!(paint(&line, false), "     42 ERROR boom");
    }

    #[test]
    fn test_paint_colored_keeps_text() {
        let line = rendered("ERROR boom", vec![(0, 5)]);
        let painted = paint(&line, true);
        assert!(painted.contains("ERROR"));
        assert!(painted.contains(" boom"));
        assert!(painted.contains('\u{1b}'));
    }
}
