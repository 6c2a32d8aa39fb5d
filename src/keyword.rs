use regex::RegexBuilder;

/// Splits a filter string into lowercase tokens on whitespace and commas.
/// Duplicates are dropped, first occurrence wins.
pub fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in raw.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        let token = token.to_lowercase();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// True when every token occurs in `text`, ignoring case.
pub fn matches_keywords(text: &str, tokens: &[String]) -> bool {
    if tokens.is_empty() {
        return true;
    }
    let lower = text.to_lowercase();
    tokens.iter().all(|t| lower.contains(t.as_str()))
}

/// Byte ranges of every keyword occurrence, sorted and merged.
///
/// Ranges that overlap or touch are joined, so the result is ascending with
/// a gap between consecutive ranges.
pub fn highlight_ranges(text: &str, keywords: &[String]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    for keyword in keywords.iter().filter(|k| !k.is_empty()) {
        let Ok(re) = RegexBuilder::new(&regex::escape(keyword))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };
        for m in re.find_iter(text) {
            ranges.push((m.start(), m.end()));
        }
    }
    ranges.sort_by_key(|r| r.0);
    merge_overlapping(&mut ranges);
    ranges
}

fn merge_overlapping(ranges: &mut Vec<(usize, usize)>) {
    if ranges.is_empty() {
        return;
    }
    let mut write = 0;
    for read in 1..ranges.len() {
        if ranges[read].0 <= ranges[write].1 {
            ranges[write].1 = ranges[write].1.max(ranges[read].1);
        } else {
            write += 1;
            ranges[write] = ranges[read];
        }
    }
    ranges.truncate(write + 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  Foo, bar,,BAZ foo "), kw(&["foo", "bar", "baz"]));
        assert!(tokenize(" ,, ").is_empty());
    }

    #[test]
    fn test_matches_keywords() {
        let tokens = tokenize("timeout db");
        assert!(matches_keywords("DB connection Timeout", &tokens));
        assert!(!matches_keywords("db ok", &tokens));
        assert!(matches_keywords("anything", &[]));
    }

    #[test]
    fn test_ranges_case_insensitive() {
        assert_eq!(highlight_ranges("Error and ERROR", &kw(&["error"])), vec![(0, 5), (10, 15)]);
    }

    #[test]
    fn test_ranges_non_overlapping_scan() {
        assert_eq!(highlight_ranges("aaaa", &kw(&["aa"])), vec![(0, 4)]);
        assert_eq!(highlight_ranges("aaa", &kw(&["aa"])), vec![(0, 2)]);
    }

    #[test]
    fn test_ranges_merge_touching_and_overlapping() {
        assert_eq!(highlight_ranges("foobar", &kw(&["foo", "bar"])), vec![(0, 6)]);
        assert_eq!(highlight_ranges("foobar", &kw(&["foob", "oba"])), vec![(0, 5)]);
        assert_eq!(highlight_ranges("foo bar", &kw(&["foo", "bar"])), vec![(0, 3), (4, 7)]);
    }

    #[test]
    fn test_ranges_special_characters() {
        assert_eq!(highlight_ranges("a.b (x)", &kw(&["(x)"])), vec![(4, 7)]);
        assert!(highlight_ranges("text", &[]).is_empty());
    }

    proptest! {
        #[test]
        fn ranges_are_sorted_disjoint_and_cover_matches(
            text in "[abc ]{0,40}",
            words in prop::collection::vec("[abc]{1,3}", 0..4),
        ) {
            let ranges = highlight_ranges(&text, &words);
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].1 < pair[1].0);
            }
            for (start, end) in &ranges {
                prop_assert!(start < end);
            }
            for word in &words {
                let mut from = 0;
                while let Some(pos) = text[from..].find(word.as_str()) {
                    let (s, e) = (from + pos, from + pos + word.len());
                    prop_assert!(ranges.iter().any(|(a, b)| *a <= s && e <= *b));
                    from = e;
                }
            }
        }
    }
}
