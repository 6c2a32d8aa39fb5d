use crate::constants::DEFAULT_MAX_ENTRIES;
use crate::level::{classify, Level};
use crate::watcher::{LogLine, LogUpdate};
use chrono::{DateTime, Local};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: u64,
    pub line_number: u64,
    pub text: String,
    pub level: Level,
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    fn from_line(id: u64, line: &LogLine, timestamp: DateTime<Local>) -> Self {
        Self {
            id,
            line_number: line.line_number,
            level: classify(&line.text),
            text: line.text.clone(),
            timestamp,
        }
    }
}

/// The most recent entries of one watched file, oldest first.
#[derive(Debug, Clone)]
pub struct LogState {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    next_id: u64,
    pub last_update_time: Option<DateTime<Local>>,
}

impl Default for LogState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl LogState {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
            next_id: 0,
            last_update_time: None,
        }
    }

    /// Applies one update and returns the entries it added. A reset drops
    /// everything stored before it.
    pub fn apply_update(&mut self, update: &LogUpdate) -> &[LogEntry] {
        if update.is_reset() {
            self.entries.clear();
        }
        let now = Local::now();
        let added = update.lines().len().min(self.max_entries);
        let skip = update.lines().len() - added;
        for line in &update.lines()[skip..] {
            self.next_id += 1;
            self.entries
                .push_back(LogEntry::from_line(self.next_id, line, now));
        }
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        self.last_update_time = Some(now);

        let len = self.entries.len();
        self.entries.make_contiguous();
        &self.entries.as_slices().0[len - added..]
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_update_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(range: std::ops::RangeInclusive<u64>) -> Vec<LogLine> {
        range
            .map(|n| LogLine {
                text: format!("line {n}"),
                line_number: n,
            })
            .collect()
    }

    #[test]
    fn test_append_classifies_and_numbers() {
        let mut state = LogState::new(10);
        let added = state.apply_update(&LogUpdate::Append {
            lines: vec![
                LogLine {
                    text: "ERROR disk".into(),
                    line_number: 4,
                },
                LogLine {
                    text: "ok".into(),
                    line_number: 5,
                },
            ],
        });
        assert_eq!(added.len(), 2);
        assert_eq!(added[0].level, Level::Error);
        assert_eq!(added[1].level, Level::Other);
        assert_eq!(added[1].line_number, 5);
        assert!(added[0].id < added[1].id);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut state = LogState::new(3);
        state.apply_update(&LogUpdate::Append { lines: lines(1..=2) });
        let added = state.apply_update(&LogUpdate::Append { lines: lines(3..=4) });
        assert_eq!(added.len(), 2);
        let numbers: Vec<u64> = state.entries().map(|e| e.line_number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }

    #[test]
    fn test_oversized_batch_keeps_tail() {
        let mut state = LogState::new(2);
        let added = state.apply_update(&LogUpdate::Reset { lines: lines(1..=5) });
        let numbers: Vec<u64> = added.iter().map(|e| e.line_number).collect();
        assert_eq!(numbers, vec![4, 5]);
    }

    #[test]
    fn test_reset_replaces_entries() {
        let mut state = LogState::new(10);
        state.apply_update(&LogUpdate::Append { lines: lines(7..=9) });
        state.apply_update(&LogUpdate::Reset { lines: lines(1..=1) });
        assert_eq!(state.len(), 1);
        assert_eq!(state.entries().next().map(|e| e.line_number), Some(1));

        state.apply_update(&LogUpdate::Reset { lines: Vec::new() });
        assert!(state.is_empty());
    }
}
