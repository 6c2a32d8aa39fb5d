use crate::config::ViewerConfig;
use crate::core::{FilterState, LogState, RenderedLine};
use crate::transform::TransformLimits;
use crate::watcher::{WatchEvent, WatchOptions};
use std::sync::mpsc::{Receiver, TryRecvError};

/// Something the front end should show.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// The file was reopened or truncated; previous output is stale.
    Reset,
    Line(RenderedLine),
    Status(String),
}

/// Consumer side of a watcher: stores arriving entries and renders the
/// ones that pass the current filters.
pub struct App {
    pub log_state: LogState,
    pub filter_state: FilterState,
    pub status_message: Option<String>,
    source_rx: Receiver<WatchEvent>,
    disconnected: bool,
}

impl App {
    pub fn new(source_rx: Receiver<WatchEvent>, config: &ViewerConfig) -> Self {
        let mut app = Self {
            log_state: LogState::new(config.max_entries),
            filter_state: FilterState::default(),
            status_message: None,
            source_rx,
            disconnected: false,
        };
        app.filter_state.set_filter(&config.filter);
        app.filter_state.set_highlight(&config.highlight);
        app.filter_state.set_levels(&config.levels);
        app.apply_transform(&config.transform, config.transform_max_steps);
        app
    }

    pub fn watch_options(config: &ViewerConfig) -> WatchOptions {
        WatchOptions {
            max_lines: config.tail_lines,
            ..WatchOptions::default()
        }
    }

    /// Recompiles the transform; a compile error becomes the status message.
    pub fn apply_transform(&mut self, source: &str, max_steps: Option<u64>) {
        let error = self
            .filter_state
            .set_transform(source, TransformLimits { max_steps })
            .map(|e| format!("Transform error: {e}"));
        self.status_message = error;
    }

    /// True once the watcher has gone away and no more events can arrive.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Drains every pending event without blocking.
    pub fn poll_source(&mut self) -> Vec<Output> {
        let mut out = Vec::new();
        if let Some(status) = self.status_message.take() {
            out.push(Output::Status(status));
        }
        loop {
            match self.source_rx.try_recv() {
                Ok(event) => self.handle_event(event, &mut out),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        out
    }

    fn handle_event(&mut self, event: WatchEvent, out: &mut Vec<Output>) {
        match event {
            WatchEvent::Update(update) => {
                if update.is_reset() {
                    out.push(Output::Reset);
                }
                let added = self.log_state.apply_update(&update);
                out.extend(
                    added
                        .iter()
                        .filter_map(|entry| self.filter_state.render(entry))
                        .map(Output::Line),
                );
            }
            WatchEvent::Error(e) => out.push(Output::Status(format!("Source error: {e}"))),
        }
    }

    /// Renders every stored entry with the current filters.
    pub fn visible_lines(&self) -> Vec<RenderedLine> {
        self.log_state
            .entries()
            .filter_map(|entry| self.filter_state.render(entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::{LogLine, LogUpdate};
    use std::sync::mpsc;

    fn line(n: u64, text: &str) -> LogLine {
        LogLine {
            text: text.to_string(),
            line_number: n,
        }
    }

    #[test]
    fn test_poll_renders_filtered_lines() {
        let (tx, rx) = mpsc::channel();
        let config = ViewerConfig {
            filter: "disk".into(),
            ..ViewerConfig::default()
        };
        let mut app = App::new(rx, &config);

        tx.send(WatchEvent::Update(LogUpdate::Reset {
            lines: vec![line(1, "disk full"), line(2, "all good")],
        }))
        .unwrap();
        tx.send(WatchEvent::Update(LogUpdate::Append {
            lines: vec![line(3, "disk ok")],
        }))
        .unwrap();
        tx.send(WatchEvent::Error("gone".into())).unwrap();

        let out = app.poll_source();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Output::Reset);
        assert!(matches!(&out[1], Output::Line(l) if l.line_number == 1));
        assert!(matches!(&out[2], Output::Line(l) if l.line_number == 3));
        assert_eq!(out[3], Output::Status("Source error: gone".into()));
        assert_eq!(app.log_state.len(), 3);
        assert!(!app.is_disconnected());

        drop(tx);
        assert!(app.poll_source().is_empty());
        assert!(app.is_disconnected());
    }

    #[test]
    fn test_transform_error_reported_once() {
        let (_tx, rx) = mpsc::channel();
        let config = ViewerConfig {
            transform: "line => (".into(),
            ..ViewerConfig::default()
        };
        let mut app = App::new(rx, &config);
        let out = app.poll_source();
        assert!(matches!(&out[0], Output::Status(s) if s.starts_with("Transform error")));
        assert!(app.poll_source().is_empty());
    }

    #[test]
    fn test_visible_lines_follow_filter_changes() {
        let (tx, rx) = mpsc::channel();
        let mut app = App::new(rx, &ViewerConfig::default());
        tx.send(WatchEvent::Update(LogUpdate::Reset {
            lines: vec![line(1, "INFO start"), line(2, "ERROR stop")],
        }))
        .unwrap();
        app.poll_source();
        assert_eq!(app.visible_lines().len(), 2);

        app.filter_state.set_levels(&[crate::level::Level::Error]);
        let visible = app.visible_lines();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].text, "ERROR stop");
    }
}
