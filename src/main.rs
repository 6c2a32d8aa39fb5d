use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::Stylize;
use logtail::app::{App, Output};
use logtail::config::ViewerConfig;
use logtail::constants::POLL_INTERVAL_MS;
use logtail::highlight::paint;
use logtail::level::Level;
use logtail::watcher::FileTailWatcher;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "logtail")]
#[command(about = "Follow a log file with filtering, highlighting and per-line transforms")]
struct Cli {
    #[arg(help = "Log file to follow")]
    file: PathBuf,

    #[arg(short, long, help = "Config file (defaults to <config dir>/logtail/config.json)")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Only show lines containing all of these keywords")]
    filter: Option<String>,

    #[arg(short = 'H', long, help = "Keywords to highlight")]
    highlight: Option<String>,

    #[arg(short, long, help = "Transform snippet or preset (json:message, strip-ansi, trim)")]
    transform: Option<String>,

    #[arg(short = 'L', long = "level", help = "Only show these levels (repeatable)")]
    levels: Vec<Level>,

    #[arg(short = 'n', long, help = "Number of lines to show initially")]
    lines: Option<usize>,

    #[arg(long, help = "Maximum number of entries kept in memory")]
    max_entries: Option<usize>,

    #[arg(long, help = "Disable colored output")]
    no_color: bool,

    #[arg(long, help = "Write the effective settings back to the config file")]
    save_config: bool,
}

impl Cli {
    fn into_config(self) -> Result<(PathBuf, ViewerConfig, bool)> {
        let mut config = ViewerConfig::load(self.config.as_deref());
        if let Some(filter) = self.filter {
            config.filter = filter;
        }
        if let Some(highlight) = self.highlight {
            config.highlight = highlight;
        }
        if let Some(transform) = self.transform {
            config.transform = transform;
        }
        if !self.levels.is_empty() {
            config.levels = self.levels;
        }
        if let Some(lines) = self.lines {
            config.tail_lines = lines;
        }
        if let Some(max_entries) = self.max_entries {
            config.max_entries = max_entries;
        }
        if self.save_config {
            let path = self
                .config
                .or_else(ViewerConfig::default_path)
                .context("no config directory available")?;
            config.save_to(&path)?;
            tracing::info!(path = %path.display(), "saved configuration");
        }
        Ok((self.file, config, self.no_color))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("logtail=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let (path, config, no_color) = Cli::parse().into_config()?;
    let color = !no_color && io::stdout().is_terminal();

    let (mut watcher, rx) = FileTailWatcher::new(App::watch_options(&config));
    let mut app = App::new(rx, &config);
    watcher
        .watch_file(&path)
        .with_context(|| format!("failed to follow {}", path.display()))?;

    let result = run(&mut app, color);
    watcher.dispose();
    result
}

fn run(app: &mut App, color: bool) -> Result<()> {
    let stdout = io::stdout();
    loop {
        let output = app.poll_source();
        if !output.is_empty() {
            let mut out = stdout.lock();
            for item in output {
                match item {
                    Output::Line(line) => writeln!(out, "{}", paint(&line, color))?,
                    Output::Reset => {
                        let marker = "--- file reset ---";
                        if color {
                            eprintln!("{}", marker.dark_grey());
                        } else {
                            eprintln!("{marker}");
                        }
                    }
                    Output::Status(message) => eprintln!("{message}"),
                }
            }
            out.flush()?;
        }
        if app.is_disconnected() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }
}
