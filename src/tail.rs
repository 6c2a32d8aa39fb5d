use crate::constants::{COUNT_BLOCK_SIZE, TAIL_READ_SIZE};
use crate::reassemble::normalize_terminators;
use crate::watcher::LogLine;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Result of the initial scan: the numbered tail plus the file's line count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tail {
    pub lines: Vec<LogLine>,
    pub total_lines: u64,
    /// File size the scan was bounded by. Bytes past it were not looked at.
    pub end_offset: u64,
}

/// Reads the last `max_lines` lines of `file` with absolute line numbers.
///
/// The whole file is scanned once in fixed blocks to count terminators, but
/// only the final `TAIL_READ_SIZE` bytes are decoded. Leaves the file cursor
/// at an unspecified position.
pub fn read_tail(file: &mut File, max_lines: usize) -> io::Result<Tail> {
    let size = file.metadata()?.len();
    if size == 0 {
        return Ok(Tail {
            lines: Vec::new(),
            total_lines: 0,
            end_offset: 0,
        });
    }

    let total_lines = count_lines(file, size)?;

    let start = size.saturating_sub(TAIL_READ_SIZE);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((size - start) as usize);
    file.by_ref().take(size - start).read_to_end(&mut buf)?;

    let text = normalize_terminators(&String::from_utf8_lossy(&buf));
    let mut segments: Vec<&str> = text.split('\n').collect();
    if text.ends_with('\n') {
        segments.pop();
    }
    if start > 0 && !segments.is_empty() {
        // prefix of this line lies before the window
        segments.remove(0);
    }

    let keep = segments.len().min(max_lines);
    let tail = &segments[segments.len() - keep..];
    let first = total_lines.saturating_sub(keep as u64).saturating_add(1).max(1);

    let lines = tail
        .iter()
        .enumerate()
        .map(|(i, text)| LogLine {
            text: (*text).to_string(),
            line_number: first + i as u64,
        })
        .collect();

    Ok(Tail {
        lines,
        total_lines,
        end_offset: size,
    })
}

/// Counts `\n` bytes in the first `size` bytes, plus one for unterminated
/// trailing content.
fn count_lines(file: &mut File, size: u64) -> io::Result<u64> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = file.by_ref().take(size);
    let mut buf = vec![0u8; COUNT_BLOCK_SIZE];
    let mut count = 0u64;
    let mut last = None;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        count += buf[..n].iter().filter(|b| **b == b'\n').count() as u64;
        last = Some(buf[n - 1]);
    }

    if matches!(last, Some(b) if b != b'\n') {
        count += 1;
    }
    Ok(count)
}
