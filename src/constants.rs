/// Window read from the end of the file when building the initial tail.
pub const TAIL_READ_SIZE: u64 = 64 * 1024;
/// Block size used while counting line terminators.
pub const COUNT_BLOCK_SIZE: usize = 1024 * 1024;

pub const DEFAULT_TAIL_LINES: usize = 1000;
pub const DEFAULT_MAX_ENTRIES: usize = 2000;

pub const POLL_INTERVAL_MS: u64 = 50;

pub const LINE_NUMBER_WIDTH: usize = 7;

/// Deepest expression/statement nesting the transform parser accepts.
pub const MAX_SCRIPT_DEPTH: usize = 128;
/// Deepest expression nesting the transform evaluator follows, counting
/// nested function calls.
pub const MAX_EVAL_DEPTH: usize = 128;
