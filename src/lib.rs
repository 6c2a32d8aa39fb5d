pub mod app;
pub mod config;
pub mod constants;
pub mod core;
pub mod highlight;
pub mod keyword;
pub mod level;
pub mod reassemble;
pub mod tail;
pub mod transform;
pub mod watcher;

pub use level::{classify, Level};
pub use transform::{compile_content_transform, CompiledTransform};
pub use watcher::{FileTailWatcher, LogLine, LogUpdate, WatchError, WatchEvent, WatchOptions};
