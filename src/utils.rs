pub mod elevation;
pub mod format;
pub mod tracker;

pub use elevation::{elevation_status, is_elevated};
pub use format::format_file_size;
pub use tracker::{LogProgressSink, ProgressBarSink};
