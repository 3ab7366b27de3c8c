// Raw disk and volume imaging library
//
// The CLI in main.rs is a thin layer over `imaging::plan_imaging` and
// `imaging::execute_plan`; everything else is reachable for embedding.

pub mod config;
pub mod disk;
pub mod error;
pub mod imaging;
pub mod logging;
pub mod models;
pub mod utils;

pub use config::ImagingConfig;
pub use error::ImagingError;
pub use imaging::{ImagingPlan, NoProgress, ProgressSink, execute_plan, plan_imaging, run_imaging};
