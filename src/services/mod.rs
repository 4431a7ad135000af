pub mod batch_runner;
pub mod report;

pub use batch_runner::{run_batch, BatchOptions, Diagnostic, RunCounts, RunSummary};
pub use report::{default_output_path, write_reports, ReportPaths};
