//! Process-launch utilities: run an external command, stream its merged
//! stdout/stderr to the console while capturing it, and read the exit code
//! once the child terminates. Includes a preconfigured invocation of the
//! GatorGrader entry point.

pub mod error;
pub mod grader;
pub mod report;
pub mod runner;

pub use error::{Result, RunnerError};
pub use grader::GraderConfig;
pub use report::RunReport;
pub use runner::CommandRunner;
