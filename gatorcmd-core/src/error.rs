use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Empty command, nothing to execute")]
    EmptyCommand,

    #[error("Command was already executed")]
    AlreadyStarted,

    #[error("Command not finished, no exit code available")]
    NotFinished,
}

pub type Result<T> = std::result::Result<T, RunnerError>;
