use crate::runner::CommandRunner;

/// Location of the grader entry point: the interpreter to launch and the
/// script path handed to it.
#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub interpreter: String,
    pub script: String,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script: "gatorgrader/gatorgrader.py".to_string(),
        }
    }
}

impl GraderConfig {
    pub fn new(interpreter: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    /// Build a runner whose command vector starts with the interpreter and
    /// script path, followed by `args`.
    pub fn command<I, S>(&self, args: I) -> CommandRunner
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandRunner::new([self.interpreter.clone(), self.script.clone()]).with_args(args)
    }
}
