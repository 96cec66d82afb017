use clap::{Parser, Subcommand};
use gatorcmd_core::{CommandRunner, GraderConfig, RunReport};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "gatorcmd")]
#[command(about = "Run external commands with live output capture", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an arbitrary command
    Run {
        /// Capture output silently instead of mirroring it live
        #[arg(long)]
        no_mirror: bool,

        /// Print a JSON run report instead of raw output
        #[arg(long)]
        json: bool,

        /// Working directory for the child process
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Command and arguments to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run the GatorGrader script with the given arguments
    Grade {
        /// Interpreter used to launch the grader (default: python3)
        #[arg(long)]
        interpreter: Option<String>,

        /// Path to the grader script (default: gatorgrader/gatorgrader.py)
        #[arg(long)]
        script: Option<String>,

        /// Capture output silently instead of mirroring it live
        #[arg(long)]
        no_mirror: bool,

        /// Print a JSON run report instead of raw output
        #[arg(long)]
        json: bool,

        /// Arguments passed through to the grader
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            no_mirror,
            json,
            work_dir,
            command,
        } => {
            let mut runner = CommandRunner::new(command).with_mirroring(!no_mirror && !json);
            if let Some(dir) = work_dir {
                runner = runner.with_work_dir(dir);
            }
            report_and_exit(runner, no_mirror, json).await
        }
        Commands::Grade {
            interpreter,
            script,
            no_mirror,
            json,
            args,
        } => {
            let mut config = GraderConfig::default();
            if let Some(interpreter) = interpreter {
                config.interpreter = interpreter;
            }
            if let Some(script) = script {
                config.script = script;
            }
            let runner = config.command(args).with_mirroring(!no_mirror && !json);
            report_and_exit(runner, no_mirror, json).await
        }
    }
}

async fn report_and_exit(runner: CommandRunner, no_mirror: bool, json: bool) -> anyhow::Result<()> {
    runner.run().await?;
    let exit_code = runner.exit_code()?;

    if json {
        let report = RunReport::from_runner(&runner)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if no_mirror {
        println!("OUTPUT:\n{}", runner.output());
        println!("EXIT VALUE: {}", exit_code);
    }

    if exit_code != 0 {
        process::exit(exit_code);
    }
    Ok(())
}
