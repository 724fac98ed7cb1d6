use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sage_core::{
    ConfigLoader, Services, SessionOptions, SessionOutcome, TelemetryOptions, WorkflowSettings,
    init_metrics_from_env, init_telemetry, run_report_session_with_options,
};
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "sage-cli",
    version,
    about = "Research a topic through three analyst interviews and print a Markdown report"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce a report for one topic.
    Report(ReportArgs),
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Topic to research. Read from stdin when omitted.
    #[arg(long)]
    topic: Option<String>,

    /// Path to a TOML configuration file (defaults to `SAGE_CONFIG` or `sage.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the deterministic offline services instead of the live providers.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Override `interview.max_turns`.
    #[arg(long)]
    max_turns: Option<usize>,

    /// Interview the analysts concurrently.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Print the workflow trace after the report.
    #[arg(long, value_enum)]
    explain: Option<ExplainFormat>,

    /// Persist the workflow trace as JSON into this directory.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Write the report to a file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Optional session ID used in logs and trace file names.
    #[arg(long)]
    session: Option<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ExplainFormat {
    Markdown,
    Mermaid,
    Graphviz,
}

impl ExplainFormat {
    fn render(self, outcome: &SessionOutcome) -> Option<String> {
        match self {
            ExplainFormat::Markdown => outcome.explain_markdown(),
            ExplainFormat::Mermaid => outcome.explain_mermaid(),
            ExplainFormat::Graphviz => outcome.explain_graphviz(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Report(args) => report_command(args).await?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn report_command(args: ReportArgs) -> Result<()> {
    let config = ConfigLoader::load_with(args.config.clone(), args.offline)?;

    init_telemetry(TelemetryOptions::from_level(&config.logging.level))?;
    init_metrics_from_env("sage-cli");

    let topic = match args.topic {
        Some(topic) => topic,
        None => prompt_topic()?,
    };

    let mut settings =
        WorkflowSettings::from_config(&config).with_parallel_interviews(args.parallel);
    if let Some(max_turns) = args.max_turns {
        settings = settings.with_max_turns(max_turns);
    }

    let services = Services::from_config(&config)?;
    info!(
        topic = %topic.trim(),
        offline = config.is_offline(),
        max_turns = settings.max_turns,
        parallel = settings.parallel_interviews,
        "starting SAGE report"
    );

    let mut options = SessionOptions::new(&topic, services).with_settings(settings);
    if let Some(session_id) = args.session {
        options = options.with_session_id(session_id);
    }
    if let Some(dir) = args.trace_dir {
        options = options.with_trace_output_dir(dir);
    }

    let outcome = run_report_session_with_options(options).await?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &outcome.report)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{}", outcome.report),
    }

    if let Some(path) = outcome.trace_path.as_ref() {
        info!(path = %path.display(), "trace persisted");
    }

    if let Some(format) = args.explain {
        if let Some(explanation) = format.render(&outcome) {
            println!("\n{explanation}");
        }
    }

    Ok(())
}

fn prompt_topic() -> Result<String> {
    print!("Enter a research topic: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read topic from stdin")?;

    let topic = line.trim().to_string();
    if topic.is_empty() {
        bail!("no topic provided");
    }
    Ok(topic)
}
