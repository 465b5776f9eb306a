// file: src/main.rs
// description: commandline application entry point with command handling
// reference: application bootstrap and orchestration

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use gravekeeper::utils::{format_error, format_info, format_success, format_warning};
use gravekeeper::{
    Config, PipelineOrchestrator, ProviderConfig, RunReport, Stage, spawn_ctrl_c_listener,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "config/default.toml";

#[derive(Parser)]
#[command(name = "gravekeeper")]
#[command(version)]
#[command(about = "Find sensitive content in linked documents", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = true, action = ArgAction::Set, global = true)]
    color: bool,

    #[arg(short, long, action = ArgAction::SetTrue, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest, download, extract and scan every link, resuming earlier work
    Run(RunArgs),

    /// Print the summary of the last run
    Report {
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    #[arg(long, value_name = "FILE", conflicts_with = "local_files")]
    csv_file: Option<PathBuf>,

    #[arg(long, value_name = "NAME")]
    link_column: Option<String>,

    #[arg(long, value_name = "PATH", num_args = 1..)]
    local_files: Vec<PathBuf>,

    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    #[arg(long, value_name = "CHARS")]
    chunk_size: Option<usize>,

    #[arg(long)]
    skip_download: bool,

    #[arg(long)]
    skip_ocr: bool,

    #[arg(long)]
    skip_ai: bool,

    #[arg(long)]
    disable_pdf_ocr: bool,

    #[arg(long, value_name = "KEY")]
    ai_provider: Option<String>,

    #[arg(long, value_name = "MODEL")]
    ai_model: Option<String>,

    #[arg(long, value_name = "URL")]
    ai_host: Option<String>,

    #[arg(long, value_name = "MODEL")]
    vision_model: Option<String>,

    /// Discard results from this stage on and recompute them
    #[arg(long, value_name = "STAGE")]
    reprocess_from: Option<Stage>,

    /// Reprocess every item from the download on
    #[arg(long)]
    force: bool,

    #[arg(short, long, value_name = "NUM")]
    workers: Option<usize>,
}

impl RunArgs {
    fn apply(self, config: &mut Config) {
        if let Some(csv_file) = self.csv_file {
            config.input.csv_file = Some(csv_file);
            config.input.local_files.clear();
        }
        if !self.local_files.is_empty() {
            config.input.local_files = self.local_files;
            config.input.csv_file = None;
        }
        if let Some(link_column) = self.link_column {
            config.input.link_column = link_column;
        }
        if let Some(output_dir) = self.output_dir {
            config.pipeline.output_dir = output_dir;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.processing.chunk_size = chunk_size;
        }
        if let Some(workers) = self.workers {
            config.pipeline.parallel_workers = workers;
        }

        config.pipeline.skip_download |= self.skip_download;
        config.pipeline.skip_ocr |= self.skip_ocr;
        config.pipeline.skip_ai |= self.skip_ai;
        config.pipeline.force_reprocess |= self.force;
        if self.disable_pdf_ocr {
            config.extraction.pdf_ocr = false;
        }
        if self.reprocess_from.is_some() {
            config.pipeline.reprocess_from = self.reprocess_from;
        }

        let primary = &mut config.detection.primary;
        if let Some(provider) = self.ai_provider {
            primary.provider = provider;
        }
        if let Some(model) = self.ai_model {
            primary.model = model;
        }
        if let Some(host) = self.ai_host {
            primary.host = host.clone();
            if let Some(vision) = config.detection.vision.as_mut() {
                vision.host = host;
            }
        }

        if let Some(model) = self.vision_model {
            match config.detection.vision.as_mut() {
                Some(vision) => vision.model = model,
                None => {
                    config.detection.vision = Some(ProviderConfig {
                        model,
                        ..config.detection.primary.clone()
                    })
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    gravekeeper::utils::logging::init_logger(cli.color, cli.verbose);
    colored::control::set_override(cli.color);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => cmd_run(config, args, cli.color).await?,
        Commands::Report { output_dir } => {
            let output_dir = output_dir.unwrap_or(config.pipeline.output_dir);
            cmd_report(&output_dir).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::load(Some(path)).context("Failed to load configuration")
        }
        None => {
            if !Path::new(DEFAULT_CONFIG).exists() {
                warn!("Config file {} not found, using built-in defaults", DEFAULT_CONFIG);
            }
            Config::load(None).context("Failed to load configuration")
        }
    }
}

async fn cmd_run(mut config: Config, args: RunArgs, colored: bool) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    config.input_source().context("Invalid input selection")?;

    let output_dir = config.pipeline.output_dir.clone();
    let orchestrator = PipelineOrchestrator::new(config)
        .context("Failed to set up pipeline")?
        .with_progress(true, colored);

    let listener = spawn_ctrl_c_listener(orchestrator.cancellation_flag());
    let outcome = orchestrator.run().await;
    listener.abort();
    let outcome = outcome.context("Pipeline run failed")?;

    let counts = &outcome.report.counts;
    println!(
        "{}",
        format_success(&format!(
            "{} done, {} failed, {} skipped, {} finding(s)",
            counts.done, counts.failed, counts.skipped, outcome.report.detection.total_findings
        ))
    );
    if counts.failed > 0 {
        println!(
            "{}",
            format_error(&format!(
                "{} item(s) failed; see the report for each error kind",
                counts.failed
            ))
        );
    }
    if outcome.report.detection.degraded_chunks > 0 {
        println!(
            "{}",
            format_warning(&format!(
                "{} chunk(s) were scanned without every AI model",
                outcome.report.detection.degraded_chunks
            ))
        );
    }
    if outcome.report.run.cancelled {
        println!(
            "{}",
            format_warning(&format!("Run interrupted; {} item(s) left pending", counts.pending))
        );
    }
    println!(
        "{}",
        format_info(&format!("Report written to {}", output_dir.join("report.json").display()))
    );

    Ok(())
}

async fn cmd_report(output_dir: &Path) -> Result<()> {
    let report = RunReport::load(output_dir)
        .await
        .with_context(|| format!("Failed to load report from {}", output_dir.display()))?;
    print!("{}", report.render_summary());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "gravekeeper",
            "run",
            "--csv-file",
            "links.csv",
            "--skip-ai",
            "--reprocess-from",
            "extract",
            "--workers",
            "2",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let mut config = Config::default_config();
        args.apply(&mut config);

        assert_eq!(config.input.csv_file, Some(PathBuf::from("links.csv")));
        assert!(config.pipeline.skip_ai);
        assert_eq!(config.pipeline.reprocess_from, Some(Stage::Extracted));
        assert_eq!(config.pipeline.parallel_workers, 2);
    }

    #[test]
    fn test_csv_and_local_files_conflict() {
        let result = Cli::try_parse_from([
            "gravekeeper",
            "run",
            "--csv-file",
            "links.csv",
            "--local-files",
            "a.pdf",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_vision_model_flag_overrides_model() {
        let mut config = Config::default_config();
        RunArgs {
            vision_model: Some("llava".to_string()),
            ai_host: Some("http://gpu:11434".to_string()),
            ..Default::default()
        }
        .apply(&mut config);

        let vision = config.detection.vision.unwrap();
        assert_eq!(vision.model, "llava");
        assert_eq!(vision.host, "http://gpu:11434");
        assert_eq!(config.detection.primary.host, "http://gpu:11434");
    }
}
