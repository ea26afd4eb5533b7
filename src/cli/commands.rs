//! CLI command definitions for promptforge.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::collection::collection_from_directory;
use crate::config::{CacheKind, ForgeConfig};
use crate::executor::{
    ExecutionReport, ExecutorTools, PipelineExecutor, ProcessScriptTools, StdinUserInterface, TemplateStatus,
};
use crate::llm::{
    CachedExecutionTools, ExecutionToolsRegistry, RemoteServer, SharedExecutionTools, ToolsConfiguration,
};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{compile_pipeline, pipeline_from_json, pipeline_to_json, validate_pipeline, Pipeline};
use crate::preparation::{prepare_pipeline, HttpFetcher};
use crate::template::Parameters;

/// Compile, prepare and run markdown prompt pipelines.
#[derive(Parser)]
#[command(name = "promptforge")]
#[command(about = "Compile, prepare and run markdown prompt pipelines")]
#[command(version)]
#[command(
    long_about = "promptforge compiles markdown pipeline books into their JSON form, prepares their knowledge and personas, and executes them against LLM backends.\n\nExample usage:\n  promptforge run ./greeting.book.md --input name=Ada --mock"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file.
    #[arg(short, long, global = true, env = "FORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Compile a pipeline book into its JSON form.
    Compile(CompileArgs),

    /// Check a pipeline for parse and logic errors.
    Validate(ValidateArgs),

    /// Prepare knowledge and personas of a pipeline.
    Prepare(PrepareArgs),

    /// Execute a pipeline.
    #[command(alias = "exec")]
    Run(RunArgs),

    /// Serve execution tools to remote clients.
    Serve(ServeArgs),
}

/// Arguments for `promptforge compile`.
#[derive(Parser, Debug)]
pub struct CompileArgs {
    /// Pipeline book (`.book.md`) or compiled JSON.
    pub file: PathBuf,

    /// Write the JSON here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `promptforge validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Pipeline book (`.book.md`) or compiled JSON.
    pub file: PathBuf,
}

/// Arguments for `promptforge prepare`.
#[derive(Parser, Debug)]
pub struct PrepareArgs {
    /// Pipeline book (`.book.md`) or compiled JSON.
    pub file: PathBuf,

    /// Write the prepared JSON here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Use the mocked tools instead of the configured ones.
    #[arg(long)]
    pub mock: bool,
}

/// Arguments for `promptforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Pipeline book (`.book.md`) or compiled JSON.
    pub file: PathBuf,

    /// Input parameter as `name=value`; repeatable.
    #[arg(short = 'i', long = "input", value_parser = parse_input)]
    pub inputs: Vec<(String, String)>,

    /// Use the mocked tools instead of the configured ones.
    #[arg(long)]
    pub mock: bool,

    /// Persist the prompt cache in this directory.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Directory of pipelines that joker pipeline URLs resolve against.
    #[arg(long)]
    pub collection: Option<PathBuf>,

    /// Templates running at the same time.
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Attempts per template.
    #[arg(long)]
    pub max_attempts: Option<usize>,

    /// Stop the run at the first failed template.
    #[arg(long)]
    pub crash_on_error: bool,

    /// Output the full execution report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `promptforge serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Serve the mocked tools to identified clients.
    #[arg(long)]
    pub mock: bool,

    /// Refuse requests that bring their own tools configuration.
    #[arg(long)]
    pub no_anonymous: bool,
}

/// Parse a `name=value` input argument.
pub fn parse_input(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim().trim_start_matches('{').trim_end_matches('}');
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = ForgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let registry = Arc::new(ExecutionToolsRegistry::with_defaults());

    match cli.command {
        Commands::Compile(args) => run_compile_command(args).await,
        Commands::Validate(args) => run_validate_command(args).await,
        Commands::Prepare(args) => run_prepare_command(args, &config, &registry).await,
        Commands::Run(args) => run_pipeline_command(args, config, &registry).await,
        Commands::Serve(args) => run_serve_command(args, config, registry).await,
    }
}

async fn run_compile_command(args: CompileArgs) -> anyhow::Result<()> {
    let pipeline = load_pipeline(&args.file).await?;
    let json = pipeline_to_json(&pipeline)?;
    write_or_print(args.output.as_deref(), &json).await?;
    info!(pipeline = %pipeline.title, templates = pipeline.templates.len(), "Pipeline compiled");
    Ok(())
}

async fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let pipeline = load_pipeline(&args.file).await?;
    println!(
        "{}: valid ({} parameters, {} templates)",
        pipeline.title,
        pipeline.parameters.len(),
        pipeline.templates.len()
    );
    Ok(())
}

async fn run_prepare_command(
    args: PrepareArgs,
    config: &ForgeConfig,
    registry: &ExecutionToolsRegistry,
) -> anyhow::Result<()> {
    let pipeline = load_pipeline(&args.file).await?;
    let tools = build_tools(config, registry, args.mock).await?;
    let prepared = prepare_pipeline(
        &pipeline,
        tools.as_ref(),
        &HttpFetcher::default(),
        &config.prepare_options(),
    )
    .await
    .with_context(|| format!("Failed to prepare {}", args.file.display()))?;

    write_or_print(args.output.as_deref(), &pipeline_to_json(&prepared)?).await?;
    info!(
        pipeline = %prepared.title,
        pieces = prepared.knowledge_pieces.len(),
        personas = prepared.personas.len(),
        "Pipeline prepared"
    );
    Ok(())
}

async fn run_pipeline_command(
    args: RunArgs,
    mut config: ForgeConfig,
    registry: &ExecutionToolsRegistry,
) -> anyhow::Result<()> {
    if let Some(dir) = &args.cache_dir {
        config.cache.dir = dir.clone();
        if matches!(config.cache.kind, CacheKind::None | CacheKind::Memory) {
            config.cache.kind = CacheKind::Filesystem;
        }
    }
    if let Some(count) = args.max_parallel {
        config.executor.max_parallel_count = count;
    }
    if let Some(attempts) = args.max_attempts {
        config.executor.max_execution_attempts = attempts;
    }
    if args.crash_on_error {
        config.executor.is_crashed_on_error = true;
    }
    config.validate()?;

    if args.metrics {
        init_metrics().context("Failed to initialize metrics")?;
    }

    let pipeline = load_pipeline(&args.file).await?;
    let llm = build_tools(&config, registry, args.mock).await?;
    let mut tools = ExecutorTools::new(llm)
        .with_script(Arc::new(ProcessScriptTools::default()))
        .with_user_interface(Arc::new(StdinUserInterface));
    if let Some(dir) = &args.collection {
        let collection = collection_from_directory(dir)
            .await
            .with_context(|| format!("Failed to load pipelines from {}", dir.display()))?;
        info!(pipelines = collection.len(), "Pipeline collection loaded");
        tools = tools.with_collection(Arc::new(collection));
    }

    let executor = PipelineExecutor::new(pipeline, tools, config.executor_options())?;
    let inputs: Parameters = args.inputs.into_iter().collect();
    let report = executor.execute(&inputs).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if args.metrics {
        println!("{}", export_metrics());
    }

    match report.first_failure() {
        Some(failure) => Err(failure.into()),
        None if !report.is_successful() => Err(anyhow::anyhow!("Pipeline run was aborted")),
        None => Ok(()),
    }
}

async fn run_serve_command(
    args: ServeArgs,
    mut config: ForgeConfig,
    registry: Arc<ExecutionToolsRegistry>,
) -> anyhow::Result<()> {
    if let Some(port) = args.port {
        config.remote.port = port;
    }
    if args.no_anonymous {
        config.remote.is_anonymous_mode_allowed = false;
    }

    let mut server =
        RemoteServer::new(registry.clone()).with_anonymous_mode(config.remote.is_anonymous_mode_allowed);
    if args.mock || !config.tools.is_empty() {
        server = server.with_tools(build_tools(&config, &registry, args.mock).await?);
    } else {
        warn!("No tools configured; only anonymous requests can be answered");
    }

    let handle = server
        .bind(&config.remote.address())
        .await
        .with_context(|| format!("Failed to bind {}", config.remote.address()))?;
    println!("Listening on {}", handle.local_addr());

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutting down remote server");
    handle.shutdown().await;
    Ok(())
}

/// Compiled JSON is read as-is and validated; anything else is compiled as a book.
async fn load_pipeline(path: &Path) -> anyhow::Result<Pipeline> {
    let source = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let pipeline = if is_json {
        let pipeline = pipeline_from_json(&source)?;
        validate_pipeline(&pipeline)?;
        pipeline
    } else {
        compile_pipeline(&source)?
    };
    Ok(pipeline)
}

/// Configured tools, or the mocked ones, wrapped in the configured cache.
async fn build_tools(
    config: &ForgeConfig,
    registry: &ExecutionToolsRegistry,
    is_mocked: bool,
) -> anyhow::Result<SharedExecutionTools> {
    let configuration = if is_mocked {
        vec![
            ToolsConfiguration::new("mocked-echo"),
            ToolsConfiguration::new("mocked-embedding"),
        ]
    } else if config.tools.is_empty() {
        vec![ToolsConfiguration::new("openai-compatible")]
    } else {
        config.tools.clone()
    };
    let tools = registry.create_from_configuration(&configuration)?;

    let storage = config
        .cache
        .open_storage()
        .await
        .context("Failed to open prompt cache")?;
    Ok(match storage {
        Some(storage) => Arc::new(CachedExecutionTools::new(tools, storage).with_reload(config.cache.is_reloaded)),
        None => tools,
    })
}

async fn write_or_print(output: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{content}");
            Ok(())
        }
    }
}

fn print_report(report: &ExecutionReport) {
    println!("{}", report.pipeline_title);
    for template in &report.templates {
        let marker = match template.status {
            TemplateStatus::Succeeded => "ok",
            TemplateStatus::Failed => "FAILED",
            TemplateStatus::Skipped => "skipped",
        };
        print!("  [{marker}] {} ({} attempts)", template.title, template.attempts);
        match &template.error {
            Some(error) => println!(": {error}"),
            None => println!(),
        }
    }
    for (name, value) in &report.outputs {
        println!("{{{name}}} = {value}");
    }
    println!(
        "usage: {} input words, {} output words",
        report.usage.input.words, report.usage.output.words
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ExecutionTools;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("name=Ada").unwrap(), ("name".to_string(), "Ada".to_string()));
        assert_eq!(parse_input("{q}=a=b").unwrap(), ("q".to_string(), "a=b".to_string()));
        assert!(parse_input("novalue").is_err());
        assert!(parse_input("=x").is_err());
    }

    #[test]
    fn test_cli_parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "promptforge",
            "run",
            "greeting.book.md",
            "--input",
            "name=Ada",
            "-i",
            "mood=calm",
            "--mock",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.inputs.len(), 2);
                assert!(args.mock);
                assert!(args.json);
                assert_eq!(args.file, PathBuf::from("greeting.book.md"));
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[tokio::test]
    async fn test_load_pipeline_from_book_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("echo.book.md");
        std::fs::write(
            &book,
            "# Echo\n\n- INPUT PARAMETER {x}\n- OUTPUT PARAMETER {y}\n\n## Echo\n\n- SIMPLE TEMPLATE\n\n```\necho: {x}\n```\n\n-> {y}\n",
        )
        .unwrap();

        let pipeline = load_pipeline(&book).await.unwrap();
        assert_eq!(pipeline.title, "Echo");

        let json = dir.path().join("echo.json");
        std::fs::write(&json, pipeline_to_json(&pipeline).unwrap()).unwrap();
        assert_eq!(load_pipeline(&json).await.unwrap(), pipeline);
    }

    #[tokio::test]
    async fn test_build_tools_without_cache() {
        let config = ForgeConfig::default().with_cache_kind(CacheKind::None);
        let registry = ExecutionToolsRegistry::with_defaults();
        let tools = build_tools(&config, &registry, true).await.unwrap();
        assert!(!tools.list_models().await.unwrap().is_empty());
    }
}
