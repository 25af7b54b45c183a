//! flaky-detector CLI - reruns a test suite under varying seeds and reports
//! flaky tests.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use flaky_detector::config::{self, Config};
use flaky_detector::executor::LocalExecutor;
use flaky_detector::framework::{detect_framework, known_ids, lookup};
use flaky_detector::orchestrator::{JobSettings, Orchestrator, RunConfig};
use flaky_detector::report::ConsoleReporter;

#[derive(Parser)]
#[command(name = "flaky-detector")]
#[command(about = "Detect flaky tests by running a suite repeatedly under different seeds", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the test suite repeatedly and report flaky tests
    Run {
        /// Directory to run in (overrides working_dir)
        #[arg(short = 'C', long)]
        dir: Option<PathBuf>,

        /// Test command (overrides test_command)
        #[arg(long)]
        command: Option<String>,

        /// Number of runs
        #[arg(long)]
        runs: Option<usize>,

        /// Maximum concurrent runs
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Framework identifier; detected when omitted
        #[arg(long)]
        framework: Option<String>,

        /// Explicit comma-separated seed list, one per run
        #[arg(long, value_delimiter = ',')]
        seeds: Option<Vec<u64>>,

        /// JSON report output path
        #[arg(long)]
        json: Option<PathBuf>,

        /// Run the framework's install command first
        #[arg(long)]
        install: bool,

        /// Keep every run's stdout and stderr in the JSON report
        #[arg(long)]
        save_output: bool,
    },

    /// Show which framework would be used for a directory
    Detect {
        /// Directory to inspect
        #[arg(short = 'C', long)]
        dir: Option<PathBuf>,

        /// Framework identifier to look up instead of detecting
        #[arg(long)]
        framework: Option<String>,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Framework identifier to write into the file
        #[arg(short, long)]
        framework: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let result = match cli.command {
        Commands::Run {
            dir,
            command,
            runs,
            parallel,
            framework,
            seeds,
            json,
            install,
            save_output,
        } => {
            let overrides = RunOverrides {
                dir,
                command,
                runs,
                parallel,
                framework,
                seeds,
                save_output,
            };
            run_job(&cli.config, overrides, json, install, cli.verbose).await
        }
        Commands::Detect { dir, framework } => show_detection(dir, framework.as_deref()).map(|_| 0),
        Commands::Validate => validate_config(&cli.config).map(|_| 0),
        Commands::Init { framework, force } => {
            init_config(&cli.config, framework.as_deref(), force).map(|_| 0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

struct RunOverrides {
    dir: Option<PathBuf>,
    command: Option<String>,
    runs: Option<usize>,
    parallel: Option<usize>,
    framework: Option<String>,
    seeds: Option<Vec<u64>>,
    save_output: bool,
}

impl RunOverrides {
    fn apply(self, config: &mut Config) {
        let detector = &mut config.detector;
        if let Some(dir) = self.dir {
            detector.working_dir = Some(dir);
        }
        if let Some(command) = self.command {
            detector.test_command = Some(command);
        }
        if let Some(runs) = self.runs {
            detector.runs = runs;
        }
        if let Some(parallel) = self.parallel {
            detector.parallelism = parallel;
        }
        if let Some(framework) = self.framework {
            detector.framework = Some(framework);
        }
        if let Some(seeds) = self.seeds {
            detector.seeds = Some(seeds);
        }
        if self.save_output {
            detector.save_full_output = true;
        }
    }
}

async fn run_job(
    config_path: &Path,
    overrides: RunOverrides,
    json_path: Option<PathBuf>,
    install: bool,
    verbose: bool,
) -> Result<u8> {
    let mut config = config::load_config_or_default(config_path)?;
    overrides.apply(&mut config);
    config.detector.validate()?;

    let input = config.detector.job_input()?;
    let settings = JobSettings::from_config(&config.detector)?;
    let run_config = RunConfig::new(&input, &settings)?;

    let executor = LocalExecutor::new().with_stream_output(config.detector.stream_output);
    let orchestrator = Orchestrator::new(executor, ConsoleReporter::new(verbose));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping runs");
                cancel.cancel();
            }
        });
    }

    if install {
        orchestrator.install(&run_config, &cancel).await;
    }

    let report = orchestrator.run(&run_config, &cancel).await;

    if let Some(path) = json_path.or(config.report.output) {
        report.write_json(&path)?;
        info!("Report written to {}", path.display());
    }

    Ok(report.exit_code() as u8)
}

fn show_detection(dir: Option<PathBuf>, framework: Option<&str>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let adapter = detect_framework(&dir, framework)?;

    println!("Framework:       {}", console::style(adapter.id).bold());
    println!("Seed variable:   {}", adapter.seed_env);
    println!("Install command: {}", adapter.install_command);
    println!("Run template:    {}", adapter.run_command);
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    let config = config::load_config(config_path)?;
    config.detector.validate()?;

    let d = &config.detector;
    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!(
        "  Test command: {}",
        d.test_command.as_deref().unwrap_or("(none)")
    );
    println!("  Runs:         {}", d.runs);
    println!("  Parallelism:  {}", d.parallelism);
    println!(
        "  Framework:    {}",
        d.framework.as_deref().unwrap_or("(detected)")
    );
    println!("  Timeout:      {}s", d.timeout_secs);
    if let Some(secs) = d.job_timeout_secs {
        println!("  Job timeout:  {}s", secs);
    }
    println!("  Seed range:   {}..={}", d.seed_range.min, d.seed_range.max);
    if !d.ignore_patterns.is_empty() {
        println!("  Ignoring:     {}", d.ignore_patterns.join(", "));
    }
    Ok(())
}

fn init_config(path: &Path, framework: Option<&str>, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let framework_line = match framework {
        Some(id) => {
            let adapter = lookup(id)
                .with_context(|| format!("Unknown framework '{}'. Known: {}", id, known_ids()))?;
            format!("framework = \"{}\"", adapter.id)
        }
        None => "# framework = \"python\"  # detected when omitted".to_string(),
    };

    let content = format!(
        r#"[detector]
test_command = "pytest tests/"
runs = 10
parallelism = 4
{framework_line}
timeout_secs = 300
# job_timeout_secs = 1800
# base_seed = 12345
ignore_patterns = []
max_error_length = 200
save_full_output = false

[detector.seed_range]
min = 1
max = 1000000

[report]
output = "flaky-report.json"
"#
    );

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    Ok(())
}
