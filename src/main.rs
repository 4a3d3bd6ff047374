use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use spark_bootstrap::config::loader::load_effective_config;
use spark_bootstrap::error::ConfigError;
use spark_bootstrap::log_collector::{level_from_env, session_log_path};
use spark_bootstrap::models::BuildTarget;
use spark_bootstrap::system::paths::absolutize;
use spark_bootstrap::{BootstrapConfig, LogCollector, Pipeline, RunReport, SystemRunner, DEFAULT_TARGET};

/// Fetch, build and bundle Spark OS into a bootable ISO.
#[derive(Parser, Debug)]
#[command(name = "spark_bootstrap", version, about)]
struct Cli {
    /// Target profile; selects the output directory `out/<TARGET>`.
    #[arg(value_name = "TARGET", default_value = DEFAULT_TARGET)]
    target: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let base_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: cannot determine working directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = load_effective_config(&base_dir);

    // Session log lives under the configured log directory, even when the
    // configuration itself failed to load.
    let log_dir = match &config {
        Ok(c) => absolutize(&base_dir, &c.workspace.log_dir),
        Err(_) => base_dir.join("out/logs"),
    };
    init_logging(&log_dir, &cli.target);

    log::info!("Welcome to the Spark OS Bootstrapper");

    let code = match run(&cli, &base_dir, config) {
        Ok(report) => {
            log::info!("Image ready at {}", report.image.display());
            log::info!("==> Finished operation.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    };

    log::logger().flush();
    code
}

fn run(cli: &Cli, base_dir: &Path, config: Result<BootstrapConfig, ConfigError>) -> anyhow::Result<RunReport> {
    let config = config.context("failed to load configuration")?;
    let runner = SystemRunner::with_timeout(config.toolchain.timeout_secs.map(Duration::from_secs));
    Pipeline::new(&config, &runner, base_dir)
        .run(&cli.target)
        .with_context(|| format!("bootstrap of '{}' failed", cli.target))
}

fn init_logging(log_dir: &Path, target: &str) {
    let level = level_from_env();
    // Only a valid target name is safe to embed in a file name.
    let log_file = BuildTarget::new(target, log_dir)
        .ok()
        .map(|t| session_log_path(log_dir, &t.name));

    let collector = match LogCollector::new(log_file, level) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("warning: {}; logging to console only", e);
            match LogCollector::new(None, level) {
                Ok(collector) => collector,
                Err(_) => return,
            }
        }
    };

    if let Err(e) = collector.install() {
        eprintln!("warning: failed to install logger: {}", e);
    }
}
