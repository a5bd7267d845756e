use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use archive_catalog::blobservice;
use archive_catalog::catalogservice::MemoryCatalogService;
use archive_catalog::config::ControllerConfig;
use archive_catalog::controller::{ArchiveController, ArchiveUpload, ProcessOutcome};
use archive_catalog::extract::TarExtractor;
use archive_catalog::processor::ArchiveProcessor;
use archive_catalog::tree::calculate_verification_codes;
use clap::{Args, Parser, Subcommand};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info_span, Instrument, Level};
use tracing_indicatif::span_ext::IndicatifSpanExt;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Whether to log in JSON
    #[arg(long)]
    json: bool,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Show progress spinners while processing.
    #[arg(long)]
    progress: bool,

    /// TOML file with the controller configuration.
    #[arg(long, env = "ARCHIVE_CATALOG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Values overriding the configuration file.
#[derive(Args)]
struct ConfigOverrides {
    #[arg(long, env = "ARCHIVE_CATALOG_WORKERS")]
    workers: Option<usize>,

    #[arg(long, env = "ARCHIVE_CATALOG_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    #[arg(long, env = "ARCHIVE_CATALOG_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    #[arg(long, env = "ARCHIVE_CATALOG_BLOB_SERVICE_ADDR")]
    blob_service_addr: Option<String>,
}

impl ConfigOverrides {
    fn apply(self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(queue_capacity) = self.queue_capacity {
            config.queue_capacity = queue_capacity;
        }
        if let Some(scratch_dir) = self.scratch_dir {
            config.scratch_dir = scratch_dir;
        }
        if let Some(blob_service_addr) = self.blob_service_addr {
            config.blob_service_addr = blob_service_addr;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Catalogs a list of archives, printing one line per archive.
    Process {
        #[clap(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    /// Prints the verification codes of an archive without cataloging it.
    Code {
        #[clap(value_name = "PATH")]
        path: PathBuf,

        #[arg(long, env = "ARCHIVE_CATALOG_SCRATCH_DIR")]
        scratch_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut tracing_builder = catalog_tracing::TracingBuilder::default()
        .level(cli.log_level)
        .json(cli.json);
    if cli.progress {
        tracing_builder = tracing_builder.enable_progressbar();
    }
    let tracing_handle = tracing_builder.build()?;
    let mut stdout = tracing_handle.get_stdout_writer();

    let config = match &cli.config {
        Some(path) => ControllerConfig::from_file(path).await?,
        None => ControllerConfig::default(),
    };

    match cli.command {
        Commands::Process { paths, overrides } => {
            let config = overrides.apply(config);
            let blob_service = blobservice::from_addr(&config.blob_service_addr).await?;
            let controller = ArchiveController::spawn(
                &config,
                Arc::new(TarExtractor),
                blob_service,
                Arc::new(MemoryCatalogService::default()),
            );

            let span = info_span!("process", indicatif.pb_show = 1);
            span.pb_set_style(&catalog_tracing::PB_PROGRESS_STYLE);
            span.pb_set_length(paths.len() as u64);
            span.pb_set_message("Cataloging archives");

            let mut failed = 0;
            let controller = &controller;
            async {
                let mut results: FuturesUnordered<_> = paths
                    .iter()
                    .map(|path| async move {
                        (path, controller.process(ArchiveUpload::new(path)).await)
                    })
                    .collect();

                while let Some((path, result)) = results.next().await {
                    match result {
                        Ok(ProcessOutcome::Cataloged {
                            part_id,
                            verification_code,
                        }) => {
                            writeln!(stdout, "{} {} {}", path.display(), part_id, verification_code)?
                        }
                        Ok(ProcessOutcome::AlreadyCataloged { part_id }) => {
                            writeln!(stdout, "{} {} already cataloged", path.display(), part_id)?
                        }
                        Ok(ProcessOutcome::PlainFile { sha256 }) => {
                            writeln!(stdout, "{} plain file {}", path.display(), sha256)?
                        }
                        Err(e) => {
                            error!(path = %path.display(), err = %e, "unable to catalog");
                            failed += 1;
                        }
                    }
                    tracing::Span::current().pb_inc(1);
                }
                Ok::<(), std::io::Error>(())
            }
            .instrument(span)
            .await?;

            controller.shutdown().await;

            if failed > 0 {
                return Err(format!("{} of {} archives failed", failed, paths.len()).into());
            }
        }
        Commands::Code { path, scratch_dir } => {
            let scratch_dir = scratch_dir.unwrap_or(config.scratch_dir);
            let mut processor = ArchiveProcessor::new(Arc::new(TarExtractor), scratch_dir);
            let root = processor.process_archive(&path).await?;
            calculate_verification_codes(&root)?;

            let root = root.read();
            let codes = root.verification_codes();
            for (version, code) in [("v1", &codes.one), ("v2", &codes.two)] {
                match code {
                    Some(code) => writeln!(stdout, "{} {}", version, code)?,
                    None => writeln!(stdout, "{} unavailable", version)?,
                }
            }
        }
    };

    Ok(())
}
