use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};

use credindex::config::{self, Settings};
use credindex::dispatch::{BulkDispatcher, DispatchReport, PartitionSet};
use credindex::engine::{ElasticClient, IndexEngine, MemoryEngine, load_index_config};
use credindex::ingest::{LineScanner, RowCodec};
use credindex::observability::{
	MetricsRegistry, error_chain, init_logging, init_metrics, level_from_verbosity,
};

#[derive(Parser)]
#[command(
	name = "credindex",
	version,
	about = "credindex - normalize credential dumps and bulk-load them into a partitioned index"
)]
struct Cli {
	/// Raise log verbosity (repeatable)
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbose: u8,
	/// Extra JSON config file layered over the standard locations
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Normalize every file in the given directories into the intermediate file
	Scan {
		/// Source tag attached to every record
		#[arg(long)]
		source_id: Option<i64>,
		/// Intermediate file to append rows to
		#[arg(long)]
		output: Option<PathBuf>,
		/// Write Prometheus text metrics here when done
		#[arg(long)]
		metrics_out: Option<PathBuf>,
		#[arg(required = true)]
		dirs: Vec<PathBuf>,
	},
	/// Load an intermediate file into the index engine
	Load {
		/// Validate and count against an in-memory engine instead of a cluster
		#[arg(long)]
		dry_run: bool,
		/// Parallel submission workers
		#[arg(long)]
		workers: Option<usize>,
		/// Actions per bulk submission
		#[arg(long)]
		chunk_size: Option<usize>,
		/// Write Prometheus text metrics here when done
		#[arg(long)]
		metrics_out: Option<PathBuf>,
		file: PathBuf,
	},
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let mut settings = match config::load_with(cli.config.as_deref()) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to load config: {}", error_chain(&e));
			std::process::exit(2);
		}
	};

	if let Err(e) = init_logging(level_from_verbosity(settings.log_level, cli.verbose)) {
		eprintln!("{}", e);
	}

	let result = match cli.command {
		Commands::Scan {
			source_id,
			output,
			metrics_out,
			dirs,
		} => {
			if let Some(id) = source_id {
				settings.source_id = id;
			}
			if let Some(out) = output {
				settings.output_file = out;
			}
			run_scan(&settings, &dirs, metrics_out.as_deref())
		}
		Commands::Load {
			dry_run,
			workers,
			chunk_size,
			metrics_out,
			file,
		} => {
			if let Some(n) = workers {
				settings.worker_count = n;
			}
			if let Some(n) = chunk_size {
				settings.chunk_size = n;
			}
			run_load(&settings, &file, dry_run, metrics_out.as_deref()).await
		}
	};

	if let Err(e) = result {
		error!("{:#}", e);
		std::process::exit(1);
	}
}

fn run_scan(settings: &Settings, dirs: &[PathBuf], metrics_out: Option<&Path>) -> anyhow::Result<()> {
	settings.validate()?;
	let metrics = init_metrics()?;
	let scanner = LineScanner::new(settings.scan_config()).with_metrics(metrics.clone());

	let file = OpenOptions::new()
		.create(true)
		.append(true)
		.open(&settings.output_file)
		.with_context(|| format!("opening {}", settings.output_file.display()))?;
	let mut out = BufWriter::new(file);

	let total = scanner.scan_dirs(dirs, Some(settings.source_id), &mut out)?;
	out.flush()
		.with_context(|| format!("flushing {}", settings.output_file.display()))?;

	info!(
		"scanned {} files ({} failed, {} directories unreadable): {} lines, {} records appended to {}",
		total.files,
		total.failed_files,
		total.failed_dirs,
		total.lines,
		total.records,
		settings.output_file.display()
	);
	write_metrics(&metrics, metrics_out)
}

async fn run_load(
	settings: &Settings,
	file: &Path,
	dry_run: bool,
	metrics_out: Option<&Path>,
) -> anyhow::Result<()> {
	settings.validate()?;
	let metrics = init_metrics()?;
	let index_config = load_index_config(settings.index_config_path.as_deref())?;

	let memory = dry_run.then(|| Arc::new(MemoryEngine::new()));
	let engine: Arc<dyn IndexEngine> = match &memory {
		Some(m) => m.clone() as Arc<dyn IndexEngine>,
		None => Arc::new(ElasticClient::new(
			settings.engine_url()?,
			settings.engine_credentials.clone(),
			Some(settings.request_timeout()),
		)?),
	};

	let dispatcher = BulkDispatcher::new(
		engine,
		PartitionSet::new(&settings.partition_config()),
		RowCodec::new(settings.codec_config()),
		settings.dispatch_config(),
		metrics.clone(),
	);

	let provisioned = dispatcher
		.provision(&index_config, settings.reset_partitions)
		.await
		.context("provisioning partitions")?;
	info!("{} partitions ready", provisioned);

	let report = dispatcher.dispatch_file(file).await?;
	print_report(&report);

	if let Some(m) = memory {
		for (partition, count) in m.partition_counts().await {
			if count > 0 {
				println!("{partition}\t{count}");
			}
		}
	}
	write_metrics(&metrics, metrics_out)
}

fn print_report(report: &DispatchReport) {
	info!(
		"{} lines read, {} rows rejected, {} records in {} chunks",
		report.lines_read, report.rejected_rows, report.records, report.chunks
	);
	if report.failed_documents > 0 {
		log::warn!(
			"{} documents not stored ({} whole chunks failed, {} dead-lettered)",
			report.failed_documents,
			report.failed_chunks,
			report.dead_lettered
		);
	}
	if report.truncated {
		log::warn!("input ended on a read error; later rows were not loaded");
	}
}

fn write_metrics(metrics: &MetricsRegistry, path: Option<&Path>) -> anyhow::Result<()> {
	if let Some(p) = path {
		metrics
			.write_textfile(p)
			.with_context(|| format!("writing metrics to {}", p.display()))?;
	}
	Ok(())
}
