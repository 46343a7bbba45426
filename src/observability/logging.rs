use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Route `log` records through `fern`: warnings and errors to stderr, the
/// rest (progress, totals) to stdout.
pub fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	let format = move |out: fern::FormatCallback, message: &std::fmt::Arguments, record: &log::Record| {
		out.finish(format_args!(
			"{} {:<5} [{}] {}",
			chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
			colors.color(record.level()),
			record.target(),
			message
		))
	};

	let stderr = fern::Dispatch::new()
		.level(LevelFilter::Warn)
		.chain(std::io::stderr());

	let stdout = fern::Dispatch::new()
		.filter(|meta| meta.level() > log::Level::Warn)
		.chain(std::io::stdout());

	fern::Dispatch::new()
		.format(format)
		.level(level)
		// the HTTP stack is chatty below info
		.level_for("hyper", LevelFilter::Info)
		.level_for("reqwest", LevelFilter::Info)
		.chain(stderr)
		.chain(stdout)
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}

/// Render an error and every cause under it as `outer: inner: ...`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
	let mut out = err.to_string();
	let mut cause = err.source();
	while let Some(c) = cause {
		out.push_str(": ");
		out.push_str(&c.to_string());
		cause = c.source();
	}
	out
}

/// Map repeated `-v` flags onto a level, starting from the configured one.
pub fn level_from_verbosity(base: log::Level, verbose: u8) -> LevelFilter {
	let mut level = base.to_level_filter();
	for _ in 0..verbose {
		level = match level {
			LevelFilter::Off => LevelFilter::Error,
			LevelFilter::Error => LevelFilter::Warn,
			LevelFilter::Warn => LevelFilter::Info,
			LevelFilter::Info => LevelFilter::Debug,
			LevelFilter::Debug | LevelFilter::Trace => LevelFilter::Trace,
		};
	}
	level
}
