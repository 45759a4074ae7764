//! SignBridge native messaging host.
//!
//! stdin/stdout carry the framed native-messaging stream; the
//! operator is talked to on stderr and the controlling terminal; all
//! diagnostics go to a rolling file log under `~/.signbridge/logs/`.

mod operator;
mod runtime;

use {
    anyhow::Result,
    clap::Parser,
    flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming},
    signbridge_sdk::conf,
    std::path::PathBuf,
};

#[derive(Parser)]
#[command(
    name = "signbridge",
    version,
    about = "Bridges a browser extension to a PKCS#11 token for digital signing."
)]
struct Cli {
    /// Additional PKCS#11 vendor libraries to load, on top of the
    /// platform search paths.
    #[arg(long = "p11-lib", value_name = "PATH")]
    p11_libs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parsing runs first so `--version` and `--help` exit without
    // touching the log directory.
    let cli = Cli::parse();

    let _logger = init_logging()?;
    log::info!("starting {} v{}", conf::APP_NAME, conf::APP_VERSION);

    runtime::run(cli.p11_libs).await
}

/// Rolling file log (5 MiB per file, 3 rotated files kept) with WARN
/// and above duplicated to stderr. stdout is never logged to: it is
/// reserved for native messaging.
fn init_logging() -> Result<LoggerHandle> {
    let logger = Logger::try_with_env_or_str("debug")?;

    let handle = match conf::log_dir() {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("signbridge"))
            .rotate(
                Criterion::Size(conf::LOG_MAX_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(conf::LOG_KEEP_FILES),
            )
            .duplicate_to_stderr(Duplicate::Warn)
            .start()?,
        None => logger.log_to_stderr().start()?,
    };
    Ok(handle)
}
