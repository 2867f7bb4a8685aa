use clap::Parser;
use dvfs_sweep::SweepCommand;
use flexi_logger::{DeferredNow, Duplicate, FileSpec, Logger, LoggerHandle, Record, WriteMode};
use std::io::{Error, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn custom_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> Result<(), Error> {
    write!(
        w,
        "[{}] {:5} {}",
        now.format("%d-%m-%Y %H:%M:%S"),
        record.level(),
        record.args()
    )
}

fn configure_logger(log_dir: &Path) -> Result<LoggerHandle, Box<dyn std::error::Error>> {
    let spec = FileSpec::default()
        .directory(log_dir)
        .basename("sweep")
        .suppress_timestamp();
    let handle = Logger::try_with_env_or_str("info")?
        .log_to_file(spec)
        .duplicate_to_stderr(Duplicate::Info)
        .format(custom_format)
        .write_mode(WriteMode::Direct)
        .append()
        .start()?;
    Ok(handle)
}

fn main() {
    let args = SweepCommand::parse();
    let config = match args.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let logger = if args.dry_run {
        None
    } else {
        match configure_logger(&args.log_directory(&config)) {
            Ok(handle) => Some(handle),
            Err(err) => {
                eprintln!("Failed to configure logger: {}", err);
                std::process::exit(1);
            }
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        log::warn!("Failed to install Ctrl-C handler: {}", err);
    }

    if let Err(err) = args.handle(config, &cancel) {
        match logger {
            Some(_) => log::error!("{}", err),
            None => eprintln!("{}", err),
        }
        std::process::exit(1);
    }
}
