use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use lockfs::config::{Backend, Cli, StressConfig};
use lockfs::stress::{self, StressReport};
use lockfs::{LockFs, MemFs, OsFs, SymlinkFileSystem};

fn main() {
    let cli = Cli::parse();

    let config = StressConfig::from_command(cli.command).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    });

    // Set up logging
    let appender = config.log_file.as_ref().map(|log_file| {
        let log_dir = log_file.parent().unwrap_or_else(|| std::path::Path::new("/tmp"));
        let log_name = log_file
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("lockfs.log"));
        let file_appender = tracing_appender::rolling::never(log_dir, log_name);
        tracing_appender::non_blocking(file_appender)
    });
    let (file_writer, _guard) = match appender {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_writer.map(|writer| {
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
        }))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        );
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("lockfs stress starting: backend={:?}", config.backend);

    let result = match config.backend {
        Backend::Mem => execute(LockFs::new(MemFs::new()), &config),
        Backend::Os => {
            let root = config.root.clone().unwrap_or_default();
            OsFs::new(&root).and_then(|osfs| execute(LockFs::new(osfs), &config))
        }
    };

    let report = result.unwrap_or_else(|e| {
        error!("stress run failed: {}", e);
        std::process::exit(1);
    });

    if config.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("failed to encode report: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        print_summary(&report);
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
}

fn execute<F: SymlinkFileSystem + 'static>(
    fs: LockFs<F>,
    config: &StressConfig,
) -> lockfs::Result<StressReport> {
    let report = stress::run(&fs, config)?;
    // Leave the host tree as we found it.
    if config.backend == Backend::Os {
        fs.remove_all("/stress")?;
    }
    Ok(report)
}

fn print_summary(report: &StressReport) {
    println!("started:   {}", report.started_at);
    println!("elapsed:   {} ms", report.elapsed_ms);
    println!("workers:   {}", report.workers);
    println!(
        "written:   {} files, {} bytes",
        report.files_written, report.bytes_written
    );
    println!("sweeps:    {}", report.sweeps);
    println!("verified:  {}", report.verified);
    println!("renamed:   {}, removed: {}", report.renamed, report.removed);
    if report.is_clean() {
        println!("result:    ok");
    } else {
        println!("result:    {} mismatches", report.mismatches.len());
        for path in report.mismatches.iter().take(10) {
            println!("  {}", path);
        }
    }
}
