use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "lockfs", about = "Thread-safe filesystem wrappers with hierarchical locking")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a concurrent workload against a wrapped backend and verify it
    Stress {
        /// Backend to wrap
        #[arg(long, value_enum, default_value_t = Backend::Mem)]
        backend: Backend,

        /// Host directory served by the `os` backend
        #[arg(long)]
        root: Option<PathBuf>,

        /// Number of concurrent workers
        #[arg(long, default_value_t = 8)]
        workers: usize,

        /// Files each worker creates
        #[arg(long, default_value_t = 32)]
        files_per_worker: usize,

        /// Size of each file payload
        #[arg(long, default_value_t = 4096)]
        payload_bytes: usize,

        /// Seed for the payload generator (random if omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Also write logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Mem,
    Os,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--workers must be at least 1")]
    NoWorkers,

    #[error("--root is required with --backend os")]
    MissingRoot,

    #[error("--root {0:?} is not a directory")]
    RootNotADirectory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub backend: Backend,
    pub root: Option<PathBuf>,
    pub workers: usize,
    pub files_per_worker: usize,
    pub payload_bytes: usize,
    pub seed: u64,
    pub log_file: Option<PathBuf>,
    pub json: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        StressConfig {
            backend: Backend::Mem,
            root: None,
            workers: 8,
            files_per_worker: 32,
            payload_bytes: 4096,
            seed: 0,
            log_file: None,
            json: false,
        }
    }
}

impl StressConfig {
    /// Validate the `stress` arguments.
    pub fn from_command(command: Command) -> Result<Self, ConfigError> {
        let Command::Stress {
            backend,
            root,
            workers,
            files_per_worker,
            payload_bytes,
            seed,
            log_file,
            json,
        } = command;

        if workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if backend == Backend::Os {
            match &root {
                None => return Err(ConfigError::MissingRoot),
                Some(dir) if !dir.is_dir() => {
                    return Err(ConfigError::RootNotADirectory(dir.clone()))
                }
                Some(_) => {}
            }
        }

        Ok(StressConfig {
            backend,
            root,
            workers,
            files_per_worker,
            payload_bytes,
            seed: seed.unwrap_or_else(rand::random),
            log_file,
            json,
        })
    }
}
