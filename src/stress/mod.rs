//! Concurrent workload that exercises a [`LockFs`] from many threads and
//! checks that nothing was lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_128;

use crate::config::{Backend, StressConfig};
use crate::error::Result;
use crate::fs::{File, FileSystem};
use crate::lock::file::LockFile;
use crate::lock::LockFs;

const STRESS_DIR: &str = "/stress";

const READ_CHUNK: usize = 8192;

#[derive(Serialize, Debug, Clone, Default)]
pub struct StressReport {
    pub backend: Backend,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub workers: usize,
    pub files_written: u64,
    pub bytes_written: u64,
    pub sweeps: u64,
    pub verified: u64,
    pub renamed: u64,
    pub removed: u64,
    /// Paths whose contents did not match what was written.
    pub mismatches: Vec<String>,
}

impl StressReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Default)]
struct Counters {
    files: AtomicU64,
    bytes: AtomicU64,
    sweeps: AtomicU64,
    renamed: AtomicU64,
    removed: AtomicU64,
}

fn worker_dir(worker: usize) -> String {
    format!("{}/w{}", STRESS_DIR, worker)
}

/// Read a handle from its current offset to end of file.
pub fn read_to_end<H: File>(file: &LockFile<H>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(data);
        }
        data.extend_from_slice(&buf[..n]);
    }
}

/// Run every worker on its own scoped thread and return the first error.
fn run_workers<T: Send>(workers: usize, job: impl Fn(usize) -> Result<T> + Sync) -> Result<Vec<T>> {
    thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let job = &job;
                s.spawn(move || job(worker))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}

/// Run the workload against `fs`.
///
/// Each worker fills its own directory under `/stress` with seeded random
/// payloads while sweeping a peer's directory with `read_dir` and `stat`.
/// Every file is then re-read through a fresh handle and compared against the
/// digest recorded at write time. Finally each worker renames half its files
/// and removes a quarter, and the surviving set is checked again.
pub fn run<F: FileSystem + 'static>(fs: &LockFs<F>, config: &StressConfig) -> Result<StressReport> {
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let timer = Instant::now();
    info!(
        "stress: workers={}, files_per_worker={}, payload_bytes={}, seed={}",
        config.workers, config.files_per_worker, config.payload_bytes, config.seed
    );

    fs.mkdir_all(STRESS_DIR, 0o755)?;
    for worker in 0..config.workers {
        fs.mkdir_all(&worker_dir(worker), 0o755)?;
    }

    let digests: DashMap<String, u128> = DashMap::new();
    let counters = Counters::default();

    run_workers(config.workers, |worker| {
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(worker as u64));
        let peer = worker_dir((worker + 1) % config.workers);
        for i in 0..config.files_per_worker {
            let path = format!("{}/f{}", worker_dir(worker), i);
            let mut payload = vec![0u8; config.payload_bytes];
            rng.fill_bytes(&mut payload);

            let file = fs.create(&path)?;
            let half = payload.len() / 2;
            file.write(&payload[..half])?;
            file.write_at(&payload[half..], half as u64)?;
            file.sync()?;
            file.close()?;

            digests.insert(path, xxh3_128(&payload));
            counters.files.fetch_add(1, Ordering::Relaxed);
            counters.bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);

            for entry in fs.read_dir(&peer)? {
                fs.stat(&format!("{}/{}", peer, entry.name))?;
            }
            counters.sweeps.fetch_add(1, Ordering::Relaxed);
        }
        debug!("stress: worker {} finished writing", worker);
        Ok(())
    })?;

    let mut mismatches = verify(fs, &digests)?;
    let verified = digests.len() as u64;

    run_workers(config.workers, |worker| {
        let dir = worker_dir(worker);
        for i in 0..config.files_per_worker {
            let path = format!("{}/f{}", dir, i);
            if i % 4 == 1 {
                fs.remove(&path)?;
                digests.remove(&path);
                counters.removed.fetch_add(1, Ordering::Relaxed);
            } else if i % 2 == 0 {
                let renamed = format!("{}/r{}", dir, i);
                fs.rename(&path, &renamed)?;
                if let Some((_, digest)) = digests.remove(&path) {
                    digests.insert(renamed, digest);
                }
                counters.renamed.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    })?;

    for worker in 0..config.workers {
        let dir = worker_dir(worker);
        let listed = fs.read_dir(&dir)?.len();
        let expected = digests.iter().filter(|e| e.key().starts_with(&format!("{}/", dir))).count();
        if listed != expected {
            warn!("stress: {} lists {} entries, expected {}", dir, listed, expected);
            mismatches.push(dir);
        }
    }
    for entry in digests.iter() {
        if xxh3_128(&fs.read_file(entry.key())?) != *entry.value() {
            mismatches.push(entry.key().clone());
        }
    }

    let report = StressReport {
        backend: config.backend,
        started_at,
        elapsed_ms: timer.elapsed().as_millis() as u64,
        workers: config.workers,
        files_written: counters.files.load(Ordering::Relaxed),
        bytes_written: counters.bytes.load(Ordering::Relaxed),
        sweeps: counters.sweeps.load(Ordering::Relaxed),
        verified,
        renamed: counters.renamed.load(Ordering::Relaxed),
        removed: counters.removed.load(Ordering::Relaxed),
        mismatches,
    };
    info!(
        "stress: done in {}ms, {} files, {} mismatches",
        report.elapsed_ms,
        report.files_written,
        report.mismatches.len()
    );
    Ok(report)
}

/// Re-open every recorded file and compare its digest.
fn verify<F: FileSystem + 'static>(
    fs: &LockFs<F>,
    digests: &DashMap<String, u128>,
) -> Result<Vec<String>> {
    let mut mismatches = Vec::new();
    for entry in digests.iter() {
        let file = fs.open(entry.key())?;
        let data = read_to_end(&file)?;
        let size = file.stat()?.size;
        file.close()?;
        if xxh3_128(&data) != *entry.value() || size != data.len() as u64 {
            warn!("stress: content mismatch in {}", entry.key());
            mismatches.push(entry.key().clone());
        }
    }
    Ok(mismatches)
}
