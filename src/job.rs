//! High-level job orchestration: the API the CLI drives to list, create,
//! extract, update, or diff an archive against a folder, fanning the
//! per-entry work out across a thread pool and tracking overall progress.
//!
//! `run`/`join` spawn the job on its own thread so control returns to the
//! caller immediately; the per-entry fan-out within that thread is a
//! `rayon` pool sized to the job's configured thread count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::archive::Archive;
use crate::central_directory::Entry;
use crate::crc::Crc32Accumulator;
use crate::glob;
use crate::result::{ZipError, ZipResult};

const UPDATE_CHECK_CHUNK: usize = 128 * 1024;
const REPORT_INTERVAL: Duration = Duration::from_millis(2000);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What a [`Job`] does. A `Job` always has a concrete kind from
/// construction; there is no "unset" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    List,
    Create,
    Extract,
    Update,
    Diff,
}

/// Outcome of extracting (or verifying) a single archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressStatus {
    Error,
    AlreadyUpToDate,
    Extracted,
    FolderCreated,
    Skipping,
}

#[derive(Debug, Clone)]
pub struct DecompressTaskResult {
    pub status: DecompressStatus,
    pub bytes_downloaded: u64,
    pub bytes_written_to_disk: u64,
    pub filename: String,
    pub message: String,
}

/// Outcome of comparing a single archive entry (or loose local file)
/// against its counterpart on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
    Error,
    FileMatch,
    DirMatch,
    FileDifferent,
    FilePackageOnly,
    DirPackageOnly,
    FilePathOnly,
    DirPathOnly,
}

#[derive(Debug, Clone)]
pub struct DiffTaskResult {
    pub status: DiffStatus,
    pub size: u64,
    pub filename: String,
}

/// Bytes-processed/bytes-to-process counters plus a start time, shared
/// between the worker pool and whatever's polling [`Job::join`].
#[derive(Debug, Default)]
pub struct Progress {
    bytes_processed: AtomicU64,
    bytes_to_process: AtomicU64,
    start: RwLock<Option<Instant>>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.bytes_processed.store(0, Ordering::Relaxed);
        self.bytes_to_process.store(0, Ordering::Relaxed);
        *self.start.write().unwrap() = Some(Instant::now());
    }

    pub fn add_bytes_to_process(&self, n: u64) {
        self.bytes_to_process.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_processed(&self, n: u64) {
        self.bytes_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }

    pub fn bytes_to_process(&self) -> u64 {
        self.bytes_to_process.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        match *self.start.read().unwrap() {
            Some(start) => start.elapsed(),
            None => Duration::ZERO,
        }
    }

    pub fn percentage_complete(&self) -> u64 {
        let to_process = self.bytes_to_process();
        if to_process == 0 {
            return 0;
        }
        (self.bytes_processed() * 100) / to_process
    }

    pub fn bytes_per_second(&self) -> u64 {
        let elapsed_secs = self.elapsed().as_secs();
        if elapsed_secs == 0 {
            return 0;
        }
        self.bytes_processed() / elapsed_secs
    }

    pub fn estimated_seconds_remaining(&self) -> u64 {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return 0;
        }
        let remaining = self
            .bytes_to_process()
            .saturating_sub(self.bytes_processed());
        remaining / rate
    }
}

/// A job's overall state, polled by [`Job::join`] and read back by the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    None,
    Running,
    Finished,
    Error(String),
}

/// High-level archive operation: list, create, extract, update, or diff,
/// run on a background thread with its own internal (`rayon`) worker pool.
pub struct Job {
    kind: JobKind,
    archive: std::sync::Arc<Archive>,
    base_folder: Utf8PathBuf,
    pattern: String,
    skip_crc: bool,
    num_threads: usize,
    verbose: bool,
    status: Mutex<JobStatus>,
    progress: std::sync::Arc<Progress>,
    handle: Mutex<Option<JoinHandle<JobOutcome>>>,
}

/// Whatever a job produced, returned to the caller once [`Job::join`]
/// finishes.
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub listed: Vec<Entry>,
    pub decompress_results: Vec<DecompressTaskResult>,
    pub diff_results: Vec<DiffTaskResult>,
}

impl Job {
    pub fn new(kind: JobKind, archive: std::sync::Arc<Archive>) -> Self {
        Self {
            kind,
            archive,
            base_folder: Utf8PathBuf::new(),
            pattern: "*".to_string(),
            skip_crc: false,
            num_threads: 6,
            verbose: false,
            status: Mutex::new(JobStatus::None),
            progress: std::sync::Arc::new(Progress::new()),
            handle: Mutex::new(None),
        }
    }

    pub fn set_base_folder(&mut self, folder: &str) {
        if folder.is_empty() {
            return;
        }
        let normalized = folder.replace('\\', "/");
        self.base_folder = if normalized.ends_with('/') {
            Utf8PathBuf::from(normalized)
        } else {
            Utf8PathBuf::from(format!("{normalized}/"))
        };
    }

    pub fn set_pattern(&mut self, pattern: &str) {
        self.pattern = if pattern.is_empty() {
            "*".to_string()
        } else {
            pattern.to_string()
        };
    }

    pub fn set_skip_crc(&mut self, skip: bool) {
        self.skip_crc = skip;
    }

    /// A no-op once verbose mode has pinned the job to a single thread.
    pub fn set_num_threads(&mut self, n: usize) {
        if !self.verbose {
            self.num_threads = n.max(1);
        }
    }

    /// Forces single-threaded execution so log output from different
    /// files doesn't interleave.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
        if verbose {
            self.num_threads = 1;
        }
    }

    pub fn progress(&self) -> std::sync::Arc<Progress> {
        self.progress.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.status.lock().unwrap(), JobStatus::Finished | JobStatus::Error(_))
    }

    /// Starts the job on a background thread. Call [`Job::join`] to block
    /// until it finishes (while periodically reporting progress) and
    /// retrieve the result.
    pub fn run(&self) {
        *self.status.lock().unwrap() = JobStatus::Running;
        self.progress.reset();

        let kind = self.kind;
        let archive = self.archive.clone();
        let base_folder = self.base_folder.clone();
        let pattern = self.pattern.clone();
        let skip_crc = self.skip_crc;
        let num_threads = self.num_threads;
        let progress = self.progress.clone();

        let handle = std::thread::spawn(move || -> JobOutcome {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .expect("failed to build worker pool");

            pool.install(|| match kind {
                JobKind::List => run_list(&archive, &pattern),
                JobKind::Create => run_create(&archive, &base_folder, &pattern, &progress),
                JobKind::Extract => run_extract(&archive, &base_folder, &pattern, skip_crc, true, &progress),
                JobKind::Update => run_extract(&archive, &base_folder, &pattern, skip_crc, false, &progress),
                JobKind::Diff => run_diff(&archive, &base_folder, skip_crc, &progress),
            })
        });

        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Blocks until the job finishes, printing a progress line every two
    /// seconds while more than two seconds of work remains, then returns
    /// the result.
    pub fn join(&self) -> ZipResult<JobOutcome> {
        let handle = self
            .handle
            .lock()
            .unwrap()
            .take()
            .expect("Job::join called before Job::run");

        let mut last_report = Instant::now();
        while !handle.is_finished() {
            std::thread::sleep(POLL_INTERVAL);
            if last_report.elapsed() > REPORT_INTERVAL
                && self.progress.estimated_seconds_remaining() > REPORT_INTERVAL.as_secs()
            {
                log::info!(
                    "{}% complete, elapsed {}s, ~{}s remaining, {} bytes/s, {} of {} bytes",
                    self.progress.percentage_complete(),
                    self.progress.elapsed().as_secs(),
                    self.progress.estimated_seconds_remaining(),
                    self.progress.bytes_per_second(),
                    self.progress.bytes_processed(),
                    self.progress.bytes_to_process(),
                );
                last_report = Instant::now();
            }
        }

        let outcome = handle.join().map_err(|_| {
            ZipError::Corrupt("job worker thread panicked".to_string())
        })?;

        let errored = outcome
            .decompress_results
            .iter()
            .any(|r| matches!(r.status, DecompressStatus::Error));
        *self.status.lock().unwrap() = if errored {
            JobStatus::Error("one or more files failed".to_string())
        } else {
            JobStatus::Finished
        };

        Ok(outcome)
    }
}

fn run_list(archive: &Archive, pattern: &str) -> JobOutcome {
    let mut listed = archive.entries_matching(pattern);
    listed.sort_by(|a, b| a.name.cmp(&b.name));
    JobOutcome {
        listed,
        ..Default::default()
    }
}

/// Recursively walks `folder`, returning `(archive-relative name, local
/// path)` pairs for every regular file matching `pattern`, plus the folders
/// that match it (so empty directories are preserved on round-trip).
fn walk_matching(folder: &Utf8Path, pattern: &str) -> Vec<(String, Utf8PathBuf, bool)> {
    let mut out = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).into_iter().flatten() {
        let path = match Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let is_dir = entry.file_type().is_dir();
        let relative = path.strip_prefix(folder).unwrap_or(&path).to_string();
        let relative = if is_dir && !relative.ends_with('/') {
            format!("{relative}/")
        } else {
            relative
        };
        if glob::matches(pattern, &relative) {
            out.push((relative, path, is_dir));
        }
    }
    out
}

fn run_create(
    archive: &Archive,
    base_folder: &Utf8Path,
    pattern: &str,
    progress: &Progress,
) -> JobOutcome {
    let entries = walk_matching(base_folder, pattern);
    let total: u64 = entries
        .iter()
        .filter(|(_, _, is_dir)| !is_dir)
        .map(|(_, path, _)| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0))
        .sum();
    progress.add_bytes_to_process(total);

    let results: Vec<DecompressTaskResult> = entries
        .par_iter()
        .map(|(name, path, is_dir)| {
            let now = chrono::Local::now().naive_local();
            let outcome = if *is_dir {
                archive.add_folder(name, now)
            } else {
                archive.add_file(name, path, now)
            };
            let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            progress.add_bytes_processed(bytes);
            match outcome {
                Ok(()) => DecompressTaskResult {
                    status: if *is_dir {
                        DecompressStatus::FolderCreated
                    } else {
                        DecompressStatus::Extracted
                    },
                    bytes_downloaded: 0,
                    bytes_written_to_disk: bytes,
                    filename: name.clone(),
                    message: "added".to_string(),
                },
                Err(e) => DecompressTaskResult {
                    status: DecompressStatus::Error,
                    bytes_downloaded: 0,
                    bytes_written_to_disk: 0,
                    filename: name.clone(),
                    message: format!("error: {e}"),
                },
            }
        })
        .collect();

    JobOutcome {
        decompress_results: results,
        ..Default::default()
    }
}

/// A local file needs (re-)extraction if it's missing, its size differs,
/// or (failing that) its CRC-32 differs.
fn file_needs_update(local_path: &Utf8Path, expected_size: u64, expected_crc: u32) -> bool {
    let file = match std::fs::File::open(local_path) {
        Ok(f) => f,
        Err(_) => return true,
    };
    let metadata = match file.metadata() {
        Ok(m) => m,
        Err(_) => return true,
    };
    if metadata.len() != expected_size {
        return true;
    }

    use std::io::Read;
    let mut reader = std::io::BufReader::new(file);
    let mut accumulator = Crc32Accumulator::new();
    let mut buf = vec![0u8; UPDATE_CHECK_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => return true,
        };
        accumulator.update(&buf[..n]);
    }
    accumulator.finalize() != expected_crc
}

/// Extracts every matching entry to `base_folder`. `force` makes this
/// unconditional (`JobKind::Extract`: always overwrite); otherwise a file
/// whose size and CRC-32 already match is left untouched (`JobKind::Update`,
/// gated further by `skip_crc`).
fn run_extract(
    archive: &Archive,
    base_folder: &Utf8Path,
    pattern: &str,
    skip_crc: bool,
    force: bool,
    progress: &Progress,
) -> JobOutcome {
    let matching = archive.entries_matching(pattern);
    for entry in &matching {
        progress.add_bytes_to_process(entry.uncompressed_size);
    }

    let results: Vec<DecompressTaskResult> = matching
        .par_iter()
        .map(|entry| {
            if entry.name.is_empty() {
                return DecompressTaskResult {
                    status: DecompressStatus::Skipping,
                    bytes_downloaded: 0,
                    bytes_written_to_disk: 0,
                    filename: String::new(),
                    message: "empty filename".to_string(),
                };
            }

            let dest = base_folder.join(&entry.name);

            if entry.is_folder() {
                if let Err(e) = std::fs::create_dir_all(&dest) {
                    return DecompressTaskResult {
                        status: DecompressStatus::Error,
                        bytes_downloaded: 0,
                        bytes_written_to_disk: 0,
                        filename: entry.name.clone(),
                        message: format!("error: {e}"),
                    };
                }
                return DecompressTaskResult {
                    status: DecompressStatus::FolderCreated,
                    bytes_downloaded: 0,
                    bytes_written_to_disk: 0,
                    filename: entry.name.clone(),
                    message: "created folder".to_string(),
                };
            }

            if !force && !skip_crc && !file_needs_update(&dest, entry.uncompressed_size, entry.crc32) {
                progress.add_bytes_processed(entry.uncompressed_size);
                return DecompressTaskResult {
                    status: DecompressStatus::AlreadyUpToDate,
                    bytes_downloaded: 0,
                    bytes_written_to_disk: 0,
                    filename: entry.name.clone(),
                    message: "already matches target".to_string(),
                };
            }

            match archive.extract_to_file(entry, &dest) {
                Ok(()) => {
                    progress.add_bytes_processed(entry.uncompressed_size);
                    DecompressTaskResult {
                        status: DecompressStatus::Extracted,
                        bytes_downloaded: entry.compressed_size,
                        bytes_written_to_disk: entry.uncompressed_size,
                        filename: entry.name.clone(),
                        message: "extracted".to_string(),
                    }
                }
                Err(e) => DecompressTaskResult {
                    status: DecompressStatus::Error,
                    bytes_downloaded: 0,
                    bytes_written_to_disk: 0,
                    filename: entry.name.clone(),
                    message: format!("error: {e}"),
                },
            }
        })
        .collect();

    JobOutcome {
        decompress_results: results,
        ..Default::default()
    }
}

fn run_diff(
    archive: &Archive,
    base_folder: &Utf8Path,
    skip_crc: bool,
    progress: &Progress,
) -> JobOutcome {
    let cd_entries = archive.entries();
    progress.add_bytes_to_process(cd_entries.iter().map(|e| e.uncompressed_size).sum());

    // Step 1: every archive entry, checked against the local folder.
    let mut results: Vec<DiffTaskResult> = cd_entries
        .par_iter()
        .map(|entry| {
            if entry.name.is_empty() {
                return DiffTaskResult {
                    status: DiffStatus::Error,
                    size: 0,
                    filename: String::new(),
                };
            }

            let full_path = base_folder.join(&entry.name);

            if entry.is_folder() {
                let result = if full_path.is_dir() {
                    DiffTaskResult { status: DiffStatus::DirMatch, size: 0, filename: entry.name.clone() }
                } else {
                    DiffTaskResult { status: DiffStatus::DirPackageOnly, size: 0, filename: entry.name.clone() }
                };
                return result;
            }

            if !full_path.exists() {
                progress.add_bytes_processed(entry.uncompressed_size);
                return DiffTaskResult {
                    status: DiffStatus::FilePackageOnly,
                    size: entry.uncompressed_size,
                    filename: entry.name.clone(),
                };
            }

            let differs = !skip_crc && file_needs_update(&full_path, entry.uncompressed_size, entry.crc32);
            progress.add_bytes_processed(entry.uncompressed_size);
            if differs {
                DiffTaskResult {
                    status: DiffStatus::FileDifferent,
                    size: entry.uncompressed_size,
                    filename: entry.name.clone(),
                }
            } else {
                DiffTaskResult {
                    status: DiffStatus::FileMatch,
                    size: entry.uncompressed_size,
                    filename: entry.name.clone(),
                }
            }
        })
        .collect();

    // Step 2: anything on disk that the archive has no record of at all.
    if base_folder.exists() {
        let local_only: Vec<DiffTaskResult> = walk_matching(base_folder, "*")
            .into_par_iter()
            .filter_map(|(relative, path, is_dir)| {
                if archive.lookup(&relative).is_some() {
                    return None;
                }
                if is_dir {
                    Some(DiffTaskResult { status: DiffStatus::DirPathOnly, size: 0, filename: relative })
                } else {
                    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    Some(DiffTaskResult { status: DiffStatus::FilePathOnly, size, filename: relative })
                }
            })
            .collect();
        results.extend(local_only);
    }

    JobOutcome {
        diff_results: results,
        ..Default::default()
    }
}

/// `true` if every diff result was a match (no differences, nothing
/// present on only one side).
pub fn diff_all_match(results: &[DiffTaskResult]) -> bool {
    results.iter().all(|r| matches!(r.status, DiffStatus::FileMatch | DiffStatus::DirMatch))
}
