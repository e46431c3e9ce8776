//! Command-line driver for the [`zipjob`](zipjob) library: list, create,
//! extract, update, or diff a Zip64-aware archive stored locally or served
//! over HTTP(S).
//!
//! Subcommands map directly onto [`Job`] kinds; `stderrlog` wires up
//! verbosity and `anyhow` carries error context up to the process exit.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use zipjob::deflate::Level;
use zipjob::job::{DiffStatus, Job, JobKind};
use zipjob::result::ZipError;
use zipjob::source::Credentials;
use zipjob::Archive;

#[derive(Debug, Parser)]
#[command(name = "zipjob", about = "Lists, creates, extracts, updates, and diffs Zip64 archives")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace).
    /// Verbose mode also forces single-threaded execution.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of worker threads, 1..=256 (ignored, and pinned to 1, when verbose).
    #[arg(long, default_value_t = 6)]
    threads: usize,

    /// Accept invalid/self-signed TLS certificates on HTTPS package URLs.
    #[arg(long)]
    skip_cert_check: bool,

    /// Table format for `list`/`diff` output.
    #[arg(long, value_enum, default_value_t = OutputFormat::Tabs)]
    outputformat: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Tabs,
    Commas,
    Html,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List entries in a package, optionally filtered by glob pattern.
    List {
        zippath: String,
        #[arg(long, default_value = "*")]
        pattern: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Create a package from a local folder.
    Create {
        zippath: String,
        folder: Utf8PathBuf,
        #[arg(long, default_value = "*")]
        pattern: String,
    },
    /// Force-extract matching entries to a local folder, overwriting
    /// whatever is already there.
    Extract {
        zippath: String,
        folder: Utf8PathBuf,
        #[arg(long, default_value = "*")]
        pattern: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Sync matching entries to a local folder, skipping any file whose
    /// size and CRC-32 already match the package.
    Update {
        zippath: String,
        folder: Utf8PathBuf,
        #[arg(long, default_value = "*")]
        pattern: String,
        #[arg(long)]
        skipcrc: bool,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Compare a package against a local folder without modifying either.
    Diff {
        zippath: String,
        folder: Utf8PathBuf,
        #[arg(long)]
        skipcrc: bool,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
}

fn main() -> ExitCode {
    let opt = Opt::parse();

    let mut errlog = stderrlog::new();
    errlog.verbosity(opt.verbose as usize + 1);
    let _ = errlog.init();

    match run(opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<ZipError>()
                .map(|z| z.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn credentials(name: Option<String>, password: Option<String>) -> Option<Credentials> {
    match (name, password) {
        (Some(user), Some(password)) => Some(Credentials { user, password }),
        _ => None,
    }
}

/// Rejects a `*`/`?` wildcard in a URL or folder argument: globs only ever
/// apply to entry names within an already-open package (`--pattern`), never
/// to the package location or destination folder themselves.
fn reject_wildcard(label: &str, value: &str) -> anyhow::Result<()> {
    if value.contains('*') || value.contains('?') {
        return Err(ZipError::BadArgument(format!(
            "{label} may not contain a wildcard: {value}"
        ))
        .into());
    }
    Ok(())
}

fn validate_threads(threads: usize) -> anyhow::Result<()> {
    if !(1..=256).contains(&threads) {
        return Err(ZipError::BadArgument(format!(
            "threads must be in 1..=256, got {threads}"
        ))
        .into());
    }
    Ok(())
}

fn run(opt: Opt) -> anyhow::Result<()> {
    let verbose = opt.verbose > 0;
    validate_threads(opt.threads)?;

    match opt.command {
        Command::List { zippath, pattern, name, password } => {
            reject_wildcard("ZIPPATH", &zippath)?;
            let archive = Arc::new(Archive::open_read(
                &zippath,
                credentials(name, password),
                opt.skip_cert_check,
            )?);
            let mut job = Job::new(JobKind::List, archive);
            job.set_pattern(&pattern);
            job.set_verbose(verbose);
            job.set_num_threads(opt.threads);
            job.run();
            let outcome = job.join()?;
            print_listing(&outcome.listed, opt.outputformat);
            Ok(())
        }

        Command::Create { zippath, folder, pattern } => {
            reject_wildcard("ZIPPATH", &zippath)?;
            reject_wildcard("FOLDER", folder.as_str())?;
            let archive = Arc::new(Archive::create(&zippath, Level::DEFAULT)?);
            let job = build_folder_job(JobKind::Create, archive.clone(), &folder, &pattern, false, verbose, opt.threads);
            job.run();
            let outcome = job.join()?;
            archive.close().context("failed to finalize archive")?;
            report_decompress(&outcome.decompress_results, "Added");
            Ok(())
        }

        Command::Extract { zippath, folder, pattern, name, password } => {
            reject_wildcard("ZIPPATH", &zippath)?;
            reject_wildcard("FOLDER", folder.as_str())?;
            let archive = Arc::new(Archive::open_read(&zippath, credentials(name, password), opt.skip_cert_check)?);
            let job = build_folder_job(JobKind::Extract, archive, &folder, &pattern, false, verbose, opt.threads);
            job.run();
            let outcome = job.join()?;
            report_decompress(&outcome.decompress_results, "Extracted");
            Ok(())
        }

        Command::Update { zippath, folder, pattern, skipcrc, name, password } => {
            reject_wildcard("ZIPPATH", &zippath)?;
            reject_wildcard("FOLDER", folder.as_str())?;
            let archive = Arc::new(Archive::open_read(&zippath, credentials(name, password), opt.skip_cert_check)?);
            let job = build_folder_job(JobKind::Update, archive, &folder, &pattern, skipcrc, verbose, opt.threads);
            job.run();
            let outcome = job.join()?;
            report_decompress(&outcome.decompress_results, "Updated");
            Ok(())
        }

        Command::Diff { zippath, folder, skipcrc, name, password } => {
            reject_wildcard("ZIPPATH", &zippath)?;
            reject_wildcard("FOLDER", folder.as_str())?;
            let archive = Arc::new(Archive::open_read(&zippath, credentials(name, password), opt.skip_cert_check)?);
            let job = build_folder_job(JobKind::Diff, archive, &folder, "*", skipcrc, verbose, opt.threads);
            job.run();
            let outcome = job.join()?;
            report_diff(&outcome.diff_results, opt.outputformat);
            Ok(())
        }
    }
}

fn print_listing(entries: &[zipjob::Entry], format: OutputFormat) {
    match format {
        OutputFormat::Html => {
            println!("<table><tr><th>Size</th><th>Modified</th><th>Name</th></tr>");
            for entry in entries {
                println!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                    entry.uncompressed_size, entry.last_modified, entry.name
                );
            }
            println!("</table>");
        }
        OutputFormat::Commas => {
            println!("Size,Modified,Name");
            for entry in entries {
                println!("{},{},{}", entry.uncompressed_size, entry.last_modified, entry.name);
            }
        }
        OutputFormat::Tabs => {
            println!("{:<12} {:<20} {}", "Size", "Modified", "Name");
            for entry in entries {
                println!(
                    "{:<12} {:<20} {}",
                    entry.uncompressed_size, entry.last_modified, entry.name
                );
            }
        }
    }
    println!("{} entries", entries.len());
}

fn build_folder_job(
    kind: JobKind,
    archive: Arc<Archive>,
    folder: &Utf8PathBuf,
    pattern: &str,
    skip_crc: bool,
    verbose: bool,
    threads: usize,
) -> Job {
    let mut job = Job::new(kind, archive);
    job.set_base_folder(folder.as_str());
    job.set_pattern(pattern);
    job.set_skip_crc(skip_crc);
    job.set_verbose(verbose);
    job.set_num_threads(threads);
    job
}

fn report_decompress(results: &[zipjob::job::DecompressTaskResult], verb: &str) {
    let mut errors = 0u64;
    let mut done = 0u64;
    for result in results {
        match result.status {
            zipjob::job::DecompressStatus::Error => {
                errors += 1;
                eprintln!("error: {}: {}", result.filename, result.message);
            }
            zipjob::job::DecompressStatus::Extracted | zipjob::job::DecompressStatus::FolderCreated => done += 1,
            _ => {}
        }
    }
    println!("{verb} {done} entries, {errors} errors, {} total matched", results.len());
}

fn report_diff(results: &[zipjob::job::DiffTaskResult], format: OutputFormat) {
    let all_match = zipjob::job::diff_all_match(results);
    let separator = match format {
        OutputFormat::Commas => ",",
        _ => "\t",
    };
    if format == OutputFormat::Html {
        println!("<table><tr><th>Status</th><th>Name</th></tr>");
    }
    for result in results {
        if matches!(result.status, DiffStatus::FileMatch | DiffStatus::DirMatch) {
            continue;
        }
        match format {
            OutputFormat::Html => {
                println!("<tr><td>{:?}</td><td>{}</td></tr>", result.status, result.filename);
            }
            _ => println!("{:?}{separator}{}", result.status, result.filename),
        }
    }
    if format == OutputFormat::Html {
        println!("</table>");
    }
    if all_match {
        println!("** ALL MATCH **");
    } else {
        println!("{} entries compared, differences found", results.len());
    }
}
