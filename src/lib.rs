//! zipjob is a Zip64-aware archive toolkit: list, create, extract, update,
//! and diff archives stored locally or served over HTTP(S), decompressing
//! many files concurrently.
//!
//! The high-level surface is [`archive::Archive`] (open/create an archive
//! over any [`source::ByteSource`]) driven by [`job::Job`] (fan the actual
//! per-file work for a whole operation out across a thread pool):
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use zipjob::archive::Archive;
//! # use zipjob::job::{Job, JobKind};
//! let archive = Arc::new(Archive::open_read("foo.zip", None, false)?);
//! let mut job = Job::new(JobKind::Extract, archive);
//! job.set_base_folder("out/");
//! job.run();
//! let outcome = job.join()?;
//! for result in &outcome.decompress_results {
//!     println!("{:?}: {}", result.status, result.filename);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! For callers that already have a full buffer or memory map and just want
//! to read it directly (no job engine, no byte-range HTTP), [`read::ZipArchive`]
//! is the lower-level, slice-based reader this crate was originally built
//! around:
//!
//! ```no_run
//! # use std::fs;
//! # use zipjob::*;
//! let bytes = fs::read("foo.zip")?;
//! let archive = ZipArchive::new(&bytes)?;
//! let tree = read::as_tree(archive.entries())?;
//! let metadata = tree.lookup("some/specific/file")?;
//! let mut reader = archive.read(metadata)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Zip is an interesting archive format: unlike compressed tarballs often seen
//! in Linux land (`*.tar.gz`, `*.tar.zst`, ...),
//! each file in a Zip archive is compressed independently,
//! with a central directory telling us where to find each file.
//! This allows us to extract multiple files simultaneously so long as we can
//! read from multiple places at once — which is exactly what [`job::Job`]
//! does, whether those places are a local disk or an HTTP server that
//! supports byte-range requests.

pub mod archive;
pub mod central_directory;
pub mod crc;
pub mod deflate;
pub mod glob;
pub mod http_cache;
pub mod job;
pub mod read;
pub mod result;
pub mod source;
pub mod writer;

pub use archive::Archive;
pub use central_directory::{CentralDirectory, Entry, Totals};
pub use job::{Job, JobKind, JobStatus, Progress};
pub use read::CompressionMethod;
pub use read::ZipArchive;

mod arch;
mod crc_reader;
mod spec;
