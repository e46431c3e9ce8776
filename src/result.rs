//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The ZIP archive contained invalid data per the spec.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The ZIP archive is prepended some unknown bytes.
    /// (Use [`ZipArchive::with_prepended_data()`] if this is okay.)
    ///
    /// [`ZipArchive::with_prepended_data()`]: ../read/struct.ZipArchive.html#method.with_prepended_data
    #[error("Archive prepended with {0} unknown bytes")]
    PrependedWithUnknownBytes(usize),

    /// The ZIP archive contained a nonsensical file hierarchy
    /// (duplicate entries, bad paths, etc.)
    #[error("Archive contained strange a strange file hierarchy: {0}")]
    Hierarchy(String),

    /// A file wasn't found at the provied path
    #[error("No file in the archive with the path {0}")]
    NoSuchFile(Utf8PathBuf),

    /// A user-provided path (not one from a ZIP archive) was invalid.
    #[error("Invalid path")]
    InvalidPath(String),

    /// A cast from a 64-bit int to a usize failed while mapping the file,
    /// probably on a 32-bit system.
    ///
    /// Future work could include a version of the reader that uses multiple
    /// file streams instead of a memory map to work with large files in 32 bits.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,

    /// A byte source (local file or HTTP url) could not be opened.
    #[error("Couldn't open {0}: {1}")]
    OpenFailed(String, String),

    /// A read against a byte source failed.
    #[error("Read failed at {label}: {detail}")]
    ReadFailed { label: String, detail: String },

    /// A write against a byte source failed.
    #[error("Write failed at {label}: {detail}")]
    WriteFailed { label: String, detail: String },

    /// The archive's structure was corrupt in a way that isn't a bare
    /// "missing signature" (truncated entry, CD size over the sanity cap).
    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    /// An operation this crate deliberately doesn't support was requested:
    /// an unrecognized compression method, a write against an HTTP source,
    /// or an HTTP range cache that ran out of lines.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// An HTTP request failed with a retryable status (504/509) or a
    /// connection reset, and the retry budget was exhausted.
    #[error("Transient failure after retries: {0}")]
    Transient(String),

    /// A CLI argument, numeric range, or URL/path was invalid.
    #[error("Bad argument: {0}")]
    BadArgument(String),
}

impl ZipError {
    /// The process exit code this error should map to at the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            ZipError::BadArgument(_) => 2,
            _ => 1,
        }
    }
}
