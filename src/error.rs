/// Custom Result type for overlap store operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the ovlstore library, encompassing all possible
/// error cases that can occur while packing, partitioning, sorting, indexing,
/// or retrieving overlaps.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to file and store header validation
    FormatError(#[from] FormatError),
    /// Errors that occur during read operations
    ReadError(#[from] ReadError),
    /// Errors that occur during write operations
    WriteError(#[from] WriteError),
    /// Errors raised while computing or loading a partition plan
    PlanError(#[from] PlanError),
    /// Errors raised by the distributed build pipeline
    BuildError(#[from] BuildError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
    /// Generic errors that can occur in any part of the system
    AnyhowError(#[from] anyhow::Error),
}

/// Errors specific to validating overlap file and store headers
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The magic number does not match the expected value
    #[error("Invalid magic number: {0:#018x}")]
    InvalidMagicNumber(u64),

    /// The format version is not supported
    #[error("Invalid format version: {0}")]
    InvalidFormatVersion(u64),

    /// The store was written with a different hang bit-width than this
    /// reader expects
    #[error("Store uses {found} read-length bits; expected {expected}")]
    ReadLenBitsMismatch { expected: u32, found: u32 },

    /// The record kind byte is not one of the known kinds
    #[error("Invalid record kind: {0}")]
    InvalidRecordKind(u8),

    /// The store is still under construction (incomplete magic)
    #[error("Store at '{0}' is incomplete; construction crashed or is still running")]
    IncompleteStore(String),
}

/// Errors that can occur while reading overlap data
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// A record was cut short mid-word; the file is truncated or corrupt
    #[error("Truncated record in '{path}': expected {expected} bytes, found {found}")]
    TruncatedRecord {
        path: String,
        expected: usize,
        found: usize,
    },

    /// Fewer records were present than the file or index declared
    #[error("Short read on '{path}': expected {expected} records, found {found}")]
    ShortFile {
        path: String,
        expected: u64,
        found: u64,
    },

    /// A seek was requested on a file kind that does not support it
    #[error("Seek requested on a non-seekable (Full or compressed) overlap file")]
    NotSeekable,

    /// A requested read ID is outside the store's ID range
    #[error("Requested read ID ({0}) is out of store range (1..={1})")]
    OutOfRange(u32, u32),

    /// The evalue overlay file is smaller than the store's overlap count
    #[error("Evalue overlay holds {found} values but the store has {expected} overlaps")]
    OverlayTooSmall { expected: u64, found: u64 },
}

/// Errors that can occur while writing overlap data
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// Overlaps handed to the sequential writer must be sorted by a-read
    #[error("Overlaps out of order: last a-read {last}, got a-read {this} (b-read {b})")]
    SortOrderViolation { last: u32, this: u32, b: u32 },

    /// An overlap names a read ID outside the declared range
    #[error("Overlap ({a},{b}) has IDs out of range (max {max}); possibly corrupt input")]
    IdOutOfRange { a: u32, b: u32, max: u32 },

    /// A hang or span does not fit the configured bit-width
    #[error("Field value {value} does not fit in {bits} bits")]
    FieldOverflow { value: u32, bits: u32 },

    /// The target store directory already holds a finished store
    #[error("'{0}' is a valid overlap store; refusing to overwrite")]
    StoreExists(String),
}

/// Configuration errors raised while planning a store build
#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    /// An input file (or its counts sidecar) is missing
    #[error("Input '{0}' not found (or has no counts sidecar)")]
    MissingInput(String),

    /// No input files were supplied
    #[error("No input overlap files supplied")]
    NoInputs,

    /// The plan on disk disagrees with the caller's view of the inputs
    #[error("Plan lists {expected} input files, caller supplied {found}")]
    InputMismatch { expected: usize, found: usize },
}

/// Consistency and resource errors raised by the build pipeline
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// A slice's data will not fit the memory budget
    #[error(
        "Slice {slice} holds {needed} bytes of overlaps but the budget is {budget} bytes; \
         rerun the planner with a larger memory budget"
    )]
    SliceExceedsBudget {
        slice: u32,
        needed: u64,
        budget: u64,
    },

    /// A bucket's partition file held a different count than its sliceSizes claimed
    #[error("Bucket {bucket} slice {slice}: expected {expected} overlaps, loaded {found}")]
    SliceCountMismatch {
        bucket: u32,
        slice: u32,
        expected: u64,
        found: u64,
    },

    /// Not every sorter job finished; the merge cannot run
    #[error("{0} slice jobs have not finished: {1:?}")]
    SlicesMissing(usize, Vec<u32>),

    /// A sorter needs every bucket's output, and one is absent
    #[error("Bucket {0} has not finished bucketizing; cannot sort")]
    BucketNotFinished(u32),

    /// The cumulative overlap cursor disagreed with the merged counts
    #[error("Overlap cursor mismatch at read {id}: cursor {cursor}, running total {total}")]
    CursorMismatch { id: u32, cursor: u64, total: u64 },

    /// A job's outputs exist only partially; a crashed run needs `force`
    #[error("Job '{0}' appears to have crashed mid-run; rerun with force to restart it")]
    CrashedRun(String),

    /// Histograms built with different bucketing cannot be merged
    #[error("Histogram parameters differ; cannot merge")]
    HistogramMismatch,
}
