//! Error kinds shared across every layer of the engine (spec §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("read error: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },
    #[error("memory mapping failed: {0}")]
    MappingFailed(String),

    #[error("invalid header magic")]
    InvalidMagic,
    #[error("empty file")]
    EmptyFile,
    #[error("unknown b-tree page type: {0:#x}")]
    UnknownPageType(u8),
    #[error("malformed cell on page {page}: {reason}")]
    MalformedCell { page: u32, reason: String },
    #[error("bad varint")]
    BadVarint,
    #[error("bad record header size")]
    BadHeaderSize,
    #[error("WAL checksum mismatch at frame {0}")]
    WalChecksumMismatch(usize),
    #[error("cell of {0} bytes exceeds the supported non-overflow cell size")]
    CellTooLarge(usize),

    #[error("page {page} out of range (1..={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("column {index} out of range (0..{count})")]
    ColumnOutOfRange { index: usize, count: usize },
    #[error("cursor not positioned")]
    CursorNotPositioned,

    #[error("transaction conflict: a write transaction is already open")]
    TransactionConflict,
    #[error("page cache budget exceeded")]
    CacheOverBudget,
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    VectorDimensionMismatch { expected: usize, actual: usize },
    #[error("vector metric mismatch: index uses {index:?}, query used {query:?}")]
    VectorMetricMismatch {
        index: crate::hnsw::DistanceMetric,
        query: crate::hnsw::DistanceMetric,
    },

    #[error("ledger sequence gap: expected {expected}, found {found}")]
    LedgerSequenceGap { expected: u64, found: u64 },
    #[error("ledger hash mismatch at sequence {0}")]
    LedgerHashMismatch(u64),
    #[error("payload hash mismatch at sequence {0}")]
    PayloadHashMismatch(u64),
    #[error("audit hash mismatch at event {0}")]
    AuditHashMismatch(u64),

    #[error("invalid signature")]
    InvalidSignature,
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("agent expired: {0}")]
    AgentExpired(String),
    #[error("authority exceeded: value {value} > ceiling {ceiling}")]
    AuthorityExceeded { value: u64, ceiling: u64 },
    #[error("co-signatures missing")]
    CosignMissing,
    #[error("invalid co-signature from {0}")]
    InvalidCosignature(String),
    #[error("agent attempted to co-sign its own payload: {0}")]
    SelfCosign(String),
    #[error("unknown co-signer: {0}")]
    UnknownCosigner(String),

    #[error("unauthorized read of {table}.{column}")]
    UnauthorizedRead { table: String, column: String },
    #[error("unauthorized write of {table}.{column}")]
    UnauthorizedWrite { table: String, column: String },
    #[error("unauthorized schema operation")]
    UnauthorizedSchema,

    #[error("database is closed")]
    Closed,
    #[error("object disposed")]
    Disposed,
    #[error("transaction already committed")]
    AlreadyCommitted,

    #[error("{0}")]
    Other(String),
}
