//! Request and response payload schema.
//!
//! Payloads are bincode-encoded structs; field order is the schema, and
//! every peer is built from the same definitions. Requests are plain structs
//! under their own frame tag; successful responses share the `Response` tag
//! and self-describe through the [`ResponseBody`] enum.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::core::ProtocolError;

/// Encode a payload struct to bytes.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a payload struct from bytes.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Directory listing request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Path relative to the export root.
    pub path: String,
}

/// Metadata request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRequest {
    /// Path relative to the export root.
    pub path: String,
}

/// Ranged read request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Path relative to the export root.
    pub path: String,
    /// Byte offset; must lie in `[0, size]`.
    pub offset: i64,
    /// Requested length; non-positive means read to end of file.
    pub length: i64,
}

/// Write request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Path relative to the export root; created if missing.
    pub path: String,
    /// Byte offset to write at.
    pub offset: i64,
    /// Bytes to write.
    pub data: Vec<u8>,
}

/// Recursive delete request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Path relative to the export root.
    pub path: String,
}

/// Rename request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    /// Existing path.
    pub old_path: String,
    /// Destination path.
    pub new_path: String,
}

/// Directory creation request (parents included).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirRequest {
    /// Path relative to the export root.
    pub path: String,
    /// Unix permission bits for created directories.
    pub perm: u32,
}

/// Immutable metadata snapshot of one directory entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Entry name (no directory components).
    pub name: String,
    /// Size in bytes.
    pub size: i64,
    /// Unix mode bits (zero on platforms without them).
    pub mode: u32,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Directory listing response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Entries, symlink escapes already filtered out.
    pub files: Vec<FileInfo>,
}

/// Metadata response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatResponse {
    /// The entry's metadata.
    pub info: FileInfo,
}

/// Read response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// The bytes read; may be shorter than requested at end of file or the
    /// per-read cap.
    pub data: Vec<u8>,
}

/// Write response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Bytes written.
    pub bytes_written: i64,
}

/// Self-describing body of a `Response` frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// Listing result.
    List(ListResponse),
    /// Metadata result.
    Stat(StatResponse),
    /// Read result.
    Read(ReadResponse),
    /// Write result.
    Write(WriteResponse),
    /// Success without a payload (delete, rename, mkdir).
    Empty,
}

/// Wire error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Entry does not exist.
    NotFound = 1,
    /// Operation forbidden (including read-only mode).
    PermissionDenied = 2,
    /// Entry already exists.
    AlreadyExists = 3,
    /// Entry is a directory where a file was expected.
    IsDirectory = 4,
    /// Entry is not a directory where one was expected.
    NotDirectory = 5,
    /// Path escapes the export root or cannot be resolved.
    InvalidPath = 6,
    /// Resource limit exceeded.
    QuotaExceeded = 7,
    /// Other I/O failure.
    Io = 8,
    /// Anything else, including undecodable requests.
    Unknown = 99,
}

impl ErrorCode {
    /// The wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value; unrecognized codes collapse to `Unknown`.
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => ErrorCode::NotFound,
            2 => ErrorCode::PermissionDenied,
            3 => ErrorCode::AlreadyExists,
            4 => ErrorCode::IsDirectory,
            5 => ErrorCode::NotDirectory,
            6 => ErrorCode::InvalidPath,
            7 => ErrorCode::QuotaExceeded,
            8 => ErrorCode::Io,
            _ => ErrorCode::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::NotFound => "not found",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::IsDirectory => "is a directory",
            ErrorCode::NotDirectory => "not a directory",
            ErrorCode::InvalidPath => "invalid path",
            ErrorCode::QuotaExceeded => "quota exceeded",
            ErrorCode::Io => "i/o error",
            ErrorCode::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// Typed error carried under the `Error` frame tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Wire error code (see [`ErrorCode`]).
    pub code: u32,
    /// Human-readable description; never contains host paths or secrets.
    pub message: String,
}

impl ErrorResponse {
    /// Build an error response.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_u32(),
            message: message.into(),
        }
    }

    /// The typed code.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from_u32(self.code)
    }
}
