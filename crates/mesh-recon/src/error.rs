//! Error types for the reconstruction pipeline with rich diagnostics.
//!
//! Every failure the core can surface maps onto one of six categories:
//! malformed input, insufficient data, reconstruction failure, unrepairable
//! mesh, resource limits and export failure. File-level I/O and
//! configuration problems get their own variants on top of that.
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `MESH-XXXX`:
//! - `MESH-1xxx`: I/O errors (file reading, writing, parsing)
//! - `MESH-2xxx`: Input errors (malformed points, too few samples, bad config)
//! - `MESH-3xxx`: Reconstruction and repair errors
//! - `MESH-4xxx`: Format and export errors
//! - `MESH-5xxx`: Resource limits and cancellation
//!
//! # Example
//!
//! ```
//! use mesh_recon::{ErrorCode, MeshError};
//!
//! let err = MeshError::insufficient_data(1, 10);
//! assert_eq!(err.code(), ErrorCode::InsufficientData);
//! assert_eq!(err.code().as_str(), "MESH-2002");
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reconstruction operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// MESH-1001: Failed to read file
    IoRead = 1001,
    /// MESH-1002: Failed to write file
    IoWrite = 1002,
    /// MESH-1003: Failed to parse file contents
    ParseError = 1003,

    // Input errors (2xxx)
    /// MESH-2001: Malformed input (non-finite values, mismatched attributes)
    Format = 2001,
    /// MESH-2002: Too few or degenerate points
    InsufficientData = 2002,
    /// MESH-2003: Configuration value out of range
    InvalidConfig = 2003,

    // Reconstruction and repair errors (3xxx)
    /// MESH-3001: Implicit surface solve or extraction failed
    Reconstruction = 3001,
    /// MESH-3002: Hole filling and voxelization both failed
    UnrepairableMesh = 3002,

    // Format errors (4xxx)
    /// MESH-4001: Unsupported file format
    UnsupportedFormat = 4001,
    /// MESH-4002: Serialization failed
    Export = 4002,

    // Resource errors (5xxx)
    /// MESH-5001: Estimated memory or time exceeds the budget
    ResourceLimit = 5001,
    /// MESH-5002: Cancelled by signal or deadline
    Cancelled = 5002,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `MESH-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "MESH-1001",
            ErrorCode::IoWrite => "MESH-1002",
            ErrorCode::ParseError => "MESH-1003",
            ErrorCode::Format => "MESH-2001",
            ErrorCode::InsufficientData => "MESH-2002",
            ErrorCode::InvalidConfig => "MESH-2003",
            ErrorCode::Reconstruction => "MESH-3001",
            ErrorCode::UnrepairableMesh => "MESH-3002",
            ErrorCode::UnsupportedFormat => "MESH-4001",
            ErrorCode::Export => "MESH-4002",
            ErrorCode::ResourceLimit => "MESH-5001",
            ErrorCode::Cancelled => "MESH-5002",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse error category, one per pipeline failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input data or files.
    Format,
    /// Too few or degenerate samples.
    InsufficientData,
    /// Solver or extraction failure.
    Reconstruction,
    /// All repair fallbacks exhausted.
    UnrepairableMesh,
    /// Memory/time budget exceeded, or cancelled.
    ResourceLimit,
    /// Unsupported output format or write failure.
    Export,
}

/// Recovery suggestions for reconstruction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check the input data for issues.
    CheckInput { checks: Vec<String> },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Use a different output format.
    UseDifferentFormat { suggested: Vec<String> },
    /// Provide more samples.
    ProvideMoreData { minimum_points: usize },
    /// Manual intervention may be required.
    ManualIntervention { description: String },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::CheckInput { checks } => {
                write!(f, "Check the input for: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                write!(f, "Try using a different format: {}", suggested.join(", "))
            }
            RecoverySuggestion::ProvideMoreData { minimum_points } => {
                write!(f, "Provide at least {} well-spread points", minimum_points)
            }
            RecoverySuggestion::ManualIntervention { description } => {
                write!(f, "{}", description)
            }
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Errors that can occur while turning a point cloud into a watertight mesh.
#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(mesh::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(mesh::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a file.
    #[error("failed to parse {path}: {details}")]
    #[diagnostic(
        code(mesh::parse::error),
        help("The file may be corrupted or in an unsupported variant of the format.")
    )]
    ParseError { path: PathBuf, details: String },

    /// Malformed in-memory input.
    #[error("malformed input: {details}")]
    #[diagnostic(
        code(mesh::input::format),
        help("Every coordinate must be finite and attribute arrays must match the point count.")
    )]
    Format { details: String },

    /// Not enough usable samples to fit local planes or solve for a surface.
    #[error("insufficient data: {found} usable point(s), at least {required} required")]
    #[diagnostic(
        code(mesh::input::insufficient),
        help("Supply a denser point cloud; local plane fitting needs a neighborhood per point.")
    )]
    InsufficientData { found: usize, required: usize },

    /// A configuration value is out of range.
    #[error("invalid configuration: {field} = {value} ({reason})")]
    #[diagnostic(code(mesh::config::invalid))]
    InvalidConfig {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The implicit solve or level-set extraction failed.
    #[error("reconstruction failed: {details}")]
    #[diagnostic(
        code(mesh::reconstruct::failed),
        help("Degenerate input (coplanar or collinear points) cannot enclose a volume.")
    )]
    Reconstruction { details: String },

    /// Hole filling and voxelization both failed.
    #[error("mesh could not be made watertight: {details}")]
    #[diagnostic(
        code(mesh::repair::unrepairable),
        help("The voxelized occupancy was empty; check that the mesh encloses a volume.")
    )]
    UnrepairableMesh { details: String },

    /// Estimated resource usage exceeds the configured budget.
    #[error("{operation} needs an estimated {required_bytes} bytes, budget is {budget_bytes} bytes")]
    #[diagnostic(
        code(mesh::resource::limit),
        help("Lower the reconstruction depth or raise the memory budget.")
    )]
    ResourceLimit {
        operation: &'static str,
        required_bytes: u64,
        budget_bytes: u64,
    },

    /// Operation cancelled by signal or deadline.
    #[error("{stage} cancelled: {reason}")]
    #[diagnostic(code(mesh::cancelled))]
    Cancelled { stage: &'static str, reason: String },

    /// Unsupported file format.
    #[error("unsupported format: {extension:?}")]
    #[diagnostic(
        code(mesh::format::unsupported),
        help("Meshes: OBJ, PLY, STL. Point clouds: PLY, XYZ.")
    )]
    UnsupportedFormat { extension: Option<String> },

    /// Serialization failed.
    #[error("export to {format} failed: {details}")]
    #[diagnostic(code(mesh::export::failed))]
    Export {
        format: &'static str,
        details: String,
    },
}

impl MeshError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::IoRead { .. } => ErrorCode::IoRead,
            MeshError::IoWrite { .. } => ErrorCode::IoWrite,
            MeshError::ParseError { .. } => ErrorCode::ParseError,
            MeshError::Format { .. } => ErrorCode::Format,
            MeshError::InsufficientData { .. } => ErrorCode::InsufficientData,
            MeshError::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            MeshError::Reconstruction { .. } => ErrorCode::Reconstruction,
            MeshError::UnrepairableMesh { .. } => ErrorCode::UnrepairableMesh,
            MeshError::ResourceLimit { .. } => ErrorCode::ResourceLimit,
            MeshError::Cancelled { .. } => ErrorCode::Cancelled,
            MeshError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            MeshError::Export { .. } => ErrorCode::Export,
        }
    }

    /// Returns the pipeline failure class this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MeshError::IoRead { .. }
            | MeshError::ParseError { .. }
            | MeshError::Format { .. }
            | MeshError::InvalidConfig { .. } => ErrorCategory::Format,
            MeshError::InsufficientData { .. } => ErrorCategory::InsufficientData,
            MeshError::Reconstruction { .. } => ErrorCategory::Reconstruction,
            MeshError::UnrepairableMesh { .. } => ErrorCategory::UnrepairableMesh,
            MeshError::ResourceLimit { .. } | MeshError::Cancelled { .. } => {
                ErrorCategory::ResourceLimit
            }
            MeshError::IoWrite { .. }
            | MeshError::UnsupportedFormat { .. }
            | MeshError::Export { .. } => ErrorCategory::Export,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            MeshError::IoRead { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            MeshError::IoWrite { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            MeshError::ParseError { .. } | MeshError::Format { .. } => {
                RecoverySuggestion::CheckInput {
                    checks: vec![
                        "finite coordinates".into(),
                        "normal/color counts match point count".into(),
                    ],
                }
            }
            MeshError::InsufficientData { required, .. } => RecoverySuggestion::ProvideMoreData {
                minimum_points: *required,
            },
            MeshError::InvalidConfig { field, reason, .. } => {
                RecoverySuggestion::AdjustParameters {
                    parameters: vec![((*field).into(), (*reason).into())],
                }
            }
            MeshError::Reconstruction { .. } => RecoverySuggestion::CheckInput {
                checks: vec![
                    "points span a volume (not coplanar)".into(),
                    "normals are oriented consistently".into(),
                ],
            },
            MeshError::UnrepairableMesh { .. } => RecoverySuggestion::ManualIntervention {
                description: "Inspect the trimmed mesh; it may have collapsed to a sheet".into(),
            },
            MeshError::ResourceLimit { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("depth".into(), "try a lower value".into()),
                    ("max_memory_bytes".into(), "try a higher value".into()),
                ],
            },
            MeshError::Cancelled { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("deadline".into(), "allow more time".into())],
            },
            MeshError::UnsupportedFormat { .. } | MeshError::Export { .. } => {
                RecoverySuggestion::UseDifferentFormat {
                    suggested: vec!["OBJ".into(), "PLY".into(), "STL".into()],
                }
            }
        }
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        MeshError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create a Format error.
    pub fn format(details: impl Into<String>) -> Self {
        MeshError::Format {
            details: details.into(),
        }
    }

    /// Create an InsufficientData error.
    pub fn insufficient_data(found: usize, required: usize) -> Self {
        MeshError::InsufficientData { found, required }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(field: &'static str, value: impl ToString, reason: &'static str) -> Self {
        MeshError::InvalidConfig {
            field,
            value: value.to_string(),
            reason,
        }
    }

    /// Create a Reconstruction error.
    pub fn reconstruction(details: impl Into<String>) -> Self {
        MeshError::Reconstruction {
            details: details.into(),
        }
    }

    /// Create an UnrepairableMesh error.
    pub fn unrepairable(details: impl Into<String>) -> Self {
        MeshError::UnrepairableMesh {
            details: details.into(),
        }
    }

    /// Create a ResourceLimit error.
    pub fn resource_limit(operation: &'static str, required_bytes: u64, budget_bytes: u64) -> Self {
        MeshError::ResourceLimit {
            operation,
            required_bytes,
            budget_bytes,
        }
    }

    /// Create a Cancelled error.
    pub fn cancelled(stage: &'static str, reason: impl Into<String>) -> Self {
        MeshError::Cancelled {
            stage,
            reason: reason.into(),
        }
    }

    /// Create an Export error.
    pub fn export(format: &'static str, details: impl Into<String>) -> Self {
        MeshError::Export {
            format,
            details: details.into(),
        }
    }

    /// Create an UnsupportedFormat error.
    pub fn unsupported_format(extension: Option<String>) -> Self {
        MeshError::UnsupportedFormat { extension }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MeshError::insufficient_data(1, 10);
        assert_eq!(err.code(), ErrorCode::InsufficientData);
        assert_eq!(err.code().as_str(), "MESH-2002");

        let err = MeshError::resource_limit("reconstruction", 10, 5);
        assert_eq!(err.code().to_string(), "MESH-5001");
    }

    #[test]
    fn test_categories_cover_taxonomy() {
        assert_eq!(MeshError::format("nan").category(), ErrorCategory::Format);
        assert_eq!(
            MeshError::insufficient_data(0, 10).category(),
            ErrorCategory::InsufficientData
        );
        assert_eq!(
            MeshError::reconstruction("flat").category(),
            ErrorCategory::Reconstruction
        );
        assert_eq!(
            MeshError::unrepairable("empty").category(),
            ErrorCategory::UnrepairableMesh
        );
        assert_eq!(
            MeshError::resource_limit("voxelization", 2, 1).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            MeshError::export("STL", "write").category(),
            ErrorCategory::Export
        );
        assert_eq!(
            MeshError::cancelled("smooth", "deadline").category(),
            ErrorCategory::ResourceLimit
        );
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = MeshError::insufficient_data(3, 10);
        match err.recovery_suggestion() {
            RecoverySuggestion::ProvideMoreData { minimum_points } => {
                assert_eq!(minimum_points, 10);
            }
            other => panic!("Expected ProvideMoreData, got {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let err = MeshError::insufficient_data(1, 10);
        let display = format!("{}", err);
        assert!(display.contains("1 usable point"));
        assert!(display.contains("10 required"));

        let err = MeshError::invalid_config("depth", 20, "must be in 1..=14");
        assert!(err.to_string().contains("depth = 20"));
    }
}
