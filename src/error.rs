//! Error types for gpu-fdinfo-stats

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::ClientKey;

/// Result type alias for gpu-fdinfo-stats operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while discovering and monitoring GPUs
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No GPU handled by the backend was found on this system
    #[error("No {vendor} GPU found on this system")]
    NoGpuFound {
        /// Name of the backend that found nothing
        vendor: &'static str,
    },

    /// The device enumeration backend could not be created
    #[error("Device enumeration unavailable at {path}: {source}")]
    EnumerationUnavailable {
        /// The sysfs directory that could not be listed
        path: PathBuf,
        /// The underlying IO error
        source: io::Error,
    },

    /// A device is missing a property it must carry
    #[error("Device {path} has no {property} property")]
    MissingProperty {
        /// The sysfs device directory
        path: PathBuf,
        /// The property that was not found
        property: &'static str,
    },

    /// Permission denied when accessing sysfs or procfs
    #[error("Permission denied: {message}. Try running as root or as the owner of the monitored processes")]
    PermissionDenied {
        /// Description of the permission error
        message: String,
    },

    /// Backend initialization failed
    #[error("Failed to initialize {vendor} backend: {message}")]
    InitFailed {
        /// Name of the backend
        vendor: &'static str,
        /// Last error reported by the backend
        message: String,
    },
}

impl Error {
    /// Returns true if this error is due to insufficient permissions
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }

    /// Returns true if the error indicates a missing GPU
    pub fn is_gpu_missing(&self) -> bool {
        matches!(
            self,
            Error::NoGpuFound { .. } | Error::EnumerationUnavailable { .. }
        )
    }

    /// Create a permission denied error from an IO error
    pub(crate) fn permission_denied(source: &io::Error) -> Self {
        Error::PermissionDenied {
            message: source.to_string(),
        }
    }
}

/// Violations of the per-cycle counter cache invariants
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The same DRM client was presented twice in one polling cycle
    #[error("client {} of pid {} already recorded in this cycle", .0.client_id, .0.pid)]
    DuplicateClient(ClientKey),
}
