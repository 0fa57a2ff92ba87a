//! Dispatch errors.

use std::path::PathBuf;

use push_core::Platform;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error aborting a whole [`Notification::send`](crate::Notification::send).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("APNs certificate is not configured")]
    MissingCertificate,

    #[error(
        "APNs certificate does not exist or is not a valid file at location: {}",
        .0.display()
    )]
    InvalidCertificate(PathBuf),

    #[error(
        "APNs trust root does not exist or is not a valid file at location: {}",
        .0.display()
    )]
    InvalidRootCertificate(PathBuf),

    #[error("failed to set up {platform} backend")]
    Setup {
        platform: Platform,
        #[source]
        source: BoxError,
    },

    #[error("{platform} delivery failed")]
    Backend {
        platform: Platform,
        #[source]
        source: BoxError,
    },
}

impl DispatchError {
    /// True for precondition failures raised before any network I/O.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingCertificate
                | Self::InvalidCertificate(_)
                | Self::InvalidRootCertificate(_)
                | Self::Setup { .. }
        )
    }
}
