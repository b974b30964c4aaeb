use desam_protocol::QueryQuotaResponse;

use crate::error::FileDepsError;
use crate::types::QuotaInfo;

/// Quota snapshot taken for one transfer plan.
///
/// Built from a fresh authority response every time; never cached across
/// resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaTracker {
    info: QuotaInfo,
}

impl QuotaTracker {
    pub fn new(info: QuotaInfo) -> Self {
        Self { info }
    }

    /// Reads a quota response. A response reporting failure is an error.
    pub fn from_response(response: &QueryQuotaResponse) -> Result<Self, FileDepsError> {
        if !response.response.success {
            return Err(FileDepsError::FileTransfer(format!(
                "quota query failed: {}",
                response.response.message
            )));
        }
        Ok(Self::new(QuotaInfo {
            total: response.total_quota,
            used: response.used_quota,
            available: response.available_quota,
        }))
    }

    pub fn info(&self) -> QuotaInfo {
        self.info
    }

    /// Returns `true` if `additional` bytes do not fit in the available quota.
    pub fn would_exceed(&self, additional: u64) -> bool {
        additional > self.info.available
    }

    /// Fails with [`FileDepsError::QuotaExceeded`] if `required` does not fit.
    pub fn check(&self, required: u64) -> Result<(), FileDepsError> {
        if self.would_exceed(required) {
            return Err(FileDepsError::QuotaExceeded {
                required,
                available: self.info.available,
            });
        }
        Ok(())
    }
}
