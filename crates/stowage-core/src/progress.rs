//! Transfer progress snapshots
//!
//! A [`TransferProgress`] is a point-in-time copy of a registered transfer's
//! counters. It is taken under the registry lock and returned by value, so
//! holders never block the engine.

use crate::transfer::{Direction, TransferId, TransferState};
use std::fmt;

/// Point-in-time progress of one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Transfer name
    pub name: String,

    /// Transfer id
    pub id: TransferId,

    /// Transfer direction
    pub direction: Direction,

    /// Current state
    pub state: TransferState,

    /// Bytes moved so far
    pub bytes_transferred: u64,

    /// Total bytes, 0 while a download has not announced its size
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Completed fraction (0.0 to 1.0)
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.total_bytes == 0 {
            return if self.state == TransferState::Completed {
                1.0
            } else {
                0.0
            };
        }
        self.bytes_transferred as f32 / self.total_bytes as f32
    }

    /// Progress percentage (0.0 to 100.0)
    #[must_use]
    pub fn percent(&self) -> f64 {
        f64::from(self.fraction()) * 100.0
    }

    /// Bytes still to move, if the size is known
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        (self.total_bytes > 0).then(|| self.total_bytes - self.bytes_transferred)
    }

    /// Check if all bytes have moved
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == TransferState::Completed
    }
}

impl fmt::Display for TransferProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {}/{} bytes ({:.1}%) [{}]",
            self.direction,
            self.name,
            self.id,
            self.bytes_transferred,
            self.total_bytes,
            self.percent(),
            self.state
        )
    }
}
