//! Transfer state machine for chunked blob transfers.
//!
//! A [`Transfer`] tracks one upload or download: the byte buffer, the
//! announced total size and the cursor into it. It knows nothing about
//! locking or notification; the engine owns those and calls into the
//! state machine while holding the registry entry.

use crate::error::{BackendError, TransferError};
use crate::progress::TransferProgress;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TRANSFER_ID: AtomicU64 = AtomicU64::new(1);

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local bytes pulled chunk by chunk by the collaborator
    Upload,
    /// Remote bytes pushed chunk by chunk by the collaborator
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// Transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Registered, no chunk moved yet
    Pending,
    /// Chunks are moving
    InProgress,
    /// All bytes moved
    Completed,
    /// Transfer failed
    Failed,
    /// Transfer cancelled or replaced
    Cancelled,
}

impl TransferState {
    /// Completed, Failed or Cancelled
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Generation token identifying one started transfer.
///
/// Names are reused across transfers; the id is what tells a late callback
/// for a replaced transfer apart from the transfer now registered under the
/// same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    /// Allocate a fresh, process-unique id
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Progress callback, invoked with a fraction in `0.0..=1.0`
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Completion callback, invoked exactly once per transfer
pub type CompletionFn = Box<dyn FnOnce(Completion) + Send>;

/// Chunk handed to the collaborator during an upload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProducedChunk {
    /// Bytes to write (empty once the upload is exhausted)
    pub data: Vec<u8>,
    /// True once no more bytes remain
    pub is_done: bool,
}

impl ProducedChunk {
    /// Empty terminal chunk
    #[must_use]
    pub fn done() -> Self {
        Self {
            data: Vec::new(),
            is_done: true,
        }
    }
}

/// Final result of a transfer, delivered to its completion callback
#[derive(Debug)]
pub struct Completion {
    /// Transfer name
    pub name: String,
    /// Transfer id
    pub id: TransferId,
    /// Transfer direction
    pub direction: Direction,
    /// Terminal state
    pub state: TransferState,
    /// Downloaded bytes (`Some` only for completed downloads) or the failure
    pub result: Result<Option<Vec<u8>>, TransferError>,
}

impl Completion {
    /// True if the transfer completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Downloaded bytes, if this is a completed download
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match &self.result {
            Ok(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Failure, if any
    #[must_use]
    pub fn error(&self) -> Option<&TransferError> {
        self.result.as_ref().err()
    }

    /// Consume the completion, returning the downloaded bytes or the failure
    pub fn into_result(self) -> Result<Option<Vec<u8>>, TransferError> {
        self.result
    }
}

/// One in-flight upload or download
pub(crate) struct Transfer {
    pub(crate) id: TransferId,
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) chunk_size: usize,
    max_file_size: u64,

    buffer: Vec<u8>,
    total_size: u64,
    cursor: u64,

    state: TransferState,
    result: Option<Result<(), TransferError>>,

    pub(crate) on_progress: Option<ProgressFn>,
    // Registry entries must be Sync
    on_complete: Mutex<Option<CompletionFn>>,
}

impl Transfer {
    /// Create an upload over `data`
    pub(crate) fn new_upload(
        id: TransferId,
        name: String,
        data: Vec<u8>,
        chunk_size: usize,
        max_file_size: u64,
    ) -> Self {
        let total_size = data.len() as u64;
        Self {
            id,
            name,
            direction: Direction::Upload,
            chunk_size,
            max_file_size,
            buffer: data,
            total_size,
            cursor: 0,
            state: TransferState::Pending,
            result: None,
            on_progress: None,
            on_complete: Mutex::new(None),
        }
    }

    /// Create a download of unknown size
    pub(crate) fn new_download(
        id: TransferId,
        name: String,
        chunk_size: usize,
        max_file_size: u64,
    ) -> Self {
        Self {
            id,
            name,
            direction: Direction::Download,
            chunk_size,
            max_file_size,
            buffer: Vec::new(),
            total_size: 0,
            cursor: 0,
            state: TransferState::Pending,
            result: None,
            on_progress: None,
            on_complete: Mutex::new(None),
        }
    }

    /// Attach callbacks
    pub(crate) fn with_callbacks(
        mut self,
        on_progress: Option<ProgressFn>,
        on_complete: CompletionFn,
    ) -> Self {
        self.on_progress = on_progress;
        self.on_complete = Mutex::new(Some(on_complete));
        self
    }

    pub(crate) fn state(&self) -> TransferState {
        self.state
    }

    pub(crate) fn total_size(&self) -> u64 {
        self.total_size
    }

    pub(crate) fn cursor(&self) -> u64 {
        self.cursor
    }

    /// All bytes moved. A download is only done once a chunk fixed its size,
    /// an upload of nothing is done from the start.
    pub(crate) fn is_done(&self) -> bool {
        match self.direction {
            Direction::Download => self.state == TransferState::Completed,
            Direction::Upload => {
                self.state == TransferState::Completed || self.cursor == self.total_size
            }
        }
    }

    /// Cut the next upload chunk
    pub(crate) fn produce(&mut self) -> Result<ProducedChunk, TransferError> {
        if self.direction != Direction::Upload {
            return Err(TransferError::DirectionMismatch {
                expected: Direction::Upload,
                actual: self.direction,
            });
        }
        if self.state.is_terminal() {
            return Ok(ProducedChunk::done());
        }

        let remaining = self.total_size - self.cursor;
        let bytes_to_send = remaining.min(self.chunk_size as u64) as usize;
        if bytes_to_send == 0 {
            self.state = TransferState::Completed;
            return Ok(ProducedChunk::done());
        }

        let start = self.cursor as usize;
        let data = self.buffer[start..start + bytes_to_send].to_vec();
        self.cursor += bytes_to_send as u64;

        let is_done = self.cursor == self.total_size;
        if is_done {
            self.state = TransferState::Completed;
            // The collaborator holds its own copies of every chunk by now
            self.buffer = Vec::new();
        } else {
            self.state = TransferState::InProgress;
        }

        Ok(ProducedChunk { data, is_done })
    }

    /// Absorb the next download chunk
    pub(crate) fn consume(
        &mut self,
        data: Option<&[u8]>,
        announced_total: u64,
        is_last: bool,
    ) -> Result<(), TransferError> {
        let data = data.ok_or(TransferError::DataError)?;

        if self.direction != Direction::Download {
            return Err(TransferError::DirectionMismatch {
                expected: Direction::Download,
                actual: self.direction,
            });
        }

        if self.state == TransferState::Failed {
            return Err(match &self.result {
                Some(Err(err)) => err.clone(),
                _ => TransferError::DataError,
            });
        }

        if self.state == TransferState::Completed {
            if data.is_empty() {
                return Ok(());
            }
            return Err(TransferError::Overflow {
                received: self.cursor + data.len() as u64,
                announced: self.total_size,
            });
        }

        if self.cursor == 0 && self.total_size == 0 {
            if announced_total > self.max_file_size {
                return Err(TransferError::TooLarge {
                    size: announced_total,
                    max: self.max_file_size,
                });
            }
            self.total_size = announced_total;
        } else if announced_total != self.total_size {
            return Err(TransferError::SizeChanged {
                announced: announced_total,
                expected: self.total_size,
            });
        }

        let received = self.cursor + data.len() as u64;
        if received > self.total_size {
            return Err(TransferError::Overflow {
                received,
                announced: self.total_size,
            });
        }

        if self.total_size == 0 {
            // Valid empty file, nothing to allocate
            self.state = TransferState::Completed;
            return Ok(());
        }

        if !data.is_empty() {
            if self.buffer.capacity() == 0 {
                self.buffer.reserve_exact(self.total_size as usize);
            }
            self.buffer.extend_from_slice(data);
            self.cursor = received;
        }

        if self.cursor == self.total_size {
            self.state = TransferState::Completed;
        } else if is_last {
            return Err(TransferError::Incomplete {
                received: self.cursor,
                expected: self.total_size,
            });
        } else {
            self.state = TransferState::InProgress;
        }

        Ok(())
    }

    /// Apply the collaborator's final status
    pub(crate) fn confirm(&self, status: Result<(), BackendError>) -> Result<(), TransferError> {
        status?;
        if self.is_done() {
            Ok(())
        } else {
            Err(TransferError::Incomplete {
                received: self.cursor,
                expected: self.total_size,
            })
        }
    }

    /// Record success
    pub(crate) fn mark_completed(&mut self) {
        self.state = TransferState::Completed;
        self.result = Some(Ok(()));
    }

    /// Record failure
    pub(crate) fn mark_failed(&mut self, err: TransferError) {
        self.state = TransferState::Failed;
        self.result = Some(Err(err));
    }

    /// Record cancellation
    pub(crate) fn mark_cancelled(&mut self) {
        self.state = TransferState::Cancelled;
        self.result = Some(Err(TransferError::Cancelled));
    }

    /// Snapshot for progress queries
    pub(crate) fn snapshot(&self) -> TransferProgress {
        TransferProgress {
            name: self.name.clone(),
            id: self.id,
            direction: self.direction,
            state: self.state,
            bytes_transferred: self.cursor,
            total_bytes: self.total_size,
        }
    }

    /// Split into the completion callback and the value to hand it.
    ///
    /// The buffer moves into the completion; a download exposes it only when
    /// it completed.
    pub(crate) fn into_completion(mut self) -> (Option<CompletionFn>, Completion) {
        let result = match self.result.take() {
            Some(Ok(())) => Ok(match self.direction {
                Direction::Download => Some(std::mem::take(&mut self.buffer)),
                Direction::Upload => None,
            }),
            Some(Err(err)) => Err(err),
            None => Err(TransferError::Cancelled),
        };

        let completion = Completion {
            name: std::mem::take(&mut self.name),
            id: self.id,
            direction: self.direction,
            state: self.state,
            result,
        };

        let callback = self
            .on_complete
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        (callback, completion)
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("total_size", &self.total_size)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}
