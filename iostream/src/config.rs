//! Stream configuration.
//!
//! A [`StreamConfig`] belongs to the stream. The stream applies
//! `read_length` when it schedules a read and hands the whole config to
//! the descriptor on every channel open, where the backend applies the
//! buffer and chunk sizes.

/// Default low-water mark for reads.
pub const DEFAULT_MIN_BYTES: usize = 1;

/// Largest total length a single scheduled read may deliver.
pub const MAX_READ_LENGTH: usize = i32::MAX as usize;

/// Default number of bytes requested per underlying read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of bytes handed to one underlying write.
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Tuning knobs of a stream and of the channels it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Total bytes one read operation may deliver before it completes.
    pub read_length: usize,
    /// Bytes requested from the OS per underlying read (backend).
    pub read_buffer_size: usize,
    /// Bytes handed to the OS per underlying write (backend).
    pub write_chunk_size: usize,
}

impl StreamConfig {
    /// Creates a config with the default values.
    pub fn new() -> Self {
        Self {
            read_length: MAX_READ_LENGTH,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
        }
    }

    /// Sets the total length of one read operation.
    pub fn with_read_length(mut self, length: usize) -> Self {
        self.read_length = length;
        self
    }

    /// Sets the per-read buffer size; clamped to at least one byte.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Sets the per-write chunk size; clamped to at least one byte.
    pub fn with_write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size.max(1);
        self
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new()
    }
}
