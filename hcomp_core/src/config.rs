/// Upper bound on simultaneously open access handles per file.
pub const MAX_ACCESS_RECORDS: usize = 256;

/// Raw bytes gathered before they are encoded as one segment.
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;

/// Tunables of one open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOptions {
    pub max_handles: usize,
    pub segment_size: usize,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            max_handles: MAX_ACCESS_RECORDS,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}
