use crate::ContentDigest;

/// A chunk of file data for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    /// Size of this chunk in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Snapshot of one upload's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub digest: ContentDigest,
    pub name: String,
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    /// Returns `true` once every byte has been handed to the store.
    pub fn is_complete(&self) -> bool {
        self.bytes_sent >= self.total_bytes
    }
}
