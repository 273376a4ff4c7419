//! The fixed 40-byte segment header (spec.md §3) and its two-phase commit.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{Result, StorageError};

pub const HEADER_LEN: usize = 40;

/// Format version written into every new segment's header.
pub const MAGIC_VERSION: u64 = 0x4253_4631_0000_0001;

/// The low two bits of `flags` form the closed marker. `0b11` means the header's counters are
/// trustworthy ("clean"); any other value means recovery must run before trusting them.
pub const CLOSED_MARKER: u32 = 0b11;
pub const OPEN_MARKER: u32 = 0b00;
const MARKER_MASK: u32 = 0b11;

/// The segment header: format version, capacity, serializator fingerprint, the closed marker,
/// and the occupation/live/tombstone counters that make recovery unnecessary on a clean open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic_version: u64,
    pub segment_length: u64,
    pub fingerprint: u32,
    pub flags: u32,
    pub occupation: u64,
    pub live_count: u32,
    pub tombstone_count: u32,
}

impl Header {
    /// The header for a brand-new, empty segment: clean, zero occupation.
    pub fn fresh(segment_length: u64, fingerprint: u32) -> Self {
        Self {
            magic_version: MAGIC_VERSION,
            segment_length,
            fingerprint,
            flags: CLOSED_MARKER,
            occupation: 0,
            live_count: 0,
            tombstone_count: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.flags & MARKER_MASK == CLOSED_MARKER
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(&self.magic_version.to_be_bytes());
        buf[8..16].copy_from_slice(&self.segment_length.to_be_bytes());
        buf[16..20].copy_from_slice(&self.fingerprint.to_be_bytes());
        buf[20..24].copy_from_slice(&self.flags.to_be_bytes());
        buf[24..32].copy_from_slice(&self.occupation.to_be_bytes());
        buf[32..36].copy_from_slice(&self.live_count.to_be_bytes());
        buf[36..40].copy_from_slice(&self.tombstone_count.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            magic_version: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            segment_length: u64::from_be_bytes(buf[8..16].try_into().unwrap()),
            fingerprint: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            flags: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
            occupation: u64::from_be_bytes(buf[24..32].try_into().unwrap()),
            live_count: u32::from_be_bytes(buf[32..36].try_into().unwrap()),
            tombstone_count: u32::from_be_bytes(buf[36..40].try_into().unwrap()),
        }
    }
}

/// Reads the header at `start`. Returns `Ok(None)` if the file doesn't yet extend that far
/// (a brand-new, empty segment).
pub fn read_header(file: &File, start: u64) -> Result<Option<Header>> {
    let len = file.metadata()?.len();
    if len < start + HEADER_LEN as u64 {
        return Ok(None);
    }
    let mut buf = [0u8; HEADER_LEN];
    file.read_exact_at(&mut buf, start)?;
    Ok(Some(Header::decode(&buf)))
}

/// Writes the header at `start` using the two-phase commit from spec.md §4.3: the record is
/// written with the closed bits masked to zero, `fsync`'d, and only then are the 4 flag bytes
/// overwritten with the true flags. A crash between the two writes leaves the marker cleared,
/// which forces a recovery scan on the next open rather than trusting stale counters.
pub fn write_header_two_phase(file: &File, start: u64, header: &Header) -> Result<()> {
    let mut open_header = *header;
    open_header.flags = header.flags & !MARKER_MASK;
    file.write_at(&open_header.encode(), start)?;
    file.sync_all()?;

    if open_header.flags == header.flags {
        // Target flags have no marker bits set anyway; the write above already committed them.
        return Ok(());
    }
    let flags_offset = start + 20;
    file.write_at(&header.flags.to_be_bytes(), flags_offset)?;
    file.sync_all()?;
    Ok(())
}

/// Clears just the closed-marker bits without touching anything else, used the moment a clean
/// storage is first mutated (spec.md §4.3's `Open/Clean → Open/Dirty` transition).
pub fn clear_closed_marker(file: &File, start: u64, current_flags: u32) -> Result<()> {
    let flags_offset = start + 20;
    let new_flags = current_flags & !MARKER_MASK;
    file.write_at(&new_flags.to_be_bytes(), flags_offset)?;
    Ok(())
}

pub fn validate_header(header: &Header, expected_segment_length: u64, expected_fingerprint: u32) -> Result<()> {
    if header.magic_version != MAGIC_VERSION {
        return Err(StorageError::VersionMismatch {
            on_disk: header.magic_version as u32,
            expected: MAGIC_VERSION as u32,
        });
    }
    if header.segment_length != expected_segment_length {
        return Err(StorageError::corrupted(format!(
            "segment length mismatch: header says {}, configuration says {}",
            header.segment_length, expected_segment_length
        )));
    }
    if header.fingerprint != expected_fingerprint {
        return Err(StorageError::VersionMismatch {
            on_disk: header.fingerprint,
            expected: expected_fingerprint,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn encode_decode_round_trips() {
        let header = Header {
            magic_version: MAGIC_VERSION,
            segment_length: 4096,
            fingerprint: 0xdead_beef,
            flags: CLOSED_MARKER,
            occupation: 128,
            live_count: 3,
            tombstone_count: 1,
        };
        assert_eq!(Header::decode(&header.encode()), header);
    }

    #[test]
    fn fresh_header_is_closed_and_empty() {
        let header = Header::fresh(4096, 42);
        assert!(header.is_closed());
        assert_eq!(header.occupation, 0);
        assert_eq!(header.live_count, 0);
    }

    #[test]
    fn two_phase_commit_persists_full_header() {
        let file = tempfile().unwrap();
        let header = Header {
            magic_version: MAGIC_VERSION,
            segment_length: 4096,
            fingerprint: 7,
            flags: CLOSED_MARKER,
            occupation: 64,
            live_count: 2,
            tombstone_count: 0,
        };
        file.set_len(HEADER_LEN as u64).unwrap();
        write_header_two_phase(&file, 0, &header).unwrap();
        let read_back = read_header(&file, 0).unwrap().unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn clear_closed_marker_only_touches_flags() {
        let file = tempfile().unwrap();
        let header = Header::fresh(4096, 7);
        file.set_len(HEADER_LEN as u64).unwrap();
        write_header_two_phase(&file, 0, &header).unwrap();

        clear_closed_marker(&file, 0, header.flags).unwrap();
        let reopened = read_header(&file, 0).unwrap().unwrap();
        assert!(!reopened.is_closed());
        assert_eq!(reopened.occupation, header.occupation);
        assert_eq!(reopened.segment_length, header.segment_length);
    }

    #[test]
    fn read_header_on_too_short_file_is_none() {
        let file = tempfile().unwrap();
        file.set_len(HEADER_LEN as u64 - 1).unwrap();
        assert!(read_header(&file, 0).unwrap().is_none());
    }

    #[test]
    fn validate_header_rejects_fingerprint_mismatch() {
        let header = Header::fresh(4096, 7);
        let err = validate_header(&header, 4096, 8).unwrap_err();
        assert!(matches!(err, StorageError::VersionMismatch { .. }));
    }

    #[test]
    fn validate_header_rejects_segment_length_mismatch() {
        let header = Header::fresh(4096, 7);
        let err = validate_header(&header, 2048, 7).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }
}
