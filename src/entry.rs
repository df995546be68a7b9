//! Canonical log entry handed to the processing pipeline

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;

/// Fixed per-entry framing overhead: tag, timestamp seconds/nanos, payload length
const ENTRY_HEADER_SIZE: usize = 2 + 8 + 4 + 4;

/// Handle to a tag resolved by the [`Sink`](crate::pipeline::Sink)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntryTag(pub u16);

impl fmt::Display for EntryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single timestamped log entry built from one source record or message
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub tag: EntryTag,
    pub source_address: Option<IpAddr>,
    /// `None` when the source did not supply a usable timestamp
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: Bytes,
}

impl LogEntry {
    pub fn new(
        tag: EntryTag,
        source_address: Option<IpAddr>,
        timestamp: Option<DateTime<Utc>>,
        payload: Bytes,
    ) -> Self {
        Self {
            tag,
            source_address,
            timestamp,
            payload,
        }
    }

    /// Approximate encoded size of the entry, used for emitted-bytes accounting
    pub fn size(&self) -> usize {
        let src = match self.source_address {
            Some(IpAddr::V4(_)) => 4,
            Some(IpAddr::V6(_)) => 16,
            None => 0,
        };
        ENTRY_HEADER_SIZE + src + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_entry_size_accounts_for_source() {
        let payload = Bytes::from_static(b"hello world");
        let bare = LogEntry::new(EntryTag(1), None, None, payload.clone());
        let with_src = LogEntry::new(
            EntryTag(1),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            None,
            payload,
        );

        assert_eq!(bare.size(), ENTRY_HEADER_SIZE + 11);
        assert_eq!(with_src.size(), bare.size() + 4);
    }
}
