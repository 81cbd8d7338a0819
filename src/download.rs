//! Reassembly of chunked `D00` file downloads.
//!
//! Devices send file contents as indexed chunks that may arrive in any
//! order, possibly interleaved across files and devices. The aggregator
//! keys in-flight downloads by `(IMEI, file name)` and hands back the
//! whole file exactly once, when the last gap closes.

use crate::command::FileData;
use crate::error::GprsError;
use crate::frame::Frame;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// One in-flight download.
#[derive(Debug)]
pub struct FileDownload {
    file_name: Bytes,
    expected_total: Option<u32>,
    chunks: BTreeMap<u32, Bytes>,
    last_updated: DateTime<Utc>,
}

impl FileDownload {
    fn new(file_name: Bytes) -> FileDownload {
        FileDownload {
            file_name,
            expected_total: None,
            chunks: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn file_name(&self) -> &Bytes {
        &self.file_name
    }

    /// When the most recent chunk arrived. The aggregator never evicts on
    /// its own; a supervisor uses this to expire stale downloads.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    fn accept(&mut self, total: u32, index: u32, bytes: Bytes) -> Result<(), GprsError> {
        match self.expected_total {
            None => self.expected_total = Some(total),
            Some(expected) if expected != total => {
                return Err(GprsError::StateMismatch(format!(
                    "download of {} expects {expected} packets, chunk declares {total}",
                    String::from_utf8_lossy(&self.file_name)
                )));
            }
            Some(_) => {}
        }
        if index >= total {
            return Err(GprsError::StateMismatch(format!(
                "chunk index {index} outside the declared {total} packets"
            )));
        }
        trace!(
            file = %String::from_utf8_lossy(&self.file_name),
            index,
            total,
            len = bytes.len(),
            "storing chunk"
        );
        // Duplicate indices overwrite; devices retransmit freely.
        self.chunks.insert(index, bytes);
        self.last_updated = Utc::now();
        Ok(())
    }

    /// All indices in `[0, total)` present?
    pub fn is_complete(&self) -> bool {
        match self.expected_total {
            Some(total) => (0..total).all(|index| self.chunks.contains_key(&index)),
            None => false,
        }
    }

    /// Smallest missing index, or the total when the download is
    /// complete. Callers use this to request gaps.
    pub fn next_packet(&self) -> u32 {
        let Some(total) = self.expected_total else {
            return 0;
        };
        (0..total)
            .find(|index| !self.chunks.contains_key(index))
            .unwrap_or(total)
    }

    fn materialize(self) -> Bytes {
        let mut out = BytesMut::new();
        for chunk in self.chunks.values() {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }
}

/// All in-flight downloads, keyed by `(IMEI, file name)`.
#[derive(Debug, Default)]
pub struct FileDownloadAggregator {
    downloads: HashMap<(Bytes, Bytes), FileDownload>,
}

impl FileDownloadAggregator {
    pub fn new() -> FileDownloadAggregator {
        FileDownloadAggregator::default()
    }

    /// Feed a parsed `D00` response frame. Returns the completed file
    /// bytes when this chunk was the last one missing; the entry is
    /// removed at that point. Frames without file data are ignored.
    pub fn add_frame(&mut self, frame: &Frame) -> Result<Option<Bytes>, GprsError> {
        let Some(data) = frame.command.file_data() else {
            return Ok(None);
        };
        self.add_chunk(frame.imei.clone(), data)
    }

    /// Feed one chunk directly.
    pub fn add_chunk(&mut self, imei: Bytes, data: FileData) -> Result<Option<Bytes>, GprsError> {
        let key = (imei, data.file_name.clone());
        let download = self
            .downloads
            .entry(key.clone())
            .or_insert_with(|| FileDownload::new(data.file_name.clone()));
        download.accept(data.total_packets, data.packet_number, data.file_bytes)?;

        if download.is_complete() {
            debug!(
                imei = %String::from_utf8_lossy(&key.0),
                file = %String::from_utf8_lossy(&key.1),
                "download complete"
            );
            let download = self.downloads.remove(&key).expect("entry present");
            return Ok(Some(download.materialize()));
        }
        Ok(None)
    }

    /// The in-flight download for a key, if any.
    pub fn get(&self, imei: &[u8], file_name: &[u8]) -> Option<&FileDownload> {
        self.downloads
            .iter()
            .find(|((i, f), _)| i.as_ref() == imei && f.as_ref() == file_name)
            .map(|(_, download)| download)
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    /// Drop downloads whose last activity is older than `cutoff`.
    /// Returns the discarded file names.
    pub fn expire_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<Bytes> {
        let stale: Vec<(Bytes, Bytes)> = self
            .downloads
            .iter()
            .filter(|(_, download)| download.last_updated < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        stale
            .into_iter()
            .map(|key| {
                debug!(file = %String::from_utf8_lossy(&key.1), "expiring stale download");
                self.downloads.remove(&key);
                key.1
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(name: &'static [u8], total: u32, index: u32, bytes: &'static [u8]) -> FileData {
        FileData {
            file_name: Bytes::from_static(name),
            total_packets: total,
            packet_number: index,
            file_bytes: Bytes::from_static(bytes),
        }
    }

    fn imei() -> Bytes {
        Bytes::from_static(b"X")
    }

    #[test]
    fn out_of_order_chunks_complete() {
        let mut agg = FileDownloadAggregator::new();
        assert_eq!(agg.add_chunk(imei(), chunk(b"f", 3, 0, b"a")).unwrap(), None);
        assert_eq!(agg.add_chunk(imei(), chunk(b"f", 3, 2, b"c")).unwrap(), None);
        let done = agg.add_chunk(imei(), chunk(b"f", 3, 1, b"b")).unwrap();
        assert_eq!(done.unwrap().as_ref(), b"abc");
        assert!(agg.is_empty());
    }

    #[test]
    fn any_permutation_yields_the_same_bytes() {
        for order in [[0u32, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]] {
            let mut agg = FileDownloadAggregator::new();
            let parts: [&'static [u8]; 3] = [b"a", b"b", b"c"];
            let mut result = None;
            for index in order {
                result = agg
                    .add_chunk(imei(), chunk(b"f", 3, index, parts[index as usize]))
                    .unwrap();
            }
            assert_eq!(result.unwrap().as_ref(), b"abc");
        }
    }

    #[test]
    fn downloads_are_keyed_by_imei_and_name() {
        let mut agg = FileDownloadAggregator::new();
        agg.add_chunk(imei(), chunk(b"f", 2, 0, b"a")).unwrap();
        agg.add_chunk(Bytes::from_static(b"Y"), chunk(b"f", 2, 0, b"a"))
            .unwrap();
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn changed_total_is_rejected() {
        let mut agg = FileDownloadAggregator::new();
        agg.add_chunk(imei(), chunk(b"f", 3, 0, b"a")).unwrap();
        let err = agg.add_chunk(imei(), chunk(b"f", 4, 1, b"b")).unwrap_err();
        assert!(matches!(err, GprsError::StateMismatch(_)));
    }

    #[test]
    fn chunk_index_must_be_inside_the_total() {
        let mut agg = FileDownloadAggregator::new();
        let err = agg.add_chunk(imei(), chunk(b"f", 3, 3, b"x")).unwrap_err();
        assert!(matches!(err, GprsError::StateMismatch(_)));
    }

    #[test]
    fn duplicate_chunks_overwrite() {
        let mut agg = FileDownloadAggregator::new();
        agg.add_chunk(imei(), chunk(b"f", 2, 0, b"a")).unwrap();
        agg.add_chunk(imei(), chunk(b"f", 2, 0, b"A")).unwrap();
        let done = agg.add_chunk(imei(), chunk(b"f", 2, 1, b"b")).unwrap();
        assert_eq!(done.unwrap().as_ref(), b"Ab");
    }

    #[test]
    fn next_packet_reports_the_first_gap() {
        let mut agg = FileDownloadAggregator::new();
        agg.add_chunk(imei(), chunk(b"f", 3, 2, b"c")).unwrap();
        let download = agg.get(b"X", b"f").unwrap();
        assert_eq!(download.next_packet(), 0);
        agg.add_chunk(imei(), chunk(b"f", 3, 0, b"a")).unwrap();
        assert_eq!(agg.get(b"X", b"f").unwrap().next_packet(), 1);
    }

    #[test]
    fn expiry_removes_stale_entries() {
        let mut agg = FileDownloadAggregator::new();
        agg.add_chunk(imei(), chunk(b"f", 2, 0, b"a")).unwrap();
        let expired = agg.expire_older_than(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(expired.len(), 1);
        assert!(agg.is_empty());
    }
}
