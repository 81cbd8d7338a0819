//! Reassembly of multi-packet `D01` file listings.
//!
//! A listing session is a burst of `D01` responses sharing one
//! `total_packets` value. Fragments concatenate in index order into a
//! single `|`-separated string; a terminal separator leaves an empty
//! trailing token which is dropped. Completed listings fold into a
//! cumulative inventory of files known to be on the device.

use crate::command::FileListPacket;
use crate::error::GprsError;
use crate::frame::Frame;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Listing state for one device.
#[derive(Debug, Default)]
pub struct FileListing {
    max_packets: u32,
    pieces: BTreeMap<u32, String>,
    files: Vec<String>,
}

impl FileListing {
    pub fn new() -> FileListing {
        FileListing::default()
    }

    /// Feed a parsed `D01` response frame. Frames of other types are
    /// ignored. Returns the canonical file set when the session
    /// completed with this packet.
    pub fn add_frame(&mut self, frame: &Frame) -> Result<Option<Vec<String>>, GprsError> {
        let Some(packet) = frame.command.file_list() else {
            return Ok(None);
        };
        self.add_packet(packet)
    }

    /// Feed one listing fragment.
    pub fn add_packet(&mut self, packet: FileListPacket) -> Result<Option<Vec<String>>, GprsError> {
        if self.max_packets == 0 {
            self.max_packets = packet.total_packets;
        } else if self.max_packets != packet.total_packets {
            return Err(GprsError::StateMismatch(format!(
                "listing expects {} packets, fragment declares {}",
                self.max_packets, packet.total_packets
            )));
        }
        trace!(
            index = packet.packet_number,
            total = packet.total_packets,
            "storing listing fragment"
        );
        self.pieces.insert(
            packet.packet_number,
            String::from_utf8_lossy(&packet.fragment).into_owned(),
        );

        if !self.is_complete() {
            return Ok(None);
        }

        let names = self.assemble();
        for name in &names {
            self.track(name.clone());
        }
        self.pieces.clear();
        self.max_packets = 0;
        debug!(files = names.len(), "file listing complete");
        Ok(Some(names))
    }

    /// Every index in `[0, total)` present?
    pub fn is_complete(&self) -> bool {
        self.max_packets != 0
            && (0..self.max_packets).all(|index| self.pieces.contains_key(&index))
    }

    fn assemble(&self) -> Vec<String> {
        let mut joined = String::new();
        for piece in self.pieces.values() {
            joined.push_str(piece);
        }
        // A terminal separator produces one empty trailing token.
        if joined.ends_with('|') {
            joined.pop();
        }
        if joined.is_empty() {
            return Vec::new();
        }
        joined.split('|').map(str::to_string).collect()
    }

    /// Cumulative inventory of files reported across sessions, in first
    /// seen order without duplicates.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Track a file name in the inventory (listing completion and
    /// download announcements both land here).
    pub fn track(&mut self, file_name: String) {
        if file_name.is_empty() {
            return;
        }
        if self.files.contains(&file_name) {
            trace!(file = %file_name, "file already tracked");
            return;
        }
        self.files.push(file_name);
    }

    /// Forget a file (deletion confirmed, download finished).
    pub fn forget(&mut self, file_name: &str) {
        self.files.retain(|name| name != file_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(total: u32, index: u32, fragment: &'static str) -> FileListPacket {
        FileListPacket {
            total_packets: total,
            packet_number: index,
            fragment: Bytes::from_static(fragment.as_bytes()),
        }
    }

    #[test]
    fn two_packet_listing() {
        let mut listing = FileListing::new();
        assert_eq!(listing.add_packet(packet(2, 0, "a.jpg|b.jpg|")).unwrap(), None);
        let names = listing.add_packet(packet(2, 1, "c.jpg")).unwrap().unwrap();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(listing.files(), ["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let mut listing = FileListing::new();
        assert_eq!(listing.add_packet(packet(2, 1, "c.jpg")).unwrap(), None);
        let names = listing
            .add_packet(packet(2, 0, "a.jpg|b.jpg|"))
            .unwrap()
            .unwrap();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn a_name_split_across_fragments_joins_up() {
        let mut listing = FileListing::new();
        listing.add_packet(packet(2, 0, "first.jpg|seco")).unwrap();
        let names = listing.add_packet(packet(2, 1, "nd.jpg")).unwrap().unwrap();
        assert_eq!(names, vec!["first.jpg", "second.jpg"]);
    }

    #[test]
    fn changed_total_is_rejected() {
        let mut listing = FileListing::new();
        listing.add_packet(packet(3, 0, "a.jpg|")).unwrap();
        let err = listing.add_packet(packet(4, 1, "b.jpg|")).unwrap_err();
        assert!(matches!(err, GprsError::StateMismatch(_)));
    }

    #[test]
    fn sessions_accumulate_into_the_inventory() {
        let mut listing = FileListing::new();
        listing.add_packet(packet(1, 0, "a.jpg|b.jpg")).unwrap();
        // A later session may repeat names; the inventory keeps one copy.
        listing.add_packet(packet(1, 0, "b.jpg|c.jpg")).unwrap();
        assert_eq!(listing.files(), ["a.jpg", "b.jpg", "c.jpg"]);

        listing.forget("b.jpg");
        assert_eq!(listing.files(), ["a.jpg", "c.jpg"]);
    }
}
