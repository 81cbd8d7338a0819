//! Frame envelope codec.
//!
//! Wire form:
//!
//! ```text
//! <prefix 2><id 1><length N>,<imei>,<command_type>,<payload>*<cksum 2><CR LF>
//! ```
//!
//! `length` is the decimal byte count from the first comma through the
//! trailing CR LF inclusive. The checksum is the low byte of the additive
//! sum of every byte from the start of the frame through the `*`.
//! Payloads may carry raw binary, so the parser is driven entirely by the
//! declared length and never searches for `*` inside the payload region.

use crate::command::{Command, Direction, IntoField};
use crate::constants::{
    END_OF_MESSAGE, FRAME_TRAILER_LEN, IDENTIFIER_BASE, IDENTIFIER_WINDOW, MAX_DATA_LENGTH,
    PLACEHOLDER_CHECKSUM,
};
use crate::error::GprsError;
use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

/// One protocol frame: envelope plus the enclosed command.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub direction: Direction,
    pub identifier: u8,
    pub imei: Bytes,
    pub command: Command,
    declared_checksum: Option<[u8; 2]>,
    computed_checksum: Option<u8>,
}

impl Frame {
    pub fn new(
        direction: Direction,
        identifier: u8,
        imei: impl IntoField,
        command: Command,
    ) -> Frame {
        Frame {
            direction,
            identifier,
            imei: imei.into_field(),
            command,
            declared_checksum: None,
            computed_checksum: None,
        }
    }

    /// Parse one complete frame, CR LF included.
    pub fn parse(message: Bytes) -> Result<Frame, GprsError> {
        // prefix + id + one length digit + two commas + trailer
        if message.len() < 9 {
            return Err(GprsError::Framing(format!(
                "frame too short: {} bytes",
                message.len()
            )));
        }
        let direction = Direction::from_prefix(&message[0..2])?;
        let identifier = message[2];
        if !message.ends_with(END_OF_MESSAGE) {
            return Err(GprsError::Framing("frame does not end with CR LF".into()));
        }

        let first_comma = message
            .iter()
            .position(|b| *b == b',')
            .ok_or_else(|| GprsError::Framing("no comma after length field".into()))?;
        if first_comma < 4 {
            return Err(GprsError::Framing("no length digits before comma".into()));
        }
        // Validate the length digits even on a pre-sliced message.
        let _ = declared_length(&message[3..first_comma])?;

        let body_end = message.len() - FRAME_TRAILER_LEN;
        if message[body_end] != b'*' {
            return Err(GprsError::Framing("checksum separator missing".into()));
        }
        let declared: [u8; 2] = [message[body_end + 1], message[body_end + 2]];
        let computed = additive_sum(&message[..body_end + 1]);

        let body = message.slice(first_comma + 1..body_end);
        let imei_end = body
            .iter()
            .position(|b| *b == b',')
            .ok_or_else(|| GprsError::Framing("no comma after IMEI".into()))?;
        let imei = body.slice(..imei_end);
        let payload = body.slice(imei_end + 1..);

        let command = Command::decode(direction, payload)?;
        trace!(
            direction = %direction,
            command = %command.kind(),
            imei = %String::from_utf8_lossy(&imei),
            "parsed frame"
        );

        Ok(Frame {
            direction,
            identifier,
            imei,
            command,
            declared_checksum: Some(declared),
            computed_checksum: Some(computed),
        })
    }

    /// The checksum digits carried by the frame, `XX` until signed.
    pub fn checksum(&self) -> [u8; 2] {
        self.declared_checksum.unwrap_or(*PLACEHOLDER_CHECKSUM)
    }

    /// Strict checksum validation for a parsed frame.
    ///
    /// The `XX` placeholder is accepted: it marks an outbound frame that
    /// has not been signed yet.
    pub fn verify_checksum(&self) -> Result<(), GprsError> {
        let (Some(declared), Some(computed)) = (self.declared_checksum, self.computed_checksum)
        else {
            return Ok(());
        };
        if declared == *PLACEHOLDER_CHECKSUM {
            return Ok(());
        }
        let declared_text = String::from_utf8_lossy(&declared).into_owned();
        match u8::from_str_radix(&declared_text, 16) {
            Ok(value) if value == computed => Ok(()),
            _ => Err(GprsError::Checksum {
                computed,
                declared: declared_text,
            }),
        }
    }

    /// Serialize with this frame's own identifier.
    pub fn encode(&self) -> Bytes {
        self.encode_with_identifier(self.identifier)
    }

    /// Serialize with an explicit identifier (batch emitters cycle it).
    pub fn encode_with_identifier(&self, identifier: u8) -> Bytes {
        let body = self.command.to_bytes();
        // ,imei,body*CS\r\n
        let declared = 1 + self.imei.len() + 1 + body.len() + FRAME_TRAILER_LEN;

        let mut out = BytesMut::with_capacity(declared + 8);
        out.extend_from_slice(self.direction.prefix());
        out.extend_from_slice(&[identifier]);
        out.extend_from_slice(declared.to_string().as_bytes());
        out.extend_from_slice(b",");
        out.extend_from_slice(&self.imei);
        out.extend_from_slice(b",");
        out.extend_from_slice(&body);
        out.extend_from_slice(b"*");

        let checksum = additive_sum(&out);
        out.extend_from_slice(format!("{checksum:02X}").as_bytes());
        out.extend_from_slice(END_OF_MESSAGE);
        out.freeze()
    }
}

/// Identifier for the `counter`-th frame of a batch: the window of 58
/// ASCII characters starting at `A`.
pub fn cycled_identifier(counter: u64) -> u8 {
    IDENTIFIER_BASE + (counter % IDENTIFIER_WINDOW) as u8
}

/// Serialize a burst of related frames, cycling the identifier so the
/// receiver can demultiplex them.
pub fn encode_batch(frames: &[Frame], start_counter: u64) -> Vec<Bytes> {
    frames
        .iter()
        .enumerate()
        .map(|(index, frame)| {
            frame.encode_with_identifier(cycled_identifier(start_counter + index as u64))
        })
        .collect()
}

/// Result of consuming a byte buffer from the transport.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    /// Complete frames, in arrival order.
    pub frames: Vec<Frame>,
    /// Bytes seen before the first prefix; only useful for resync.
    pub preamble: Bytes,
    /// Trailing bytes of an incomplete frame, to be fed back next call.
    pub leftover: Bytes,
}

/// Consume as many complete frames as the buffer holds, with the default
/// length limit.
pub fn consume(buf: Bytes, direction: Direction) -> Result<StreamOutcome, GprsError> {
    consume_with_limit(buf, direction, MAX_DATA_LENGTH)
}

/// Consume frames of the given direction from `buf`.
///
/// Checksum mismatches are tolerated here with a warning; callers that
/// need strict validation use [`Frame::verify_checksum`] on each frame.
pub fn consume_with_limit(
    buf: Bytes,
    direction: Direction,
    max_length: usize,
) -> Result<StreamOutcome, GprsError> {
    let prefix = direction.prefix();
    let mut outcome = StreamOutcome::default();
    let mut rest = buf;

    while !rest.is_empty() {
        match find_subsequence(&rest, prefix) {
            None => {
                outcome.leftover = rest;
                break;
            }
            Some(0) => {}
            Some(start) => {
                if outcome.frames.is_empty() && outcome.preamble.is_empty() {
                    outcome.preamble = rest.slice(..start);
                } else {
                    warn!(skipped = start, "discarding bytes between frames");
                }
                rest = rest.slice(start..);
            }
        }

        let Some(first_comma) = rest.iter().position(|b| *b == b',') else {
            outcome.leftover = rest;
            break;
        };
        if first_comma < 4 {
            return Err(GprsError::Framing("no length digits before comma".into()));
        }
        let declared = declared_length(&rest[3..first_comma])?;
        if declared > max_length {
            return Err(GprsError::OverSize(declared));
        }
        if rest.len() < first_comma + declared {
            outcome.leftover = rest;
            break;
        }

        let message = rest.slice(..first_comma + declared);
        rest = rest.slice(first_comma + declared..);
        if !message.ends_with(END_OF_MESSAGE) {
            return Err(GprsError::Framing(
                "declared length does not end at CR LF".into(),
            ));
        }

        let frame = Frame::parse(message)?;
        if let Err(error) = frame.verify_checksum() {
            warn!(%error, "accepting frame with bad checksum");
        }
        outcome.frames.push(frame);
    }

    Ok(outcome)
}

fn declared_length(digits: &[u8]) -> Result<usize, GprsError> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| GprsError::Framing("length field is not ASCII".into()))?;
    let length: usize = text
        .parse()
        .map_err(|_| GprsError::Framing(format!("length field is not a number: {text:?}")))?;
    if length < FRAME_TRAILER_LEN {
        return Err(GprsError::Framing(format!(
            "declared length {length} cannot hold a frame trailer"
        )));
    }
    Ok(length)
}

fn additive_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u32, |sum, b| sum + u32::from(*b)) as u8
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandType;
    use crate::event::EventCode;

    const LOCATION_EVENT: &[u8] = b"$$D160,864507032228727,AAA,35,24.819116,121.026091,\
180323023615,A,7,16,0,176,1.3,83,7,1174,466|97|527B|01035DB4,0000,\
0001|0000|0000|019A|0981,00000001,,3,,,36,23*DC\r\n";

    fn heartbeat_frame() -> Frame {
        let command = Command::decode(
            Direction::ServerToClient,
            Bytes::from_static(b"A11,0"),
        )
        .unwrap();
        Frame::new(Direction::ServerToClient, b'l', "0407", command)
    }

    #[test]
    fn encode_heartbeat() {
        assert_eq!(
            heartbeat_frame().encode().as_ref(),
            b"@@l16,0407,A11,0*9F\r\n"
        );
    }

    #[test]
    fn encode_location_query() {
        let command =
            Command::decode(Direction::ServerToClient, Bytes::from_static(b"A10")).unwrap();
        let frame = Frame::new(Direction::ServerToClient, b'c', "0407", command);
        assert_eq!(frame.encode().as_ref(), b"@@c14,0407,A10*37\r\n");
    }

    #[test]
    fn parse_location_event() {
        let frame = Frame::parse(Bytes::from_static(LOCATION_EVENT)).unwrap();
        assert_eq!(frame.direction, Direction::ClientToServer);
        assert_eq!(frame.imei.as_ref(), b"864507032228727");
        assert_eq!(frame.command.kind(), CommandType::EventReport);
        assert_eq!(
            frame.command.event_code(),
            Some(EventCode::TrackByTimeInterval)
        );
        assert_eq!(
            frame.command.field_bytes("latitude").unwrap().as_ref(),
            b"24.819116"
        );
        assert_eq!(
            frame.command.field_bytes("longitude").unwrap().as_ref(),
            b"121.026091"
        );
        assert_eq!(
            frame
                .command
                .date_time()
                .unwrap()
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string(),
            "2018-03-23T02:36:15Z"
        );
        frame.verify_checksum().unwrap();
    }

    #[test]
    fn round_trip() {
        let encoded = heartbeat_frame().encode();
        let parsed = Frame::parse(encoded.clone()).unwrap();
        assert_eq!(parsed.direction, Direction::ServerToClient);
        assert_eq!(parsed.identifier, b'l');
        assert_eq!(parsed.imei.as_ref(), b"0407");
        assert_eq!(parsed.command.to_bytes().as_ref(), b"A11,0");
        assert_eq!(parsed.encode(), encoded);
    }

    #[test]
    fn declared_length_matches_emitted_range() {
        let encoded = heartbeat_frame().encode();
        let first_comma = encoded.iter().position(|b| *b == b',').unwrap();
        let declared: usize = std::str::from_utf8(&encoded[3..first_comma])
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(declared, encoded.len() - first_comma);
    }

    #[test]
    fn checksum_law() {
        let encoded = heartbeat_frame().encode();
        let star = encoded.len() - 4;
        let sum = additive_sum(&encoded[..star]);
        assert_eq!(
            format!("{sum:02X}").as_bytes(),
            &encoded[star..star + 2]
        );
    }

    #[test]
    fn placeholder_checksum_is_accepted() {
        let frame = Frame::parse(Bytes::from_static(b"$$A28,353358017784062,A11,OK*XX\r\n"))
            .unwrap();
        frame.verify_checksum().unwrap();
    }

    #[test]
    fn wrong_checksum_is_lenient_on_stream_strict_on_demand() {
        let outcome = consume(
            Bytes::from_static(b"$$S28,353358017784062,A11,OK*00\r\n"),
            Direction::ClientToServer,
        )
        .unwrap();
        assert_eq!(outcome.frames.len(), 1);
        assert!(matches!(
            outcome.frames[0].verify_checksum(),
            Err(GprsError::Checksum { .. })
        ));
    }

    #[test]
    fn stream_yields_complete_frames_and_returns_partial_tail() {
        let mut buf = Vec::new();
        buf.extend_from_slice(LOCATION_EVENT);
        buf.extend_from_slice(LOCATION_EVENT);
        // half of a third frame
        buf.extend_from_slice(&LOCATION_EVENT[..40]);

        let outcome = consume(Bytes::from(buf), Direction::ClientToServer).unwrap();
        assert_eq!(outcome.frames.len(), 2);
        assert!(outcome.preamble.is_empty());
        assert_eq!(outcome.leftover.as_ref(), &LOCATION_EVENT[..40]);
    }

    #[test]
    fn bytes_before_the_first_prefix_become_preamble() {
        let mut buf = Vec::from(&b"garbage"[..]);
        buf.extend_from_slice(LOCATION_EVENT);
        let outcome = consume(Bytes::from(buf), Direction::ClientToServer).unwrap();
        assert_eq!(outcome.preamble.as_ref(), b"garbage");
        assert_eq!(outcome.frames.len(), 1);
        assert!(outcome.leftover.is_empty());
    }

    #[test]
    fn oversize_length_is_rejected() {
        let err = consume(
            Bytes::from_static(b"$$A5000,864507032228727,AAA"),
            Direction::ClientToServer,
        )
        .unwrap_err();
        assert!(matches!(err, GprsError::OverSize(5000)));
    }

    #[test]
    fn non_numeric_length_is_a_framing_error() {
        let err = consume(
            Bytes::from_static(b"$$Axx,864507032228727,A11,OK*FE\r\n"),
            Direction::ClientToServer,
        )
        .unwrap_err();
        assert!(matches!(err, GprsError::Framing(_)));
    }

    #[test]
    fn missing_crlf_at_declared_end_is_a_framing_error() {
        // Same frame, declared length shortened so it no longer lands on CR LF.
        let err = consume(
            Bytes::from_static(b"$$S26,353358017784062,A11,OK*FE\r\n"),
            Direction::ClientToServer,
        )
        .unwrap_err();
        assert!(matches!(err, GprsError::Framing(_)));
    }

    #[test]
    fn binary_payload_frames_survive_the_stream_path() {
        // A D00 chunk whose bytes contain commas, a star, and CR LF.
        let chunk = b"\xff\xd8,\x00*\r\n\x01";
        let command = Command::decode(
            Direction::ClientToServer,
            Bytes::from(
                [b"D00,photo.jpg,2,0,".as_slice(), chunk.as_slice()].concat(),
            ),
        )
        .unwrap();
        let frame = Frame::new(Direction::ClientToServer, b'A', "0407", command);
        let mut buf = frame.encode().to_vec();
        buf.extend_from_slice(b"$$");

        let outcome = consume(Bytes::from(buf), Direction::ClientToServer).unwrap();
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.leftover.as_ref(), b"$$");
        let data = outcome.frames[0].command.file_data().unwrap();
        assert_eq!(data.file_bytes.as_ref(), chunk);
    }

    #[test]
    fn identifier_cycling() {
        assert_eq!(cycled_identifier(0), b'A');
        assert_eq!(cycled_identifier(25), b'Z');
        assert_eq!(cycled_identifier(57), b'z');
        assert_eq!(cycled_identifier(58), b'A');

        let frames = vec![heartbeat_frame(), heartbeat_frame()];
        let encoded = encode_batch(&frames, 0);
        assert_eq!(encoded[0][2], b'A');
        assert_eq!(encoded[1][2], b'B');
    }
}
