//! Typed command layer sitting inside the frame envelope.
//!
//! Every frame payload starts with a three-byte ASCII command type
//! followed by comma-separated fields. Known types carry an ordered field
//! schema per direction; anything else is preserved as an untyped payload.

use crate::constants::COMMAND_TYPE_LEN;
use crate::error::GprsError;
use crate::location;
use bytes::{Bytes, BytesMut};
use chrono::NaiveDateTime;
use std::borrow::Cow;
use std::fmt;
use strum_macros::Display;
use tracing::{trace, warn};

/// Frame direction as determined by the two-byte prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Direction {
    /// `@@`, headend to device.
    ServerToClient,
    /// `$$`, device to headend.
    ClientToServer,
}

impl Direction {
    pub fn prefix(&self) -> &'static [u8; 2] {
        match self {
            Direction::ServerToClient => crate::constants::SERVER_TO_CLIENT_PREFIX,
            Direction::ClientToServer => crate::constants::CLIENT_TO_SERVER_PREFIX,
        }
    }

    pub fn from_prefix(prefix: &[u8]) -> Result<Direction, GprsError> {
        if prefix == crate::constants::SERVER_TO_CLIENT_PREFIX {
            Ok(Direction::ServerToClient)
        } else if prefix == crate::constants::CLIENT_TO_SERVER_PREFIX {
            Ok(Direction::ClientToServer)
        } else {
            Err(GprsError::Framing(format!(
                "invalid direction prefix {:?}",
                String::from_utf8_lossy(prefix)
            )))
        }
    }
}

/// The modeled command types, with a fall-through for everything else.
///
/// The protocol has far more opcodes than the ones listed here; unmodeled
/// types still parse into an untyped [`Command`] carrying the raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// `A10` real-time location query.
    LocationQuery,
    /// `A11` heartbeat reporting interval.
    SetHeartbeat,
    /// `A12` tracking by time interval.
    TrackByTimeInterval,
    /// `A13` cornering report angle.
    SetCornering,
    /// `A14` tracking by distance.
    TrackByDistance,
    /// `AAA` automatic event report.
    EventReport,
    /// `C01` output pin control.
    OutputControl,
    /// `C91` peripheral I/O parameters.
    PeripheralParams,
    /// `D00` file chunk transfer.
    FileTransfer,
    /// `D01` file list.
    FileList,
    /// `D02` file deletion.
    DeleteFiles,
    /// `D03` take photo.
    TakePhoto,
    /// `E91` device firmware version and serial.
    DeviceInfo,
    /// `FC0` OTA authorization.
    OtaAuth,
    /// `FC1` OTA data chunk.
    OtaData,
    /// `FC2` OTA checksum check.
    OtaChecksum,
    /// `FC3` OTA start update.
    OtaStart,
    /// `FC4` OTA cancel.
    OtaCancel,
    /// `FC5` OTA device code check.
    OtaDeviceCode,
    /// `FC6` OTA firmware file-name check.
    OtaFileCheck,
    /// `FC7` OTA server address.
    OtaServer,
    /// Any other three-byte code.
    Other([u8; 3]),
}

impl CommandType {
    pub fn from_code(code: [u8; 3]) -> CommandType {
        match &code {
            b"A10" => CommandType::LocationQuery,
            b"A11" => CommandType::SetHeartbeat,
            b"A12" => CommandType::TrackByTimeInterval,
            b"A13" => CommandType::SetCornering,
            b"A14" => CommandType::TrackByDistance,
            b"AAA" => CommandType::EventReport,
            b"C01" => CommandType::OutputControl,
            b"C91" => CommandType::PeripheralParams,
            b"D00" => CommandType::FileTransfer,
            b"D01" => CommandType::FileList,
            b"D02" => CommandType::DeleteFiles,
            b"D03" => CommandType::TakePhoto,
            b"E91" => CommandType::DeviceInfo,
            b"FC0" => CommandType::OtaAuth,
            b"FC1" => CommandType::OtaData,
            b"FC2" => CommandType::OtaChecksum,
            b"FC3" => CommandType::OtaStart,
            b"FC4" => CommandType::OtaCancel,
            b"FC5" => CommandType::OtaDeviceCode,
            b"FC6" => CommandType::OtaFileCheck,
            b"FC7" => CommandType::OtaServer,
            _ => CommandType::Other(code),
        }
    }

    /// Read the command type from the first three payload bytes. Short
    /// payloads are padded with spaces so the original bytes survive.
    pub fn from_payload(payload: &[u8]) -> CommandType {
        let mut code = [b' '; COMMAND_TYPE_LEN];
        for (slot, byte) in code.iter_mut().zip(payload.iter()) {
            *slot = *byte;
        }
        CommandType::from_code(code)
    }

    pub fn as_code(&self) -> [u8; 3] {
        match self {
            CommandType::LocationQuery => *b"A10",
            CommandType::SetHeartbeat => *b"A11",
            CommandType::TrackByTimeInterval => *b"A12",
            CommandType::SetCornering => *b"A13",
            CommandType::TrackByDistance => *b"A14",
            CommandType::EventReport => *b"AAA",
            CommandType::OutputControl => *b"C01",
            CommandType::PeripheralParams => *b"C91",
            CommandType::FileTransfer => *b"D00",
            CommandType::FileList => *b"D01",
            CommandType::DeleteFiles => *b"D02",
            CommandType::TakePhoto => *b"D03",
            CommandType::DeviceInfo => *b"E91",
            CommandType::OtaAuth => *b"FC0",
            CommandType::OtaData => *b"FC1",
            CommandType::OtaChecksum => *b"FC2",
            CommandType::OtaStart => *b"FC3",
            CommandType::OtaCancel => *b"FC4",
            CommandType::OtaDeviceCode => *b"FC5",
            CommandType::OtaFileCheck => *b"FC6",
            CommandType::OtaServer => *b"FC7",
            CommandType::Other(code) => *code,
        }
    }

    pub fn is_modeled(&self) -> bool {
        !matches!(self, CommandType::Other(_))
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.as_code()))
    }
}

/// Ordered field layout for one `(direction, command type)` pair.
///
/// `binary_tail` marks layouts whose final field may itself contain
/// commas (raw file bytes, OTA chunks); those are split with a bound so
/// the tail is taken verbatim.
#[derive(Debug)]
pub(crate) struct Schema {
    pub fields: &'static [&'static str],
    pub binary_tail: bool,
}

macro_rules! schema {
    ($($name:literal),+ $(,)?) => {
        Schema { fields: &[$($name),+], binary_tail: false }
    };
    (binary: $($name:literal),+ $(,)?) => {
        Schema { fields: &[$($name),+], binary_tail: true }
    };
}
pub(crate) use schema;

static HEARTBEAT_REQUEST: Schema = schema!["command", "interval"];
static HEARTBEAT_RESPONSE: Schema = schema!["command", "response"];
static TIME_INTERVAL_REQUEST: Schema = schema!["command", "interval"];
static CORNERING_REQUEST: Schema = schema!["command", "angle"];
static DISTANCE_REQUEST: Schema = schema!["command", "meters"];
static LOCATION_QUERY_REQUEST: Schema = schema!["command"];
static OUTPUT_CONTROL_REQUEST: Schema = schema!["command", "speed", "output_bitmap"];
static PERIPHERAL_REQUEST: Schema =
    schema!["command", "model", "device1", "device2", "device3", "device4", "device5"];
static FILE_TRANSFER_REQUEST: Schema = schema!["command", "file_name", "data_packet_start_number"];
static FILE_TRANSFER_RESPONSE: Schema = schema![
    binary: "command",
    "file_name",
    "number_of_data_packets",
    "data_packet_number",
    "file_bytes",
];
static FILE_LIST_REQUEST: Schema = schema!["command", "data_packet_start_number"];
static FILE_LIST_RESPONSE: Schema =
    schema!["command", "number_of_data_packets", "data_packet_number", "file_list"];
static DELETE_FILES_REQUEST: Schema = schema![binary: "command", "file_list"];
static TAKE_PHOTO_REQUEST: Schema = schema!["command", "camera_number", "file_name"];
static DEVICE_INFO_REQUEST: Schema = schema!["command"];
static DEVICE_INFO_RESPONSE: Schema = schema!["command", "firmware_version", "serial_number"];
static OTA_AUTH_REQUEST: Schema = schema!["command", "action"];
static OTA_AUTH_RESPONSE: Schema = schema![
    "command",
    "device_code",
    "response",
    "packet_size",
    "current_firmware",
    "ota_file_name",
];
static OTA_DATA_REQUEST: Schema = schema![binary: "command", "payload"];
static OTA_DATA_RESPONSE: Schema = schema!["command", "response"];
static OTA_CHECKSUM_REQUEST: Schema = schema![binary: "command", "index_length"];
static OTA_CHECKSUM_RESPONSE: Schema = schema!["command", "ota_checksum"];
static OTA_BARE_REQUEST: Schema = schema!["command"];
static OTA_RESPONSE: Schema = schema!["command", "response"];
static OTA_DEVICE_CODE_RESPONSE: Schema = schema![binary: "command", "device_code"];
static OTA_FILE_CHECK_REQUEST: Schema = schema!["command", "file_name"];
static OTA_SERVER_REQUEST: Schema = schema!["command", "ip_address", "port"];

fn schema_for(direction: Direction, kind: CommandType) -> Option<&'static Schema> {
    use CommandType::*;
    let schema = match (kind, direction) {
        (LocationQuery, Direction::ServerToClient) => &LOCATION_QUERY_REQUEST,
        (SetHeartbeat, Direction::ServerToClient) => &HEARTBEAT_REQUEST,
        (SetHeartbeat, Direction::ClientToServer) => &HEARTBEAT_RESPONSE,
        (TrackByTimeInterval, Direction::ServerToClient) => &TIME_INTERVAL_REQUEST,
        (TrackByTimeInterval, Direction::ClientToServer) => &HEARTBEAT_RESPONSE,
        (SetCornering, Direction::ServerToClient) => &CORNERING_REQUEST,
        (SetCornering, Direction::ClientToServer) => &HEARTBEAT_RESPONSE,
        (TrackByDistance, Direction::ServerToClient) => &DISTANCE_REQUEST,
        (TrackByDistance, Direction::ClientToServer) => &HEARTBEAT_RESPONSE,
        (OutputControl, Direction::ServerToClient) => &OUTPUT_CONTROL_REQUEST,
        (OutputControl, Direction::ClientToServer) => &HEARTBEAT_RESPONSE,
        (PeripheralParams, Direction::ServerToClient) => &PERIPHERAL_REQUEST,
        (PeripheralParams, Direction::ClientToServer) => &HEARTBEAT_RESPONSE,
        (FileTransfer, Direction::ServerToClient) => &FILE_TRANSFER_REQUEST,
        (FileTransfer, Direction::ClientToServer) => &FILE_TRANSFER_RESPONSE,
        (FileList, Direction::ServerToClient) => &FILE_LIST_REQUEST,
        (FileList, Direction::ClientToServer) => &FILE_LIST_RESPONSE,
        (DeleteFiles, Direction::ServerToClient) => &DELETE_FILES_REQUEST,
        (DeleteFiles, Direction::ClientToServer) => &HEARTBEAT_RESPONSE,
        (TakePhoto, Direction::ServerToClient) => &TAKE_PHOTO_REQUEST,
        (TakePhoto, Direction::ClientToServer) => &HEARTBEAT_RESPONSE,
        (DeviceInfo, Direction::ServerToClient) => &DEVICE_INFO_REQUEST,
        (DeviceInfo, Direction::ClientToServer) => &DEVICE_INFO_RESPONSE,
        (OtaAuth, Direction::ServerToClient) => &OTA_AUTH_REQUEST,
        (OtaAuth, Direction::ClientToServer) => &OTA_AUTH_RESPONSE,
        (OtaData, Direction::ServerToClient) => &OTA_DATA_REQUEST,
        (OtaData, Direction::ClientToServer) => &OTA_DATA_RESPONSE,
        (OtaChecksum, Direction::ServerToClient) => &OTA_CHECKSUM_REQUEST,
        (OtaChecksum, Direction::ClientToServer) => &OTA_CHECKSUM_RESPONSE,
        (OtaStart, Direction::ServerToClient) => &OTA_BARE_REQUEST,
        (OtaStart, Direction::ClientToServer) => &OTA_RESPONSE,
        (OtaCancel, Direction::ServerToClient) => &OTA_BARE_REQUEST,
        (OtaCancel, Direction::ClientToServer) => &OTA_RESPONSE,
        (OtaDeviceCode, Direction::ServerToClient) => &OTA_BARE_REQUEST,
        (OtaDeviceCode, Direction::ClientToServer) => &OTA_DEVICE_CODE_RESPONSE,
        (OtaFileCheck, Direction::ServerToClient) => &OTA_FILE_CHECK_REQUEST,
        (OtaFileCheck, Direction::ClientToServer) => &OTA_RESPONSE,
        (OtaServer, Direction::ServerToClient) => &OTA_SERVER_REQUEST,
        (OtaServer, Direction::ClientToServer) => &OTA_RESPONSE,
        _ => return None,
    };
    Some(schema)
}

/// A single named field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bytes(Bytes),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            FieldValue::Bytes(bytes) => Some(bytes),
            FieldValue::DateTime(_) => None,
        }
    }

    /// Wire rendering of the value; datetimes come back as 12 digits.
    pub fn render(&self) -> Bytes {
        match self {
            FieldValue::Bytes(bytes) => bytes.clone(),
            FieldValue::DateTime(dt) => format_wire_datetime(dt),
        }
    }
}

/// One command: a type code plus its fields in schema order.
///
/// Unmodeled command types keep their raw payload and expose no named
/// fields. Trailing fields absent from the wire are simply not stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandType,
    direction: Direction,
    raw: Bytes,
    fields: Vec<(&'static str, FieldValue)>,
}

impl Command {
    /// Parse a full command payload (command token included), picking the
    /// schema from the direction and the leading type code.
    pub fn decode(direction: Direction, payload: Bytes) -> Result<Command, GprsError> {
        let kind = CommandType::from_payload(&payload);
        trace!(command = %kind, len = payload.len(), "decoding command payload");

        let schema = match kind {
            CommandType::EventReport => Some(location::layout_for_payload(&payload)?),
            _ => schema_for(direction, kind),
        };

        let Some(schema) = schema else {
            return Ok(Command::untyped_with_kind(kind, direction, payload));
        };

        let limit = schema.binary_tail.then_some(schema.fields.len());
        let values = split_fields(&payload, limit);
        if values.len() > schema.fields.len() {
            return Err(GprsError::FieldCount {
                expected: schema.fields.len(),
                actual: values.len(),
            });
        }

        let mut fields = Vec::with_capacity(values.len());
        for (name, value) in schema.fields.iter().zip(values) {
            let value = if *name == "date_time" {
                match parse_wire_datetime(&value) {
                    Some(dt) => FieldValue::DateTime(dt),
                    None => {
                        warn!(field = %String::from_utf8_lossy(&value), "unparseable date_time field");
                        FieldValue::Bytes(value)
                    }
                }
            } else {
                FieldValue::Bytes(value)
            };
            fields.push((*name, value));
        }

        Ok(Command {
            kind,
            direction,
            raw: payload,
            fields,
        })
    }

    /// Wrap a payload without applying any schema.
    pub fn untyped(direction: Direction, payload: Bytes) -> Command {
        let kind = CommandType::from_payload(&payload);
        Command::untyped_with_kind(kind, direction, payload)
    }

    fn untyped_with_kind(kind: CommandType, direction: Direction, payload: Bytes) -> Command {
        Command {
            kind,
            direction,
            raw: payload,
            fields: Vec::new(),
        }
    }

    pub fn kind(&self) -> CommandType {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The payload exactly as received or built.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The modeled command type, or `BadCommand` when the caller needs a
    /// typed variant and this is a fall-through payload.
    pub fn typed(&self) -> Result<CommandType, GprsError> {
        if self.kind.is_modeled() {
            Ok(self.kind)
        } else {
            Err(GprsError::BadCommand(self.kind.to_string()))
        }
    }

    /// Look up a field by schema name. Absent fields return `None`.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field_name, _)| *field_name == name)
            .map(|(_, value)| value)
    }

    /// Raw bytes of a field, `None` when absent or a parsed datetime.
    pub fn field_bytes(&self, name: &str) -> Option<&Bytes> {
        self.field(name).and_then(FieldValue::as_bytes)
    }

    /// The parsed `date_time` field, if the schema carries one.
    pub fn date_time(&self) -> Option<NaiveDateTime> {
        match self.field("date_time") {
            Some(FieldValue::DateTime(dt)) => Some(*dt),
            _ => None,
        }
    }

    /// Serialize the fields back to wire form. Untyped commands return
    /// their raw payload untouched.
    pub fn to_bytes(&self) -> Bytes {
        if self.fields.is_empty() {
            return self.raw.clone();
        }
        let mut out = BytesMut::new();
        for (index, (_, value)) in self.fields.iter().enumerate() {
            if index > 0 {
                out.extend_from_slice(b",");
            }
            out.extend_from_slice(&value.render());
        }
        out.freeze()
    }

    /// File chunk carried by a `D00` response.
    pub fn file_data(&self) -> Option<FileData> {
        Some(FileData {
            file_name: self.field_bytes("file_name")?.clone(),
            total_packets: ascii_u32(self.field_bytes("number_of_data_packets")?)?,
            packet_number: ascii_u32(self.field_bytes("data_packet_number")?)?,
            file_bytes: self.field_bytes("file_bytes")?.clone(),
        })
    }

    /// Listing fragment carried by a `D01` response.
    pub fn file_list(&self) -> Option<FileListPacket> {
        Some(FileListPacket {
            total_packets: ascii_u32(self.field_bytes("number_of_data_packets")?)?,
            packet_number: ascii_u32(self.field_bytes("data_packet_number")?)?,
            fragment: self.field_bytes("file_list")?.clone(),
        })
    }

    pub fn firmware_version(&self) -> Option<&Bytes> {
        self.field_bytes("firmware_version")
    }

    pub fn serial_number(&self) -> Option<&Bytes> {
        self.field_bytes("serial_number")
    }

    /// Capture time encoded in photo file names such as
    /// `180428115949_C1E11_N1U1D1.jpg`.
    pub fn file_timestamp(&self) -> Option<NaiveDateTime> {
        let name = self.field_bytes("file_name")?;
        let mut parts = name.split(|b| *b == b'_');
        let stamp = parts.next()?;
        if parts.count() != 2 {
            return None;
        }
        parse_wire_datetime(stamp)
    }

    /// Hex form of the raw device code in an `FC5` response.
    pub fn ota_device_code_hex(&self) -> Option<String> {
        if self.kind != CommandType::OtaDeviceCode || self.direction != Direction::ClientToServer {
            return None;
        }
        self.field_bytes("device_code").map(hex::encode)
    }

    /// Negotiated chunk size reported by an `FC0` response.
    pub fn ota_packet_size(&self) -> Option<usize> {
        let field = self.field_bytes("packet_size")?;
        std::str::from_utf8(field).ok()?.trim().parse().ok()
    }

    /// Whether a device response signals failure for its command type.
    pub fn is_response_error(&self) -> bool {
        if self.direction != Direction::ClientToServer {
            return false;
        }
        let response = |name: &str| self.field_bytes(name).map(Bytes::as_ref);
        match self.kind {
            CommandType::OtaServer => {
                matches!(response("response"), Some(b"Err") | Some(b"FFFF"))
            }
            CommandType::OtaAuth => matches!(response("response"), Some(b"Err")),
            CommandType::OtaData => matches!(response("response"), Some(b"NOT")),
            CommandType::OtaChecksum => matches!(response("ota_checksum"), Some(b"NOT")),
            CommandType::OtaStart => {
                matches!(response("response"), Some(b"2") | Some(b"3") | Some(b"NOT"))
            }
            CommandType::OtaFileCheck => {
                matches!(response("response"), Some(b"2") | Some(b"NOT"))
            }
            _ => false,
        }
    }

}

/// File chunk decoded from a `D00` response.
#[derive(Debug, Clone, PartialEq)]
pub struct FileData {
    pub file_name: Bytes,
    pub total_packets: u32,
    pub packet_number: u32,
    pub file_bytes: Bytes,
}

/// One packet of a multi-frame `D01` listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FileListPacket {
    pub total_packets: u32,
    pub packet_number: u32,
    pub fragment: Bytes,
}

/// Conversion into a wire field. Accepts text, integers, or raw bytes so
/// callers can hand over whatever form they hold.
pub trait IntoField {
    fn into_field(self) -> Bytes;
}

impl IntoField for Bytes {
    fn into_field(self) -> Bytes {
        self
    }
}

impl IntoField for Vec<u8> {
    fn into_field(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoField for &[u8] {
    fn into_field(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoField for &[u8; N] {
    fn into_field(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoField for &str {
    fn into_field(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoField for String {
    fn into_field(self) -> Bytes {
        Bytes::from(self.into_bytes())
    }
}

macro_rules! int_into_field {
    ($($ty:ty),+) => {
        $(impl IntoField for $ty {
            fn into_field(self) -> Bytes {
                Bytes::from(self.to_string().into_bytes())
            }
        })+
    };
}

int_into_field!(u8, u16, u32, u64, usize, i16, i32, i64);

/// Text view of a wire field; invalid UTF-8 is replaced, never dropped.
pub fn field_text(field: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(field)
}

pub(crate) fn ascii_u32(field: &[u8]) -> Option<u32> {
    std::str::from_utf8(field).ok()?.trim().parse().ok()
}

/// Split a payload on commas, keeping the final field whole when `limit`
/// bounds the field count (binary tails).
pub(crate) fn split_fields(payload: &Bytes, limit: Option<usize>) -> Vec<Bytes> {
    let mut fields = Vec::new();
    let mut offset = 0usize;
    loop {
        if let Some(max) = limit {
            if fields.len() + 1 == max {
                fields.push(payload.slice(offset..));
                return fields;
            }
        }
        match payload[offset..].iter().position(|b| *b == b',') {
            Some(pos) => {
                fields.push(payload.slice(offset..offset + pos));
                offset += pos + 1;
            }
            None => {
                fields.push(payload.slice(offset..));
                return fields;
            }
        }
    }
}

/// Parse the fixed 12-digit `yyMMddHHmmss` UTC form.
pub(crate) fn parse_wire_datetime(field: &[u8]) -> Option<NaiveDateTime> {
    let text = std::str::from_utf8(field).ok()?;
    NaiveDateTime::parse_from_str(text, "%y%m%d%H%M%S").ok()
}

pub(crate) fn format_wire_datetime(dt: &NaiveDateTime) -> Bytes {
    Bytes::from(dt.format("%y%m%d%H%M%S").to_string().into_bytes())
}
