//! Over-the-air firmware update driver (`FC0`–`FC7`).
//!
//! The driver owns an ordered queue of request/response exchanges and is
//! pumped from the caller's event loop: [`FirmwareUpdate::next`] hands
//! out at most one outstanding request at a time, and
//! [`FirmwareUpdate::accept`] matches device responses back onto the
//! queue. Nothing in here blocks; all waiting happens outside.
//!
//! Stage 1 negotiates identity and the OTA server (`FC5`, `FC6`, `FC7`,
//! `FC0`). The device then drops the connection, reconnects, and
//! re-issues `FC0`; stage 2 learns the chunk size from that response,
//! streams the `FC1` chunk burst, verifies the file checksum (`FC2`) and
//! starts the update (`FC3`). Any error is escalated to a best-effort
//! `FC4` cancel.

use crate::command::{Command, CommandType, Direction, IntoField};
use crate::constants::OTA_TIMEOUT_SECS;
use crate::error::OtaError;
use crate::frame::Frame;
use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tracing::{debug, error, info, warn};
use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Wire header of one `FC1` chunk: start offset and chunk length,
/// both big-endian, immediately followed by the chunk bytes.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    pub offset: U32,
    pub length: U16,
}

/// Size of the `FC1` chunk header on the wire.
pub const CHUNK_HEADER_SIZE: usize = 6;

/// Which half of the exchange a driver instance is working through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    First,
    Second,
}

/// Progress of one update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UpdateState {
    Idle,
    Stage1Running,
    Stage1Complete,
    WaitReconnect,
    Stage2Running,
    Uploading,
    Verifying,
    Activating,
    Finished { error: bool },
}

/// Tunables for the exchange scheduler.
#[derive(Debug, Clone, Copy)]
pub struct UpdateConfig {
    /// How long a request may stay unanswered.
    pub timeout: Duration,
    /// How often a timed-out request is re-queued before the timeout
    /// escalates to an error.
    pub retry_limit: u32,
}

impl Default for UpdateConfig {
    fn default() -> UpdateConfig {
        UpdateConfig {
            timeout: Duration::from_secs(OTA_TIMEOUT_SECS),
            retry_limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ResponseSlot {
    Pending,
    Received(Box<Frame>),
    TimedOut,
    /// Fire-and-forget: `FC1` chunks are bursted without waiting.
    Unneeded,
}

#[derive(Debug)]
struct Exchange {
    request: Frame,
    response: ResponseSlot,
    sent_at: Option<Instant>,
    retries_left: u32,
}

impl Exchange {
    fn kind(&self) -> CommandType {
        self.request.command.kind()
    }

    fn is_pending(&self) -> bool {
        matches!(self.response, ResponseSlot::Pending)
    }
}

/// One firmware update session for one device.
///
/// The session spans both TCP connections of an update: drive stage 1 to
/// [`UpdateState::WaitReconnect`], then call
/// [`FirmwareUpdate::reconnected`] when the device comes back and keep
/// pumping. Hosts that prefer one driver per connection can start
/// directly at stage 2 with [`FirmwareUpdate::stage2`].
#[derive(Debug)]
pub struct FirmwareUpdate {
    imei: Bytes,
    device_code: Bytes,
    ip_address: Bytes,
    port: Bytes,
    file_name: Bytes,
    file_bytes: Bytes,
    chunk_size: Option<usize>,
    messages: Vec<Exchange>,
    current: Option<usize>,
    stage: UpdateStage,
    state: UpdateState,
    config: UpdateConfig,
    error: bool,
    last_error: Option<OtaError>,
}

impl FirmwareUpdate {
    /// Start a stage-1 session with the default scheduler config.
    pub fn new(
        imei: impl IntoField,
        device_code: impl IntoField,
        ip_address: impl IntoField,
        port: impl IntoField,
        file_name: impl IntoField,
        file_bytes: impl IntoField,
    ) -> FirmwareUpdate {
        FirmwareUpdate::with_config(
            imei,
            device_code,
            ip_address,
            port,
            file_name,
            file_bytes,
            UpdateConfig::default(),
        )
    }

    pub fn with_config(
        imei: impl IntoField,
        device_code: impl IntoField,
        ip_address: impl IntoField,
        port: impl IntoField,
        file_name: impl IntoField,
        file_bytes: impl IntoField,
        config: UpdateConfig,
    ) -> FirmwareUpdate {
        let mut update = FirmwareUpdate {
            imei: imei.into_field(),
            device_code: device_code.into_field(),
            ip_address: ip_address.into_field(),
            port: port.into_field(),
            file_name: file_name.into_field(),
            file_bytes: file_bytes.into_field(),
            chunk_size: None,
            messages: Vec::new(),
            current: None,
            stage: UpdateStage::First,
            state: UpdateState::Idle,
            config,
            error: false,
            last_error: None,
        };
        update.queue_request(update.fc5_payload());
        update.queue_request(update.fc6_payload());
        update.queue_request(update.fc7_payload());
        update.queue_request(update.fc0_payload());
        update
    }

    /// Start directly at stage 2: the `FC0` the device re-issues on
    /// reconnect is treated as already outstanding.
    pub fn stage2(
        imei: impl IntoField,
        device_code: impl IntoField,
        ip_address: impl IntoField,
        port: impl IntoField,
        file_name: impl IntoField,
        file_bytes: impl IntoField,
        config: UpdateConfig,
    ) -> FirmwareUpdate {
        let mut update = FirmwareUpdate::with_config(
            imei,
            device_code,
            ip_address,
            port,
            file_name,
            file_bytes,
            config,
        );
        update.reconnected();
        update
    }

    /// The device reconnected after a successful stage 1; arm the
    /// stage-2 queue.
    pub fn reconnected(&mut self) {
        self.messages.clear();
        let payload = self.fc0_payload();
        self.queue_request(payload);
        self.messages[0].sent_at = Some(Instant::now());
        self.current = Some(0);
        self.stage = UpdateStage::Second;
        self.state = UpdateState::Stage2Running;
        debug!(imei = %String::from_utf8_lossy(&self.imei), "armed stage-2 queue");
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn stage(&self) -> UpdateStage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, UpdateState::Finished { .. })
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Stage 1 done; the device is expected to drop and reconnect.
    pub fn awaiting_reconnect(&self) -> bool {
        matches!(
            self.state,
            UpdateState::Stage1Complete | UpdateState::WaitReconnect
        )
    }

    /// Chunk size negotiated through `FC0`, once known.
    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    pub fn last_error(&self) -> Option<&OtaError> {
        self.last_error.as_ref()
    }

    /// The next request to put on the wire, if the scheduler allows one.
    ///
    /// At most one exchange is outstanding at a time; `FC1` chunks are
    /// the exception and burst without waiting for acks. Returns the
    /// cancel frame once after an error.
    pub fn next(&mut self) -> Option<Frame> {
        self.next_at(Instant::now())
    }

    /// [`FirmwareUpdate::next`] against an explicit clock.
    pub fn next_at(&mut self, now: Instant) -> Option<Frame> {
        self.sweep_timeouts(now);

        if self.is_finished() {
            return None;
        }
        if self.error {
            self.state = UpdateState::Finished { error: true };
            info!(imei = %String::from_utf8_lossy(&self.imei), "cancelling update");
            return Some(self.build_frame(self.fc4_payload()));
        }
        if self.state == UpdateState::Stage1Complete {
            self.state = UpdateState::WaitReconnect;
            return None;
        }
        if self.current.is_some() {
            return None;
        }

        let index = self
            .messages
            .iter()
            .position(|message| message.sent_at.is_none() && message.is_pending())?;
        self.messages[index].sent_at = Some(now);
        let kind = self.messages[index].kind();
        if kind == CommandType::OtaData {
            self.messages[index].response = ResponseSlot::Unneeded;
        } else {
            self.current = Some(index);
        }
        self.advance_on_send(kind);
        debug!(command = %kind, "dispatching OTA request");
        Some(self.messages[index].request.clone())
    }

    /// Match a device response onto the oldest outstanding exchange of
    /// the same command type. Errors are recorded internally and move
    /// the session towards `Finished { error: true }`.
    pub fn accept(&mut self, frame: &Frame) {
        let kind = frame.command.kind();
        let Some(index) = self.messages.iter().position(|message| {
            message.sent_at.is_some() && message.is_pending() && message.kind() == kind
        }) else {
            warn!(command = %kind, "response does not match an outstanding request");
            return;
        };

        self.messages[index].response = ResponseSlot::Received(Box::new(frame.clone()));
        if self.current == Some(index) {
            self.current = None;
        }

        if frame.command.is_response_error() {
            let response = frame
                .command
                .field_bytes("response")
                .or_else(|| frame.command.field_bytes("ota_checksum"))
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            self.fail(OtaError::Nack {
                command: kind.to_string(),
                response,
            });
        } else {
            match kind {
                CommandType::OtaDeviceCode => self.check_device_code(frame),
                CommandType::OtaAuth => self.on_auth_response(frame),
                CommandType::OtaChecksum => self.verify_checksum(frame),
                _ => {}
            }
        }

        self.check_complete();
    }

    /// Abort the session now, returning the best-effort `FC4` frame.
    pub fn cancel(&mut self) -> Frame {
        self.error = true;
        self.state = UpdateState::Finished { error: true };
        info!(imei = %String::from_utf8_lossy(&self.imei), "update cancelled");
        self.build_frame(self.fc4_payload())
    }

    /// Time out overdue exchanges. Exchanges with retries left go back
    /// on the queue; otherwise the timeout escalates.
    pub fn sweep_timeouts(&mut self, now: Instant) {
        for index in 0..self.messages.len() {
            let message = &self.messages[index];
            let Some(sent_at) = message.sent_at else {
                continue;
            };
            if !message.is_pending() || now.duration_since(sent_at) < self.config.timeout {
                continue;
            }
            let kind = self.messages[index].kind();
            if self.current == Some(index) {
                self.current = None;
            }
            if self.messages[index].retries_left > 0 {
                self.messages[index].retries_left -= 1;
                self.messages[index].sent_at = None;
                warn!(command = %kind, "request timed out, re-queueing");
            } else {
                self.messages[index].response = ResponseSlot::TimedOut;
                error!(command = %kind, "request timed out");
                self.fail(OtaError::Timeout {
                    command: kind.to_string(),
                    seconds: self.config.timeout.as_secs(),
                });
            }
        }
    }

    fn fail(&mut self, err: OtaError) {
        error!(%err, "firmware update error");
        self.error = true;
        if self.last_error.is_none() {
            self.last_error = Some(err);
        }
    }

    fn advance_on_send(&mut self, kind: CommandType) {
        self.state = match kind {
            CommandType::OtaData => UpdateState::Uploading,
            CommandType::OtaChecksum => UpdateState::Verifying,
            CommandType::OtaStart => UpdateState::Activating,
            _ => match self.state {
                UpdateState::Idle => UpdateState::Stage1Running,
                state => state,
            },
        };
    }

    fn check_complete(&mut self) {
        if self.error || self.messages.iter().any(Exchange::is_pending) {
            return;
        }
        match self.stage {
            UpdateStage::First => {
                self.state = UpdateState::Stage1Complete;
                debug!("stage 1 complete, waiting for the device to reconnect");
            }
            UpdateStage::Second => {
                self.state = UpdateState::Finished { error: false };
                info!(
                    imei = %String::from_utf8_lossy(&self.imei),
                    file = %String::from_utf8_lossy(&self.file_name),
                    "firmware update finished"
                );
            }
        }
    }

    fn check_device_code(&mut self, frame: &Frame) {
        let reported = frame.command.ota_device_code_hex().unwrap_or_default();
        let expected = String::from_utf8_lossy(&self.device_code).to_lowercase();
        if reported != expected {
            self.fail(OtaError::DeviceCodeMismatch {
                expected,
                actual: reported,
            });
        }
    }

    fn on_auth_response(&mut self, frame: &Frame) {
        let Some(chunk_size) = frame.command.ota_packet_size().filter(|size| *size > 0) else {
            self.fail(OtaError::Nack {
                command: CommandType::OtaAuth.to_string(),
                response: "missing packet size".into(),
            });
            return;
        };
        self.chunk_size = Some(chunk_size);

        if self.stage != UpdateStage::Second {
            return;
        }

        let reported = frame.command.field_bytes("ota_file_name");
        if reported.map(Bytes::as_ref) != Some(self.file_name.as_ref()) {
            self.fail(OtaError::FileNameMismatch {
                expected: String::from_utf8_lossy(&self.file_name).into_owned(),
                actual: reported
                    .map(|name| String::from_utf8_lossy(name).into_owned())
                    .unwrap_or_default(),
            });
            return;
        }

        if self.file_bytes.is_empty() {
            debug!("no file bytes, not queueing chunk requests");
            return;
        }

        let chunks: Vec<Vec<u8>> = self
            .file_bytes
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, chunk)| {
                let header = ChunkHeader {
                    offset: U32::new((index * chunk_size) as u32),
                    length: U16::new(chunk.len() as u16),
                };
                let mut payload = Vec::with_capacity(4 + CHUNK_HEADER_SIZE + chunk.len());
                payload.extend_from_slice(b"FC1,");
                payload.extend_from_slice(header.as_bytes());
                payload.extend_from_slice(chunk);
                payload
            })
            .collect();
        info!(chunks = chunks.len(), chunk_size, "queueing firmware chunks");
        for payload in chunks {
            self.queue_request(Bytes::from(payload));
        }
        self.queue_request(self.fc2_payload());
    }

    fn verify_checksum(&mut self, frame: &Frame) {
        let reported = frame
            .command
            .field_bytes("ota_checksum")
            .and_then(|field| std::str::from_utf8(field).ok())
            .and_then(|text| u16::from_str_radix(text.trim(), 16).ok());
        let expected = additive_file_checksum(&self.file_bytes);
        match reported {
            Some(value) if value == expected => {
                debug!(checksum = format!("{expected:04X}"), "checksum verified");
                self.queue_request(self.fc3_payload());
            }
            _ => self.fail(OtaError::Nack {
                command: CommandType::OtaChecksum.to_string(),
                response: format!(
                    "checksum mismatch: expected {expected:04X}, device reported {:?}",
                    frame
                        .command
                        .field_bytes("ota_checksum")
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                ),
            }),
        }
    }

    fn queue_request(&mut self, payload: Bytes) {
        let frame = self.build_frame(payload);
        self.messages.push(Exchange {
            request: frame,
            response: ResponseSlot::Pending,
            sent_at: None,
            retries_left: self.config.retry_limit,
        });
    }

    fn build_frame(&self, payload: Bytes) -> Frame {
        Frame::new(
            Direction::ServerToClient,
            b'a',
            self.imei.clone(),
            Command::untyped(Direction::ServerToClient, payload),
        )
    }

    fn fc0_payload(&self) -> Bytes {
        Bytes::from_static(b"FC0,AUTH")
    }

    fn fc2_payload(&self) -> Bytes {
        let mut payload = BytesMut::from(&b"FC2,"[..]);
        payload.extend_from_slice(U32::new(0).as_bytes());
        payload.extend_from_slice(U32::new(self.file_bytes.len() as u32).as_bytes());
        payload.freeze()
    }

    fn fc3_payload(&self) -> Bytes {
        Bytes::from_static(b"FC3")
    }

    fn fc4_payload(&self) -> Bytes {
        Bytes::from_static(b"FC4")
    }

    fn fc5_payload(&self) -> Bytes {
        Bytes::from_static(b"FC5")
    }

    fn fc6_payload(&self) -> Bytes {
        let mut payload = BytesMut::from(&b"FC6,"[..]);
        payload.extend_from_slice(&self.file_name);
        payload.freeze()
    }

    fn fc7_payload(&self) -> Bytes {
        let mut payload = BytesMut::from(&b"FC7,"[..]);
        payload.extend_from_slice(&self.ip_address);
        payload.extend_from_slice(b",");
        payload.extend_from_slice(&self.port);
        payload.freeze()
    }
}

/// Additive byte-sum of the firmware image, low 16 bits; what the device
/// reports back through `FC2`.
pub fn additive_file_checksum(file_bytes: &[u8]) -> u16 {
    file_bytes
        .iter()
        .fold(0u32, |sum, byte| sum + u32::from(*byte)) as u16
}
