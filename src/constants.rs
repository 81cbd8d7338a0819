// Protocol constants for the Meitrack GPRS framing

/// Prefix on frames travelling from the headend to a device.
pub const SERVER_TO_CLIENT_PREFIX: &[u8; 2] = b"@@";

/// Prefix on frames travelling from a device to the headend.
pub const CLIENT_TO_SERVER_PREFIX: &[u8; 2] = b"$$";

/// Every frame ends with CR LF.
pub const END_OF_MESSAGE: &[u8; 2] = b"\r\n";

/// Largest declared length the protocol allows (decimal field after the
/// data identifier).
pub const MAX_DATA_LENGTH: usize = 2048;

/// Placeholder checksum carried by frames that have not been signed yet.
pub const PLACEHOLDER_CHECKSUM: &[u8; 2] = b"XX";

/// Command types are always three ASCII bytes.
pub const COMMAND_TYPE_LEN: usize = 3;

/// Bytes that trail the payload: `*`, two checksum digits, CR LF.
pub const FRAME_TRAILER_LEN: usize = 5;

/// Default seconds before an outstanding OTA request is timed out.
pub const OTA_TIMEOUT_SECS: u64 = 30;

/// The data identifier cycles through the 58-character ASCII window
/// starting at `A` (covering A..Z, punctuation, a..z).
pub const IDENTIFIER_WINDOW: u64 = 58;

/// First identifier in the cycling window.
pub const IDENTIFIER_BASE: u8 = b'A';
