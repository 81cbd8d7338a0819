pub mod builder;
pub mod command;
pub mod constants;
pub mod download;
pub mod error;
pub mod event;
pub mod frame;
pub mod listing;
pub mod location;
pub mod ota;

// Re-export commonly used types
pub use command::{Command, CommandType, Direction, FieldValue, FileData, FileListPacket};
pub use download::{FileDownload, FileDownloadAggregator};
pub use error::{GprsError, OtaError};
pub use event::{DeviceModel, EventCode};
pub use frame::{Frame, StreamOutcome, consume, consume_with_limit, cycled_identifier};
pub use listing::FileListing;
pub use location::{BaseStationInfo, TaxiMeterData};
pub use ota::{FirmwareUpdate, UpdateConfig, UpdateStage, UpdateState};
