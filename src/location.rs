//! `AAA` automatic event reports.
//!
//! The report layout depends on the event code in the second field: the
//! temperature alarms (50/51) insert a sensor-number field, RFID (37) and
//! photo (39) replace the assisted-info field, and taxi-meter reports
//! (109) append a trailer. Everything else uses the default layout.

use crate::command::{Command, Schema, schema, split_fields};
use crate::error::GprsError;
use crate::event::EventCode;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

static DEFAULT_LAYOUT: Schema = schema![
    "command",
    "event_code",
    "latitude",
    "longitude",
    "date_time",
    "pos_status",
    "num_sats",
    "gsm_signal_strength",
    "speed",
    "direction",
    "horizontal_accuracy",
    "altitude",
    "mileage",
    "run_time",
    "base_station_info",
    "io_port_status",
    "analog_input_value",
    "assisted_event_info",
    "customized_data",
    "protocol_version",
    "fuel_percentage",
    "temp_sensors",
    "max_acceleration_value",
    "max_deceleration_value",
    "unknown_1",
    "unknown_2",
    "unknown_3",
    "unknown_4",
    "unknown_5",
];

// Temperature alarms carry the sensor number after the assisted info.
static TEMPERATURE_LAYOUT: Schema = schema![
    "command",
    "event_code",
    "latitude",
    "longitude",
    "date_time",
    "pos_status",
    "num_sats",
    "gsm_signal_strength",
    "speed",
    "direction",
    "horizontal_accuracy",
    "altitude",
    "mileage",
    "run_time",
    "base_station_info",
    "io_port_status",
    "analog_input_value",
    "assisted_event_info",
    "temperature_sensor_number",
    "customized_data",
    "protocol_version",
    "fuel_percentage",
    "temp_sensors",
    "max_acceleration_value",
    "max_deceleration_value",
    "unknown_1",
    "unknown_2",
    "unknown_3",
    "unknown_4",
    "unknown_5",
];

static RFID_LAYOUT: Schema = schema![
    "command",
    "event_code",
    "latitude",
    "longitude",
    "date_time",
    "pos_status",
    "num_sats",
    "gsm_signal_strength",
    "speed",
    "direction",
    "horizontal_accuracy",
    "altitude",
    "mileage",
    "run_time",
    "base_station_info",
    "io_port_status",
    "analog_input_value",
    "rfid",
    "customized_data",
    "protocol_version",
    "fuel_percentage",
    "temp_sensors",
    "max_acceleration_value",
    "max_deceleration_value",
    "unknown_1",
    "unknown_2",
    "unknown_3",
    "unknown_4",
    "unknown_5",
];

static PHOTO_LAYOUT: Schema = schema![
    "command",
    "event_code",
    "latitude",
    "longitude",
    "date_time",
    "pos_status",
    "num_sats",
    "gsm_signal_strength",
    "speed",
    "direction",
    "horizontal_accuracy",
    "altitude",
    "mileage",
    "run_time",
    "base_station_info",
    "io_port_status",
    "analog_input_value",
    "file_name",
    "customized_data",
    "protocol_version",
    "fuel_percentage",
    "temp_sensors",
    "max_acceleration_value",
    "max_deceleration_value",
    "unknown_1",
    "unknown_2",
    "unknown_3",
    "unknown_4",
    "unknown_5",
];

static TAXI_METER_LAYOUT: Schema = schema![
    "command",
    "event_code",
    "latitude",
    "longitude",
    "date_time",
    "pos_status",
    "num_sats",
    "gsm_signal_strength",
    "speed",
    "direction",
    "horizontal_accuracy",
    "altitude",
    "mileage",
    "run_time",
    "base_station_info",
    "io_port_status",
    "analog_input_value",
    "assisted_event_info",
    "customized_data",
    "protocol_version",
    "fuel_percentage",
    "temp_sensors",
    "max_acceleration_value",
    "max_deceleration_value",
    "unknown_1",
    "unknown_2",
    "unknown_3",
    "unknown_4",
    "taxi_meter_data",
];

/// Select the report layout from the event-code field of the payload.
pub(crate) fn layout_for_payload(payload: &Bytes) -> Result<&'static Schema, GprsError> {
    let fields = split_fields(payload, None);
    if fields.len() < 2 {
        return Err(GprsError::FieldCount {
            expected: 2,
            actual: fields.len(),
        });
    }
    Ok(match fields[1].as_ref() {
        b"50" | b"51" => &TEMPERATURE_LAYOUT,
        b"37" => &RFID_LAYOUT,
        b"39" => &PHOTO_LAYOUT,
        b"109" => &TAXI_METER_LAYOUT,
        _ => &DEFAULT_LAYOUT,
    })
}

/// Cell the device was camped on when the report was generated.
///
/// LAC and CI arrive as hex on the wire and are re-emitted as decimal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseStationInfo {
    pub mcc: String,
    pub mnc: String,
    pub lac: u32,
    pub ci: u32,
    pub gsm_signal_strength: Option<String>,
}

/// Trailer carried by taxi-meter reports (event 109), pipe-separated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxiMeterData {
    pub assisted_info: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub fare: Option<String>,
    pub trip_time: Option<String>,
    pub wait_time: Option<String>,
}

impl TaxiMeterData {
    pub fn parse(field: &[u8]) -> TaxiMeterData {
        let text = String::from_utf8_lossy(field);
        let fields: Vec<&str> = text.split('|').collect();
        let mut data = TaxiMeterData::default();
        if fields.len() >= 2 {
            data.assisted_info = Some(fields[0].to_string());
            data.start_time = Some(fields[1].to_string());
        }
        if fields.len() >= 7 {
            data.end_time = Some(fields[3].to_string());
            data.fare = Some(fields[4].to_string());
            data.trip_time = Some(fields[5].to_string());
            data.wait_time = Some(fields[6].to_string());
        }
        data
    }
}

impl Command {
    /// The event code of an `AAA` report.
    pub fn event_code(&self) -> Option<EventCode> {
        EventCode::from_field(self.field_bytes("event_code")?)
    }

    /// One analog input, 1-based. Wire values are hex hundredths.
    pub fn analog_input(&self, input_number: usize) -> Option<f64> {
        if input_number == 0 {
            return None;
        }
        let field = self.field_bytes("analog_input_value")?;
        let raw = field.split(|b| *b == b'|').nth(input_number - 1)?;
        let value = u32::from_str_radix(std::str::from_utf8(raw).ok()?, 16).ok()?;
        Some(f64::from(value) / 100.0)
    }

    /// Battery voltage is reported on analog input 4.
    pub fn battery_voltage(&self) -> Option<f64> {
        self.analog_input(4)
    }

    /// Battery charge as a percentage of the 4.2 V full-charge level.
    pub fn battery_level(&self) -> Option<u8> {
        let voltage = self.battery_voltage()?;
        let percent = (voltage / 4.2 * 100.0).clamp(0.0, 100.0);
        Some(percent as u8)
    }

    pub fn gsm_signal_strength(&self) -> Option<&Bytes> {
        self.field_bytes("gsm_signal_strength")
    }

    /// Decoded `MCC|MNC|LAC|CI` base-station field.
    pub fn base_station_info(&self) -> Option<BaseStationInfo> {
        let field = self.field_bytes("base_station_info")?;
        let parts: Vec<&[u8]> = field.split(|b| *b == b'|').collect();
        if parts.len() != 4 {
            return None;
        }
        let hex_u32 =
            |raw: &[u8]| u32::from_str_radix(std::str::from_utf8(raw).ok()?, 16).ok();
        Some(BaseStationInfo {
            mcc: String::from_utf8_lossy(parts[0]).into_owned(),
            mnc: String::from_utf8_lossy(parts[1]).into_owned(),
            lac: hex_u32(parts[2])?,
            ci: hex_u32(parts[3])?,
            gsm_signal_strength: self
                .gsm_signal_strength()
                .map(|s| String::from_utf8_lossy(s).into_owned()),
        })
    }

    /// Per-pin digital states from the `io_port_status` hex field.
    ///
    /// The hex bytes are little-endian by byte: the last wire byte holds
    /// pins 0..8, so `0001` means pin 0 is high. Pin `n` lives at
    /// `byte_index * 8 + bit`.
    pub fn io_port_states(&self) -> Option<Vec<bool>> {
        let field = self.field_bytes("io_port_status")?;
        let mut raw = hex::decode(field).ok()?;
        raw.reverse();
        let mut pins = Vec::with_capacity(raw.len() * 8);
        for byte in raw {
            for bit in 0..8 {
                pins.push(byte & (1 << bit) != 0);
            }
        }
        Some(pins)
    }

    /// State of a single digital pin, when the report carries it.
    pub fn io_pin(&self, pin: usize) -> Option<bool> {
        self.io_port_states()?.get(pin).copied()
    }

    /// Taxi-meter trailer of an event-109 report.
    pub fn taxi_meter_data(&self) -> Option<TaxiMeterData> {
        let field = self.field_bytes("taxi_meter_data")?;
        Some(TaxiMeterData::parse(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Direction;

    const REPORT: &[u8] = b"AAA,35,24.819116,121.026091,180323023615,A,7,16,0,176,1.3,83,7,\
1174,466|97|527B|01035DB4,0000,0001|0000|0000|019A|0981,00000001,,3,,,36,23";

    fn parse(payload: &'static [u8]) -> Command {
        Command::decode(Direction::ClientToServer, Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn default_layout_report() {
        let report = parse(REPORT);
        assert_eq!(report.event_code(), Some(EventCode::TrackByTimeInterval));
        assert_eq!(report.field_bytes("latitude").unwrap().as_ref(), b"24.819116");
        assert_eq!(
            report.field_bytes("longitude").unwrap().as_ref(),
            b"121.026091"
        );
        let dt = report.date_time().unwrap();
        assert_eq!(dt.format("%Y-%m-%dT%H:%M:%S").to_string(), "2018-03-23T02:36:15");
    }

    #[test]
    fn battery_accessors() {
        let report = parse(REPORT);
        // analog input 4 is 0x019A = 410 hundredths
        assert_eq!(report.battery_voltage(), Some(4.1));
        assert_eq!(report.battery_level(), Some(97));
        assert_eq!(report.analog_input(0), None);
    }

    #[test]
    fn base_station_decoding() {
        let report = parse(REPORT);
        let cell = report.base_station_info().unwrap();
        assert_eq!(cell.mcc, "466");
        assert_eq!(cell.mnc, "97");
        assert_eq!(cell.lac, 0x527B);
        assert_eq!(cell.ci, 0x0103_5DB4);
        assert_eq!(cell.gsm_signal_strength.as_deref(), Some("16"));
    }

    #[test]
    fn io_port_bitmap() {
        let report = parse(REPORT);
        // io_port_status is 0000: everything low
        assert_eq!(report.io_pin(0), Some(false));

        let engine_on = parse(
            b"AAA,35,24.819120,121.026041,180323061242,A,7,14,1,200,0.9,58,172,13212,\
466|97|527B|01035C49,0001,0001|0000|0000|019D|0983,00000001,,3,,,53,84",
        );
        assert_eq!(engine_on.io_pin(0), Some(true));
        assert_eq!(engine_on.io_pin(1), Some(false));
    }

    #[test]
    fn temperature_layout_shifts_fields() {
        let report = parse(
            b"AAA,50,24.819116,121.026091,180323023615,A,7,16,0,176,1.3,83,7,1174,\
466|97|527B|01035DB4,0000,0001|0000|0000|019A|0981,00000001,,,3,,,36,23",
        );
        assert_eq!(report.event_code(), Some(EventCode::TemperatureHigh));
        assert!(report.field("temperature_sensor_number").is_some());
    }

    #[test]
    fn photo_layout_carries_file_name() {
        let report = parse(
            b"AAA,39,-33.815786,151.200165,180427170921,A,9,12,0,15,0.8,71,5146,263808,\
505|2|7D07|041C15F3,0100,0000|0000|0000|018D|0505,180427100921_C1E1_N1U1D1.jpg,108,0000,3,0,\
0|0000|0000|0000|0000|0000",
        );
        assert_eq!(
            report.field_bytes("file_name").unwrap().as_ref(),
            b"180427100921_C1E1_N1U1D1.jpg".as_slice()
        );
    }

    #[test]
    fn rfid_layout_carries_tag() {
        let report = parse(
            b"AAA,37,-33.815805,151.200151,180701053440,A,4,10,0,208,19.1,68,29899,421883,\
505|3|00FA|04E381F5,0500,0000|0000|0000|018A|0576,sometag,,108,0000,,3,0,,\
0|0000|0000|0000|0000|0000",
        );
        assert_eq!(report.event_code(), Some(EventCode::Rfid));
        assert_eq!(report.field_bytes("rfid").unwrap().as_ref(), b"sometag");
    }

    #[test]
    fn taxi_meter_trailer() {
        let report = parse(
            b"AAA,109,-33.815813,151.200110,180616124101,A,8,15,0,351,0.9,68,25412,269659,\
505|3|00FA|04E381F5,0000,0000|0000|0000|0189|0562,,,108,0000,,6,0,,\
0|0000|0000|0000|0000|0000,,,20|180616124105",
        );
        assert_eq!(report.event_code(), Some(EventCode::TaxiMeterData));
        let meter = report.taxi_meter_data().unwrap();
        assert_eq!(meter.assisted_info.as_deref(), Some("20"));
        assert_eq!(meter.start_time.as_deref(), Some("180616124105"));
        assert_eq!(meter.fare, None);
    }

    #[test]
    fn oversized_report_is_rejected() {
        // The default layout holds 29 fields; REPORT carries 24.
        let mut payload = REPORT.to_vec();
        payload.extend_from_slice(b",1,2,3,4,5,6");
        let err =
            Command::decode(Direction::ClientToServer, Bytes::from(payload)).unwrap_err();
        assert!(matches!(err, GprsError::FieldCount { .. }));
    }
}
