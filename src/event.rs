//! Tracker event codes carried in the second field of an `AAA` report.

use num_enum::{FromPrimitive, IntoPrimitive};

/// Tracker model families. The event tables differ on a handful of
/// codes: the T366 moved the engine-detect events onto inputs 2/3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceModel {
    #[default]
    T333,
    T366,
}

/// Event codes reported by the tracker fleet, named per the T333 table.
///
/// Codes not in the table are preserved through the catch-all variant so
/// a numeric id can still be reported even when no name is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum EventCode {
    SosButtonPressed = 1,
    Input2Active = 2,
    EngineOn = 3,
    Input4Active = 4,
    Input5Active = 5,
    SosButtonReleased = 9,
    Input2Inactive = 10,
    EngineOff = 11,
    Input4Inactive = 12,
    Input5Inactive = 13,
    LowBattery = 17,
    LowExternalBattery = 18,
    Speeding = 19,
    EnterGeoFence = 20,
    ExitGeoFence = 21,
    ExternalBatteryOn = 22,
    ExternalBatteryCut = 23,
    GpsSignalLost = 24,
    GpsSignalRecovery = 25,
    EnterSleep = 26,
    ExitSleep = 27,
    GpsAntennaCut = 28,
    DeviceReboot = 29,
    Heartbeat = 31,
    Cornering = 32,
    TrackByDistance = 33,
    ReplyCurrent = 34,
    TrackByTimeInterval = 35,
    Tow = 36,
    Rfid = 37,
    Photo = 39,
    PowerOff = 40,
    StopMoving = 41,
    StartMoving = 42,
    GsmJamming = 44,
    TemperatureHigh = 50,
    TemperatureLow = 51,
    FullFuel = 52,
    LowFuel = 53,
    FuelTheft = 54,
    Armed = 56,
    Disarmed = 57,
    VehicleTheft = 58,
    NoGsmJamming = 63,
    PressInput1ToCall = 65,
    PressInput2ToCall = 66,
    PressInput3ToCall = 67,
    PressInput4ToCall = 68,
    PressInput5ToCall = 69,
    RejectIncomingCall = 70,
    GetLocationByCall = 71,
    AutoAnswerIncomingCall = 72,
    ListenIn = 73,
    Fall = 79,
    Install = 80,
    DropOff = 81,
    TaxiMeterData = 109,
    HarshBraking = 129,
    HarshAcceleration = 130,
    IdleOvertime = 133,
    IdleRecovery = 134,
    FatigueDriving = 135,
    EnoughRestAfterFatigueDriving = 136,
    MaintenanceNotice = 139,
    IgnitionOn = 144,
    IgnitionOff = 145,

    #[num_enum(catch_all)]
    Unknown(u16),
}

impl EventCode {
    /// Parse an event code from its ASCII-decimal wire form.
    pub fn from_field(field: &[u8]) -> Option<EventCode> {
        let text = std::str::from_utf8(field).ok()?;
        let id: u16 = text.trim().parse().ok()?;
        Some(EventCode::from_primitive(id))
    }

    /// Numeric id of the event, including unknown codes.
    pub fn id(&self) -> u16 {
        (*self).into()
    }

    /// Human-readable event name, when the code is in the table.
    pub fn description(&self) -> Option<&'static str> {
        self.description_for(DeviceModel::default())
    }

    /// Event name under a specific model's table.
    pub fn description_for(&self, model: DeviceModel) -> Option<&'static str> {
        if model == DeviceModel::T366 {
            match self.id() {
                2 => return Some("Engine On"),
                3 => return Some("Input 3 Active"),
                10 => return Some("Engine Off"),
                11 => return Some("Input 3 Inactive"),
                _ => {}
            }
        }
        let name = match self {
            EventCode::SosButtonPressed => "SOS Button Pressed",
            EventCode::Input2Active => "Input 2 Active",
            EventCode::EngineOn => "Engine On",
            EventCode::Input4Active => "Input 4 Active",
            EventCode::Input5Active => "Input 5 Active",
            EventCode::SosButtonReleased => "SOS Button Released",
            EventCode::Input2Inactive => "Input 2 Inactive",
            EventCode::EngineOff => "Engine Off",
            EventCode::Input4Inactive => "Input 4 Inactive",
            EventCode::Input5Inactive => "Input 5 Inactive",
            EventCode::LowBattery => "Low Battery",
            EventCode::LowExternalBattery => "Low External Battery",
            EventCode::Speeding => "Speeding",
            EventCode::EnterGeoFence => "Enter Geo-fence",
            EventCode::ExitGeoFence => "Exit Geo-fence",
            EventCode::ExternalBatteryOn => "External Battery On",
            EventCode::ExternalBatteryCut => "External Battery Cut",
            EventCode::GpsSignalLost => "GPS Signal Lost",
            EventCode::GpsSignalRecovery => "GPS Signal Recovery",
            EventCode::EnterSleep => "Enter Sleep",
            EventCode::ExitSleep => "Exit Sleep",
            EventCode::GpsAntennaCut => "GPS Antenna Cut",
            EventCode::DeviceReboot => "Device Reboot",
            EventCode::Heartbeat => "Heartbeat",
            EventCode::Cornering => "Cornering",
            EventCode::TrackByDistance => "Track By Distance",
            EventCode::ReplyCurrent => "Reply Current (Passive)",
            EventCode::TrackByTimeInterval => "Track By Time Interval",
            EventCode::Tow => "Tow",
            EventCode::Rfid => "RFID",
            EventCode::Photo => "Photo",
            EventCode::PowerOff => "Power Off",
            EventCode::StopMoving => "Stop Moving",
            EventCode::StartMoving => "Start Moving",
            EventCode::GsmJamming => "GSM Jamming",
            EventCode::TemperatureHigh => "Temperature High",
            EventCode::TemperatureLow => "Temperature Low",
            EventCode::FullFuel => "Full Fuel",
            EventCode::LowFuel => "Low Fuel",
            EventCode::FuelTheft => "Fuel Theft",
            EventCode::Armed => "Armed",
            EventCode::Disarmed => "Disarmed",
            EventCode::VehicleTheft => "Vehicle Theft",
            EventCode::NoGsmJamming => "No GSM Jamming",
            EventCode::PressInput1ToCall => "Press Input 1 (SOS) to Call",
            EventCode::PressInput2ToCall => "Press Input 2 to Call",
            EventCode::PressInput3ToCall => "Press Input 3 to Call",
            EventCode::PressInput4ToCall => "Press Input 4 to Call",
            EventCode::PressInput5ToCall => "Press Input 5 to Call",
            EventCode::RejectIncomingCall => "Reject Incoming Call",
            EventCode::GetLocationByCall => "Get Location by Call",
            EventCode::AutoAnswerIncomingCall => "Auto Answer Incoming Call",
            EventCode::ListenIn => "Listen-in (Voice Monitoring)",
            EventCode::Fall => "Fall",
            EventCode::Install => "Install",
            EventCode::DropOff => "Drop Off",
            EventCode::TaxiMeterData => "Taxi Meter Data",
            EventCode::HarshBraking => "Harsh Braking",
            EventCode::HarshAcceleration => "Harsh Acceleration",
            EventCode::IdleOvertime => "Idle Overtime",
            EventCode::IdleRecovery => "Idle Recovery",
            EventCode::FatigueDriving => "Fatigue Driving",
            EventCode::EnoughRestAfterFatigueDriving => "Enough Rest After Fatigue Driving",
            EventCode::MaintenanceNotice => "Maintenance Notice",
            EventCode::IgnitionOn => "Ignition On",
            EventCode::IgnitionOff => "Ignition Off",
            EventCode::Unknown(_) => return None,
        };
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id() {
        assert_eq!(EventCode::from_primitive(145), EventCode::IgnitionOff);
        assert_eq!(
            EventCode::IgnitionOff.description(),
            Some("Ignition Off")
        );
        assert_eq!(EventCode::IgnitionOff.id(), 145);
    }

    #[test]
    fn lookup_from_ascii_field() {
        assert_eq!(EventCode::from_field(b"3"), Some(EventCode::EngineOn));
        assert_eq!(EventCode::from_field(b"145"), Some(EventCode::IgnitionOff));
        assert_eq!(EventCode::from_field(b"not a number"), None);
    }

    #[test]
    fn model_tables_diverge_on_engine_events() {
        assert_eq!(EventCode::EngineOn.description(), Some("Engine On"));
        assert_eq!(
            EventCode::from_primitive(2).description_for(DeviceModel::T366),
            Some("Engine On")
        );
        assert_eq!(
            EventCode::from_primitive(3).description_for(DeviceModel::T366),
            Some("Input 3 Active")
        );
        // Codes outside the divergent set read the same in both tables.
        assert_eq!(
            EventCode::Heartbeat.description_for(DeviceModel::T366),
            Some("Heartbeat")
        );
    }

    #[test]
    fn unknown_codes_keep_their_id() {
        let code = EventCode::from_primitive(999);
        assert_eq!(code, EventCode::Unknown(999));
        assert_eq!(code.id(), 999);
        assert_eq!(code.description(), None);
    }
}
