//! Thin constructors for outbound frames.
//!
//! `stc_*` builders produce the server-to-client requests a headend
//! sends; `cts_*` builders produce client-direction frames used by test
//! rigs and bots. Each picks a fixed data identifier so captures are
//! easy to attribute; batch emitters may override it when encoding.

use crate::command::{Command, Direction, IntoField};
use crate::error::GprsError;
use crate::frame::Frame;
use bytes::{Bytes, BytesMut};

fn server_frame(
    identifier: u8,
    imei: impl IntoField,
    payload: Bytes,
) -> Result<Frame, GprsError> {
    let command = Command::decode(Direction::ServerToClient, payload)?;
    Ok(Frame::new(
        Direction::ServerToClient,
        identifier,
        imei,
        command,
    ))
}

fn payload(parts: &[&[u8]]) -> Bytes {
    let mut out = BytesMut::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            out.extend_from_slice(b",");
        }
        out.extend_from_slice(part);
    }
    out.freeze()
}

/// `E91`: read the device's firmware version and serial number.
pub fn stc_request_device_info(imei: impl IntoField) -> Result<Frame, GprsError> {
    server_frame(b'a', imei, Bytes::from_static(b"E91"))
}

/// `D00`: request a file download starting at the given packet.
pub fn stc_request_file_download(
    imei: impl IntoField,
    file_name: impl IntoField,
    start_packet: u32,
) -> Result<Frame, GprsError> {
    let body = payload(&[b"D00", &file_name.into_field(), &start_packet.into_field()]);
    server_frame(b'b', imei, body)
}

/// `A10`: real-time location query.
pub fn stc_request_location(imei: impl IntoField) -> Result<Frame, GprsError> {
    server_frame(b'c', imei, Bytes::from_static(b"A10"))
}

/// `D01`: request the file listing from the given index.
pub fn stc_request_photo_list(
    imei: impl IntoField,
    start: u32,
) -> Result<Frame, GprsError> {
    server_frame(b'd', imei, payload(&[b"D01", &start.into_field()]))
}

/// `D03`: take a photo with the given camera.
pub fn stc_request_take_photo(
    imei: impl IntoField,
    camera_number: u8,
    file_name: impl IntoField,
) -> Result<Frame, GprsError> {
    let body = payload(&[
        b"D03",
        &camera_number.into_field(),
        &file_name.into_field(),
    ]);
    server_frame(b'e', imei, body)
}

/// `D02`: delete files on the device; the list is `|`-separated with a
/// terminal separator, matching what devices emit in listings.
pub fn stc_delete_files(
    imei: impl IntoField,
    file_names: &[&str],
) -> Result<Frame, GprsError> {
    if file_names.is_empty() {
        return Err(GprsError::Parameter("no files to delete".into()));
    }
    let mut list = file_names.join("|");
    list.push('|');
    server_frame(b'f', imei, payload(&[b"D02", list.as_bytes()]))
}

/// `A13`: cornering report angle, 0..=359 degrees.
pub fn stc_set_cornering_angle(
    imei: impl IntoField,
    angle: u16,
) -> Result<Frame, GprsError> {
    if angle > 359 {
        return Err(GprsError::Parameter(format!(
            "cornering angle must be between 0 and 359, was {angle}"
        )));
    }
    server_frame(b'f', imei, payload(&[b"A13", &angle.into_field()]))
}

/// `B07`: speeding alert threshold.
pub fn stc_set_speeding_alert(
    imei: impl IntoField,
    speed_kmh: u8,
    disabled: bool,
) -> Result<Frame, GprsError> {
    let flag: &[u8] = if disabled { b"1" } else { b"0" };
    server_frame(
        b'g',
        imei,
        payload(&[b"B07", &speed_kmh.into_field(), flag]),
    )
}

/// Pin states for `C01`: drive low, drive high, or leave untouched.
pub const OUTPUT_LOW: u8 = 0;
pub const OUTPUT_HIGH: u8 = 1;
pub const OUTPUT_UNCHANGED: u8 = 2;

/// `C01`: set all five output pins at once.
pub fn stc_set_output_pins(
    imei: impl IntoField,
    speed: u8,
    states: [u8; 5],
) -> Result<Frame, GprsError> {
    let mut bitmap = Vec::with_capacity(5);
    for state in states {
        if state > OUTPUT_UNCHANGED {
            return Err(GprsError::Parameter(format!(
                "output state must be 0, 1 or 2, was {state}"
            )));
        }
        bitmap.push(b'0' + state);
    }
    server_frame(
        b'b',
        imei,
        payload(&[b"C01", &speed.into_field(), &bitmap]),
    )
}

/// `C01`: set a single output pin (0..=4), leaving the rest untouched.
pub fn stc_set_output_pin(
    imei: impl IntoField,
    speed: u8,
    pin: u8,
    state: u8,
) -> Result<Frame, GprsError> {
    if pin > 4 {
        return Err(GprsError::Parameter(format!(
            "output pin must be between 0 and 4, was {pin}"
        )));
    }
    let mut states = [OUTPUT_UNCHANGED; 5];
    states[pin as usize] = state;
    stc_set_output_pins(imei, speed, states)
}

/// `C91`: peripheral I/O parameters as `device:value` pairs.
pub fn stc_set_io_device_params(
    imei: impl IntoField,
    model: impl IntoField,
    config: &[(u8, u32)],
) -> Result<Frame, GprsError> {
    if config.len() > 5 {
        return Err(GprsError::Parameter(format!(
            "at most five device settings, got {}",
            config.len()
        )));
    }
    let mut body = BytesMut::new();
    body.extend_from_slice(b"C91,");
    body.extend_from_slice(&model.into_field());
    for (device, value) in config {
        body.extend_from_slice(format!(",{device}:{value}").as_bytes());
    }
    server_frame(b'k', imei, body.freeze())
}

/// `A11`: heartbeat reporting interval in minutes.
pub fn stc_set_heartbeat_interval(
    imei: impl IntoField,
    minutes: u16,
) -> Result<Frame, GprsError> {
    server_frame(b'l', imei, payload(&[b"A11", &minutes.into_field()]))
}

/// `A14`: tracking by distance in meters.
pub fn stc_set_tracking_by_distance(
    imei: impl IntoField,
    meters: u16,
) -> Result<Frame, GprsError> {
    server_frame(b'm', imei, payload(&[b"A14", &meters.into_field()]))
}

/// `B36`: GPRS time zone offset in minutes.
pub fn stc_set_time_zone(imei: impl IntoField, minutes: i16) -> Result<Frame, GprsError> {
    server_frame(b'n', imei, payload(&[b"B36", &minutes.into_field()]))
}

/// `B14`: idle alert: consecutive time at or under the given speed
/// before an alert fires.
pub fn stc_set_idle_alert_time(
    imei: impl IntoField,
    consecutive_speed_time_secs: u16,
    speed_kmh: u8,
    alert_time_secs: u16,
) -> Result<Frame, GprsError> {
    if consecutive_speed_time_secs > 60000 {
        return Err(GprsError::Parameter(format!(
            "consecutive speed time must be between 0 and 60000, was {consecutive_speed_time_secs}"
        )));
    }
    if speed_kmh > 200 {
        return Err(GprsError::Parameter(format!(
            "speed must be between 0 and 200, was {speed_kmh}"
        )));
    }
    if alert_time_secs > 60000 {
        return Err(GprsError::Parameter(format!(
            "alert time must be between 0 and 60000, was {alert_time_secs}"
        )));
    }
    server_frame(
        b'h',
        imei,
        payload(&[
            b"B14",
            &consecutive_speed_time_secs.into_field(),
            &speed_kmh.into_field(),
            &alert_time_secs.into_field(),
        ]),
    )
}

/// `B15`: fatigue driving alert times, all in the tracker's units.
pub fn stc_set_fatigue_driving_alert(
    imei: impl IntoField,
    consecutive_driving_time_mins: u16,
    alert_time_secs: u16,
    acc_off_time_mins: u16,
) -> Result<Frame, GprsError> {
    if consecutive_driving_time_mins > 1000 {
        return Err(GprsError::Parameter(format!(
            "consecutive driving time must be between 0 and 1000, was {consecutive_driving_time_mins}"
        )));
    }
    if alert_time_secs > 60000 {
        return Err(GprsError::Parameter(format!(
            "alert time must be between 0 and 60000, was {alert_time_secs}"
        )));
    }
    if acc_off_time_mins > 1000 {
        return Err(GprsError::Parameter(format!(
            "acc off time must be between 0 and 1000, was {acc_off_time_mins}"
        )));
    }
    server_frame(
        b'i',
        imei,
        payload(&[
            b"B15",
            &consecutive_driving_time_mins.into_field(),
            &alert_time_secs.into_field(),
            &acc_off_time_mins.into_field(),
        ]),
    )
}

/// `C50`: driver license type filter; bare `C50` clears it.
pub fn stc_set_driver_license_type(
    imei: impl IntoField,
    license_type: Option<&str>,
) -> Result<Frame, GprsError> {
    let body = match license_type {
        Some(license_type) if !license_type.is_empty() => {
            payload(&[b"C50", license_type.as_bytes()])
        }
        _ => Bytes::from_static(b"C50"),
    };
    server_frame(b'j', imei, body)
}

/// `C52`: driver license validity time; zero clears it.
pub fn stc_set_driver_license_validity_time(
    imei: impl IntoField,
    validity_time: u32,
) -> Result<Frame, GprsError> {
    let body = match validity_time {
        0 => Bytes::from_static(b"C52"),
        time => payload(&[b"C52", &time.into_field()]),
    };
    server_frame(b'k', imei, body)
}

/// `A12`: tracking by time interval, in tenths of a second.
pub fn stc_set_tracking_by_time_interval(
    imei: impl IntoField,
    deci_seconds: u16,
) -> Result<Frame, GprsError> {
    server_frame(b'o', imei, payload(&[b"A12", &deci_seconds.into_field()]))
}

/// `F01`: restart the GSM module.
pub fn stc_restart_gsm(imei: impl IntoField) -> Result<Frame, GprsError> {
    server_frame(b'p', imei, Bytes::from_static(b"F01"))
}

/// `F02`: restart the GPS module.
pub fn stc_restart_gps(imei: impl IntoField) -> Result<Frame, GprsError> {
    server_frame(b'q', imei, Bytes::from_static(b"F02"))
}

/// Client-direction `D00` chunk response, as a device would send it.
/// Test rigs and stub responders feed these to the aggregator.
pub fn cts_file_download(
    imei: impl IntoField,
    file_name: impl IntoField,
    total_packets: u32,
    packet_number: u32,
    file_bytes: impl IntoField,
) -> Result<Frame, GprsError> {
    let body = payload(&[
        b"D00",
        &file_name.into_field(),
        &total_packets.into_field(),
        &packet_number.into_field(),
        &file_bytes.into_field(),
    ]);
    let command = Command::decode(Direction::ClientToServer, body)?;
    Ok(Frame::new(Direction::ClientToServer, b'A', imei, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_wire_bytes() {
        let frame = stc_set_heartbeat_interval("0407", 0).unwrap();
        assert_eq!(frame.encode().as_ref(), b"@@l16,0407,A11,0*9F\r\n");
    }

    #[test]
    fn location_query_wire_bytes() {
        let frame = stc_request_location("0407").unwrap();
        assert_eq!(frame.encode().as_ref(), b"@@c14,0407,A10*37\r\n");
    }

    #[test]
    fn out_of_range_pin_yields_no_frame() {
        let err = stc_set_output_pin("0407", 2, 255, 1).unwrap_err();
        assert!(matches!(err, GprsError::Parameter(_)));
        assert!(err.to_string().contains("pin"));
    }

    #[test]
    fn single_pin_leaves_the_rest_untouched() {
        let frame = stc_set_output_pin("0407", 1, 2, 0).unwrap();
        assert_eq!(
            frame.command.field_bytes("output_bitmap").unwrap().as_ref(),
            b"22022"
        );
        assert_eq!(frame.command.to_bytes().as_ref(), b"C01,1,22022");
    }

    #[test]
    fn output_states_are_validated() {
        assert!(stc_set_output_pins("0407", 1, [0, 1, 2, 3, 2]).is_err());
        let frame = stc_set_output_pins("0407", 20, [1, 0, 1, 2, 2]).unwrap();
        assert_eq!(frame.command.to_bytes().as_ref(), b"C01,20,10122");
    }

    #[test]
    fn cornering_angle_range() {
        assert!(stc_set_cornering_angle("0407", 360).is_err());
        let frame = stc_set_cornering_angle("0407", 30).unwrap();
        assert_eq!(frame.command.to_bytes().as_ref(), b"A13,30");
    }

    #[test]
    fn peripheral_params_pairs() {
        let frame = stc_set_io_device_params(
            "0407",
            "A78",
            &[(1, 0), (2, 20), (3, 11), (4, 13), (5, 13)],
        )
        .unwrap();
        assert_eq!(
            frame.command.to_bytes().as_ref(),
            b"C91,A78,1:0,2:20,3:11,4:13,5:13"
        );
    }

    #[test]
    fn file_download_request() {
        let frame = stc_request_file_download("0407", "photo.jpg", 0).unwrap();
        assert_eq!(frame.command.to_bytes().as_ref(), b"D00,photo.jpg,0");
        assert_eq!(
            frame
                .command
                .field_bytes("data_packet_start_number")
                .unwrap()
                .as_ref(),
            b"0"
        );
    }

    #[test]
    fn delete_files_list() {
        let frame = stc_delete_files("0407", &["a.jpg", "b.jpg"]).unwrap();
        assert_eq!(frame.command.to_bytes().as_ref(), b"D02,a.jpg|b.jpg|");
        assert!(stc_delete_files("0407", &[]).is_err());
    }

    #[test]
    fn alert_time_ranges() {
        assert!(stc_set_idle_alert_time("0407", 60001, 0, 0).is_err());
        assert!(stc_set_idle_alert_time("0407", 10, 201, 0).is_err());
        let frame = stc_set_idle_alert_time("0407", 10, 5, 60).unwrap();
        assert_eq!(frame.command.raw().as_ref(), b"B14,10,5,60");

        assert!(stc_set_fatigue_driving_alert("0407", 1001, 0, 0).is_err());
        let frame = stc_set_fatigue_driving_alert("0407", 240, 30, 10).unwrap();
        assert_eq!(frame.command.raw().as_ref(), b"B15,240,30,10");
    }

    #[test]
    fn license_builders_allow_empty_values() {
        let bare = stc_set_driver_license_type("0407", None).unwrap();
        assert_eq!(bare.command.raw().as_ref(), b"C50");
        let typed = stc_set_driver_license_type("0407", Some("B")).unwrap();
        assert_eq!(typed.command.raw().as_ref(), b"C50,B");

        let cleared = stc_set_driver_license_validity_time("0407", 0).unwrap();
        assert_eq!(cleared.command.raw().as_ref(), b"C52");
        let timed = stc_set_driver_license_validity_time("0407", 3600).unwrap();
        assert_eq!(timed.command.raw().as_ref(), b"C52,3600");
    }

    #[test]
    fn client_chunk_response_feeds_the_aggregator() {
        use crate::download::FileDownloadAggregator;

        let mut agg = FileDownloadAggregator::new();
        let first = cts_file_download("0407", "f.jpg", 2, 0, b"ab").unwrap();
        let second = cts_file_download("0407", "f.jpg", 2, 1, b"cd").unwrap();
        assert_eq!(agg.add_frame(&first).unwrap(), None);
        assert_eq!(agg.add_frame(&second).unwrap().unwrap().as_ref(), b"abcd");
    }

    #[test]
    fn unmodeled_builders_round_trip_the_stream() {
        use crate::frame::consume;
        use bytes::Bytes;

        let frame = stc_set_speeding_alert("0407", 60, true).unwrap();
        let outcome = consume(
            Bytes::from(frame.encode().to_vec()),
            Direction::ServerToClient,
        )
        .unwrap();
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].command.raw().as_ref(), b"B07,60,1");
    }
}
