#![allow(dead_code)]
//! On-wire command codes and frame encoding for the two charger CAN
//! flavours supported (spec §6): the telecom-rectifier flavour (29-bit
//! fixed read/write IDs, big-endian value at offset 4) and the PSU flavour
//! (29-bit base + device id, little-endian command code and value).
//! Command codes are grounded on `original_source/src/MeanWell_can.cpp`'s
//! `onReceive`/`setValue`/`sendCmd` switch statements.

use crate::hardware::can::CanFrame;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub mod cmd {
    pub const OPERATION: u16 = 0x0000;
    pub const VOUT_SET: u16 = 0x0020;
    pub const IOUT_SET: u16 = 0x0030;
    pub const FAULT_STATUS: u16 = 0x0040;
    pub const READ_VIN: u16 = 0x0050;
    pub const READ_VOUT: u16 = 0x0060;
    pub const READ_IOUT: u16 = 0x0061;
    pub const READ_TEMPERATURE_1: u16 = 0x0062;
    pub const MFR_ID_B0B5: u16 = 0x0080;
    pub const MFR_ID_B6B11: u16 = 0x0081;
    pub const MFR_MODEL_B0B5: u16 = 0x0082;
    pub const MFR_MODEL_B6B11: u16 = 0x0083;
    pub const MFR_REVISION_B0B5: u16 = 0x0084;
    pub const MFR_LOCATION_B0B2: u16 = 0x0085;
    pub const MFR_DATE_B0B5: u16 = 0x0086;
    pub const MFR_SERIAL_B0B5: u16 = 0x0087;
    pub const MFR_SERIAL_B6B11: u16 = 0x0088;
    pub const CURVE_CC: u16 = 0x00B0;
    pub const CURVE_CV: u16 = 0x00B1;
    pub const CURVE_FV: u16 = 0x00B2;
    pub const CURVE_TC: u16 = 0x00B3;
    pub const CURVE_CONFIG: u16 = 0x00B4;
    pub const CHG_STATUS: u16 = 0x00B8;
    pub const SCALING_FACTOR: u16 = 0x00C0;
    pub const SYSTEM_STATUS: u16 = 0x00C1;
    pub const SYSTEM_CONFIG: u16 = 0x00C2;
}

pub const TELECOM_READ_ID: u32 = 0x1081407F;
pub const TELECOM_WRITE_ID: u32 = 0x108180FE;
pub const PSU_READ_BASE: u32 = 0x000C0000;
pub const PSU_WRITE_BASE: u32 = 0x000C0100;

/// `F = 0.01` scale applied to all voltage/current register reads and writes.
pub const SCALE_V_A: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFlavour {
    TelecomRectifier,
    Psu { device_id: u8 },
}

/// One decoded command/value pair, regardless of flavour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFrame {
    pub command: u16,
    pub raw_value: i32,
}

pub fn encode_write(flavour: WireFlavour, command: u16, raw_value: i32) -> CanFrame {
    match flavour {
        WireFlavour::TelecomRectifier => {
            let mut data = vec![0u8; 8];
            data[1] = command as u8;
            BigEndian::write_i32(&mut data[4..8], raw_value);
            CanFrame::extended(TELECOM_WRITE_ID, data)
        }
        WireFlavour::Psu { device_id } => {
            let mut data = vec![0u8; 8];
            LittleEndian::write_u16(&mut data[0..2], command);
            LittleEndian::write_i16(&mut data[2..4], raw_value as i16);
            CanFrame::extended(PSU_WRITE_BASE + device_id as u32, data)
        }
    }
}

pub fn decode_frame(flavour: WireFlavour, frame: &CanFrame) -> Option<DecodedFrame> {
    match flavour {
        WireFlavour::TelecomRectifier => {
            if frame.id != TELECOM_READ_ID || frame.data.len() < 8 {
                return None;
            }
            let command = frame.data[1] as u16;
            let raw_value = BigEndian::read_i32(&frame.data[4..8]);
            Some(DecodedFrame { command, raw_value })
        }
        WireFlavour::Psu { device_id } => {
            if frame.id != PSU_READ_BASE + device_id as u32 || frame.data.len() < 4 {
                return None;
            }
            let command = LittleEndian::read_u16(&frame.data[0..2]);
            let raw_value = LittleEndian::read_i16(&frame.data[2..4]) as i32;
            Some(DecodedFrame { command, raw_value })
        }
    }
}

pub fn scale_to_raw(value: f32) -> i32 {
    (value / SCALE_V_A).round() as i32
}

pub fn raw_to_scaled(raw: i32) -> f32 {
    raw as f32 * SCALE_V_A
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psu_round_trip_voltage_setpoint() {
        let flavour = WireFlavour::Psu { device_id: 0 };
        let raw = scale_to_raw(53.0);
        let frame_out = encode_write(flavour, cmd::VOUT_SET, raw);
        assert_eq!(frame_out.id, PSU_WRITE_BASE);

        // Simulate the PSU echoing the write back on the read id.
        let mut echo = frame_out.clone();
        echo.id = PSU_READ_BASE;
        let decoded = decode_frame(flavour, &echo).unwrap();
        assert_eq!(decoded.command, cmd::VOUT_SET);
        assert!((raw_to_scaled(decoded.raw_value) - 53.0).abs() < 0.01);
    }

    #[test]
    fn telecom_round_trip_current_setpoint() {
        let flavour = WireFlavour::TelecomRectifier;
        let raw = scale_to_raw(10.0);
        let frame_out = encode_write(flavour, cmd::IOUT_SET, raw);
        assert_eq!(frame_out.id, TELECOM_WRITE_ID);

        let mut echo = frame_out.clone();
        echo.id = TELECOM_READ_ID;
        let decoded = decode_frame(flavour, &echo).unwrap();
        assert_eq!(decoded.command, cmd::IOUT_SET);
        assert!((raw_to_scaled(decoded.raw_value) - 10.0).abs() < 0.01);
    }

    #[test]
    fn decode_rejects_frame_on_wrong_id() {
        let flavour = WireFlavour::Psu { device_id: 2 };
        let frame = CanFrame::extended(0x12345, vec![0; 8]);
        assert!(decode_frame(flavour, &frame).is_none());
    }
}
