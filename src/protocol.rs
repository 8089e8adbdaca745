//! GATT UUIDs, sampling constants, and command framing for Muse headsets.
//!
//! All UUIDs belong to the Muse vendor namespace
//! `273eXXXX-4c4d-454d-96be-f03bac821358`.  Only the classic per-sensor
//! characteristics are listed here: the pipeline consumes four EEG
//! electrodes and the three optical channels, nothing else.

use uuid::Uuid;

// ── Service ──────────────────────────────────────────────────────────────────

/// Primary GATT service UUID advertised by all Muse devices.
///
/// Used to recognise advertisement packets coming from a headset while the
/// connection manager waits for a bonded device to show up.
pub const MUSE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fe8d_0000_1000_8000_00805f9b34fb);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Bidirectional control channel.
///
/// The host writes length-prefixed ASCII commands (`"h"`, `"s"`, `"p50"`,
/// `"d"`) and receives JSON fragments such as `{"rc":0}` in response.
pub const CONTROL_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x273e0001_4c4d_454d_96be_f03bac821358);

/// EEG per-electrode characteristics in [`EEG_CHANNEL_NAMES`] order.
pub const EEG_CHARACTERISTICS: [Uuid; EEG_CHANNELS] = [
    Uuid::from_u128(0x273e0003_4c4d_454d_96be_f03bac821358), // TP9
    Uuid::from_u128(0x273e0004_4c4d_454d_96be_f03bac821358), // AF7
    Uuid::from_u128(0x273e0005_4c4d_454d_96be_f03bac821358), // AF8
    Uuid::from_u128(0x273e0006_4c4d_454d_96be_f03bac821358), // TP10
];

/// Optical characteristics in [`PPG_CHANNEL_NAMES`] order.
///
/// Only populated on Muse 2 / Muse S after the `p50` preset is selected.
pub const PPG_CHARACTERISTICS: [Uuid; PPG_CHANNELS] = [
    Uuid::from_u128(0x273e000f_4c4d_454d_96be_f03bac821358), // ambient
    Uuid::from_u128(0x273e0010_4c4d_454d_96be_f03bac821358), // infrared
    Uuid::from_u128(0x273e0011_4c4d_454d_96be_f03bac821358), // red
];

// ── Sampling constants ────────────────────────────────────────────────────────

/// Number of EEG electrodes processed (TP9, AF7, AF8, TP10).
pub const EEG_CHANNELS: usize = 4;

/// EEG sample rate in Hz.
pub const EEG_FREQUENCY: f64 = 256.0;

/// Samples carried by one EEG notification (≈ 46.9 ms at 256 Hz).
pub const EEG_SAMPLES_PER_READING: usize = 12;

/// Length of the band-power analysis window: 2 s at 256 Hz.
pub const EEG_WINDOW_SAMPLES: usize = 512;

/// Number of optical channels (ambient, infrared, red).
pub const PPG_CHANNELS: usize = 3;

/// Index of the infrared channel, the primary heart-rate input.
pub const PPG_INFRARED: usize = 1;

/// PPG sample rate in Hz.
pub const PPG_FREQUENCY: f64 = 64.0;

/// Samples carried by one PPG notification (≈ 93.75 ms at 64 Hz).
pub const PPG_SAMPLES_PER_READING: usize = 6;

/// Heart-rate window: 10 s of infrared samples.
pub const PPG_WINDOW_SAMPLES: usize = 640;

/// Diagnostic perfusion window per optical channel: 2 s.
pub const PPG_DIAGNOSTIC_SAMPLES: usize = 128;

// ── Human-readable labels ─────────────────────────────────────────────────────

/// Electrode names in [`EEG_CHARACTERISTICS`] index order.
pub const EEG_CHANNEL_NAMES: [&str; EEG_CHANNELS] = ["TP9", "AF7", "AF8", "TP10"];

/// Optical channel names in [`PPG_CHARACTERISTICS`] index order.
pub const PPG_CHANNEL_NAMES: [&str; PPG_CHANNELS] = ["ambient", "infrared", "red"];

// ── Control commands ──────────────────────────────────────────────────────────

/// Preset enabling EEG plus the three optical channels.
pub const PRESET_EEG_PPG: &str = "p50";

/// Encode a text command for the control characteristic.
///
/// Frame layout: one length byte (command length + 1), the ASCII command,
/// and a trailing `'\n'`.
///
/// ```
/// # use muse_fx::protocol::encode_command;
/// assert_eq!(encode_command("d"), &[0x02, b'd', b'\n']);
/// ```
pub fn encode_command(cmd: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(cmd.len() + 2);
    bytes.push((cmd.len() + 1) as u8);
    bytes.extend_from_slice(cmd.as_bytes());
    bytes.push(b'\n');
    bytes
}

/// Decode one control notification into its text fragment.
///
/// Responses use the same length-prefix framing as commands; the length
/// byte is clamped to the bytes actually received.  Returns an empty string
/// for an empty notification.
pub fn decode_response(bytes: &[u8]) -> String {
    let Some((&len, rest)) = bytes.split_first() else {
        return String::new();
    };
    let end = (len as usize).min(rest.len());
    String::from_utf8_lossy(&rest[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_command_frame() {
        assert_eq!(encode_command("p50"), b"\x04p50\n");
    }

    #[test]
    fn response_length_is_clamped() {
        assert_eq!(decode_response(&[10, b'{', b'"']), "{\"");
        assert_eq!(decode_response(&[]), "");
    }

    #[test]
    fn windows_match_rates() {
        assert_eq!(EEG_WINDOW_SAMPLES, (2.0 * EEG_FREQUENCY) as usize);
        assert_eq!(PPG_WINDOW_SAMPLES, (10.0 * PPG_FREQUENCY) as usize);
        assert_eq!(PPG_DIAGNOSTIC_SAMPLES, (2.0 * PPG_FREQUENCY) as usize);
    }
}
