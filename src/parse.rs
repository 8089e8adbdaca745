//! Decoders for Muse classic BLE notification payloads.
//!
//! Every function here is pure and allocation-light; the BLE dispatch task
//! calls them directly from its notification loop.
//!
//! | Function | Sensor | Format |
//! |---|---|---|
//! | [`parse_eeg_frame`] | EEG | 2-byte BE index + 12-bit BE packed, 0.48828125 µV/LSB |
//! | [`parse_ppg_frame`] | PPG | 2-byte BE index + 24-bit BE unsigned |
//! | [`ControlAccumulator`] | control | length-prefixed JSON fragments |

use crate::types::{RawEegFrame, RawPpgFrame};

/// µV per LSB of a classic 12-bit EEG sample (1000 µV / 2048 steps).
const EEG_SCALE_UV: f64 = 0.48828125;

/// Mid-scale of the 12-bit EEG ADC.
const EEG_MIDSCALE: f64 = 2048.0;

// ── EEG ──────────────────────────────────────────────────────────────────────

/// Unpack 12-bit big-endian values, three bytes → two samples.
///
/// ```text
/// [AA BB CC] → (AA << 4) | (BB >> 4),  ((BB & 0x0F) << 8) | CC
/// ```
///
/// A trailing incomplete group yields only the values it fully contains.
pub fn decode_unsigned_12bit(data: &[u8]) -> Vec<u16> {
    let mut out = Vec::with_capacity(data.len() * 2 / 3);
    for group in data.chunks(3) {
        if group.len() >= 2 {
            out.push(((group[0] as u16) << 4) | ((group[1] as u16) >> 4));
        }
        if group.len() == 3 {
            out.push((((group[1] as u16) & 0x0F) << 8) | (group[2] as u16));
        }
    }
    out
}

/// Decode an EEG payload (after the packet index) into µV.
pub fn decode_eeg_samples(data: &[u8]) -> Vec<f64> {
    decode_unsigned_12bit(data)
        .into_iter()
        .map(|raw| EEG_SCALE_UV * (raw as f64 - EEG_MIDSCALE))
        .collect()
}

/// Parse a full EEG notification for `electrode`.
///
/// Returns `None` when the packet is too short to carry its index.
pub fn parse_eeg_frame(data: &[u8], electrode: usize) -> Option<RawEegFrame> {
    let (index, payload) = split_index(data)?;
    Some(RawEegFrame {
        index,
        electrode,
        samples: decode_eeg_samples(payload),
    })
}

// ── PPG ──────────────────────────────────────────────────────────────────────

/// Decode 24-bit unsigned big-endian values; partial trailing bytes are dropped.
pub fn decode_unsigned_24bit(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(3)
        .map(|c| ((c[0] as u32) << 16) | ((c[1] as u32) << 8) | (c[2] as u32))
        .collect()
}

/// Parse a full PPG notification for `ppg_channel`.
///
/// Returns `None` when the packet is too short to carry its index.
pub fn parse_ppg_frame(data: &[u8], ppg_channel: usize) -> Option<RawPpgFrame> {
    let (index, payload) = split_index(data)?;
    Some(RawPpgFrame {
        index,
        ppg_channel,
        samples: decode_unsigned_24bit(payload),
    })
}

fn split_index(data: &[u8]) -> Option<(u16, &[u8])> {
    if data.len() < 2 {
        return None;
    }
    Some((u16::from_be_bytes([data[0], data[1]]), &data[2..]))
}

// ── Control responses ────────────────────────────────────────────────────────

/// Reassembles control-channel fragments into complete JSON objects.
///
/// The headset splits replies such as `{"rc":0}` or the `v1` device-info
/// object across several notifications.  Characters outside a top-level
/// object are discarded so stale bytes cannot corrupt the next reply.
///
/// ```
/// # use muse_fx::parse::ControlAccumulator;
/// let mut acc = ControlAccumulator::new();
/// assert!(acc.push(r#"{"fw":"1.3."#).is_none());
/// assert_eq!(acc.push(r#"4"}"#).unwrap(), r#"{"fw":"1.3.4"}"#);
/// ```
#[derive(Debug, Default)]
pub struct ControlAccumulator {
    buffer: String,
    depth: usize,
}

impl ControlAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded fragment; returns a complete object once its
    /// closing brace arrives.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        for ch in fragment.chars() {
            match ch {
                '{' => {
                    if self.depth == 0 {
                        self.buffer.clear();
                    }
                    self.depth += 1;
                    self.buffer.push(ch);
                }
                '}' if self.depth > 0 => {
                    self.buffer.push(ch);
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Some(std::mem::take(&mut self.buffer));
                    }
                }
                _ if self.depth > 0 => self.buffer.push(ch),
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_bit_pairs() {
        assert_eq!(decode_unsigned_12bit(&[0xAB, 0xCD, 0xEF]), vec![0xABC, 0xDEF]);
        assert_eq!(decode_unsigned_12bit(&[0xAB, 0xCD]), vec![0xABC]);
    }

    #[test]
    fn eeg_midscale_is_zero_microvolts() {
        // 0x800 0x800 packed → [0x80, 0x08, 0x00]
        let frame = parse_eeg_frame(&[0x00, 0x07, 0x80, 0x08, 0x00], 2).unwrap();
        assert_eq!(frame.index, 7);
        assert_eq!(frame.electrode, 2);
        assert_eq!(frame.samples, vec![0.0, 0.0]);
    }

    #[test]
    fn full_eeg_packet_has_twelve_samples() {
        let mut packet = vec![0x01, 0x02];
        packet.extend_from_slice(&[0xFF; 18]);
        let frame = parse_eeg_frame(&packet, 0).unwrap();
        assert_eq!(frame.samples.len(), 12);
        approx::assert_abs_diff_eq!(frame.samples[0], 2047.0 * EEG_SCALE_UV, epsilon = 1e-9);
    }

    #[test]
    fn ppg_frame_decodes_24bit() {
        let frame = parse_ppg_frame(&[0x00, 0x01, 0x03, 0x5B, 0x60, 0x00, 0x00, 0x01], 1).unwrap();
        assert_eq!(frame.ppg_channel, 1);
        assert_eq!(frame.samples, vec![220_000, 1]);
        assert!(parse_ppg_frame(&[0x00], 1).is_none());
    }

    #[test]
    fn accumulator_handles_nesting_and_garbage() {
        let mut acc = ControlAccumulator::new();
        assert!(acc.push("junk}").is_none());
        assert!(acc.push(r#"{"a":{"b":1}"#).is_none());
        assert_eq!(acc.push(r#",'rc':0}"#).unwrap(), r#"{"a":{"b":1},'rc':0}"#);
    }
}
