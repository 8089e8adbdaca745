//! Fixed-capacity sample rings.
//!
//! A [`SampleRing`] is pre-allocated and zero-filled, so its length is the
//! window size from the very first tick; new samples overwrite the oldest.

use crate::protocol::{
    EEG_CHANNELS, EEG_WINDOW_SAMPLES, PPG_CHANNELS, PPG_DIAGNOSTIC_SAMPLES, PPG_INFRARED,
    PPG_WINDOW_SAMPLES,
};
use crate::types::{RawEegFrame, RawPpgFrame};

/// Fixed-size circular buffer of `f64` samples.
#[derive(Debug, Clone)]
pub struct SampleRing {
    buf: Box<[f64]>,
    /// Slot the next sample is written to, also the oldest sample.
    head: usize,
    /// Samples written since construction or the last [`SampleRing::reset_fill`].
    written: u64,
}

impl SampleRing {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            buf: vec![0.0; capacity].into_boxed_slice(),
            head: 0,
            written: 0,
        }
    }

    /// Always the capacity: the ring is never partially populated.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn push(&mut self, sample: f64) {
        self.buf[self.head] = sample;
        self.head = (self.head + 1) % self.buf.len();
        self.written += 1;
    }

    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, samples: I) {
        for s in samples {
            self.push(s);
        }
    }

    /// `true` once a full window of real samples has been written.
    pub fn is_filled(&self) -> bool {
        self.written >= self.buf.len() as u64
    }

    /// Forget how many samples were written without touching the contents.
    ///
    /// Used after a reconnect: the stale window stays in place, but the ring
    /// reports itself as warming up until it has been refilled.
    pub fn reset_fill(&mut self) {
        self.written = 0;
    }

    /// Copy the window into `out`, oldest sample first.
    pub fn copy_to(&self, out: &mut Vec<f64>) {
        out.clear();
        out.extend_from_slice(&self.buf[self.head..]);
        out.extend_from_slice(&self.buf[..self.head]);
    }

    /// The window as a new vector, oldest sample first.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.buf.len());
        self.copy_to(&mut out);
        out
    }

    pub fn mean(&self) -> f64 {
        self.buf.iter().sum::<f64>() / self.buf.len() as f64
    }
}

/// One 2 s ring per EEG electrode.
#[derive(Debug, Clone)]
pub struct EegBuffers {
    channels: [SampleRing; EEG_CHANNELS],
}

impl EegBuffers {
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| SampleRing::new(EEG_WINDOW_SAMPLES)),
        }
    }

    /// Append a frame.  Returns `false` (and drops the frame) for an
    /// electrode outside the processed set.
    pub fn push_frame(&mut self, frame: &RawEegFrame) -> bool {
        match self.channels.get_mut(frame.electrode) {
            Some(ring) => {
                ring.extend(frame.samples.iter().copied());
                true
            }
            None => false,
        }
    }

    pub fn channel(&self, electrode: usize) -> &SampleRing {
        &self.channels[electrode]
    }

    pub fn channels(&self) -> &[SampleRing] {
        &self.channels
    }

    pub fn is_filled(&self) -> bool {
        self.channels.iter().all(SampleRing::is_filled)
    }

    pub fn reset_fill(&mut self) {
        self.channels.iter_mut().for_each(SampleRing::reset_fill);
    }
}

impl Default for EegBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// The 10 s infrared ring plus a 2 s diagnostic ring per optical channel.
#[derive(Debug, Clone)]
pub struct PpgBuffers {
    infrared: SampleRing,
    diagnostic: [SampleRing; PPG_CHANNELS],
}

impl PpgBuffers {
    pub fn new() -> Self {
        Self {
            infrared: SampleRing::new(PPG_WINDOW_SAMPLES),
            diagnostic: std::array::from_fn(|_| SampleRing::new(PPG_DIAGNOSTIC_SAMPLES)),
        }
    }

    /// Append a frame to its diagnostic ring and, for the infrared channel,
    /// to the heart-rate ring.  Unknown channels are dropped.
    pub fn push_frame(&mut self, frame: &RawPpgFrame) -> bool {
        let Some(diag) = self.diagnostic.get_mut(frame.ppg_channel) else {
            return false;
        };
        let samples = frame.samples.iter().map(|&s| s as f64);
        diag.extend(samples.clone());
        if frame.ppg_channel == PPG_INFRARED {
            self.infrared.extend(samples);
        }
        true
    }

    pub fn infrared(&self) -> &SampleRing {
        &self.infrared
    }

    pub fn diagnostic(&self, channel: usize) -> &SampleRing {
        &self.diagnostic[channel]
    }

    pub fn reset_fill(&mut self) {
        self.infrared.reset_fill();
        self.diagnostic.iter_mut().for_each(SampleRing::reset_fill);
    }
}

impl Default for PpgBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_starts_zeroed_at_full_length() {
        let ring = SampleRing::new(8);
        assert_eq!(ring.len(), 8);
        assert_eq!(ring.to_vec(), vec![0.0; 8]);
        assert!(!ring.is_filled());
    }

    #[test]
    fn ring_overwrites_oldest_in_order() {
        let mut ring = SampleRing::new(4);
        ring.extend((1..=6).map(f64::from));
        assert_eq!(ring.to_vec(), vec![3.0, 4.0, 5.0, 6.0]);
        assert!(ring.is_filled());
        ring.reset_fill();
        assert!(!ring.is_filled());
        assert_eq!(ring.to_vec(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn eeg_frames_route_by_electrode() {
        let mut bufs = EegBuffers::new();
        let frame = RawEegFrame { index: 0, electrode: 3, samples: vec![1.5; 12] };
        assert!(bufs.push_frame(&frame));
        assert_eq!(bufs.channel(3).to_vec()[EEG_WINDOW_SAMPLES - 1], 1.5);
        assert_eq!(bufs.channel(0).mean(), 0.0);

        let aux = RawEegFrame { index: 0, electrode: 4, samples: vec![1.0; 12] };
        assert!(!bufs.push_frame(&aux));
    }

    #[test]
    fn only_infrared_feeds_heart_rate_ring() {
        let mut bufs = PpgBuffers::new();
        bufs.push_frame(&RawPpgFrame { index: 0, ppg_channel: 2, samples: vec![10; 6] });
        assert_eq!(bufs.infrared().mean(), 0.0);
        assert!(bufs.diagnostic(2).mean() > 0.0);

        bufs.push_frame(&RawPpgFrame { index: 0, ppg_channel: PPG_INFRARED, samples: vec![640; 6] });
        approx::assert_abs_diff_eq!(bufs.infrared().mean(), 6.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(bufs.diagnostic(PPG_INFRARED).mean(), 30.0, epsilon = 1e-12);
    }
}
