//! Volume values as fractions of the normal (0 dB) level
//!
//! The server exchanges per-channel volumes as fixed-point integers where
//! `VOLUME_NORM` is 100%. This module converts those to `f64` fractions
//! (1.0 = 100%) at the facade boundary, rounding to the nearest raw step
//! and clamping writes to the `VOLUME_UI_MAX` ceiling (+11 dB).

use pulse_transport::types::{CVolume, VOLUME_NORM, VOLUME_UI_MAX};

/// Per-channel volume, 1.0 = 100% (0 dB)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Volume {
    pub values: Vec<f64>,
}

impl Volume {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Same fraction on every one of `channels` channels
    pub fn uniform(channels: usize, value: f64) -> Self {
        Self {
            values: vec![value; channels],
        }
    }

    pub fn from_raw(raw: &CVolume) -> Self {
        Self {
            values: raw
                .as_slice()
                .iter()
                .map(|&v| f64::from(v) / f64::from(VOLUME_NORM))
                .collect(),
        }
    }

    pub fn to_raw(&self) -> CVolume {
        let raw: Vec<u32> = self.values.iter().map(|&f| fraction_to_raw(f)).collect();
        CVolume::new(&raw)
    }

    /// Arithmetic mean over all channels, 0.0 when there are none
    pub fn value_flat(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Set every channel to the same fraction, keeping the channel count
    pub fn value_flat_set(&mut self, value: f64) {
        for v in &mut self.values {
            *v = value;
        }
    }

    /// Shift every channel by `delta`, clamping at silence
    pub fn change_all(&mut self, delta: f64) {
        for v in &mut self.values {
            *v = (*v + delta).max(0.0);
        }
    }

    pub fn channels(&self) -> usize {
        self.values.len()
    }
}

fn fraction_to_raw(fraction: f64) -> u32 {
    let scaled = (fraction.max(0.0) * f64::from(VOLUME_NORM)).round();
    if scaled >= f64::from(VOLUME_UI_MAX) {
        VOLUME_UI_MAX
    } else {
        scaled as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_norm_maps_to_one() {
        let v = Volume::from_raw(&CVolume::new(&[VOLUME_NORM, VOLUME_NORM / 2]));
        assert_eq!(v.values, vec![1.0, 0.5]);
        assert_eq!(v.value_flat(), 0.75);
    }

    #[test]
    fn test_write_clamps_to_ui_ceiling() {
        let v = Volume::new(vec![5.0]);
        assert_eq!(v.to_raw().as_slice(), &[VOLUME_UI_MAX]);
        let v = Volume::new(vec![-0.2]);
        assert_eq!(v.to_raw().as_slice(), &[0]);
    }

    #[test]
    fn test_flat_set_keeps_channel_count() {
        let mut v = Volume::from_raw(&CVolume::new(&[0, VOLUME_NORM]));
        v.value_flat_set(0.3);
        assert_eq!(v.values, vec![0.3, 0.3]);
    }

    #[test]
    fn test_change_all_clamps_at_silence() {
        let mut v = Volume::new(vec![0.1, 0.6]);
        v.change_all(-0.5);
        assert_eq!(v.values, vec![0.0, 0.1]);
    }

    proptest! {
        // A raw step is 1/65536, so three decimals survive a round trip.
        #[test]
        fn test_fraction_roundtrip_within_three_decimals(
            fracs in prop::collection::vec(0.0f64..1.5, 1..8)
        ) {
            let v = Volume::new(fracs.clone());
            let back = Volume::from_raw(&v.to_raw());
            for (a, b) in fracs.iter().zip(back.values.iter()) {
                prop_assert!((a - b).abs() < 0.001);
            }
        }
    }
}
