// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-channel control state, solo handling and stage construction.
//!
//! Control values are written by the UI and read by the streaming stages at
//! batch boundaries. Every field is an independent atomic cell; there is no
//! lock anywhere on the audio path.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::atomic::AtomicF32;
use crate::filter::{low_pass, FirStage};
use crate::fm::NbfmDemod;
use crate::gate::VolumeGate;
use crate::plan::{ChannelSpec, StreamRates, AUDIO_CUTOFF_HZ, AUDIO_TRANSITION_HZ};
use crate::probe::RfLevelProbe;
use crate::squelch::Squelch;
use crate::xlate::FreqXlatingFilter;

/// Valid volume gains.
pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;
/// Valid squelch thresholds in dB.
pub const SQUELCH_RANGE: RangeInclusive<f32> = -70.0..=-30.0;
/// Volume applied at startup.
pub const DEFAULT_VOLUME: f32 = 0.25;
/// Squelch threshold applied at startup.
pub const DEFAULT_SQUELCH_DB: f32 = -48.0;

/// Mutable control scalars of one channel.
#[derive(Debug)]
pub struct ChannelControl {
    volume: AtomicF32,
    squelch: AtomicF32,
    muted: AtomicBool,
    solo_suppressed: AtomicBool,
    rf_level: AtomicF32,
}

impl Default for ChannelControl {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME, DEFAULT_SQUELCH_DB)
    }
}

impl ChannelControl {
    /// Control cell with the given initial volume and squelch, both clamped.
    pub fn new(volume: f32, squelch_db: f32) -> Self {
        let control = Self {
            volume: AtomicF32::new(DEFAULT_VOLUME),
            squelch: AtomicF32::new(DEFAULT_SQUELCH_DB),
            muted: AtomicBool::new(false),
            solo_suppressed: AtomicBool::new(false),
            rf_level: AtomicF32::new(0.0),
        };
        control.set_volume(volume);
        control.set_squelch(squelch_db);
        control
    }

    /// Set the volume gain, clamped to [0, 1]. NaN is ignored.
    pub fn set_volume(&self, volume: f32) {
        if volume.is_nan() {
            return;
        }
        self.volume
            .store(volume.clamp(*VOLUME_RANGE.start(), *VOLUME_RANGE.end()));
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    /// Set the squelch threshold, clamped to [-70, -30] dB. NaN is ignored.
    pub fn set_squelch(&self, threshold_db: f32) {
        if threshold_db.is_nan() {
            return;
        }
        self.squelch
            .store(threshold_db.clamp(*SQUELCH_RANGE.start(), *SQUELCH_RANGE.end()));
    }

    pub fn squelch(&self) -> f32 {
        self.squelch.load()
    }

    /// Explicit mute. Leaves the stored volume untouched.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// True while another channel is soloed.
    pub fn is_solo_suppressed(&self) -> bool {
        self.solo_suppressed.load(Ordering::Relaxed)
    }

    fn set_solo_suppressed(&self, suppressed: bool) {
        self.solo_suppressed.store(suppressed, Ordering::Relaxed);
    }

    /// Multiplier the audio gate applies after the volume: 1.0 or 0.0.
    pub fn mute_multiplier(&self) -> f32 {
        if self.is_muted() || self.is_solo_suppressed() {
            0.0
        } else {
            1.0
        }
    }

    /// Volume times mute multiplier, as heard at the audio sink.
    pub fn effective_gain(&self) -> f32 {
        self.volume() * self.mute_multiplier()
    }

    /// Latest smoothed RF power.
    pub fn rf_level(&self) -> f32 {
        self.rf_level.load()
    }

    pub(crate) fn publish_rf_level(&self, level: f32) {
        self.rf_level.store(level);
    }
}

/// Control cells of every channel plus the solo selection.
#[derive(Debug)]
pub struct ChannelBank {
    controls: Vec<Arc<ChannelControl>>,
    solo: Mutex<Option<usize>>,
}

impl ChannelBank {
    /// Bank of `count` channels sharing the same initial volume and squelch.
    pub fn new(count: usize, volume: f32, squelch_db: f32) -> Self {
        Self {
            controls: (0..count)
                .map(|_| Arc::new(ChannelControl::new(volume, squelch_db)))
                .collect(),
            solo: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<ChannelControl>> {
        self.controls.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChannelControl>> {
        self.controls.iter()
    }

    /// Currently soloed channel, if any.
    pub fn solo(&self) -> Option<usize> {
        *self.solo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Solo one channel, or clear solo with `None`.
    ///
    /// Soloing gates every other channel to silence and leaves the soloed
    /// channel on its own explicit mute state. Clearing solo brings every
    /// channel back to its explicit mute state. Returns false (and changes
    /// nothing) for an out-of-range index.
    pub fn set_solo(&self, channel: Option<usize>) -> bool {
        if let Some(index) = channel {
            if index >= self.controls.len() {
                log::warn!("ignoring solo request for channel {index} of {}", self.controls.len());
                return false;
            }
        }

        let mut solo = self.solo.lock().unwrap_or_else(PoisonError::into_inner);
        for (i, control) in self.controls.iter().enumerate() {
            control.set_solo_suppressed(channel.is_some_and(|k| k != i));
        }
        *solo = channel;

        match channel {
            Some(index) => log::info!("solo channel {}", index + 1),
            None => log::info!("solo cleared"),
        }
        true
    }
}

/// Every streaming stage of one channel, built from its spec.
///
/// Order on the audio path: `filter → squelch → demod → audio_filter → gate`.
/// `probe` taps the output of `filter`.
#[derive(Debug)]
pub struct ChannelStages {
    pub filter: FreqXlatingFilter,
    pub squelch: Squelch,
    pub demod: NbfmDemod,
    pub audio_filter: FirStage<f32>,
    pub gate: VolumeGate,
    pub probe: RfLevelProbe,
}

impl ChannelStages {
    pub fn new(spec: &ChannelSpec, rates: &StreamRates, control: &Arc<ChannelControl>) -> Self {
        Self {
            filter: FreqXlatingFilter::new(spec.offset, rates),
            squelch: Squelch::new(Arc::clone(control)),
            demod: NbfmDemod::new(rates),
            audio_filter: FirStage::new(
                low_pass(1.0, rates.audio_rate, AUDIO_CUTOFF_HZ, AUDIO_TRANSITION_HZ),
                1,
            ),
            gate: VolumeGate::new(Arc::clone(control)),
            probe: RfLevelProbe::new(Arc::clone(control)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ChannelPlan;
    use crate::stage::Stage;
    use crate::Complex32;
    use std::f64::consts::PI;

    #[test]
    fn test_setters_clamp() {
        let control = ChannelControl::default();
        assert_eq!(control.volume(), DEFAULT_VOLUME);
        assert_eq!(control.squelch(), DEFAULT_SQUELCH_DB);

        control.set_volume(1.7);
        assert_eq!(control.volume(), 1.0);
        control.set_volume(-0.2);
        assert_eq!(control.volume(), 0.0);
        control.set_volume(f32::NAN);
        assert_eq!(control.volume(), 0.0);

        control.set_squelch(-90.0);
        assert_eq!(control.squelch(), -70.0);
        control.set_squelch(0.0);
        assert_eq!(control.squelch(), -30.0);
    }

    #[test]
    fn test_unmute_restores_volume() {
        let control = ChannelControl::default();
        control.set_volume(0.6);
        control.set_muted(true);
        assert_eq!(control.effective_gain(), 0.0);
        assert_eq!(control.volume(), 0.6);

        control.set_muted(false);
        assert_eq!(control.effective_gain(), 0.6);
    }

    #[test]
    fn test_volume_change_while_muted_is_kept() {
        let control = ChannelControl::default();
        control.set_muted(true);
        control.set_volume(0.9);
        assert_eq!(control.effective_gain(), 0.0);
        control.set_muted(false);
        assert_eq!(control.effective_gain(), 0.9);
    }

    #[test]
    fn test_solo_gates_other_channels() {
        let bank = ChannelBank::new(4, 0.5, DEFAULT_SQUELCH_DB);
        bank.get(1).unwrap().set_muted(true);
        bank.get(2).unwrap().set_muted(true);

        assert!(bank.set_solo(Some(2)));
        assert_eq!(bank.solo(), Some(2));
        let gains: Vec<f32> = bank.iter().map(|c| c.mute_multiplier()).collect();
        // channel 2 keeps its own explicit mute
        assert_eq!(gains, vec![0.0, 0.0, 0.0, 0.0]);

        bank.get(2).unwrap().set_muted(false);
        let gains: Vec<f32> = bank.iter().map(|c| c.mute_multiplier()).collect();
        assert_eq!(gains, vec![0.0, 0.0, 1.0, 0.0]);

        assert!(bank.set_solo(None));
        let muted: Vec<bool> = bank.iter().map(|c| c.mute_multiplier() == 0.0).collect();
        assert_eq!(muted, vec![false, true, false, false]);
    }

    #[test]
    fn test_solo_out_of_range_ignored() {
        let bank = ChannelBank::new(2, 0.5, DEFAULT_SQUELCH_DB);
        assert!(bank.set_solo(Some(0)));
        assert!(!bank.set_solo(Some(5)));
        assert_eq!(bank.solo(), Some(0));
    }

    fn fm_signal(offset: f64, rates: &StreamRates, len: usize) -> Vec<Complex32> {
        let mut phase = 0.0f64;
        (0..len)
            .map(|n| {
                let m = (2.0 * PI * 800.0 * n as f64 / rates.sample_rate).sin();
                phase += 2.0 * PI * (offset + 2_000.0 * m) / rates.sample_rate;
                Complex32::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    fn run_chain(stages: &mut ChannelStages, input: &[Complex32]) -> Vec<f32> {
        let filtered = stages.filter.process_all(input);
        stages.probe.process(&filtered);
        let gated = stages.squelch.process_all(&filtered);
        let audio = stages.demod.process_all(&gated);
        let shaped = stages.audio_filter.process_all(&audio);
        stages.gate.process_all(&shaped)
    }

    #[test]
    fn test_chain_demodulates_its_channel() {
        let rates = StreamRates::default();
        let f0 = 446.006_25e6;
        let plan = ChannelPlan::new(&[f0, f0 + 15_000.0], &rates).unwrap();
        let spec = plan.get(1).unwrap();

        let control = Arc::new(ChannelControl::new(1.0, DEFAULT_SQUELCH_DB));
        let mut stages = ChannelStages::new(spec, &rates, &control);

        let input = fm_signal(spec.offset, &rates, 192_000);
        let audio = run_chain(&mut stages, &input);

        assert_eq!(audio.len(), 192_000 / 40);
        let peak = audio[1_000..].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak > 0.05, "audio peak {peak}");
        assert!(control.rf_level() > 0.5);

        control.set_muted(true);
        let audio = run_chain(&mut stages, &input);
        assert!(audio.iter().all(|&s| s == 0.0));
        assert!(control.rf_level() > 0.5);
    }

    #[test]
    fn test_chain_silent_on_other_channel() {
        let rates = StreamRates::default();
        let f0 = 446.006_25e6;
        let plan = ChannelPlan::new(&[f0, f0 + 15_000.0], &rates).unwrap();

        let control = Arc::new(ChannelControl::new(1.0, -40.0));
        let mut stages = ChannelStages::new(plan.get(0).unwrap(), &rates, &control);

        let input = fm_signal(plan.get(1).unwrap().offset, &rates, 192_000);
        let audio = run_chain(&mut stages, &input);

        assert!(audio[1_000..].iter().all(|&s| s == 0.0));
        assert!(control.rf_level() < 1e-4);
    }
}
