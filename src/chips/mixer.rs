// SoundChipMixer: the point where timestamped register writes from the
// sound driver become host-rate stereo PCM. Ported from the structure of
// the original engine's `SoundEmulation.cpp`: writes for a frame are
// dispatched to the YM2612 and SN76489 models in timestamp order, each
// chip is run forward to produce its native-rate output, and that output
// is pushed through a pair of `BlipBuffer`s per chip before being summed
// down to the host sample rate.
//
// FM writes are applied immediately (the model has no notion of an
// in-progress sample), while PSG writes use the chip's native `clocks`
// parameter to preserve intra-frame timing - PSG flip-flop edges are
// audible at sample granularity in a way a full FM operator recompute
// is not. This sacrifices per-write FM precision within a frame, which
// is acceptable because SoundDriver's write-stream ordering, not the
// resulting FM PCM, is this crate's bit-exact surface.

use crate::error::{AudioError, AudioResult};

use super::blip_buffer::BlipBuffer;
use super::sn76489::Sn76489;
use super::ym2612::Ym2612;

/// Which chip (and which register bank) a write targets.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SoundChipWriteTarget {
    None,
    YamahaFmI,
    YamahaFmII,
    Sn76489,
}

/// A single timestamped chip register write, as produced by `SoundDriver`.
/// `cycles` is the offset, in FM master-clock ticks, from the start of the
/// frame this write belongs to. Equality (used by tests comparing write
/// sequences) intentionally ignores `cycles`, matching the original
/// engine's `SoundChipWrite::operator==`.
#[derive(Clone, Copy, Debug)]
pub struct SoundChipWrite {
    pub target: SoundChipWriteTarget,
    pub address: u8,
    pub data: u8,
    pub cycles: u32,
}

impl PartialEq for SoundChipWrite {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.address == other.address && self.data == other.data
    }
}

const FM_CLOCK_HZ: f64 = 7_670_454.0;
const PSG_CLOCK_HZ: f64 = 3_579_545.0;
const FM_CLOCK_DIVIDER: u32 = 144;

/// Upper bound on FM samples generated per frame; a frame requesting more
/// than this indicates a runaway cycle count upstream.
const FM_SCRATCH_CAPACITY: usize = 1080;

pub struct SoundChipMixer {
    ym: Ym2612,
    psg: Sn76489,
    blip_fm: [BlipBuffer; 2],
    blip_psg: [BlipBuffer; 2],
    fm_prev: [i32; 2],
    fm_scratch: Vec<i32>,
}

impl SoundChipMixer {
    /// Applies one write to the matching chip. Per the original engine's
    /// `SoundEmulation.cpp`: the address byte goes to the port selected by
    /// `target` (0 for FM part I, 2 for FM part II), but the data byte
    /// always lands on port 1 - the real YM2612's two register pairs share
    /// a single data latch, so port 3 is never used as a data port.
    fn dispatch_write(&mut self, write: &SoundChipWrite, psg_scale: f64) {
        match write.target {
            SoundChipWriteTarget::YamahaFmI => {
                self.ym.write(0, write.address);
                self.ym.write(1, write.data);
            }
            SoundChipWriteTarget::YamahaFmII => {
                self.ym.write(2, write.address);
                self.ym.write(1, write.data);
            }
            SoundChipWriteTarget::Sn76489 => {
                let psg_clocks = (write.cycles as f64 * psg_scale).round() as u32;
                self.psg.write(psg_clocks, write.data as u32);
            }
            SoundChipWriteTarget::None => {}
        }
    }

    pub fn new(sample_rate: u32) -> Self {
        let mut blip_fm = [
            BlipBuffer::new(FM_SCRATCH_CAPACITY + 64),
            BlipBuffer::new(FM_SCRATCH_CAPACITY + 64),
        ];
        let fm_internal_hz = FM_CLOCK_HZ / FM_CLOCK_DIVIDER as f64;
        for b in blip_fm.iter_mut() {
            b.set_rates(fm_internal_hz, sample_rate as f64);
        }

        let mut blip_psg = [BlipBuffer::new(4096), BlipBuffer::new(4096)];
        for b in blip_psg.iter_mut() {
            b.set_rates(PSG_CLOCK_HZ, sample_rate as f64);
        }

        let mut ym = Ym2612::new();
        ym.init();

        Self {
            ym,
            psg: Sn76489::new(),
            blip_fm,
            blip_psg,
            fm_prev: [0, 0],
            fm_scratch: vec![0; (FM_SCRATCH_CAPACITY + 1) * 2],
        }
    }

    pub fn reset(&mut self) {
        self.ym.reset_chip();
        self.psg.reset();
        for b in self.blip_fm.iter_mut().chain(self.blip_psg.iter_mut()) {
            b.clear();
        }
        self.fm_prev = [0, 0];
    }

    /// Dispatches `writes` (must already be ordered by `cycle`) and
    /// generates up to `out.len() / 2` interleaved stereo samples covering
    /// `fm_cycles_in_frame` FM master-clock ticks. Returns the number of
    /// stereo frames actually written.
    pub fn render_frame(
        &mut self,
        writes: &[SoundChipWrite],
        fm_cycles_in_frame: u32,
        out: &mut [i16],
    ) -> AudioResult<usize> {
        let psg_scale = PSG_CLOCK_HZ / FM_CLOCK_HZ;

        for write in writes {
            self.dispatch_write(write, psg_scale);
        }

        let fm_ticks = (fm_cycles_in_frame / FM_CLOCK_DIVIDER) as usize;
        if fm_ticks > FM_SCRATCH_CAPACITY {
            return Err(AudioError::DriverOverrun {
                produced: fm_ticks,
                capacity: FM_SCRATCH_CAPACITY,
            });
        }

        self.ym.update(&mut self.fm_scratch[..fm_ticks * 2], fm_ticks);
        for i in 0..fm_ticks {
            let left = self.fm_scratch[i * 2];
            let right = self.fm_scratch[i * 2 + 1];
            self.blip_fm[0].add_delta_fast(i as u32, left - self.fm_prev[0]);
            self.blip_fm[1].add_delta_fast(i as u32, right - self.fm_prev[1]);
            self.fm_prev = [left, right];
        }
        self.blip_fm[0].end_frame(fm_ticks as u32);
        self.blip_fm[1].end_frame(fm_ticks as u32);

        let psg_ticks = (fm_cycles_in_frame as f64 * psg_scale).round() as u32;
        self.psg.update(psg_ticks, &mut self.blip_psg);

        let host_requested = out.len() / 2;
        let available = self.blip_fm[0]
            .samples_available()
            .min(self.blip_psg[0].samples_available())
            .min(host_requested);

        let mut fm_l = vec![0i16; available];
        let mut fm_r = vec![0i16; available];
        let mut psg_l = vec![0i16; available];
        let mut psg_r = vec![0i16; available];
        self.blip_fm[0].read_samples(&mut fm_l, available, 1);
        self.blip_fm[1].read_samples(&mut fm_r, available, 1);
        self.blip_psg[0].read_samples(&mut psg_l, available, 1);
        self.blip_psg[1].read_samples(&mut psg_r, available, 1);

        for i in 0..available {
            out[i * 2] = (fm_l[i] as i32 + psg_l[i] as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out[i * 2 + 1] =
                (fm_r[i] as i32 + psg_r[i] as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }

        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_with_no_writes() {
        let mut mixer = SoundChipMixer::new(44_100);
        let mut out = vec![0i16; 2048];
        let n = mixer.render_frame(&[], 127_840, &mut out).unwrap();
        assert!(n > 0);
        assert!(out[..n * 2].iter().all(|&s| s == 0));
    }

    #[test]
    fn psg_tone_write_produces_audible_frame() {
        let mut mixer = SoundChipMixer::new(44_100);
        let writes = [
            SoundChipWrite { target: SoundChipWriteTarget::Sn76489, address: 0, data: 0x8e, cycles: 0 },
            SoundChipWrite { target: SoundChipWriteTarget::Sn76489, address: 0, data: 0x01, cycles: 1 },
            SoundChipWrite { target: SoundChipWriteTarget::Sn76489, address: 0, data: 0x90, cycles: 2 },
        ];
        let mut out = vec![0i16; 4096];
        let n = mixer.render_frame(&writes, 127_840, &mut out).unwrap();
        assert!(out[..n * 2].iter().any(|&s| s != 0));
    }

    #[test]
    fn write_equality_ignores_cycles() {
        let a = SoundChipWrite { target: SoundChipWriteTarget::YamahaFmI, address: 0x28, data: 0xf0, cycles: 10 };
        let b = SoundChipWrite { target: SoundChipWriteTarget::YamahaFmI, address: 0x28, data: 0xf0, cycles: 99 };
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_fm_cycle_span_is_rejected() {
        let mut mixer = SoundChipMixer::new(44_100);
        let mut out = vec![0i16; 65536];
        let huge_cycles = (FM_SCRATCH_CAPACITY as u32 + 10) * FM_CLOCK_DIVIDER;
        let err = mixer.render_frame(&[], huge_cycles, &mut out).unwrap_err();
        matches!(err, AudioError::DriverOverrun { .. });
    }
}
