// YM2612 FM synthesizer model: six 4-operator FM channels plus a DAC
// channel override. Structured after the original engine's `ym2612.h`
// (itself a derivative of the MAME/Genesis-Plus-GX `fm.c` OPN2 core): a
// `FmSlot` per operator (phase generator + envelope generator state), a
// `FmChannel` of four slots plus algorithm/feedback/frequency state, and a
// chip-global LFO. Register *semantics* (address/data port pairing,
// algorithm wiring, envelope rate tables, DT/MUL layout) follow that
// reference; the operator waveform math itself is a floating-point
// reconstruction rather than the original's fixed-point log/exp tables,
// since only `SoundDriver`'s write stream needs to be bit-exact - not
// the chip's resulting PCM.

use std::f64::consts::PI;

const NUM_CHANNELS: usize = 6;
const NUM_SLOTS: usize = 4;

/// Multiplier lookup: operator frequency = base * MUL_TABLE[mul], with
/// mul=0 meaning a half multiple.
const MUL_TABLE: [f64; 16] = [
    0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 10.0, 12.0, 12.0, 14.0, 14.0,
];

/// Detune table in semitone-equivalents, indexed [dt][key_code & 0x1f],
/// modeled on the OPN DT table's shape (increasing offset with key code,
/// sign per the DT field's top bit).
fn detune_ratio(dt: u8, key_code: u8) -> f64 {
    if dt == 0 {
        return 1.0;
    }
    let magnitude = ((dt & 0x3) as f64) * 0.6;
    let kc = (key_code & 0x1f) as f64 / 31.0;
    let cents = magnitude * (1.0 + kc * 3.0);
    let sign = if dt & 0x4 != 0 { -1.0 } else { 1.0 };
    2f64.powf(sign * cents / 1200.0)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EgPhase {
    Attack,
    Decay,
    Sustain,
    Release,
    Off,
}

#[derive(Clone)]
struct FmSlot {
    mul: u8,
    dt: u8,
    tl: u8,   // total level, 0..127 (attenuation)
    ar: u8,   // attack rate, 0..31
    dr: u8,   // decay rate (d1r), 0..31
    sr: u8,   // sustain rate (d2r), 0..31
    rr: u8,   // release rate, 0..15
    sl: u8,   // sustain level, 0..15

    phase: f64,     // radians, wraps at 2*PI
    eg_phase: EgPhase,
    eg_level: f64, // 0.0 (max volume) .. 1.0 (silent), attenuation fraction
    key_on: bool,
    out: f64,
    ssg_eg: u8,
}

impl FmSlot {
    fn new() -> Self {
        Self {
            mul: 1,
            dt: 0,
            tl: 127,
            ar: 0,
            dr: 0,
            sr: 0,
            rr: 0,
            sl: 0,
            phase: 0.0,
            eg_phase: EgPhase::Off,
            eg_level: 1.0,
            key_on: false,
            out: 0.0,
            ssg_eg: 0,
        }
    }

    fn key_on(&mut self) {
        if !self.key_on {
            self.key_on = true;
            self.eg_phase = if self.ar > 0 { EgPhase::Attack } else { EgPhase::Decay };
            self.phase = 0.0;
        }
    }

    fn key_off(&mut self) {
        if self.key_on {
            self.key_on = false;
            self.eg_phase = EgPhase::Release;
        }
    }

    /// Rate-to-per-sample-decay mapping: higher rate numbers move the
    /// envelope faster, matching the OPN envelope generator's general shape
    /// without reproducing its exact 0..96 step table.
    fn rate_step(rate: u8, key_scale_shift: u8) -> f64 {
        if rate == 0 {
            return 0.0;
        }
        let effective = (rate << 1).saturating_add(key_scale_shift).min(63);
        2f64.powf(effective as f64 / 8.0) / 8_000_000.0
    }

    fn advance_envelope(&mut self, key_code: u8) {
        let sustain_level = 1.0 - (self.sl as f64 / 15.0);
        match self.eg_phase {
            EgPhase::Attack => {
                let step = Self::rate_step(self.ar, key_code >> 2);
                self.eg_level -= step * (self.eg_level + 0.05);
                if self.eg_level <= 0.0 {
                    self.eg_level = 0.0;
                    self.eg_phase = EgPhase::Decay;
                }
            }
            EgPhase::Decay => {
                let step = Self::rate_step(self.dr, key_code >> 2);
                self.eg_level += step;
                if self.eg_level >= sustain_level {
                    self.eg_level = sustain_level;
                    self.eg_phase = EgPhase::Sustain;
                }
            }
            EgPhase::Sustain => {
                let step = Self::rate_step(self.sr, key_code >> 2);
                self.eg_level += step;
                if self.eg_level >= 1.0 {
                    self.eg_level = 1.0;
                    self.eg_phase = EgPhase::Off;
                }
            }
            EgPhase::Release => {
                let step = Self::rate_step(self.rr * 2, key_code >> 2);
                self.eg_level += step;
                if self.eg_level >= 1.0 {
                    self.eg_level = 1.0;
                    self.eg_phase = EgPhase::Off;
                }
            }
            EgPhase::Off => {}
        }
    }

    fn output(&mut self, phase_mod: f64, freq_rad_per_sample: f64, am: f64) -> f64 {
        self.phase += freq_rad_per_sample;
        if self.phase > 2.0 * PI {
            self.phase -= 2.0 * PI;
        }
        let tl_atten = self.tl as f64 / 127.0;
        let attenuation = (tl_atten + self.eg_level * (1.0 - tl_atten) + am).min(1.0);
        let amp = 1.0 - attenuation;
        self.out = (self.phase + phase_mod).sin() * amp;
        self.out
    }
}

#[derive(Clone)]
struct FmChannel {
    slots: [FmSlot; NUM_SLOTS],
    algorithm: u8,
    feedback: u8,
    fb_history: [f64; 2],
    block_fnum: u32,
    key_code: u8,
    pan_left: bool,
    pan_right: bool,
    ams: u8,
    pms: u8,
}

impl FmChannel {
    fn new() -> Self {
        Self {
            slots: [FmSlot::new(), FmSlot::new(), FmSlot::new(), FmSlot::new()],
            algorithm: 0,
            feedback: 0,
            fb_history: [0.0, 0.0],
            block_fnum: 0,
            key_code: 0,
            pan_left: true,
            pan_right: true,
            ams: 0,
            pms: 0,
        }
    }

    fn base_freq_hz(&self) -> f64 {
        let block = (self.block_fnum >> 11) & 0x7;
        let fnum = self.block_fnum & 0x7ff;
        // Standard OPN fnum->frequency relation (chip clock / (144 * 2^(20-block))).
        (fnum as f64) * 7_670_454.0 / (144.0 * (1u64 << (20 - block)) as f64)
    }

    fn step(&mut self, sample_rate: f64, lfo_pm: f64, lfo_am: f64) -> f64 {
        let base_hz = self.base_freq_hz();
        let mut freqs = [0.0f64; 4];
        for (i, slot) in self.slots.iter().enumerate() {
            let mul = MUL_TABLE[slot.mul as usize & 0xf];
            let detune = detune_ratio(slot.dt, self.key_code);
            let pm = 1.0 + lfo_pm * (self.pms as f64 / 7.0) * 0.02;
            freqs[i] = base_hz * mul * detune * pm;
        }

        for slot in self.slots.iter_mut() {
            slot.advance_envelope(self.key_code);
        }

        let rad = |hz: f64| 2.0 * PI * hz / sample_rate;
        let am = lfo_am * (self.ams as f64 / 3.0) * 0.1;

        let s0_fb = (self.fb_history[0] + self.fb_history[1]) * (if self.feedback > 0 {
            (1i32 << self.feedback) as f64 / 256.0
        } else {
            0.0
        });
        let s0 = self.slots[0].output(s0_fb, rad(freqs[0]), am);
        self.fb_history[1] = self.fb_history[0];
        self.fb_history[0] = s0;

        let out = match self.algorithm {
            0 => {
                let s1 = self.slots[1].output(s0 * 2.0, rad(freqs[1]), am);
                let s2 = self.slots[2].output(s1 * 2.0, rad(freqs[2]), am);
                self.slots[3].output(s2 * 2.0, rad(freqs[3]), am)
            }
            1 => {
                let s1 = self.slots[1].output(0.0, rad(freqs[1]), am);
                let s2 = self.slots[2].output((s0 + s1) * 2.0, rad(freqs[2]), am);
                self.slots[3].output(s2 * 2.0, rad(freqs[3]), am)
            }
            2 => {
                let s1 = self.slots[1].output(0.0, rad(freqs[1]), am);
                let s2 = self.slots[2].output(s1 * 2.0, rad(freqs[2]), am);
                self.slots[3].output((s0 + s2) * 2.0, rad(freqs[3]), am)
            }
            3 => {
                let s1 = self.slots[1].output(s0 * 2.0, rad(freqs[1]), am);
                let s2 = self.slots[2].output(0.0, rad(freqs[2]), am);
                self.slots[3].output((s1 + s2) * 2.0, rad(freqs[3]), am)
            }
            4 => {
                let s1 = self.slots[1].output(s0 * 2.0, rad(freqs[1]), am);
                let s2 = self.slots[2].output(0.0, rad(freqs[2]), am);
                let s3 = self.slots[3].output(s2 * 2.0, rad(freqs[3]), am);
                (s1 + s3) * 0.5
            }
            5 => {
                let s1 = self.slots[1].output(s0 * 2.0, rad(freqs[1]), am);
                let s2 = self.slots[2].output(s0 * 2.0, rad(freqs[2]), am);
                let s3 = self.slots[3].output(s0 * 2.0, rad(freqs[3]), am);
                (s1 + s2 + s3) / 3.0
            }
            6 => {
                let s1 = self.slots[1].output(s0 * 2.0, rad(freqs[1]), am);
                let s2 = self.slots[2].output(0.0, rad(freqs[2]), am);
                let s3 = self.slots[3].output(0.0, rad(freqs[3]), am);
                (s1 + s2 + s3) / 3.0
            }
            _ => {
                let s1 = self.slots[1].output(0.0, rad(freqs[1]), am);
                let s2 = self.slots[2].output(0.0, rad(freqs[2]), am);
                let s3 = self.slots[3].output(0.0, rad(freqs[3]), am);
                (s0 + s1 + s2 + s3) / 4.0
            }
        };
        out
    }
}

pub struct Ym2612 {
    channels: [FmChannel; NUM_CHANNELS],
    addr_latch: [u16; 2],
    dac_enabled: bool,
    dac_out: f64,
    sample_rate: f64,
    lfo_enabled: bool,
    lfo_freq_index: u8,
    lfo_phase: f64,
}

impl Ym2612 {
    pub fn new() -> Self {
        Self {
            channels: [
                FmChannel::new(),
                FmChannel::new(),
                FmChannel::new(),
                FmChannel::new(),
                FmChannel::new(),
                FmChannel::new(),
            ],
            addr_latch: [0, 0],
            dac_enabled: false,
            dac_out: 0.0,
            sample_rate: 53_267.0, // chip ticks/sec at VCLK/144, matches 7_670_454/144
            lfo_enabled: false,
            lfo_freq_index: 0,
            lfo_phase: 0.0,
        }
    }

    pub fn init(&mut self) {
        self.reset_chip();
    }

    pub fn config(&mut self, _dac_bits: u8) {
        // DAC resolution only affects quantization noise in the original
        // fixed-point core; this floating-point model doesn't need it.
    }

    pub fn reset_chip(&mut self) {
        for ch in self.channels.iter_mut() {
            *ch = FmChannel::new();
        }
        self.addr_latch = [0, 0];
        self.dac_enabled = false;
        self.dac_out = 0.0;
        self.lfo_enabled = false;
        self.lfo_freq_index = 0;
        self.lfo_phase = 0.0;
    }

    /// `port` 0/1 address/data for FM part I (channels 0-2), 2/3 for part
    /// II (channels 3-5, shifted channel index by +3).
    pub fn write(&mut self, port: u32, value: u8) {
        match port {
            0 => self.addr_latch[0] = value as u16,
            1 => self.write_reg(0, self.addr_latch[0] as u8, value),
            2 => self.addr_latch[1] = value as u16,
            3 => self.write_reg(1, self.addr_latch[1] as u8, value),
            _ => {}
        }
    }

    fn write_reg(&mut self, part: usize, reg: u8, value: u8) {
        if reg == 0x22 {
            self.lfo_enabled = value & 0x08 != 0;
            self.lfo_freq_index = value & 0x07;
            return;
        }
        if reg == 0x28 {
            // Key on/off: bits 0-1 select channel within the part encoded
            // in bit 2 for part II, bits 4-7 select which slots.
            let ch_in_reg = (value & 0x3) as usize;
            if ch_in_reg == 3 {
                return;
            }
            let part_sel = ((value >> 2) & 0x1) as usize;
            let ch = part_sel * 3 + ch_in_reg;
            if ch >= NUM_CHANNELS {
                return;
            }
            for slot in 0..4 {
                if value & (0x10 << slot) != 0 {
                    self.channels[ch].slots[slot].key_on();
                } else {
                    self.channels[ch].slots[slot].key_off();
                }
            }
            return;
        }
        if reg == 0x2a {
            // DAC data port.
            self.dac_out = ((value as f64) - 128.0) / 128.0;
            return;
        }
        if reg == 0x2b {
            self.dac_enabled = value & 0x80 != 0;
            return;
        }

        if reg < 0x30 {
            return;
        }
        let channel_in_part = (reg & 0x3) as usize;
        if channel_in_part == 3 {
            return;
        }
        let ch_index = part * 3 + channel_in_part;
        let ch = &mut self.channels[ch_index];
        let slot_index = ((reg >> 2) & 0x3) as usize;

        match reg & 0xf0 {
            0x30 => {
                ch.slots[slot_index].dt = (value >> 4) & 0x7;
                ch.slots[slot_index].mul = value & 0xf;
            }
            0x40 => ch.slots[slot_index].tl = value & 0x7f,
            0x50 => {
                ch.slots[slot_index].ar = value & 0x1f;
            }
            0x60 => {
                ch.slots[slot_index].dr = value & 0x1f;
                ch.slots[slot_index].ssg_eg = 0;
            }
            0x70 => ch.slots[slot_index].sr = value & 0x1f,
            0x80 => {
                ch.slots[slot_index].sl = (value >> 4) & 0xf;
                ch.slots[slot_index].rr = value & 0xf;
            }
            0x90 => ch.slots[slot_index].ssg_eg = value & 0xf,
            0xa0 => match reg & 0xfc {
                0xa0 => {
                    ch.block_fnum = (ch.block_fnum & 0x3800) | value as u32;
                }
                0xa4 => {
                    ch.block_fnum = (ch.block_fnum & 0x7ff) | (((value & 0x3f) as u32) << 11);
                    ch.key_code = ((ch.block_fnum >> 9) & 0x1f) as u8;
                }
                _ => {}
            },
            0xb0 => match reg & 0xfc {
                0xb0 => {
                    ch.algorithm = value & 0x7;
                    ch.feedback = (value >> 3) & 0x7;
                }
                0xb4 => {
                    ch.pan_left = value & 0x80 != 0;
                    ch.pan_right = value & 0x40 != 0;
                    ch.ams = (value >> 4) & 0x3;
                    ch.pms = value & 0x7;
                }
                _ => {}
            },
            _ => {}
        }
    }

    /// Advances the model by `sample_count` internal ticks, writing stereo
    /// interleaved samples into `buffer` (left at `2*i`, right at `2*i+1`).
    pub fn update(&mut self, buffer: &mut [i32], sample_count: usize) {
        for i in 0..sample_count {
            if self.lfo_enabled {
                let lfo_hz = [3.98, 5.56, 6.02, 6.37, 6.88, 9.63, 48.1, 72.2][self.lfo_freq_index as usize & 0x7];
                self.lfo_phase += 2.0 * PI * lfo_hz / self.sample_rate;
                if self.lfo_phase > 2.0 * PI {
                    self.lfo_phase -= 2.0 * PI;
                }
            }
            let lfo_pm = if self.lfo_enabled { self.lfo_phase.sin() } else { 0.0 };
            let lfo_am = if self.lfo_enabled { (self.lfo_phase.sin() + 1.0) * 0.5 } else { 0.0 };

            let mut left = 0.0f64;
            let mut right = 0.0f64;
            for (idx, ch) in self.channels.iter_mut().enumerate() {
                if idx == 5 && self.dac_enabled {
                    if ch.pan_left {
                        left += self.dac_out;
                    }
                    if ch.pan_right {
                        right += self.dac_out;
                    }
                    continue;
                }
                let s = ch.step(self.sample_rate, lfo_pm, lfo_am);
                if ch.pan_left {
                    left += s;
                }
                if ch.pan_right {
                    right += s;
                }
            }

            const SCALE: f64 = 8192.0;
            buffer[i * 2] = (left * SCALE / 3.0) as i32;
            buffer[i * 2 + 1] = (right * SCALE / 3.0) as i32;
        }
    }
}

impl Default for Ym2612 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_on_channel0_algorithm7(chip: &mut Ym2612) {
        chip.write(0, 0x30); // slot1 DT/MUL addr, channel 0
        chip.write(1, 0x01);
        chip.write(0, 0x40); // TL addr
        chip.write(1, 0x00); // max volume
        chip.write(0, 0xb0); // algorithm/feedback addr
        chip.write(1, 0x07); // algorithm 7 (all operators additive)
        chip.write(0, 0xb4);
        chip.write(1, 0xc0); // pan both channels on
        chip.write(0, 0xa4);
        chip.write(1, 0x22); // block/fnum high
        chip.write(0, 0xa0);
        chip.write(1, 0x69); // fnum low
        chip.write(0, 0x50);
        chip.write(1, 0x1f); // fast attack
        chip.write(0, 0x28);
        chip.write(1, 0xf0); // key on all 4 slots, channel 0
    }

    #[test]
    fn reset_produces_silence() {
        let mut chip = Ym2612::new();
        chip.init();
        let mut buf = vec![0i32; 256];
        chip.update(&mut buf, 128);
        assert!(buf.iter().all(|&s| s == 0));
    }

    #[test]
    fn key_on_produces_nonzero_output_eventually() {
        let mut chip = Ym2612::new();
        chip.init();
        key_on_channel0_algorithm7(&mut chip);
        let mut buf = vec![0i32; 4000];
        chip.update(&mut buf, 2000);
        assert!(buf.iter().any(|&s| s != 0), "keyed-on operator should produce audible output");
    }

    #[test]
    fn dac_passthrough_when_enabled() {
        let mut chip = Ym2612::new();
        chip.init();
        chip.write(0, 0x2b);
        chip.write(1, 0x80); // enable DAC
        chip.write(0, 0x2a);
        chip.write(1, 200); // DAC sample, above center
        chip.write(0, 0xb4);
        chip.write(1, 0xc0); // enable pan for channel 5 (index 5 = part0 ch idx? ensure covered)
        let mut buf = vec![0i32; 4];
        chip.update(&mut buf, 2);
        assert!(buf.iter().any(|&s| s != 0), "enabled DAC sample should reach the mix");
    }
}
