// PWM channel controller for the BCM2837.
//
// The PWM block runs from the default 19.2 MHz peripheral clock with the
// divisor untouched. One cycle frequency is supported: 4 kHz, i.e.
// range = 19_200_000 / 4000 = 4800 ticks per cycle — fast enough that a
// moving eye cannot catch the flicker on an LED.
//
// Register map (word offsets into the block at PERI_BASE + 0x20_C000):
//   CTL   word 0   control bits for both channels; channel 0 owns bits
//                  0..=7, channel 1 bits 8..=15, PWEN is bit 0 of each
//   STA   word 1   (untouched)
//   DMAC  word 2   (untouched)
//   RNG1  word 4,  DAT1 word 5,  FIF1 word 6
//   RNG2  word 8,  DAT2 word 9
//
// Every CTL update is a read-modify-write under `ctl_lock`; the lock also
// covers the range read in `set_duty` so it cannot interleave with a
// concurrent re-init of the same channel. All bit-packing arithmetic
// lives on `PwmChannel` — call sites never open-code shifts.

use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, error};

use crate::error::Error;
use crate::mmio::{PERI_BASE, RegisterBank};

/// PWM register block.
pub const PWM_BASE: usize = PERI_BASE + 0x20_C000;
pub const PWM_SIZE: usize = 0x28;

/// Default peripheral clock feeding the PWM block.
pub const PWM_CLOCK_HZ: u32 = 19_200_000;
/// The one supported cycle frequency.
pub const PWM_CYCLE_FREQ_HZ: u32 = 4_000;

// Hardware power-on defaults per channel.
const RESET_RANGE: u32 = 0x20;
const RESET_DATA: u32 = 0;

const CTL_WORD: usize = 0;
const CTL_CHANNEL_MASK: u32 = 0xFF;
const CTL_PWEN: u32 = 1 << 0;

/// The two hardware PWM channels. Each is reachable from two physical
/// pins (see the pin table in `gpio`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmChannel {
    Pwm0,
    Pwm1,
}

impl PwmChannel {
    pub const ALL: [PwmChannel; 2] = [PwmChannel::Pwm0, PwmChannel::Pwm1];

    /// Channel from a raw id, for callers whose channel numbers arrive
    /// from outside the type system.
    pub const fn from_index(index: u32) -> Result<Self, Error> {
        match index {
            0 => Ok(PwmChannel::Pwm0),
            1 => Ok(PwmChannel::Pwm1),
            _ => Err(Error::InvalidChannel),
        }
    }

    pub const fn index(self) -> u32 {
        match self {
            PwmChannel::Pwm0 => 0,
            PwmChannel::Pwm1 => 1,
        }
    }

    /// Bit offset of this channel's 8-bit block inside CTL.
    const fn ctl_shift(self) -> u32 {
        self.index() * 8
    }

    const fn ctl_mask(self) -> u32 {
        CTL_CHANNEL_MASK << self.ctl_shift()
    }

    const fn enable_bit(self) -> u32 {
        CTL_PWEN << self.ctl_shift()
    }

    const fn rng_word(self) -> usize {
        match self {
            PwmChannel::Pwm0 => 4,
            PwmChannel::Pwm1 => 8,
        }
    }

    const fn dat_word(self) -> usize {
        match self {
            PwmChannel::Pwm0 => 5,
            PwmChannel::Pwm1 => 9,
        }
    }
}

impl fmt::Display for PwmChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pwm{}", self.index())
    }
}

/// Ticks per PWM cycle for a supported cycle frequency.
pub fn range_for_frequency(freq_hz: u32) -> Result<u32, Error> {
    match freq_hz {
        PWM_CYCLE_FREQ_HZ => Ok(PWM_CLOCK_HZ / PWM_CYCLE_FREQ_HZ),
        _ => {
            error!("pwm: unsupported cycle frequency {} Hz", freq_hz);
            Err(Error::UnsupportedFrequency)
        }
    }
}

/// Data-register value for an on-time percentage of `range`.
///
/// Out-of-range percentages clamp to fully off / fully on. The middle is
/// truncating on purpose: `(range / 100) * percent` resolves whole
/// percentage points only, and callers depend on the exact values it
/// produces — do not substitute the higher-precision
/// `(range * percent) / 100` form.
pub fn data_for_percent(percent: i32, range: u32) -> u32 {
    if percent >= 100 {
        range
    } else if percent <= 0 {
        0
    } else {
        (range / 100) * percent as u32
    }
}

pub struct PwmController {
    bank: &'static dyn RegisterBank,
    ctl_lock: Mutex<CriticalSectionRawMutex, ()>,
}

impl PwmController {
    pub const fn new(bank: &'static dyn RegisterBank) -> Self {
        Self {
            bank,
            ctl_lock: Mutex::new(()),
        }
    }

    /// Program a channel's data and range registers and rebuild its CTL
    /// block from scratch, optionally enabled.
    ///
    /// Only the 8 control bits belonging to `channel` are cleared; the
    /// other channel's bits are preserved bit-for-bit.
    pub fn init_channel(&self, channel: PwmChannel, data: u32, range: u32, enabled: bool) {
        self.ctl_lock.lock(|_| {
            let ctl = self.bank.read(CTL_WORD) & !channel.ctl_mask();
            self.bank.write(CTL_WORD, ctl);
            self.bank.write(channel.dat_word(), data);
            self.bank.write(channel.rng_word(), range);
            if enabled {
                let ctl = self.bank.read(CTL_WORD);
                self.bank.write(CTL_WORD, ctl | channel.enable_bit());
            }
        });
        debug!(
            "pwm: {} data={} range={} enabled={}",
            channel, data, range, enabled
        );
    }

    /// One-call channel setup from user-facing terms: duty percentage and
    /// cycle frequency.
    pub fn init_user_device(
        &self,
        channel: PwmChannel,
        duty_percent: i32,
        freq_hz: u32,
        enabled: bool,
    ) -> Result<(), Error> {
        let range = range_for_frequency(freq_hz)?;
        let data = data_for_percent(duty_percent, range);
        self.init_channel(channel, data, range, enabled);
        Ok(())
    }

    /// Re-derive the data register from the channel's currently
    /// configured range. Range and enable bits stay untouched.
    pub fn set_duty(&self, channel: PwmChannel, percent: i32) {
        self.ctl_lock.lock(|_| {
            let range = self.bank.read(channel.rng_word());
            let data = data_for_percent(percent, range);
            self.bank.write(channel.dat_word(), data);
        });
    }

    /// Set or clear only this channel's enable bit.
    pub fn enable(&self, channel: PwmChannel, on: bool) {
        self.ctl_lock.lock(|_| {
            let ctl = self.bank.read(CTL_WORD);
            let ctl = if on {
                ctl | channel.enable_bit()
            } else {
                ctl & !channel.enable_bit()
            };
            self.bank.write(CTL_WORD, ctl);
        });
    }

    /// Put both channels back to their documented power-on defaults so
    /// the peripheral is in a known state for the next user.
    pub fn reset_channels(&self) {
        for channel in PwmChannel::ALL {
            self.init_channel(channel, RESET_DATA, RESET_RANGE, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::fake::FakeBank;

    fn controller() -> (&'static PwmController, &'static FakeBank) {
        let bank = FakeBank::new(PWM_SIZE / 4);
        let pwm = Box::leak(Box::new(PwmController::new(bank)));
        (pwm, bank)
    }

    #[test]
    fn only_the_fixed_frequency_is_supported() {
        assert_eq!(range_for_frequency(4_000), Ok(4_800));
        for freq in [0, 50, 1_000, 4_001, 19_200_000] {
            assert_eq!(
                range_for_frequency(freq),
                Err(Error::UnsupportedFrequency),
                "{freq} Hz"
            );
        }
    }

    #[test]
    fn duty_math_clamps_and_truncates() {
        for range in [0x20, 4_800, 12_345] {
            assert_eq!(data_for_percent(100, range), range);
            assert_eq!(data_for_percent(150, range), range);
            assert_eq!(data_for_percent(0, range), 0);
            assert_eq!(data_for_percent(-5, range), 0);
        }
        assert_eq!(data_for_percent(50, 4_800), 2_400);
        // Truncating formula: 12_345 / 100 = 123, times 33.
        assert_eq!(data_for_percent(33, 12_345), 4_059);
    }

    #[test]
    fn duty_is_monotonic_in_percent() {
        for range in [0x20, 4_800] {
            let mut last = 0;
            for percent in -10..=110 {
                let data = data_for_percent(percent, range);
                assert!(data >= last, "percent {percent} range {range}");
                last = data;
            }
            assert_eq!(last, range);
        }
    }

    #[test]
    fn init_clears_only_the_channels_ctl_block() {
        let (pwm, bank) = controller();
        bank.preset(CTL_WORD, 0xFFFF);

        pwm.init_channel(PwmChannel::Pwm0, 2_400, 4_800, false);
        assert_eq!(bank.get(CTL_WORD), 0xFF00);
        assert_eq!(bank.get(5), 2_400); // DAT1
        assert_eq!(bank.get(4), 4_800); // RNG1

        pwm.init_channel(PwmChannel::Pwm1, 100, 4_800, true);
        // Channel 1's block rebuilt to just PWEN, channel 0 untouched.
        assert_eq!(bank.get(CTL_WORD), 0x0100);
        assert_eq!(bank.get(9), 100); // DAT2
        assert_eq!(bank.get(8), 4_800); // RNG2
    }

    #[test]
    fn enable_flips_only_the_pwen_bit() {
        let (pwm, bank) = controller();
        bank.preset(CTL_WORD, 0x8080);

        pwm.enable(PwmChannel::Pwm0, true);
        assert_eq!(bank.get(CTL_WORD), 0x8081);
        pwm.enable(PwmChannel::Pwm1, true);
        assert_eq!(bank.get(CTL_WORD), 0x8181);
        pwm.enable(PwmChannel::Pwm0, false);
        assert_eq!(bank.get(CTL_WORD), 0x8180);
    }

    #[test]
    fn set_duty_writes_only_the_data_register() {
        let (pwm, bank) = controller();
        pwm.init_user_device(PwmChannel::Pwm0, 0, 4_000, true).unwrap();
        let before = bank.write_count();

        pwm.set_duty(PwmChannel::Pwm0, 40);

        assert_eq!(bank.get(5), 1_920); // (4800 / 100) * 40
        assert_eq!(bank.get(4), 4_800); // range untouched
        assert_eq!(bank.get(CTL_WORD) & 1, 1); // still enabled
        assert_eq!(bank.write_count(), before + 1);
    }

    #[test]
    fn reset_restores_power_on_defaults() {
        let (pwm, bank) = controller();
        pwm.init_user_device(PwmChannel::Pwm0, 75, 4_000, true).unwrap();
        pwm.init_user_device(PwmChannel::Pwm1, 25, 4_000, true).unwrap();

        pwm.reset_channels();

        assert_eq!(bank.get(CTL_WORD), 0);
        for channel in PwmChannel::ALL {
            assert_eq!(bank.get(channel.dat_word()), 0, "{channel}");
            assert_eq!(bank.get(channel.rng_word()), 0x20, "{channel}");
        }
    }

    #[test]
    fn channel_ids_round_trip() {
        for channel in PwmChannel::ALL {
            assert_eq!(PwmChannel::from_index(channel.index()), Ok(channel));
        }
        assert_eq!(PwmChannel::from_index(2), Err(Error::InvalidChannel));
    }
}
