// GPIO pin controller for the BCM2837.
//
// Register map (word offsets into the GPIO block at PERI_BASE + 0x20_0000):
//   GPFSEL0..5  words 0..=5   ten 3-bit function-select fields per register
//   GPSET0      word 7        write-1-to-set, 0 bits are no-ops
//   GPCLR0      word 10       write-1-to-clear, 0 bits are no-ops
//
// Function-select updates are read-modify-write under `fsel_lock` so two
// pins sharing a register never race on the register value. Set/clear
// needs no lock: the hardware only acts on bits written as 1, so writers
// of different pins cannot disturb each other.

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, error};

use crate::error::Error;
use crate::mmio::{PERI_BASE, RegisterBank};
use crate::pwm::PwmChannel;

/// GPIO register block.
pub const GPIO_BASE: usize = PERI_BASE + 0x20_0000;
pub const GPIO_SIZE: usize = 0xB1;

/// Lowest usable pin on the header (inclusive).
pub const MIN_PIN: u32 = 2;
/// Highest usable pin on the header (inclusive).
pub const MAX_PIN: u32 = 27;

const FSEL0_WORD: usize = 0;
const SET0_WORD: usize = 7; // byte offset 0x1C
const CLR0_WORD: usize = 10; // byte offset 0x28

const PINS_PER_FSEL_REG: u32 = 10;
const FSEL_FIELD_BITS: u32 = 3;
const FSEL_FIELD_MASK: u32 = 0b111;
// Highest GPFSEL register this pin map can ever reach.
const FSEL_MAX_REG: usize = (MAX_PIN / PINS_PER_FSEL_REG) as usize;

/// Function-select codes. The discriminant is the 3-bit FSEL value, so an
/// out-of-range code is unrepresentable by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PinFunction {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

impl PinFunction {
    pub const ALL: [PinFunction; 8] = [
        PinFunction::Input,
        PinFunction::Output,
        PinFunction::Alt0,
        PinFunction::Alt1,
        PinFunction::Alt2,
        PinFunction::Alt3,
        PinFunction::Alt4,
        PinFunction::Alt5,
    ];

    /// The 3-bit FSEL field value.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

// PWM capability and the matching alternate-function code are defined in
// one row per pin so the two lookups cannot drift apart.
const PWM_PINS: [(u32, PwmChannel, PinFunction); 4] = [
    (12, PwmChannel::Pwm0, PinFunction::Alt0),
    (13, PwmChannel::Pwm1, PinFunction::Alt0),
    (18, PwmChannel::Pwm0, PinFunction::Alt5),
    (19, PwmChannel::Pwm1, PinFunction::Alt5),
];

pub struct GpioController {
    bank: &'static dyn RegisterBank,
    fsel_lock: Mutex<CriticalSectionRawMutex, ()>,
}

impl GpioController {
    pub const fn new(bank: &'static dyn RegisterBank) -> Self {
        Self {
            bank,
            fsel_lock: Mutex::new(()),
        }
    }

    pub const fn is_valid_pin(pin: u32) -> bool {
        MIN_PIN <= pin && pin <= MAX_PIN
    }

    /// Multiplex `pin` into `function`, leaving every other field of the
    /// containing GPFSEL register bit-for-bit unchanged.
    pub fn set_function(&self, pin: u32, function: PinFunction) -> Result<(), Error> {
        if !Self::is_valid_pin(pin) {
            error!("gpio: pin {} outside valid range", pin);
            return Err(Error::InvalidPin);
        }

        let reg = (pin / PINS_PER_FSEL_REG) as usize;

        // The pin bounds already imply this, but never let a future bounds
        // change reach past GPFSEL5.
        if reg > FSEL_MAX_REG {
            error!("gpio: fsel register {} out of range for pin {}", reg, pin);
            return Err(Error::InvalidRegister);
        }

        let shift = (pin % PINS_PER_FSEL_REG) * FSEL_FIELD_BITS;
        self.fsel_lock.lock(|_| {
            let word = FSEL0_WORD + reg;
            let current = self.bank.read(word);
            let value = (current & !(FSEL_FIELD_MASK << shift)) | (function.code() << shift);
            debug!(
                "gpio: fsel{} {:#010x} -> {:#010x} (pin {} {:?})",
                reg, current, value, pin, function
            );
            self.bank.write(word, value);
        });
        Ok(())
    }

    /// Drive `pin` high or low through the set/clear registers.
    ///
    /// Lock-free: only this pin's bit is written as 1 and the hardware
    /// ignores the 0 bits.
    pub fn drive(&self, pin: u32, high: bool) -> Result<(), Error> {
        if !Self::is_valid_pin(pin) {
            error!("gpio: pin {} outside valid range", pin);
            return Err(Error::InvalidPin);
        }
        let word = if high { SET0_WORD } else { CLR0_WORD };
        self.bank.write(word, 1 << pin);
        Ok(())
    }

    /// Configure `pin` as an output already driven to `initially_high`.
    ///
    /// The level is written first so the pin never glitches through a
    /// stale level at the instant the function switch lands.
    pub fn set_output(&self, pin: u32, initially_high: bool) -> Result<(), Error> {
        self.drive(pin, initially_high)?;
        self.set_function(pin, PinFunction::Output)
    }

    /// The PWM channel routed to `pin`, if any.
    pub fn pwm_channel(pin: u32) -> Option<PwmChannel> {
        PWM_PINS
            .iter()
            .find(|(p, _, _)| *p == pin)
            .map(|&(_, channel, _)| channel)
    }

    fn pwm_alt_function(pin: u32) -> Option<PinFunction> {
        PWM_PINS
            .iter()
            .find(|(p, _, _)| *p == pin)
            .map(|&(_, _, alt)| alt)
    }

    /// Multiplex a PWM-capable pin into its PWM alternate function.
    pub fn set_pwm(&self, pin: u32) -> Result<(), Error> {
        if Self::pwm_channel(pin).is_none() {
            error!("gpio: pin {} is not routed to the PWM block", pin);
            return Err(Error::InvalidPin);
        }

        // Same table row as the channel above, so this cannot miss; the
        // error path stays as a guard against the tables ever splitting.
        let alt = Self::pwm_alt_function(pin).ok_or(Error::InvalidFunction)?;
        self.set_function(pin, alt)
    }

    /// Validated output pin exposing the embedded-hal digital interface.
    pub fn output(&'static self, pin: u32, initially_high: bool) -> Result<Output, Error> {
        self.set_output(pin, initially_high)?;
        Ok(Output { gpio: self, pin })
    }
}

/// An output pin as an `embedded_hal::digital::OutputPin`.
pub struct Output {
    gpio: &'static GpioController,
    pin: u32,
}

impl Output {
    pub const fn pin(&self) -> u32 {
        self.pin
    }
}

impl embedded_hal::digital::ErrorType for Output {
    type Error = Error;
}

impl embedded_hal::digital::OutputPin for Output {
    fn set_high(&mut self) -> Result<(), Error> {
        self.gpio.drive(self.pin, true)
    }

    fn set_low(&mut self) -> Result<(), Error> {
        self.gpio.drive(self.pin, false)
    }
}
