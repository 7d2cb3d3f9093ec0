// Driver error taxonomy, shared by every module.
//
// Validation failures (bad pins, bad commands) are ordinary recoverable
// results handed back to the caller before any register is touched;
// nothing in this crate panics on user input.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Pin outside the usable GPIO header range.
    InvalidPin,
    /// Computed register offset fell outside the peripheral block.
    InvalidRegister,
    /// No function-select code exists for the requested role.
    InvalidFunction,
    /// Raw channel id does not name a PWM channel.
    InvalidChannel,
    /// Only the fixed 4 kHz cycle frequency is supported.
    UnsupportedFrequency,
    /// Peripheral address range could not be mapped, or already was.
    Mapping,
    /// Write payload is not a recognized LED command.
    UnsupportedCommand,
    /// Write payload exceeds the fixed message buffer.
    MessageTooLarge,
    /// LED state cannot be read back through the chardev interface.
    ReadUnsupported,
    /// The blink task could not be spawned.
    TaskStart,
    /// Bookkeeping or lookup-table inconsistency; a programming error,
    /// not a runtime fault.
    Internal,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidPin => "pin outside valid range",
            Error::InvalidRegister => "register offset outside peripheral block",
            Error::InvalidFunction => "no such pin function",
            Error::InvalidChannel => "no such PWM channel",
            Error::UnsupportedFrequency => "unsupported PWM cycle frequency",
            Error::Mapping => "peripheral mapping failed",
            Error::UnsupportedCommand => "unsupported command",
            Error::MessageTooLarge => "message too large",
            Error::ReadUnsupported => "read not supported",
            Error::TaskStart => "blink task could not be started",
            Error::Internal => "internal driver inconsistency",
        };
        f.write_str(msg)
    }
}

// Lets `gpio::Output` plug into generic embedded-hal consumers.
impl embedded_hal::digital::Error for Error {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}
