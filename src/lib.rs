// rpi-led-driver: no_std async LED/GPIO/PWM driver core for the
// Raspberry Pi 3 (BCM2837).
//
// mmio:    peripheral register-bank mapping and volatile word access
// gpio:    pin validation, function-select multiplexing, output set/clear
// pwm:     PWM channel setup, duty-cycle math, enable/disable
// led:     logical LED devices, command interpreter, blink task
// chardev: open/release/read/write shells for a character-device layer
// driver:  driver_init/driver_exit lifecycle in dependency order
//
// The crate never installs a logger or an executor; the embedding
// firmware provides both and hands `driver_init` a spawner for the
// blink tasks.

#![cfg_attr(not(test), no_std)]

pub mod chardev;
pub mod driver;
pub mod error;
pub mod gpio;
pub mod led;
pub mod mmio;
pub mod pwm;

pub use error::Error;
