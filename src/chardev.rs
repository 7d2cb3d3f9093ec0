// Character-device surface of an LED.
//
// One `LedHandle` per open file. Writes carry whole command messages and
// are validated before any byte is copied; reads are rejected, the device
// is command-only. The handle borrows the device, so the file layer can
// open and close freely without touching LED state.

use heapless::Vec;
use log::{error, info};

use crate::error::Error;
use crate::led::{Command, LedDevice, MSG_BUF_MAX_SIZE};

pub struct LedHandle {
    led: &'static LedDevice,
}

impl LedHandle {
    pub fn open(led: &'static LedDevice) -> Self {
        info!("led {}: device opened", led.pin());
        Self { led }
    }

    pub fn release(self) {
        info!("led {}: device released", self.led.pin());
    }

    pub fn led(&self) -> &'static LedDevice {
        self.led
    }

    /// Accept one command message. Returns the number of bytes consumed;
    /// the whole message is consumed or none of it.
    pub async fn write(&self, payload: &[u8]) -> Result<usize, Error> {
        if payload.len() > MSG_BUF_MAX_SIZE {
            error!(
                "led {}: {} byte message exceeds the {} byte buffer",
                self.led.pin(),
                payload.len(),
                MSG_BUF_MAX_SIZE
            );
            return Err(Error::MessageTooLarge);
        }

        let mut buf: Vec<u8, MSG_BUF_MAX_SIZE> = Vec::new();
        // Length was checked above.
        buf.extend_from_slice(payload).map_err(|_| Error::Internal)?;

        match Command::parse(&buf)? {
            Some(command) => {
                self.led.apply_command(command).await?;
                Ok(buf.len())
            }
            None => Ok(0),
        }
    }

    /// LED state is not readable through the device file.
    pub fn read(&self, _buf: &mut [u8]) -> Result<usize, Error> {
        error!("led {}: read attempted on a write-only device", self.led.pin());
        Err(Error::ReadUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::GpioController;
    use crate::led::LedState;
    use crate::mmio::fake::FakeBank;
    use crate::pwm::{PwmChannel, PwmController};
    use embassy_futures::block_on;

    fn open_handle(pin: u32) -> (LedHandle, &'static FakeBank, &'static FakeBank) {
        let gpio_bank = FakeBank::new(crate::gpio::GPIO_SIZE / 4);
        let pwm_bank = FakeBank::new(crate::pwm::PWM_SIZE / 4);
        let gpio = Box::leak(Box::new(GpioController::new(gpio_bank)));
        let pwm = Box::leak(Box::new(PwmController::new(pwm_bank)));
        gpio.set_output(pin, false).unwrap();
        let led = Box::leak(Box::new(LedDevice::new(pin, gpio, pwm, None)));
        (LedHandle::open(led), gpio_bank, pwm_bank)
    }

    #[test]
    fn write_runs_the_command_and_reports_bytes_consumed() {
        let (handle, gpio_bank, _) = open_handle(22);
        block_on(async {
            assert_eq!(handle.write(b"on").await, Ok(2));
            assert_eq!(handle.led().state(), LedState::On);
            assert_eq!(gpio_bank.writes().last(), Some(&(7, 1 << 22)));

            // Trailing NUL counts toward the consumed length.
            assert_eq!(handle.write(b"off\0").await, Ok(4));
            assert_eq!(handle.led().state(), LedState::Off);
        });
    }

    #[test]
    fn empty_writes_are_a_no_op() {
        let (handle, gpio_bank, _) = open_handle(22);
        let before = gpio_bank.write_count();
        block_on(async {
            assert_eq!(handle.write(b"").await, Ok(0));
            assert_eq!(handle.write(b"\0").await, Ok(0));
        });
        assert_eq!(gpio_bank.write_count(), before);
    }

    #[test]
    fn oversized_writes_are_rejected_before_parsing() {
        let (handle, gpio_bank, _) = open_handle(22);
        let before = gpio_bank.write_count();
        block_on(async {
            // 8 bytes, one over the limit, and it even starts with a
            // valid command word.
            assert_eq!(handle.write(b"on      ").await, Err(Error::MessageTooLarge));
        });
        assert_eq!(gpio_bank.write_count(), before);
        assert_eq!(handle.led().state(), LedState::Off);
    }

    #[test]
    fn unknown_commands_propagate_without_side_effects() {
        let (handle, gpio_bank, _) = open_handle(22);
        let before = gpio_bank.write_count();
        block_on(async {
            assert_eq!(handle.write(b"dim 40").await, Err(Error::UnsupportedCommand));
        });
        assert_eq!(gpio_bank.write_count(), before);
    }

    #[test]
    fn brightness_write_reaches_the_pwm_block() {
        let (handle, _, pwm_bank) = open_handle(12);
        handle
            .led()
            .pwm_controller()
            .init_user_device(PwmChannel::Pwm0, 0, 4_000, true)
            .unwrap();
        block_on(async {
            assert_eq!(handle.write(b"br 40").await, Ok(5));
        });
        assert_eq!(pwm_bank.get(5), 1_920);
    }

    #[test]
    fn reads_are_rejected() {
        let (handle, _, _) = open_handle(22);
        let mut buf = [0u8; 8];
        assert_eq!(handle.read(&mut buf), Err(Error::ReadUnsupported));
    }

    #[test]
    fn release_leaves_the_led_state_alone() {
        let (handle, _, _) = open_handle(22);
        let led = handle.led();
        block_on(async {
            handle.write(b"on").await.unwrap();
        });
        handle.release();
        assert_eq!(led.state(), LedState::On);
    }
}
