// Driver lifecycle: map the peripheral blocks, bring up the controllers,
// and hand out the LED devices.
//
// `driver_init` runs once; the statics below are its backing storage.
// A mapping failure unwinds and re-arms the init guard so the caller can
// retry; failures past that point (pin setup on compile-time constant
// pins) are programming errors and leave the driver unusable.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_executor::SendSpawner;
use log::info;
use static_cell::StaticCell;

use crate::error::Error;
use crate::gpio::{GPIO_BASE, GPIO_SIZE, GpioController};
use crate::led::{FIRST_LED_PIN, LedDevice, MAX_LED_DEVICES};
use crate::mmio::MmioRegion;
use crate::pwm::{PWM_BASE, PWM_SIZE, PwmController};

static GPIO_BANK: MmioRegion = MmioRegion::new();
static PWM_BANK: MmioRegion = MmioRegion::new();

static GPIO_CTRL: StaticCell<GpioController> = StaticCell::new();
static PWM_CTRL: StaticCell<PwmController> = StaticCell::new();
static LEDS: StaticCell<[LedDevice; MAX_LED_DEVICES]> = StaticCell::new();
static DRIVER: StaticCell<LedDriver> = StaticCell::new();

static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub struct LedDriver {
    gpio: &'static GpioController,
    pwm: &'static PwmController,
    leds: &'static [LedDevice; MAX_LED_DEVICES],
}

impl LedDriver {
    pub fn gpio(&self) -> &'static GpioController {
        self.gpio
    }

    pub fn pwm(&self) -> &'static PwmController {
        self.pwm
    }

    pub fn leds(&self) -> &'static [LedDevice; MAX_LED_DEVICES] {
        self.leds
    }

    pub fn led(&self, index: usize) -> Option<&'static LedDevice> {
        self.leds.get(index)
    }

    /// Tear the driver down: stop every LED, quiesce the PWM block, and
    /// release the peripheral mappings.
    pub async fn driver_exit(&self) {
        for led in self.leds {
            led.shutdown().await;
        }
        self.pwm.reset_channels();
        PWM_BANK.unmap();
        GPIO_BANK.unmap();
        info!("led driver stopped");
    }
}

/// Bring the driver up: map GPIO and PWM, configure every LED pin as a
/// low output, and build the device table. The spawner runs the blink
/// tasks.
pub fn driver_init(spawner: SendSpawner) -> Result<&'static LedDriver, Error> {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        log::error!("led driver already initialized");
        return Err(Error::Internal);
    }

    // Safety: these are the BCM2837 GPIO and PWM register blocks, owned
    // exclusively by this driver.
    if let Err(err) = unsafe { GPIO_BANK.map(GPIO_BASE, GPIO_SIZE) } {
        INITIALIZED.store(false, Ordering::Release);
        return Err(err);
    }
    if let Err(err) = unsafe { PWM_BANK.map(PWM_BASE, PWM_SIZE) } {
        GPIO_BANK.unmap();
        INITIALIZED.store(false, Ordering::Release);
        return Err(err);
    }

    let gpio: &'static GpioController = GPIO_CTRL.init(GpioController::new(&GPIO_BANK));
    let pwm: &'static PwmController = PWM_CTRL.init(PwmController::new(&PWM_BANK));

    // LEDs start dark; drive low before switching the pin to output so
    // it never glitches high.
    for i in 0..MAX_LED_DEVICES as u32 {
        if let Err(err) = gpio.set_output(FIRST_LED_PIN + i, false) {
            PWM_BANK.unmap();
            GPIO_BANK.unmap();
            return Err(err);
        }
    }

    let leds = LEDS.init(core::array::from_fn(|i| {
        LedDevice::new(FIRST_LED_PIN + i as u32, gpio, pwm, Some(spawner))
    }));

    let driver = DRIVER.init(LedDriver { gpio, pwm, leds });
    info!(
        "led driver up: {} devices on pins {}..={}",
        MAX_LED_DEVICES,
        FIRST_LED_PIN,
        FIRST_LED_PIN + MAX_LED_DEVICES as u32 - 1
    );
    Ok(driver)
}
