// Logical LED devices and the blink task.
//
// Each device wraps one output pin (optionally routed to the PWM block)
// and runs a three-state machine: Off, On, Blinking. Commands arrive
// through `apply_command`; Blinking hands the pin to a pooled background
// task that toggles it at ~4 Hz until cooperatively cancelled.
//
// Writer discipline: a device's pin has at most one writer at any time.
// `cmd_gate` serializes foreground callers, and every command first stops
// an active blink task — signal `stop`, await the `stopped` ack — before
// touching the pin. Without the synchronous stop, a late toggle from the
// old task could overwrite the command that replaced it.

use core::cell::Cell;

use embassy_executor::SendSpawner;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use log::{error, info, warn};

use crate::error::Error;
use crate::gpio::GpioController;
use crate::pwm::PwmController;

/// First header pin dedicated to LEDs; devices take consecutive pins.
pub const FIRST_LED_PIN: u32 = 22;
pub const MAX_LED_DEVICES: usize = 2;

/// Toggle interval of the blink task (~4 Hz blink).
pub const BLINK_INTERVAL: Duration = Duration::from_millis(125);

/// Longest accepted command message: "toggle" plus a tolerated NUL.
pub const MSG_BUF_MAX_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Off,
    On,
    Blinking,
}

/// Parsed chardev command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Off,
    On,
    Toggle,
    Blink,
    Brightness(i32),
}

impl Command {
    /// Parse a write payload. Tokens are case-insensitive, numeric
    /// aliases are accepted, and one trailing NUL is tolerated (the
    /// payload may arrive as a C string). `Ok(None)` is an empty write,
    /// a no-op. Trailing newlines are not supported.
    pub fn parse(buf: &[u8]) -> Result<Option<Command>, Error> {
        let buf = match buf.split_last() {
            Some((0, rest)) => rest,
            _ => buf,
        };
        if buf.is_empty() {
            return Ok(None);
        }

        let (head, arg) = match buf.iter().position(|&b| b == b' ') {
            Some(space) => (&buf[..space], Some(&buf[space + 1..])),
            None => (buf, None),
        };

        fn is(token: &[u8], word: &str, digit: &str) -> bool {
            token.eq_ignore_ascii_case(word.as_bytes()) || token == digit.as_bytes()
        }

        match arg {
            None if is(head, "off", "0") => Ok(Some(Command::Off)),
            None if is(head, "on", "1") => Ok(Some(Command::On)),
            None if is(head, "toggle", "2") => Ok(Some(Command::Toggle)),
            None if is(head, "blink", "3") => Ok(Some(Command::Blink)),
            Some(arg) if is(head, "br", "4") => {
                let percent = core::str::from_utf8(arg)
                    .ok()
                    .and_then(|s| s.trim().parse::<i32>().ok())
                    .ok_or(Error::UnsupportedCommand)?;
                Ok(Some(Command::Brightness(percent)))
            }
            _ => Err(Error::UnsupportedCommand),
        }
    }
}

// Everything the foreground and the blink task both mutate, kept behind
// one critical-section mutex. `is_on` tracks the last level the hardware
// actually accepted, which can transiently diverge from `state` during
// mode transitions.
#[derive(Clone, Copy)]
struct Shared {
    state: LedState,
    is_on: bool,
    blink_active: bool,
}

pub struct LedDevice {
    pin: u32,
    gpio: &'static GpioController,
    pwm: &'static PwmController,
    // Absent on devices that have no executor behind them; `blink` then
    // fails with `TaskStart` instead of silently doing nothing.
    spawner: Option<SendSpawner>,
    blink_interval: Duration,
    shared: BlockingMutex<CriticalSectionRawMutex, Cell<Shared>>,
    // Foreground command gate, held across a whole apply_command.
    cmd_gate: Mutex<CriticalSectionRawMutex, ()>,
    stop: Signal<CriticalSectionRawMutex, ()>,
    stopped: Signal<CriticalSectionRawMutex, ()>,
}

impl LedDevice {
    pub const fn new(
        pin: u32,
        gpio: &'static GpioController,
        pwm: &'static PwmController,
        spawner: Option<SendSpawner>,
    ) -> Self {
        Self {
            pin,
            gpio,
            pwm,
            spawner,
            blink_interval: BLINK_INTERVAL,
            shared: BlockingMutex::new(Cell::new(Shared {
                state: LedState::Off,
                is_on: false,
                blink_active: false,
            })),
            cmd_gate: Mutex::new(()),
            stop: Signal::new(),
            stopped: Signal::new(),
        }
    }

    pub const fn pin(&self) -> u32 {
        self.pin
    }

    pub fn state(&self) -> LedState {
        self.shared.lock(|cell| cell.get().state)
    }

    /// Last level the hardware actually accepted.
    pub fn is_on(&self) -> bool {
        self.shared.lock(|cell| cell.get().is_on)
    }

    pub(crate) fn blink_active(&self) -> bool {
        self.shared.lock(|cell| cell.get().blink_active)
    }

    pub(crate) fn pwm_controller(&self) -> &'static PwmController {
        self.pwm
    }

    fn with_shared<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        self.shared.lock(|cell| {
            let mut shared = cell.get();
            let result = f(&mut shared);
            cell.set(shared);
            result
        })
    }

    /// Interpret one command. Any active blink task is stopped first, so
    /// the pin has exactly one writer while the command applies. Errors
    /// leave the logical state untouched.
    pub async fn apply_command(&'static self, command: Command) -> Result<(), Error> {
        let _gate = self.cmd_gate.lock().await;
        self.stop_blink().await?;
        match command {
            Command::Off => self.set_level(false),
            Command::On => self.set_level(true),
            Command::Toggle => {
                let on = self.is_on();
                self.set_level(!on)
            }
            Command::Blink => self.start_blink(),
            Command::Brightness(percent) => self.set_brightness(percent),
        }
    }

    fn set_level(&self, on: bool) -> Result<(), Error> {
        self.gpio.drive(self.pin, on)?;
        self.with_shared(|shared| {
            shared.is_on = on;
            shared.state = if on { LedState::On } else { LedState::Off };
        });
        Ok(())
    }

    fn set_brightness(&self, percent: i32) -> Result<(), Error> {
        // Brightness only means something on a pin routed to the PWM
        // block; everything else rejects the command outright.
        let channel =
            GpioController::pwm_channel(self.pin).ok_or(Error::UnsupportedCommand)?;
        self.pwm.set_duty(channel, percent);
        Ok(())
    }

    fn start_blink(&'static self) -> Result<(), Error> {
        let Some(spawner) = self.spawner else {
            error!("led {}: no executor to run the blink task on", self.pin);
            return Err(Error::TaskStart);
        };

        // Drain stale signals before arming a fresh task, so a cancel
        // left over from a previous run cannot kill this one instantly.
        self.stop.reset();
        self.stopped.reset();

        if spawner.spawn(blink_task(self)).is_err() {
            error!("led {}: blink task pool exhausted", self.pin);
            return Err(Error::TaskStart);
        }

        self.with_shared(|shared| {
            shared.state = LedState::Blinking;
            shared.blink_active = true;
        });
        Ok(())
    }

    /// Cooperatively cancel an active blink task and wait for it to
    /// fully exit. A no-op unless the device is Blinking.
    async fn stop_blink(&self) -> Result<(), Error> {
        let (state, active) = self.shared.lock(|cell| {
            let shared = cell.get();
            (shared.state, shared.blink_active)
        });
        if state != LedState::Blinking {
            return Ok(());
        }
        if !active {
            // Blinking with no live task means the bookkeeping broke.
            error!("led {}: blinking state without a blink task", self.pin);
            return Err(Error::Internal);
        }
        self.stop.signal(());
        self.stopped.wait().await;
        Ok(())
    }

    /// Teardown path: stop any blink task, then leave the pin driven low.
    pub async fn shutdown(&self) {
        if let Err(err) = self.stop_blink().await {
            warn!("led {}: {} during shutdown", self.pin, err);
        }
        if let Err(err) = self.gpio.drive(self.pin, false) {
            // Nothing more to do at teardown; the pin number was already
            // validated when the device was created.
            error!("led {}: failed to drive pin low: {}", self.pin, err);
        } else {
            self.with_shared(|shared| {
                shared.is_on = false;
                shared.state = LedState::Off;
            });
        }
    }

    /// Blink task body: toggle, then sleep interruptibly, until cancelled
    /// or the hardware call fails.
    async fn run_blink(&self) {
        info!("led {}: blink task running", self.pin);
        loop {
            // A cancel raised while we were toggling wins over another
            // toggle.
            if self.stop.try_take().is_some() {
                break;
            }

            let on = !self.is_on();
            if self.gpio.drive(self.pin, on).is_err() {
                // No caller is waiting on a failure exit; leave the state
                // matching the last successful write and disappear. The
                // command layer discovers this by polling state.
                error!("led {}: blink toggle failed, task exiting", self.pin);
                self.with_shared(|shared| {
                    shared.blink_active = false;
                    shared.state = if shared.is_on { LedState::On } else { LedState::Off };
                });
                return;
            }
            self.with_shared(|shared| shared.is_on = on);

            let interval = Timer::after(self.blink_interval);
            if let Either::First(()) = select(self.stop.wait(), interval).await {
                break;
            }
        }

        // Cancelled: try to leave the pin off, but only trust what the
        // hardware accepted — a concurrent observer may have seen a
        // toggle we didn't issue.
        if self.gpio.drive(self.pin, false).is_ok() {
            self.with_shared(|shared| shared.is_on = false);
        }
        self.with_shared(|shared| {
            shared.blink_active = false;
            shared.state = if shared.is_on { LedState::On } else { LedState::Off };
        });
        info!("led {}: blink task stopped", self.pin);
        self.stopped.signal(());
    }
}

#[embassy_executor::task(pool_size = MAX_LED_DEVICES)]
async fn blink_task(led: &'static LedDevice) {
    led.run_blink().await;
}
