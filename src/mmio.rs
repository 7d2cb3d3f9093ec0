// Memory-mapped peripheral register banks.
//
// Every BCM2837 register this driver touches is 32 bit, so a bank is
// addressed in whole words. `RegisterBank` is the seam the controllers
// talk through: hardware goes via `MmioRegion`, tests substitute a
// recording fake.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Error;

/// Physical base of the BCM2837 peripheral window.
pub const PERI_BASE: usize = 0x3F00_0000;

/// Word-addressed access to one peripheral register block.
pub trait RegisterBank: Sync {
    fn read(&self, word: usize) -> u32;
    fn write(&self, word: usize, value: u32);
}

/// One mapped peripheral address range.
///
/// Mapped once at driver start-up and unmapped exactly once at shutdown.
/// The base lives in an atomic so `unmap` can null it through the shared
/// references the controllers hold. Register access while unmapped is a
/// caller contract violation; reads yield 0 and writes are dropped
/// rather than dereferencing a dead pointer.
pub struct MmioRegion {
    base: AtomicUsize,
    words: AtomicUsize,
}

impl MmioRegion {
    pub const fn new() -> Self {
        Self {
            base: AtomicUsize::new(0),
            words: AtomicUsize::new(0),
        }
    }

    /// Map `bytes` of peripheral registers starting at `phys`.
    ///
    /// Safety: `phys..phys + bytes` must be the device's register block,
    /// identity-addressable on this SoC, and not driven by other code.
    pub unsafe fn map(&self, phys: usize, bytes: usize) -> Result<(), Error> {
        if phys == 0 || bytes == 0 || phys % align_of::<u32>() != 0 {
            log::error!("mmio: cannot map {:#x} (+{:#x})", phys, bytes);
            return Err(Error::Mapping);
        }
        if self
            .base
            .compare_exchange(0, phys, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::error!("mmio: region already mapped, refusing {:#x}", phys);
            return Err(Error::Mapping);
        }
        self.words.store(bytes / size_of::<u32>(), Ordering::Release);
        log::info!("mmio: mapped {:#x} (+{:#x})", phys, bytes);
        Ok(())
    }

    /// Release the mapping. A no-op if never mapped.
    pub fn unmap(&self) {
        self.words.store(0, Ordering::Release);
        let base = self.base.swap(0, Ordering::AcqRel);
        if base != 0 {
            log::info!("mmio: released mapping at {:#x}", base);
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.base.load(Ordering::Acquire) != 0
    }

    fn reg(&self, word: usize) -> Option<*mut u32> {
        let base = self.base.load(Ordering::Acquire);
        if base == 0 || word >= self.words.load(Ordering::Acquire) {
            return None;
        }
        Some((base as *mut u32).wrapping_add(word))
    }
}

impl RegisterBank for MmioRegion {
    fn read(&self, word: usize) -> u32 {
        match self.reg(word) {
            // Safety: `reg` only yields pointers inside a live mapping.
            Some(reg) => unsafe { reg.read_volatile() },
            None => 0,
        }
    }

    fn write(&self, word: usize, value: u32) {
        if let Some(reg) = self.reg(word) {
            // Safety: as above.
            unsafe { reg.write_volatile(value) };
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::RegisterBank;

    /// In-memory register bank recording every write for assertions.
    pub(crate) struct FakeBank {
        regs: Mutex<Vec<u32>>,
        log: Mutex<Vec<(usize, u32)>>,
    }

    impl FakeBank {
        pub fn new(words: usize) -> &'static Self {
            Box::leak(Box::new(Self {
                regs: Mutex::new(vec![0; words]),
                log: Mutex::new(Vec::new()),
            }))
        }

        pub fn preset(&self, word: usize, value: u32) {
            self.regs.lock().unwrap()[word] = value;
        }

        pub fn get(&self, word: usize) -> u32 {
            self.regs.lock().unwrap()[word]
        }

        pub fn writes(&self) -> Vec<(usize, u32)> {
            self.log.lock().unwrap().clone()
        }

        pub fn write_count(&self) -> usize {
            self.log.lock().unwrap().len()
        }
    }

    impl RegisterBank for FakeBank {
        fn read(&self, word: usize) -> u32 {
            self.regs.lock().unwrap()[word]
        }

        fn write(&self, word: usize, value: u32) {
            // The fake stores the raw written value even for the
            // write-1-to-act registers; tests interpret the log.
            self.log.lock().unwrap().push((word, value));
            self.regs.lock().unwrap()[word] = value;
        }
    }
}
