use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread,
};

/// Number of reads of the version word before yielding to the scheduler.
pub(crate) const SPIN_COUNT: u32 = 30;

const OBSOLETE_BIT: u64 = 0b01;
const LOCKED_BIT: u64 = 0b10;

/// A validation or lock-upgrade conflict. The top-level driver restarts
/// the whole operation from the root when it sees one.
pub(crate) struct Restart;

/// Per-node optimistic sequence lock.
///
/// The version word packs `(counter, locked, obsolete)`: bit 0 marks a node
/// that has been replaced and must never be trusted again, bit 1 is the
/// writer lock, and the remaining bits form a counter that advances on every
/// unlock. Readers never take the lock. They remember the version observed by
/// [`OptLock::read_lock`] and re-validate it with [`OptLock::check`] after
/// every read they intend to act on.
#[repr(transparent)]
pub(crate) struct OptLock(AtomicU64);

impl OptLock {
    pub(crate) fn new() -> OptLock {
        OptLock(AtomicU64::new(0))
    }

    /// Wait for any writer to finish and return a version usable for
    /// validation. Fails when the node has been marked obsolete.
    pub(crate) fn read_lock(&self) -> Result<u64, Restart> {
        let version = self.wait_unlock();
        if version & OBSOLETE_BIT != 0 {
            return Err(Restart);
        }
        Ok(version)
    }

    /// Validate that the node has not changed since `version` was observed.
    /// In optimistic coupling this doubles as the read "unlock".
    pub(crate) fn check(&self, version: u64) -> Result<(), Restart> {
        if self.0.load(Ordering::Acquire) == version {
            Ok(())
        } else {
            Err(Restart)
        }
    }

    /// Atomically trade a validated read for the write lock. Any intervening
    /// change makes the exchange fail.
    pub(crate) fn upgrade(&self, version: u64) -> Result<(), Restart> {
        self.0
            .compare_exchange(
                version,
                version + LOCKED_BIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .map(|_| ())
            .map_err(|_| Restart)
    }

    /// Take the write lock outright, retrying lost upgrade races. Still fails
    /// if the node turns obsolete while waiting.
    pub(crate) fn lock(&self) -> Result<(), Restart> {
        loop {
            let version = self.read_lock()?;
            if self.upgrade(version).is_ok() {
                return Ok(());
            }
        }
    }

    pub(crate) fn unlock(&self) {
        self.0.fetch_add(LOCKED_BIT, Ordering::Release);
    }

    /// Release the write lock and mark the node obsolete in one step. Used
    /// when the node has been replaced by a freshly allocated one.
    pub(crate) fn unlock_obsolete(&self) {
        self.0
            .fetch_add(LOCKED_BIT | OBSOLETE_BIT, Ordering::Release);
    }

    fn wait_unlock(&self) -> u64 {
        let mut version = self.0.load(Ordering::Acquire);
        let mut spins = SPIN_COUNT;
        while version & LOCKED_BIT != 0 {
            if spins == 0 {
                thread::yield_now();
                spins = SPIN_COUNT;
            } else {
                std::hint::spin_loop();
                spins -= 1;
            }
            version = self.0.load(Ordering::Acquire);
        }
        version
    }
}
