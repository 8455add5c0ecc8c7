use std::sync::mpsc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Device;

/// Id a device reports before the supervisor assigns one.
pub const UNASSIGNED_ID: i32 = -999;

/// A non-sharable, read-only keyboard. Every read "presses a key" and returns
/// a pseudo-random value in `0..1000`; the address is ignored.
pub struct KeyboardDevice {
    id: i32,
    rng: StdRng,
}

impl KeyboardDevice {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// A keyboard whose key presses are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            id: UNASSIGNED_ID,
            rng,
        }
    }
}

impl Default for KeyboardDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for KeyboardDevice {
    fn id(&self) -> i32 {
        self.id
    }
    fn set_id(&mut self, id: i32) {
        self.id = id;
    }
    fn is_sharable(&self) -> bool {
        false
    }
    fn is_available(&self) -> bool {
        true
    }
    fn is_readable(&self) -> bool {
        true
    }
    fn is_writeable(&self) -> bool {
        false
    }
    fn read(&mut self, _address: i32) -> i32 {
        self.rng.gen_range(0..1000)
    }
    fn write(&mut self, _address: i32, _value: i32) {}
}

/// A sharable, write-only console. Writes are forwarded as
/// `(address, value)` pairs to the receiver returned by [`ConsoleDevice::new`].
pub struct ConsoleDevice {
    id: i32,
    send_queue: mpsc::Sender<(i32, i32)>,
}

impl ConsoleDevice {
    pub fn new() -> (Self, mpsc::Receiver<(i32, i32)>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                id: UNASSIGNED_ID,
                send_queue: tx,
            },
            rx,
        )
    }
}

impl Device for ConsoleDevice {
    fn id(&self) -> i32 {
        self.id
    }
    fn set_id(&mut self, id: i32) {
        self.id = id;
    }
    fn is_sharable(&self) -> bool {
        true
    }
    fn is_available(&self) -> bool {
        true
    }
    fn is_readable(&self) -> bool {
        false
    }
    fn is_writeable(&self) -> bool {
        true
    }
    fn read(&mut self, _address: i32) -> i32 {
        0
    }
    fn write(&mut self, address: i32, value: i32) {
        // Nobody listening is not an error for the writer.
        let _ = self.send_queue.send((address, value));
    }
}
