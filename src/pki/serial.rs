//! Certificate serial numbers
//!
//! Every certificate handed out must be uniquely identifiable to its CA.
//! Serials are 16 bytes: a process-wide counter seeded from the wall clock,
//! followed by 8 random bytes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

/// Length of an allocated serial in bytes
pub const SERIAL_LEN: usize = 16;

/// A positive certificate serial number in big-endian bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Serial([u8; SERIAL_LEN]);

impl Serial {
    /// Big-endian bytes of the serial
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex, no separators (as accepted by `openssl -set_serial 0x...`)
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hands out serials that never repeat within the process
#[derive(Debug)]
pub struct SerialAllocator {
    counter: AtomicU64,
}

impl SerialAllocator {
    /// Create an allocator seeded from the current time
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_seed(seed)
    }

    /// Create an allocator whose counter starts at `seed`
    pub fn with_seed(seed: u64) -> Self {
        Self {
            counter: AtomicU64::new(seed),
        }
    }

    /// Allocate the next serial
    pub fn next_serial(&self) -> Serial {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; SERIAL_LEN];
        bytes[..8].copy_from_slice(&sequence.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut bytes[8..]);

        // Positive, and no leading zero byte in the DER INTEGER
        bytes[0] = (bytes[0] & 0x7f) | 0x40;

        Serial(bytes)
    }
}

impl Default for SerialAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn serials_are_pairwise_distinct() {
        let allocator = SerialAllocator::new();
        let serials: HashSet<Serial> = (0..1000).map(|_| allocator.next_serial()).collect();
        assert_eq!(serials.len(), 1000);
    }

    #[test]
    fn serials_are_positive_and_minimally_encoded() {
        let allocator = SerialAllocator::with_seed(0);
        for _ in 0..100 {
            let serial = allocator.next_serial();
            assert_eq!(serial.as_bytes()[0] & 0x80, 0);
            assert_ne!(serial.as_bytes()[0], 0);
        }
    }

    #[test]
    fn serials_are_distinct_across_threads() {
        let allocator = Arc::new(SerialAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..250).map(|_| allocator.next_serial()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for serial in handle.join().unwrap() {
                assert!(seen.insert(serial), "duplicate serial {serial}");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn hex_rendering_is_fixed_width() {
        let serial = SerialAllocator::with_seed(1).next_serial();
        let hex = serial.to_hex();
        assert_eq!(hex.len(), SERIAL_LEN * 2);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(hex.starts_with("40000000000000"));
    }
}
