//! Candidate port selection for new shares.

use std::ops::Range;

use rand::Rng;

/// First port of the dynamic/ephemeral range (inclusive).
pub const DYNAMIC_PORT_START: u16 = 49152;

/// End of the dynamic/ephemeral range (exclusive).
pub const DYNAMIC_PORT_END: u16 = 65535;

/// Source of candidate share ports.
///
/// Allocators are stateless: the registry keeps drawing candidates until
/// one is not already live.
pub trait PortAllocator: Send + Sync {
    /// Draw one candidate port.
    fn candidate(&self) -> u16;

    /// Number of distinct ports this allocator can produce.
    fn capacity(&self) -> usize;
}

/// Draws ports uniformly from a half-open range.
#[derive(Debug, Clone)]
pub struct RandomPortAllocator {
    range: Range<u16>,
}

impl RandomPortAllocator {
    /// Create an allocator over `range`.
    ///
    /// # Panics
    ///
    /// Panics if the range is empty.
    pub fn new(range: Range<u16>) -> Self {
        assert!(!range.is_empty(), "port range must not be empty");
        Self { range }
    }

    /// The range candidates are drawn from.
    pub fn range(&self) -> Range<u16> {
        self.range.clone()
    }
}

impl Default for RandomPortAllocator {
    fn default() -> Self {
        Self::new(DYNAMIC_PORT_START..DYNAMIC_PORT_END)
    }
}

impl PortAllocator for RandomPortAllocator {
    fn candidate(&self) -> u16 {
        rand::thread_rng().gen_range(self.range.clone())
    }

    fn capacity(&self) -> usize {
        self.range.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_range_is_dynamic_range() {
        let allocator = RandomPortAllocator::default();
        assert_eq!(allocator.range(), 49152..65535);
        assert_eq!(allocator.capacity(), 16383);
    }

    #[test]
    fn test_candidates_stay_in_range() {
        let allocator = RandomPortAllocator::default();
        for _ in 0..10_000 {
            let port = allocator.candidate();
            assert!((DYNAMIC_PORT_START..DYNAMIC_PORT_END).contains(&port));
        }
    }

    #[test]
    fn test_single_port_range() {
        let allocator = RandomPortAllocator::new(50000..50001);
        assert_eq!(allocator.capacity(), 1);
        assert_eq!(allocator.candidate(), 50000);
    }

    #[test]
    #[should_panic(expected = "port range must not be empty")]
    fn test_empty_range_panics() {
        let _ = RandomPortAllocator::new(50000..50000);
    }
}
