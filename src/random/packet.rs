//! # Random Packet
//!
//! A [`RandomPacket`] is a pre-filled, fixed-size array of uniform `[0, 1)`
//! numbers plus a cursor marking the next unconsumed entry. Packets are
//! produced in bulk by the factory's producer threads and consumed locally by
//! exactly one front-end at a time, so reading from a packet needs no
//! synchronization at all.
//!
//! A partially used packet can be recycled: entries before the cursor are
//! stale and get regenerated, entries after it are still fresh, high-quality
//! randomness and are kept.

use rand::Rng;

/// The number of `[0, 1)` values in a packet produced with the default
/// factory options.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// A fixed-size packet of uniform `[0, 1)` random numbers.
#[derive(Debug)]
pub struct RandomPacket {
    values: Box<[f64]>,
    cursor: usize,
}

impl RandomPacket {
    /// Creates a packet of `size` values drawn from `rng`.
    pub(crate) fn generate<R: Rng>(size: usize, rng: &mut R) -> Self {
        let values = (0..size).map(|_| rng.gen::<f64>()).collect();
        Self { values, cursor: 0 }
    }

    /// Returns the next unconsumed value, or `None` once the packet is
    /// exhausted.
    pub fn next(&mut self) -> Option<f64> {
        let value = self.values.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(value)
    }

    /// The total number of entries in the packet.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// The number of entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.values.len() - self.cursor
    }

    /// The index of the next unconsumed entry.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether every entry has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.values.len()
    }

    /// Replaces the consumed prefix with fresh values and rewinds the
    /// cursor. The unconsumed tail is deliberately left untouched.
    pub(crate) fn refill<R: Rng>(&mut self, rng: &mut R) {
        for slot in &mut self.values[..self.cursor] {
            *slot = rng.gen::<f64>();
        }
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_values_lie_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut packet = RandomPacket::generate(512, &mut rng);
        while let Some(v) = packet.next() {
            assert!((0.0..1.0).contains(&v));
        }
        assert!(packet.is_exhausted());
    }

    #[test]
    fn test_cursor_tracks_consumption() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut packet = RandomPacket::generate(8, &mut rng);
        assert_eq!(packet.remaining(), 8);
        packet.next();
        packet.next();
        assert_eq!(packet.cursor(), 2);
        assert_eq!(packet.remaining(), 6);
    }

    #[test]
    fn test_refill_preserves_unconsumed_tail() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut packet = RandomPacket::generate(8, &mut rng);
        packet.next();
        packet.next();
        packet.next();
        let tail: Vec<f64> = packet.values[3..].to_vec();

        packet.refill(&mut rng);
        assert_eq!(packet.cursor(), 0);
        assert_eq!(packet.remaining(), 8);
        assert_eq!(&packet.values[3..], tail.as_slice());
    }

    #[test]
    fn test_exhausted_packet_refills_completely() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut packet = RandomPacket::generate(4, &mut rng);
        let first_run: Vec<f64> = std::iter::from_fn(|| packet.next()).collect();
        assert_eq!(first_run.len(), 4);

        packet.refill(&mut rng);
        let second_run: Vec<f64> = std::iter::from_fn(|| packet.next()).collect();
        assert_eq!(second_run.len(), 4);
        assert_ne!(first_run, second_run);
    }
}
