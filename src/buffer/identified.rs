//! # Identified Buffer
//!
//! An [`IdentifiedBuffer`] is a [`BoundedBuffer`] carrying a write-once
//! numeric identity. The broker uses the identity as a routing label to find
//! the processed-item buffer belonging to a given optimization run; the
//! identity carries no ownership implications beyond the base buffer.
//!
//! The id follows set-once semantics: the first [`set_id`] call wins, all
//! later calls are ignored. This is intentionally *not* an error: several
//! registration paths may race to label the same buffer, and only the first
//! one matters.
//!
//! [`set_id`]: IdentifiedBuffer::set_id

use std::ops::Deref;
use std::sync::OnceLock;

use super::BoundedBuffer;

/// The numeric identity assigned to a buffer by the broker.
pub type BufferId = u32;

/// A bounded buffer with a write-once routing id.
///
/// Derefs to [`BoundedBuffer`], so all push/pop operations are available
/// directly on the wrapper.
///
/// ## Example
///
/// ```rust
/// use gendist::buffer::IdentifiedBuffer;
///
/// let buffer: IdentifiedBuffer<u64> = IdentifiedBuffer::new(128);
/// assert!(buffer.set_id(7));
/// assert!(!buffer.set_id(8)); // ignored
/// assert_eq!(buffer.id(), Some(7));
/// ```
#[derive(Debug)]
pub struct IdentifiedBuffer<T> {
    buffer: BoundedBuffer<T>,
    id: OnceLock<BufferId>,
}

impl<T> IdentifiedBuffer<T> {
    /// Creates an identified buffer with the given capacity (`0` =
    /// unbounded). The id starts out unset.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BoundedBuffer::new(capacity),
            id: OnceLock::new(),
        }
    }

    /// Assigns the buffer's identity. Only the first call has an effect;
    /// returns whether this call was the one that set the id.
    pub fn set_id(&self, id: BufferId) -> bool {
        self.id.set(id).is_ok()
    }

    /// The assigned identity, or `None` if no id has been set yet.
    pub fn id(&self) -> Option<BufferId> {
        self.id.get().copied()
    }
}

impl<T> Deref for IdentifiedBuffer<T> {
    type Target = BoundedBuffer<T>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}
