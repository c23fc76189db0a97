use segstore_storage::SegmentHandle;
use std::sync::atomic::{AtomicU64, Ordering};

/// An open attribute segment and the length this index believes it has.
///
/// Appends always target the believed length. The storage rejects them if
/// another writer got there first, after which the length is resynced.
#[derive(Debug)]
pub(crate) struct AttributeSegment {
    handle: SegmentHandle,
    length: AtomicU64,
}

impl AttributeSegment {
    pub(crate) fn new(handle: SegmentHandle, length: u64) -> Self {
        Self {
            handle,
            length: AtomicU64::new(length),
        }
    }

    pub(crate) fn handle(&self) -> &SegmentHandle {
        &self.handle
    }

    pub(crate) fn name(&self) -> &str {
        self.handle.segment_name()
    }

    pub(crate) fn length(&self) -> u64 {
        self.length.load(Ordering::SeqCst)
    }

    pub(crate) fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::SeqCst);
    }

    pub(crate) fn increase_length(&self, delta: u64) {
        self.length.fetch_add(delta, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_tracking() {
        let segment = AttributeSegment::new(SegmentHandle::writable("s$attributes"), 10);
        assert_eq!(segment.name(), "s$attributes");
        assert_eq!(segment.length(), 10);

        segment.increase_length(5);
        assert_eq!(segment.length(), 15);

        segment.set_length(40);
        assert_eq!(segment.length(), 40);
    }
}
