//! Size classes served by the slab pool.
//!
//! Requests smaller than a machine word or larger than [`MAX_CLASS_SIZE`]
//! have no class; the pool answers them with `RangeFail`.

/// Smallest request the pool accepts (bytes).
pub const MIN_REQUEST: usize = std::mem::size_of::<usize>();

/// Largest class (bytes).
pub const MAX_CLASS_SIZE: usize = 2048;

/// Number of classes.
pub const NUM_CLASSES: usize = 20;

/// Class sizes: 16-byte steps up to 128, then wider steps up to 2 KiB.
/// Every class is a multiple of 16 so slot starts stay 16-byte aligned.
const CLASS_TABLE: [usize; NUM_CLASSES] = [
    16, 32, 48, 64, 80, 96, 112, 128, // 16-byte steps
    160, 192, 256, 320, 384, 512, 640, 768, // wider
    1024, 1280, 1536, 2048,
];

/// Class index serving `size`, or `None` when the pool cannot serve it.
#[must_use]
pub fn class_index(size: usize) -> Option<usize> {
    if !(MIN_REQUEST..=MAX_CLASS_SIZE).contains(&size) {
        return None;
    }
    CLASS_TABLE.iter().position(|&class| size <= class)
}

/// Slot size of class `index`; 0 when out of range.
#[must_use]
pub fn class_size(index: usize) -> usize {
    CLASS_TABLE.get(index).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_and_aligned() {
        for w in CLASS_TABLE.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert!(CLASS_TABLE.iter().all(|c| c % 16 == 0));
        assert_eq!(CLASS_TABLE[NUM_CLASSES - 1], MAX_CLASS_SIZE);
    }

    #[test]
    fn out_of_range_sizes_have_no_class() {
        assert_eq!(class_index(0), None);
        assert_eq!(class_index(MIN_REQUEST - 1), None);
        assert_eq!(class_index(MAX_CLASS_SIZE + 1), None);
        assert_eq!(class_index(usize::MAX), None);
    }

    #[test]
    fn sizes_round_up_to_their_class() {
        assert_eq!(class_index(MIN_REQUEST).map(class_size), Some(16));
        assert_eq!(class_index(16).map(class_size), Some(16));
        assert_eq!(class_index(17).map(class_size), Some(32));
        assert_eq!(class_index(200).map(class_size), Some(256));
        assert_eq!(class_index(2048).map(class_size), Some(2048));
        for size in MIN_REQUEST..=MAX_CLASS_SIZE {
            let idx = class_index(size).unwrap();
            assert!(class_size(idx) >= size);
            if idx > 0 {
                assert!(class_size(idx - 1) < size);
            }
        }
    }

    #[test]
    fn class_size_out_of_range_is_zero() {
        assert_eq!(class_size(NUM_CLASSES), 0);
    }
}
