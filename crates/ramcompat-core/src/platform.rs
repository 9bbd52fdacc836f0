//! Platform bootstrap: page geometry and the bound supplemental allocator.
//!
//! A [`Platform`] is the immutable state every routing decision reads. It is
//! built exactly once per context; holding one is proof that bootstrap
//! succeeded, so its accessors cannot observe an uninitialized state. The C
//! boundary keeps the runtime "initialized" check for callers that reach the
//! accessors before `ramcompat_initialize`.

use crate::reply::{Reply, ReplyCode};
use crate::supplemental::{SupplementalAllocator, SupplementalFns};

/// Page size, mmap granularity and the derived page mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageGeometry {
    page_size: usize,
    mmap_granularity: usize,
    page_mask: usize,
}

impl PageGeometry {
    /// Validate explicit geometry.
    ///
    /// Zero for either value is `Insane`. A granularity that is not a whole
    /// number of pages, or a page size that is not a power of two, is
    /// `Unsupported`.
    pub fn new(page_size: usize, mmap_granularity: usize) -> Reply<Self> {
        crate::ram_check!(page_size != 0, ReplyCode::Insane);
        crate::ram_check!(mmap_granularity != 0, ReplyCode::Insane);
        crate::ram_check!(page_size.is_power_of_two(), ReplyCode::Unsupported);
        crate::ram_check!(
            mmap_granularity % page_size == 0,
            ReplyCode::Unsupported
        );
        Ok(Self {
            page_size,
            mmap_granularity,
            page_mask: !(page_size - 1),
        })
    }

    /// Query the running system. On unix the mmap granularity equals the
    /// page size.
    pub fn probe() -> Reply<Self> {
        let page_size = system_page_size()?;
        Self::new(page_size, page_size)
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub const fn mmap_granularity(&self) -> usize {
        self.mmap_granularity
    }

    #[must_use]
    pub const fn page_mask(&self) -> usize {
        self.page_mask
    }

    #[must_use]
    pub fn is_page_aligned<T>(&self, ptr: *const T) -> bool {
        (ptr as usize) & !self.page_mask == 0
    }

    /// Start of the page holding `ptr`. Null is `Disallowed`.
    pub fn containing_page<T>(&self, ptr: *const T) -> Reply<*const u8> {
        crate::ram_check!(!ptr.is_null(), ReplyCode::Disallowed);
        Ok(((ptr as usize) & self.page_mask) as *const u8)
    }

    /// Round `len` up to a whole number of mmap granules. `None` on overflow.
    #[must_use]
    pub fn round_to_granularity(&self, len: usize) -> Option<usize> {
        let g = self.mmap_granularity;
        len.checked_add(g - 1).map(|v| v / g * g)
    }
}

/// Page size reported by `sysconf`.
pub fn system_page_size() -> Reply<usize> {
    // SAFETY: sysconf has no memory-safety preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    crate::ram_check!(raw >= 0, ReplyCode::CrtFail);
    Ok(raw as usize)
}

/// Bootstrap result: geometry plus the supplemental allocator.
#[derive(Debug)]
pub struct Platform<S = SupplementalFns> {
    geometry: PageGeometry,
    supplemental: S,
}

impl<S: SupplementalAllocator> Platform<S> {
    /// Bind `supplemental` and probe the system geometry.
    pub fn initialize(supplemental: S) -> Reply<Self> {
        let page_size = system_page_size()?;
        Self::with_geometry(supplemental, page_size, page_size)
    }

    /// Bind `supplemental` with explicit, validated geometry.
    pub fn with_geometry(supplemental: S, page_size: usize, mmap_granularity: usize) -> Reply<Self> {
        Ok(Self {
            geometry: PageGeometry::new(page_size, mmap_granularity)?,
            supplemental,
        })
    }

    #[must_use]
    pub const fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    #[must_use]
    pub const fn supplemental(&self) -> &S {
        &self.supplemental
    }
}

impl Platform<SupplementalFns> {
    /// Bootstrap with the native allocator and the system geometry.
    pub fn native() -> Reply<Self> {
        Self::initialize(SupplementalFns::native()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_geometry_is_insane() {
        assert_eq!(PageGeometry::new(0, 4096), Err(ReplyCode::Insane));
        assert_eq!(PageGeometry::new(4096, 0), Err(ReplyCode::Insane));
    }

    #[test]
    fn granularity_must_be_page_multiple() {
        assert_eq!(PageGeometry::new(4096, 6000), Err(ReplyCode::Unsupported));
        assert_eq!(PageGeometry::new(3000, 6000), Err(ReplyCode::Unsupported));
        let g = PageGeometry::new(4096, 65536).unwrap();
        assert_eq!(g.mmap_granularity(), 65536);
    }

    #[test]
    fn page_mask_and_alignment() {
        let g = PageGeometry::new(4096, 4096).unwrap();
        assert_eq!(g.page_mask(), !0xfff);
        assert!(g.is_page_aligned(0x7000 as *const u8));
        assert!(!g.is_page_aligned(0x7008 as *const u8));
        assert_eq!(g.containing_page(0x7abc as *const u8), Ok(0x7000 as *const u8));
        assert_eq!(
            g.containing_page(std::ptr::null::<u8>()),
            Err(ReplyCode::Disallowed)
        );
    }

    #[test]
    fn granularity_rounding() {
        let g = PageGeometry::new(4096, 65536).unwrap();
        assert_eq!(g.round_to_granularity(1), Some(65536));
        assert_eq!(g.round_to_granularity(65536), Some(65536));
        assert_eq!(g.round_to_granularity(65537), Some(131072));
        assert_eq!(g.round_to_granularity(usize::MAX), None);
    }

    #[test]
    fn probe_matches_sysconf() {
        let g = PageGeometry::probe().unwrap();
        assert!(g.page_size().is_power_of_two());
        assert_eq!(g.mmap_granularity() % g.page_size(), 0);
    }

    #[test]
    fn native_platform_boots() {
        let p = Platform::native().unwrap();
        assert!(p.geometry().page_size() >= 4096);
        assert_eq!(p.geometry().page_size(), system_page_size().unwrap());
    }

    #[test]
    fn explicit_geometry_is_validated_at_bootstrap() {
        let native = || SupplementalFns::native().unwrap();
        let p = Platform::with_geometry(native(), 16384, 65536).unwrap();
        assert_eq!(p.geometry().page_size(), 16384);
        assert_eq!(p.geometry().mmap_granularity(), 65536);
        assert_eq!(
            Platform::with_geometry(native(), 0, 4096).err(),
            Some(ReplyCode::Insane)
        );
        assert_eq!(
            Platform::with_geometry(native(), 4096, 4097).err(),
            Some(ReplyCode::Unsupported)
        );
    }
}
