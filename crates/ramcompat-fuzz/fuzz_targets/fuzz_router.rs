#![no_main]
use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use ramcompat_core::Compat;

static SHIM: OnceLock<Option<Compat>> = OnceLock::new();

// Each 4-byte chunk is one operation: opcode, 16-bit size, slot selector.
fuzz_target!(|data: &[u8]| {
    let Some(shim) = SHIM.get_or_init(|| Compat::native().ok()).as_ref() else {
        return;
    };
    let mut live: Vec<(*mut u8, usize)> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let slot = chunk[3] as usize;
        match chunk[0] % 5 {
            0 => {
                if let Ok(p) = shim.allocate(size) {
                    // SAFETY: fresh allocation of `size` bytes.
                    unsafe { p.as_ptr().write_bytes(chunk[3], size) };
                    live.push((p.as_ptr(), size));
                }
            }
            1 => {
                if let Ok(p) = shim.zeroed_allocate(size >> 8, size & 0xff) {
                    live.push((p.as_ptr(), (size >> 8) * (size & 0xff)));
                }
            }
            2 if !live.is_empty() => {
                let (p, _) = live.swap_remove(slot % live.len());
                // SAFETY: `p` is live and released once.
                unsafe { shim.release(p) };
            }
            3 if !live.is_empty() => {
                let idx = slot % live.len();
                let (p, old) = live[idx];
                // SAFETY: `p` is live; on success it is consumed.
                match unsafe { shim.reallocate(p, size) } {
                    Ok(Some(q)) => {
                        // SAFETY: `q` holds at least `size` bytes.
                        let usable = unsafe { shim.size_of(q.as_ptr()) }.unwrap_or(0);
                        assert!(usable >= size.min(old));
                        live[idx] = (q.as_ptr(), size);
                    }
                    Ok(None) => {
                        live.swap_remove(idx);
                    }
                    Err(_) => {}
                }
            }
            4 if !live.is_empty() => {
                let (p, len) = live[slot % live.len()];
                // SAFETY: `p` is live.
                let tagged = unsafe { shim.get_or_create_tag(p, |_, n| Ok(n)) };
                if let Ok(n) = tagged {
                    assert!(n >= len);
                }
            }
            _ => {}
        }
    }

    for (p, _) in live {
        // SAFETY: every remaining pointer is live and released once.
        unsafe { shim.release(p) };
    }
});
