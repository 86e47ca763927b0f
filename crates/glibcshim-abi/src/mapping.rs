//! Address-space management for foreign images.
//!
//! An image is mapped as one anonymous read-write span covering every
//! `PT_LOAD` segment, the file bytes are copied in, and final protections
//! are applied only after relocation. The span unmaps itself on drop, so a
//! load that fails at any point leaves nothing behind.

use std::ops::Range;
use std::ptr::NonNull;

use glibcshim_core::ShimError;
use glibcshim_core::elf::{ElfType, ForeignImage, PAGE_SIZE};
use glibcshim_runtime::shim_trace;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("mmap of {len:#x} bytes failed (errno {errno})")]
    Map { len: usize, errno: i32 },
    #[error("fixed address {addr:#x} is already in use")]
    FixedAddress { addr: usize },
    #[error("mprotect of [{addr:#x}, +{len:#x}) failed (errno {errno})")]
    Protect { addr: usize, len: usize, errno: i32 },
    #[error("segment at {vaddr:#x} does not fit the mapped span")]
    SegmentRange { vaddr: u64 },
}

impl MapError {
    pub fn into_shim(self, path: &str) -> ShimError {
        ShimError::load(path, self)
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// An owned anonymous mapping.
#[derive(Debug)]
pub struct MappedSpan {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the span is plain memory; the registry lock serializes mutation
// and foreign code reads it as it would any shared object.
unsafe impl Send for MappedSpan {}
unsafe impl Sync for MappedSpan {}

impl MappedSpan {
    /// Reserve `len` zeroed read-write bytes, at `fixed` when given.
    pub fn reserve(len: usize, fixed: Option<usize>) -> Result<Self, MapError> {
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        let hint = match fixed {
            Some(addr) => {
                flags |= libc::MAP_FIXED_NOREPLACE;
                addr as *mut libc::c_void
            }
            None => std::ptr::null_mut(),
        };
        // SAFETY: anonymous mapping; MAP_FIXED_NOREPLACE never clobbers an
        // existing mapping.
        let ptr = unsafe {
            libc::mmap(
                hint,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let errno = last_errno();
            return Err(match fixed {
                Some(addr) if errno == libc::EEXIST => MapError::FixedAddress { addr },
                _ => MapError::Map { len, errno },
            });
        }
        // Kernels without MAP_FIXED_NOREPLACE treat it as a hint.
        if let Some(addr) = fixed
            && ptr as usize != addr
        {
            // SAFETY: `ptr` was just mapped with `len` bytes.
            unsafe { libc::munmap(ptr, len) };
            return Err(MapError::FixedAddress { addr });
        }
        let base = NonNull::new(ptr.cast::<u8>()).ok_or(MapError::Map { len, errno: 0 })?;
        shim_trace!("map", "reserved {len:#x} bytes at {:#x}", base.as_ptr() as usize);
        Ok(Self { base, len })
    }

    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.base()..self.base() + self.len
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.range().contains(&addr)
    }

    /// The whole span as bytes.
    ///
    /// # Safety
    ///
    /// Every page must still be writable, and no foreign code may be running
    /// from the span.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }

    /// Change protection of the pages covering `[offset, offset + len)`.
    pub fn protect(&self, offset: usize, len: usize, prot: i32) -> Result<(), MapError> {
        let page = PAGE_SIZE as usize;
        let start = offset / page * page;
        let end = (offset + len).div_ceil(page) * page;
        if end > self.len || start >= end {
            return Ok(());
        }
        let addr = self.base() + start;
        // SAFETY: the range lies inside this span.
        let rc = unsafe { libc::mprotect(addr as *mut libc::c_void, end - start, prot) };
        if rc != 0 {
            return Err(MapError::Protect {
                addr,
                len: end - start,
                errno: last_errno(),
            });
        }
        Ok(())
    }
}

impl Drop for MappedSpan {
    fn drop(&mut self) {
        shim_trace!("map", "unmapping {:#x}+{:#x}", self.base(), self.len);
        // SAFETY: the span owns this mapping.
        unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
    }
}

/// Reserve a span for `image` and copy its segments in. Returns the span and
/// the load bias (runtime minus link-time address).
pub fn map_image(image: &ForeignImage, data: &[u8]) -> Result<(MappedSpan, u64), MapError> {
    let min = image.min_vaddr();
    let len = image.map_size() as usize;
    let fixed = matches!(image.header.e_type, ElfType::Exec).then_some(min as usize);
    let mut span = MappedSpan::reserve(len, fixed)?;
    let bias = (span.base() as u64).wrapping_sub(min);

    // SAFETY: freshly mapped read-write, not yet visible to anyone.
    let bytes = unsafe { span.as_mut_slice() };
    for seg in &image.segments {
        let src = usize::try_from(seg.file_offset)
            .ok()
            .zip(usize::try_from(seg.filesz).ok())
            .and_then(|(off, n)| data.get(off..off.checked_add(n)?))
            .ok_or(MapError::SegmentRange { vaddr: seg.vaddr })?;
        let dst_off = (seg.vaddr - min) as usize;
        let dst = bytes
            .get_mut(dst_off..dst_off + src.len())
            .ok_or(MapError::SegmentRange { vaddr: seg.vaddr })?;
        dst.copy_from_slice(src);
    }
    Ok((span, bias))
}

/// Apply each segment's final protection, then make `PT_GNU_RELRO` read-only.
pub fn apply_protections(span: &MappedSpan, image: &ForeignImage) -> Result<(), MapError> {
    let min = image.min_vaddr();
    for seg in &image.segments {
        let start = (seg.page_start() - min) as usize;
        let len = (seg.page_end() - seg.page_start()) as usize;
        span.protect(start, len, seg.flags.to_mmap_prot())?;
    }
    if let Some((vaddr, memsz)) = image.relro {
        // The tail page stays writable when RELRO ends mid-page.
        let page = PAGE_SIZE;
        let start = vaddr / page * page;
        let end = (vaddr + memsz) / page * page;
        if end > start {
            span.protect((start - min) as usize, (end - start) as usize, libc::PROT_READ)?;
        }
    }
    Ok(())
}
