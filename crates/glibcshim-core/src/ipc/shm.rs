//! System V shared memory.
//!
//! Segments live in a single address space, so attaching returns the one
//! mapping the segment was created with. The memory itself comes from a
//! [`SegmentBacking`].

use parking_lot::Mutex;

use super::{IpcError, IpcLimits, IpcResult, Slots, key_lookup};
use crate::error::Resource;

pub const SHM_RDONLY: i32 = 0o10000;

/// Provider of zeroed, page-aligned memory for segments.
pub trait SegmentBacking {
    /// Returns the address of `size` fresh zeroed bytes.
    fn allocate(&self, size: usize) -> IpcResult<usize>;
    fn release(&self, addr: usize, size: usize);
}

#[derive(Debug)]
struct Segment {
    /// `None` once marked for removal; the key no longer finds it.
    key: Option<i32>,
    addr: usize,
    size: usize,
    nattch: usize,
}

/// `shmid_ds` fields the table tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmStat {
    pub key: i32,
    pub size: usize,
    pub nattch: usize,
    pub removed: bool,
}

pub struct ShmTable<B> {
    limits: IpcLimits,
    backing: B,
    segments: Mutex<Slots<Segment>>,
}

impl<B: SegmentBacking> ShmTable<B> {
    pub fn new(limits: IpcLimits, backing: B) -> Self {
        Self {
            limits,
            backing,
            segments: Mutex::new(Slots::new(limits.shm_segments)),
        }
    }

    /// `shmget`.
    pub fn get(&self, key: i32, size: usize, flags: i32) -> IpcResult<i32> {
        let mut segments = self.segments.lock();
        let mut allocated = None;
        let result = key_lookup(
            &mut segments,
            key,
            flags,
            Resource::SharedMemory,
            |s| s.key,
            |s| {
                if size > s.size {
                    Err(IpcError::Invalid)
                } else {
                    Ok(())
                }
            },
            || {
                if size == 0 || size > self.limits.shm_max_size {
                    return Err(IpcError::Invalid);
                }
                let addr = self.backing.allocate(size)?;
                allocated = Some(addr);
                Ok(Segment {
                    key: Some(key),
                    addr,
                    size,
                    nattch: 0,
                })
            },
        );
        if result.is_err()
            && let Some(addr) = allocated
        {
            self.backing.release(addr, size);
        }
        result
    }

    /// `shmat`. A non-null `at` must name the segment's own address.
    pub fn attach(&self, id: i32, at: usize) -> IpcResult<usize> {
        let mut segments = self.segments.lock();
        let seg = segments.get_mut(id).ok_or(IpcError::Invalid)?;
        if at != 0 && at != seg.addr {
            return Err(IpcError::Invalid);
        }
        seg.nattch += 1;
        Ok(seg.addr)
    }

    /// `shmdt`.
    pub fn detach(&self, addr: usize) -> IpcResult<()> {
        let mut segments = self.segments.lock();
        let id = segments
            .find(|s| s.addr == addr && s.nattch > 0)
            .ok_or(IpcError::Invalid)?;
        let release = match segments.get_mut(id) {
            Some(seg) => {
                seg.nattch -= 1;
                seg.nattch == 0 && seg.key.is_none()
            }
            None => false,
        };
        if release && let Some(seg) = segments.remove(id) {
            self.backing.release(seg.addr, seg.size);
        }
        Ok(())
    }

    /// `shmctl(IPC_STAT)`.
    pub fn stat(&self, id: i32) -> IpcResult<ShmStat> {
        let segments = self.segments.lock();
        let seg = segments.get(id).ok_or(IpcError::Invalid)?;
        Ok(ShmStat {
            key: seg.key.unwrap_or(super::IPC_PRIVATE),
            size: seg.size,
            nattch: seg.nattch,
            removed: seg.key.is_none(),
        })
    }

    /// `shmctl(IPC_RMID)`. The memory is released when the last attachment
    /// goes away.
    pub fn remove(&self, id: i32) -> IpcResult<()> {
        let mut segments = self.segments.lock();
        let seg = segments.get_mut(id).ok_or(IpcError::Invalid)?;
        seg.key = None;
        if seg.nattch == 0
            && let Some(seg) = segments.remove(id)
        {
            self.backing.release(seg.addr, seg.size);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
