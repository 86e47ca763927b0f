//! Userspace emulation of POSIX message queues and System V IPC.
//!
//! Each table is a fixed-capacity slot array behind its own mutex and
//! condition variable, so operations on different tables never contend.
//! Blocking calls wait on the table's condition variable with the usual
//! would-block (`IPC_NOWAIT` / `O_NONBLOCK`) and deadline semantics. A
//! blocked waiter cannot be cancelled.
//!
//! Flag arguments use glibc's numeric values, which foreign callers pass
//! unchanged.

pub mod mqueue;
pub mod msg;
pub mod sem;
pub mod shm;

use std::time::Instant;

use parking_lot::{Condvar, MutexGuard};
use thiserror::Error;

use crate::error::{Resource, errno};

pub use mqueue::{MqAttr, MqTable};
pub use msg::{MsgQueueStat, MsgTable};
pub use sem::{SemOp, SemSetStat, SemTable};
pub use shm::{SegmentBacking, ShmStat, ShmTable};

pub const IPC_PRIVATE: i32 = 0;
pub const IPC_CREAT: i32 = 0o1000;
pub const IPC_EXCL: i32 = 0o2000;
pub const IPC_NOWAIT: i32 = 0o4000;

pub const IPC_RMID: i32 = 0;
pub const IPC_SET: i32 = 1;
pub const IPC_STAT: i32 = 2;

/// Capacities of the emulated tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcLimits {
    pub mq_queues: usize,
    pub mq_descriptors: usize,
    pub mq_max_messages: usize,
    pub mq_max_msgsize: usize,
    pub shm_segments: usize,
    pub shm_max_size: usize,
    pub sem_sets: usize,
    pub sem_per_set: usize,
    pub msg_queues: usize,
    pub msg_max_messages: usize,
    pub msg_max_size: usize,
}

impl Default for IpcLimits {
    fn default() -> Self {
        Self {
            mq_queues: 16,
            mq_descriptors: 64,
            mq_max_messages: 64,
            mq_max_msgsize: 4096,
            shm_segments: 64,
            shm_max_size: 256 << 20,
            sem_sets: 64,
            sem_per_set: 64,
            msg_queues: 16,
            msg_max_messages: 64,
            msg_max_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IpcError {
    #[error("already exists")]
    Exists,
    #[error("no such object")]
    NotFound,
    #[error("{0} full")]
    TableFull(Resource),
    #[error("bad descriptor")]
    BadDescriptor,
    #[error("message too long")]
    MessageSize,
    #[error("operation would block")]
    WouldBlock,
    #[error("no message of the requested type")]
    NoMessage,
    #[error("message larger than buffer")]
    TooBig,
    #[error("invalid argument")]
    Invalid,
    #[error("semaphore number out of range")]
    SemaphoreIndex,
    #[error("value out of range")]
    Range,
    #[error("identifier removed")]
    Removed,
    #[error("timed out")]
    TimedOut,
}

impl IpcError {
    pub fn errno(self) -> i32 {
        match self {
            Self::Exists => errno::EEXIST,
            Self::NotFound => errno::ENOENT,
            Self::TableFull(r) if r.is_descriptor_table() => errno::EMFILE,
            Self::TableFull(_) => errno::ENOSPC,
            Self::BadDescriptor => errno::EBADF,
            Self::MessageSize => errno::EMSGSIZE,
            Self::WouldBlock => errno::EAGAIN,
            Self::NoMessage => errno::ENOMSG,
            Self::TooBig => errno::E2BIG,
            Self::Invalid => errno::EINVAL,
            Self::SemaphoreIndex => errno::EFBIG,
            Self::Range => errno::ERANGE,
            Self::Removed => errno::EIDRM,
            Self::TimedOut => errno::ETIMEDOUT,
        }
    }
}

pub type IpcResult<T> = Result<T, IpcError>;

/// Fixed-capacity slots addressed by ids that encode a reuse sequence, so a
/// stale id never reaches the object that later took its slot.
#[derive(Debug)]
pub(crate) struct Slots<T> {
    entries: Vec<Option<T>>,
    seq: Vec<u16>,
}

const SEQ_SHIFT: u32 = 15;
const INDEX_MASK: i32 = (1 << SEQ_SHIFT) - 1;

impl<T> Slots<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.min(INDEX_MASK as usize + 1);
        Self {
            entries: (0..capacity).map(|_| None).collect(),
            seq: vec![0; capacity],
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn insert(&mut self, value: T) -> Option<i32> {
        let index = self.entries.iter().position(Option::is_none)?;
        self.entries[index] = Some(value);
        Some(self.id(index))
    }

    fn id(&self, index: usize) -> i32 {
        (i32::from(self.seq[index] & 0x7fff) << SEQ_SHIFT) | index as i32
    }

    fn index(&self, id: i32) -> Option<usize> {
        if id < 0 {
            return None;
        }
        let index = (id & INDEX_MASK) as usize;
        (index < self.entries.len() && self.id(index) == id).then_some(index)
    }

    pub(crate) fn get(&self, id: i32) -> Option<&T> {
        self.entries[self.index(id)?].as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: i32) -> Option<&mut T> {
        let index = self.index(id)?;
        self.entries[index].as_mut()
    }

    pub(crate) fn remove(&mut self, id: i32) -> Option<T> {
        let index = self.index(id)?;
        let value = self.entries[index].take()?;
        self.seq[index] = self.seq[index].wrapping_add(1);
        Some(value)
    }

    pub(crate) fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<i32> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.as_ref().is_some_and(&mut pred))
            .map(|(i, _)| self.id(i))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// `get`-style lookup shared by the System V tables: find by key or create.
pub(crate) fn key_lookup<T>(
    slots: &mut Slots<T>,
    key: i32,
    flags: i32,
    resource: Resource,
    key_of: impl Fn(&T) -> Option<i32>,
    validate_existing: impl FnOnce(&T) -> IpcResult<()>,
    create: impl FnOnce() -> IpcResult<T>,
) -> IpcResult<i32> {
    if key != IPC_PRIVATE {
        if let Some(id) = slots.find(|t| key_of(t) == Some(key)) {
            if flags & IPC_CREAT != 0 && flags & IPC_EXCL != 0 {
                return Err(IpcError::Exists);
            }
            if let Some(existing) = slots.get(id) {
                validate_existing(existing)?;
            }
            return Ok(id);
        }
        if flags & IPC_CREAT == 0 {
            return Err(IpcError::NotFound);
        }
    }
    let value = create()?;
    slots.insert(value).ok_or(IpcError::TableFull(resource))
}

/// Wait on `cond` until `deadline` (or forever). Returns `TimedOut` once the
/// deadline has passed.
pub(crate) fn wait<T>(
    cond: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    deadline: Option<Instant>,
) -> IpcResult<()> {
    match deadline {
        None => {
            cond.wait(guard);
            Ok(())
        }
        Some(at) => {
            if Instant::now() >= at {
                return Err(IpcError::TimedOut);
            }
            cond.wait_until(guard, at);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_ids_do_not_alias() {
        let mut slots = Slots::new(2);
        let a = slots.insert("a").unwrap();
        assert_eq!(slots.get(a), Some(&"a"));
        slots.remove(a).unwrap();
        let b = slots.insert("b").unwrap();
        assert_ne!(a, b);
        assert!(slots.get(a).is_none());
        assert_eq!(slots.get(b), Some(&"b"));
        assert!(slots.get(-1).is_none());
    }

    #[test]
    fn slots_fill_up() {
        let mut slots = Slots::new(1);
        slots.insert(1).unwrap();
        assert!(slots.insert(2).is_none());
        assert_eq!(slots.len(), 1);
        assert_eq!(slots.capacity(), 1);
    }

    #[test]
    fn errno_values() {
        assert_eq!(IpcError::TableFull(Resource::MessageQueues).errno(), errno::EMFILE);
        assert_eq!(IpcError::TableFull(Resource::SharedMemory).errno(), errno::ENOSPC);
        assert_eq!(IpcError::SemaphoreIndex.errno(), errno::EFBIG);
        assert_eq!(IpcError::Removed.errno(), errno::EIDRM);
    }

    #[test]
    fn default_limits() {
        let l = IpcLimits::default();
        assert_eq!((l.mq_queues, l.mq_max_messages, l.mq_max_msgsize), (16, 64, 4096));
        assert_eq!((l.sem_sets, l.sem_per_set), (64, 64));
        assert_eq!(l.shm_segments, 64);
    }
}
