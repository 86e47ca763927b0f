//! System V semaphore sets.
//!
//! `semop` applies its operation list atomically: either every operation in
//! the list can proceed and all are applied, or none is and the caller
//! blocks (or fails with `EAGAIN` under `IPC_NOWAIT`). `SEM_UNDO` is
//! accepted and ignored.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::{IPC_NOWAIT, IpcError, IpcLimits, IpcResult, Slots, key_lookup, wait};
use crate::error::Resource;

pub const GETPID: i32 = 11;
pub const GETVAL: i32 = 12;
pub const GETALL: i32 = 13;
pub const GETNCNT: i32 = 14;
pub const GETZCNT: i32 = 15;
pub const SETVAL: i32 = 16;
pub const SETALL: i32 = 17;

pub const SEM_UNDO: i32 = 0x1000;
/// Largest semaphore value.
pub const SEMVMX: i32 = 32767;

/// `struct sembuf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemOp {
    pub num: u16,
    pub op: i16,
    pub flags: i16,
}

impl SemOp {
    pub fn new(num: u16, op: i16) -> Self {
        Self { num, op, flags: 0 }
    }

    pub fn nowait(self) -> Self {
        Self {
            flags: self.flags | IPC_NOWAIT as i16,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Semaphore {
    value: i32,
    ncnt: u32,
    zcnt: u32,
    pid: i32,
}

#[derive(Debug)]
struct SemSet {
    key: i32,
    sems: Vec<Semaphore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemSetStat {
    pub key: i32,
    pub nsems: usize,
}

#[derive(Debug)]
pub struct SemTable {
    limits: IpcLimits,
    sets: Mutex<Slots<SemSet>>,
    changed: Condvar,
}

enum Attempt {
    Done,
    /// Blocked on this semaphore; `true` when waiting for zero.
    Blocked(usize, bool),
}

impl SemTable {
    pub fn new(limits: IpcLimits) -> Self {
        Self {
            limits,
            sets: Mutex::new(Slots::new(limits.sem_sets)),
            changed: Condvar::new(),
        }
    }

    /// `semget`.
    pub fn get(&self, key: i32, nsems: i32, flags: i32) -> IpcResult<i32> {
        let nsems = usize::try_from(nsems).map_err(|_| IpcError::Invalid)?;
        if nsems > self.limits.sem_per_set {
            return Err(IpcError::Invalid);
        }
        let mut sets = self.sets.lock();
        key_lookup(
            &mut sets,
            key,
            flags,
            Resource::SemaphoreSets,
            |s| Some(s.key),
            |s| {
                if nsems > s.sems.len() {
                    Err(IpcError::Invalid)
                } else {
                    Ok(())
                }
            },
            || {
                if nsems == 0 {
                    return Err(IpcError::Invalid);
                }
                Ok(SemSet {
                    key,
                    sems: vec![Semaphore::default(); nsems],
                })
            },
        )
    }

    /// `semop` / `semtimedop`. `pid` is recorded as the last operator.
    pub fn op(&self, id: i32, ops: &[SemOp], pid: i32, deadline: Option<Instant>) -> IpcResult<()> {
        if ops.is_empty() {
            return Err(IpcError::Invalid);
        }
        let mut sets = self.sets.lock();
        let mut waited = false;
        loop {
            let Some(set) = sets.get_mut(id) else {
                return Err(if waited { IpcError::Removed } else { IpcError::Invalid });
            };
            let (index, zero) = match try_apply(set, ops, pid)? {
                Attempt::Done => {
                    self.changed.notify_all();
                    return Ok(());
                }
                Attempt::Blocked(index, zero) => (index, zero),
            };
            if ops.iter().any(|o| o.flags & IPC_NOWAIT as i16 != 0) {
                return Err(IpcError::WouldBlock);
            }

            adjust_waiters(&mut set.sems[index], zero, true);
            let outcome = wait(&self.changed, &mut sets, deadline);
            waited = true;
            if let Some(set) = sets.get_mut(id) {
                adjust_waiters(&mut set.sems[index], zero, false);
            }
            outcome?;
        }
    }

    pub fn getval(&self, id: i32, num: i32) -> IpcResult<i32> {
        self.with_sem(id, num, |s| s.value)
    }

    pub fn getncnt(&self, id: i32, num: i32) -> IpcResult<i32> {
        self.with_sem(id, num, |s| s.ncnt as i32)
    }

    pub fn getzcnt(&self, id: i32, num: i32) -> IpcResult<i32> {
        self.with_sem(id, num, |s| s.zcnt as i32)
    }

    pub fn getpid(&self, id: i32, num: i32) -> IpcResult<i32> {
        self.with_sem(id, num, |s| s.pid)
    }

    pub fn setval(&self, id: i32, num: i32, value: i32) -> IpcResult<()> {
        if !(0..=SEMVMX).contains(&value) {
            return Err(IpcError::Range);
        }
        self.with_sem(id, num, |s| s.value = value)?;
        self.changed.notify_all();
        Ok(())
    }

    pub fn getall(&self, id: i32) -> IpcResult<Vec<u16>> {
        let sets = self.sets.lock();
        let set = sets.get(id).ok_or(IpcError::Invalid)?;
        Ok(set.sems.iter().map(|s| s.value as u16).collect())
    }

    pub fn setall(&self, id: i32, values: &[u16]) -> IpcResult<()> {
        let mut sets = self.sets.lock();
        let set = sets.get_mut(id).ok_or(IpcError::Invalid)?;
        if values.len() < set.sems.len() {
            return Err(IpcError::Invalid);
        }
        if values.iter().any(|&v| i32::from(v) > SEMVMX) {
            return Err(IpcError::Range);
        }
        for (sem, &v) in set.sems.iter_mut().zip(values) {
            sem.value = i32::from(v);
        }
        self.changed.notify_all();
        Ok(())
    }

    pub fn stat(&self, id: i32) -> IpcResult<SemSetStat> {
        let sets = self.sets.lock();
        let set = sets.get(id).ok_or(IpcError::Invalid)?;
        Ok(SemSetStat {
            key: set.key,
            nsems: set.sems.len(),
        })
    }

    /// `semctl(IPC_RMID)`. Blocked operations fail with `EIDRM`.
    pub fn remove(&self, id: i32) -> IpcResult<()> {
        self.sets.lock().remove(id).ok_or(IpcError::Invalid)?;
        self.changed.notify_all();
        Ok(())
    }

    fn with_sem<R>(&self, id: i32, num: i32, f: impl FnOnce(&mut Semaphore) -> R) -> IpcResult<R> {
        let mut sets = self.sets.lock();
        let set = sets.get_mut(id).ok_or(IpcError::Invalid)?;
        let sem = usize::try_from(num)
            .ok()
            .and_then(|n| set.sems.get_mut(n))
            .ok_or(IpcError::Invalid)?;
        Ok(f(sem))
    }
}

fn try_apply(set: &mut SemSet, ops: &[SemOp], pid: i32) -> IpcResult<Attempt> {
    let mut values: Vec<i32> = set.sems.iter().map(|s| s.value).collect();
    for op in ops {
        let index = usize::from(op.num);
        let value = values.get_mut(index).ok_or(IpcError::SemaphoreIndex)?;
        match op.op {
            0 if *value != 0 => return Ok(Attempt::Blocked(index, true)),
            0 => {}
            delta => {
                let next = *value + i32::from(delta);
                if next < 0 {
                    return Ok(Attempt::Blocked(index, false));
                }
                if next > SEMVMX {
                    return Err(IpcError::Range);
                }
                *value = next;
            }
        }
    }
    for (sem, value) in set.sems.iter_mut().zip(values) {
        sem.value = value;
    }
    for op in ops {
        set.sems[usize::from(op.num)].pid = pid;
    }
    Ok(Attempt::Done)
}

fn adjust_waiters(sem: &mut Semaphore, zero: bool, arriving: bool) {
    let counter = if zero { &mut sem.zcnt } else { &mut sem.ncnt };
    *counter = if arriving {
        counter.saturating_add(1)
    } else {
        counter.saturating_sub(1)
    };
}
