//! POSIX message queues.
//!
//! Queues are named objects that outlive their descriptors until unlinked;
//! an unlinked queue stays usable through descriptors already open on it and
//! is freed when the last one closes. Descriptors carry their own access mode
//! and `O_NONBLOCK` flag.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::{IpcError, IpcLimits, IpcResult, Slots, wait};
use crate::error::Resource;

pub const O_RDONLY: i32 = 0;
pub const O_WRONLY: i32 = 1;
pub const O_RDWR: i32 = 2;
pub const O_ACCMODE: i32 = 3;
pub const O_CREAT: i32 = 0o100;
pub const O_EXCL: i32 = 0o200;
pub const O_NONBLOCK: i32 = 0o4000;

pub const MQ_PRIO_MAX: u32 = 32768;
pub const NAME_MAX: usize = 255;

/// Descriptor values start here so they never look like file descriptors.
pub const DESCRIPTOR_BASE: i32 = 0x10000;

/// `struct mq_attr`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MqAttr {
    pub flags: i64,
    pub maxmsg: i64,
    pub msgsize: i64,
    pub curmsgs: i64,
}

#[derive(Debug)]
struct Queue {
    name: Option<String>,
    maxmsg: usize,
    msgsize: usize,
    /// Keyed by priority; each bucket is FIFO.
    messages: BTreeMap<u32, VecDeque<Vec<u8>>>,
    count: usize,
    open: usize,
}

impl Queue {
    fn push(&mut self, prio: u32, msg: &[u8]) {
        self.messages.entry(prio).or_default().push_back(msg.to_vec());
        self.count += 1;
    }

    fn pop(&mut self) -> Option<(u32, Vec<u8>)> {
        let mut bucket = self.messages.last_entry()?;
        let prio = *bucket.key();
        let msg = bucket.get_mut().pop_front()?;
        if bucket.get().is_empty() {
            bucket.remove();
        }
        self.count -= 1;
        Some((prio, msg))
    }
}

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    queue: i32,
    access: i32,
    nonblock: bool,
}

impl Descriptor {
    fn can_read(&self) -> bool {
        self.access == O_RDONLY || self.access == O_RDWR
    }

    fn can_write(&self) -> bool {
        self.access == O_WRONLY || self.access == O_RDWR
    }
}

#[derive(Debug)]
struct MqState {
    queues: Slots<Queue>,
    descriptors: Slots<Descriptor>,
}

#[derive(Debug)]
pub struct MqTable {
    limits: IpcLimits,
    state: Mutex<MqState>,
    changed: Condvar,
}

impl MqTable {
    pub fn new(limits: IpcLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(MqState {
                queues: Slots::new(limits.mq_queues),
                descriptors: Slots::new(limits.mq_descriptors),
            }),
            changed: Condvar::new(),
        }
    }

    /// `mq_open`. Returns a descriptor.
    pub fn open(&self, name: &str, oflag: i32, attr: Option<MqAttr>) -> IpcResult<i32> {
        let name = validate_name(name)?;
        let access = oflag & O_ACCMODE;
        if access == O_ACCMODE {
            return Err(IpcError::Invalid);
        }
        let mut state = self.state.lock();
        if state.descriptors.len() == state.descriptors.capacity() {
            return Err(IpcError::TableFull(Resource::MessageQueues));
        }

        let existing = state.queues.find(|q| q.name.as_deref() == Some(name));
        let queue = match existing {
            Some(_) if oflag & O_CREAT != 0 && oflag & O_EXCL != 0 => {
                return Err(IpcError::Exists);
            }
            Some(id) => id,
            None if oflag & O_CREAT == 0 => return Err(IpcError::NotFound),
            None => {
                let (maxmsg, msgsize) = self.queue_shape(attr)?;
                let queue = Queue {
                    name: Some(name.to_owned()),
                    maxmsg,
                    msgsize,
                    messages: BTreeMap::new(),
                    count: 0,
                    open: 0,
                };
                state
                    .queues
                    .insert(queue)
                    .ok_or(IpcError::TableFull(Resource::MessageQueues))?
            }
        };

        let descriptor = Descriptor {
            queue,
            access,
            nonblock: oflag & O_NONBLOCK != 0,
        };
        let slot = state
            .descriptors
            .insert(descriptor)
            .ok_or(IpcError::TableFull(Resource::MessageQueues))?;
        if let Some(q) = state.queues.get_mut(queue) {
            q.open += 1;
        }
        Ok(DESCRIPTOR_BASE + slot)
    }

    fn queue_shape(&self, attr: Option<MqAttr>) -> IpcResult<(usize, usize)> {
        let Some(attr) = attr else {
            return Ok((self.limits.mq_max_messages, self.limits.mq_max_msgsize));
        };
        let maxmsg = usize::try_from(attr.maxmsg).map_err(|_| IpcError::Invalid)?;
        let msgsize = usize::try_from(attr.msgsize).map_err(|_| IpcError::Invalid)?;
        if maxmsg == 0
            || msgsize == 0
            || maxmsg > self.limits.mq_max_messages
            || msgsize > self.limits.mq_max_msgsize
        {
            return Err(IpcError::Invalid);
        }
        Ok((maxmsg, msgsize))
    }

    /// `mq_close`.
    pub fn close(&self, mqd: i32) -> IpcResult<()> {
        let mut state = self.state.lock();
        let descriptor = state
            .descriptors
            .remove(slot_of(mqd)?)
            .ok_or(IpcError::BadDescriptor)?;
        let orphaned = match state.queues.get_mut(descriptor.queue) {
            Some(q) => {
                q.open -= 1;
                q.open == 0 && q.name.is_none()
            }
            None => false,
        };
        if orphaned {
            state.queues.remove(descriptor.queue);
        }
        Ok(())
    }

    /// `mq_unlink`. Open descriptors keep the queue alive.
    pub fn unlink(&self, name: &str) -> IpcResult<()> {
        let name = validate_name(name)?;
        let mut state = self.state.lock();
        let id = state
            .queues
            .find(|q| q.name.as_deref() == Some(name))
            .ok_or(IpcError::NotFound)?;
        let drop_now = match state.queues.get_mut(id) {
            Some(q) => {
                q.name = None;
                q.open == 0
            }
            None => false,
        };
        if drop_now {
            state.queues.remove(id);
        }
        Ok(())
    }

    /// `mq_send` / `mq_timedsend`.
    pub fn send(&self, mqd: i32, msg: &[u8], prio: u32, deadline: Option<Instant>) -> IpcResult<()> {
        if prio >= MQ_PRIO_MAX {
            return Err(IpcError::Invalid);
        }
        let slot = slot_of(mqd)?;
        let mut state = self.state.lock();
        loop {
            let d = *state.descriptors.get(slot).ok_or(IpcError::BadDescriptor)?;
            if !d.can_write() {
                return Err(IpcError::BadDescriptor);
            }
            let q = state.queues.get_mut(d.queue).ok_or(IpcError::BadDescriptor)?;
            if msg.len() > q.msgsize {
                return Err(IpcError::MessageSize);
            }
            if q.count < q.maxmsg {
                q.push(prio, msg);
                self.changed.notify_all();
                return Ok(());
            }
            if d.nonblock {
                return Err(IpcError::WouldBlock);
            }
            wait(&self.changed, &mut state, deadline)?;
        }
    }

    /// `mq_receive` / `mq_timedreceive`. Copies the highest-priority message
    /// into `buf`, returning its length and priority.
    pub fn receive(
        &self,
        mqd: i32,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> IpcResult<(usize, u32)> {
        let slot = slot_of(mqd)?;
        let mut state = self.state.lock();
        loop {
            let d = *state.descriptors.get(slot).ok_or(IpcError::BadDescriptor)?;
            if !d.can_read() {
                return Err(IpcError::BadDescriptor);
            }
            let q = state.queues.get_mut(d.queue).ok_or(IpcError::BadDescriptor)?;
            if buf.len() < q.msgsize {
                return Err(IpcError::MessageSize);
            }
            if let Some((prio, msg)) = q.pop() {
                buf[..msg.len()].copy_from_slice(&msg);
                self.changed.notify_all();
                return Ok((msg.len(), prio));
            }
            if d.nonblock {
                return Err(IpcError::WouldBlock);
            }
            wait(&self.changed, &mut state, deadline)?;
        }
    }

    /// `mq_getattr`.
    pub fn getattr(&self, mqd: i32) -> IpcResult<MqAttr> {
        let state = self.state.lock();
        let d = state
            .descriptors
            .get(slot_of(mqd)?)
            .ok_or(IpcError::BadDescriptor)?;
        let q = state.queues.get(d.queue).ok_or(IpcError::BadDescriptor)?;
        Ok(MqAttr {
            flags: if d.nonblock { O_NONBLOCK.into() } else { 0 },
            maxmsg: q.maxmsg as i64,
            msgsize: q.msgsize as i64,
            curmsgs: q.count as i64,
        })
    }

    /// `mq_setattr`. Only `O_NONBLOCK` in `flags` is applied; returns the
    /// previous attributes.
    pub fn setattr(&self, mqd: i32, flags: i64) -> IpcResult<MqAttr> {
        let old = self.getattr(mqd)?;
        let mut state = self.state.lock();
        let d = state
            .descriptors
            .get_mut(slot_of(mqd)?)
            .ok_or(IpcError::BadDescriptor)?;
        d.nonblock = flags & i64::from(O_NONBLOCK) != 0;
        Ok(old)
    }

    pub fn queue_count(&self) -> usize {
        self.state.lock().queues.len()
    }
}

fn slot_of(mqd: i32) -> IpcResult<i32> {
    mqd.checked_sub(DESCRIPTOR_BASE)
        .filter(|s| *s >= 0)
        .ok_or(IpcError::BadDescriptor)
}

fn validate_name(name: &str) -> IpcResult<&str> {
    let rest = name.strip_prefix('/').ok_or(IpcError::Invalid)?;
    if rest.is_empty() || rest.contains('/') || rest.len() > NAME_MAX {
        return Err(IpcError::Invalid);
    }
    Ok(rest)
}
