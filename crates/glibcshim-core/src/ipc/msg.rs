//! System V message queues.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use super::{IPC_NOWAIT, IpcError, IpcLimits, IpcResult, Slots, key_lookup, wait};
use crate::error::Resource;

pub const MSG_NOERROR: i32 = 0o10000;
pub const MSG_EXCEPT: i32 = 0o20000;

#[derive(Debug)]
struct Message {
    mtype: i64,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Queue {
    key: i32,
    messages: VecDeque<Message>,
    bytes: usize,
}

/// `msqid_ds` fields the table tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgQueueStat {
    pub key: i32,
    pub qnum: usize,
    pub cbytes: usize,
    pub qbytes: usize,
}

#[derive(Debug)]
pub struct MsgTable {
    limits: IpcLimits,
    queues: Mutex<Slots<Queue>>,
    changed: Condvar,
}

impl MsgTable {
    pub fn new(limits: IpcLimits) -> Self {
        Self {
            limits,
            queues: Mutex::new(Slots::new(limits.msg_queues)),
            changed: Condvar::new(),
        }
    }

    /// `msgget`.
    pub fn get(&self, key: i32, flags: i32) -> IpcResult<i32> {
        let mut queues = self.queues.lock();
        key_lookup(
            &mut queues,
            key,
            flags,
            Resource::SysvMessageQueues,
            |q| Some(q.key),
            |_| Ok(()),
            || {
                Ok(Queue {
                    key,
                    messages: VecDeque::new(),
                    bytes: 0,
                })
            },
        )
    }

    /// `msgsnd`.
    pub fn send(&self, id: i32, mtype: i64, data: &[u8], flags: i32) -> IpcResult<()> {
        if mtype < 1 || data.len() > self.limits.msg_max_size {
            return Err(IpcError::Invalid);
        }
        let mut queues = self.queues.lock();
        let mut waited = false;
        loop {
            let Some(q) = queues.get_mut(id) else {
                return Err(if waited { IpcError::Removed } else { IpcError::Invalid });
            };
            if q.messages.len() < self.limits.msg_max_messages {
                q.messages.push_back(Message {
                    mtype,
                    data: data.to_vec(),
                });
                q.bytes += data.len();
                self.changed.notify_all();
                return Ok(());
            }
            if flags & IPC_NOWAIT != 0 {
                return Err(IpcError::WouldBlock);
            }
            wait(&self.changed, &mut queues, None)?;
            waited = true;
        }
    }

    /// `msgrcv`. `msgtyp == 0` takes the first message, `> 0` the first of
    /// that type (or of any other type under `MSG_EXCEPT`), and `< 0` the
    /// first message of the lowest type not above `|msgtyp|`. Returns the
    /// message type and the number of bytes copied.
    pub fn receive(
        &self,
        id: i32,
        buf: &mut [u8],
        msgtyp: i64,
        flags: i32,
    ) -> IpcResult<(i64, usize)> {
        let mut queues = self.queues.lock();
        let mut waited = false;
        loop {
            let Some(q) = queues.get_mut(id) else {
                return Err(if waited { IpcError::Removed } else { IpcError::Invalid });
            };
            if let Some(pos) = select(&q.messages, msgtyp, flags) {
                let len = q.messages[pos].data.len();
                if len > buf.len() && flags & MSG_NOERROR == 0 {
                    return Err(IpcError::TooBig);
                }
                let Some(msg) = q.messages.remove(pos) else {
                    return Err(IpcError::NoMessage);
                };
                q.bytes -= len;
                let copied = len.min(buf.len());
                buf[..copied].copy_from_slice(&msg.data[..copied]);
                self.changed.notify_all();
                return Ok((msg.mtype, copied));
            }
            if flags & IPC_NOWAIT != 0 {
                return Err(IpcError::NoMessage);
            }
            wait(&self.changed, &mut queues, None)?;
            waited = true;
        }
    }

    /// `msgctl(IPC_STAT)`.
    pub fn stat(&self, id: i32) -> IpcResult<MsgQueueStat> {
        let queues = self.queues.lock();
        let q = queues.get(id).ok_or(IpcError::Invalid)?;
        Ok(MsgQueueStat {
            key: q.key,
            qnum: q.messages.len(),
            cbytes: q.bytes,
            qbytes: self.limits.msg_max_messages * self.limits.msg_max_size,
        })
    }

    /// `msgctl(IPC_RMID)`. Blocked senders and receivers fail with `EIDRM`.
    pub fn remove(&self, id: i32) -> IpcResult<()> {
        self.queues.lock().remove(id).ok_or(IpcError::Invalid)?;
        self.changed.notify_all();
        Ok(())
    }
}

fn select(messages: &VecDeque<Message>, msgtyp: i64, flags: i32) -> Option<usize> {
    match msgtyp {
        0 => (!messages.is_empty()).then_some(0),
        t if t > 0 && flags & MSG_EXCEPT != 0 => messages.iter().position(|m| m.mtype != t),
        t if t > 0 => messages.iter().position(|m| m.mtype == t),
        t => {
            let limit = t.checked_neg().unwrap_or(i64::MAX);
            messages
                .iter()
                .enumerate()
                .filter(|(_, m)| m.mtype <= limit)
                .min_by_key(|(i, m)| (m.mtype, *i))
                .map(|(i, _)| i)
        }
    }
}
