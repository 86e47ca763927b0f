//! ABI layer for POSIX message queues, emulated in process.
//!
//! Descriptors start at `DESCRIPTOR_BASE` so they never collide with file
//! descriptors foreign code might hand to `close`.

use std::ffi::{c_char, c_int, c_uint};
use std::sync::LazyLock;
use std::time::Instant;

use glibcshim_core::ipc::{IpcError, IpcLimits, MqAttr, MqTable};
use glibcshim_runtime::shim_debug;

use crate::util::{c_str, fail, realtime_deadline};

static QUEUES: LazyLock<MqTable> = LazyLock::new(|| MqTable::new(IpcLimits::default()));

/// glibc's `struct mq_attr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlibcMqAttr {
    pub mq_flags: i64,
    pub mq_maxmsg: i64,
    pub mq_msgsize: i64,
    pub mq_curmsgs: i64,
    pub pad: [i64; 4],
}

impl From<MqAttr> for GlibcMqAttr {
    fn from(a: MqAttr) -> Self {
        Self {
            mq_flags: a.flags,
            mq_maxmsg: a.maxmsg,
            mq_msgsize: a.msgsize,
            mq_curmsgs: a.curmsgs,
            pad: [0; 4],
        }
    }
}

impl From<GlibcMqAttr> for MqAttr {
    fn from(a: GlibcMqAttr) -> Self {
        Self {
            flags: a.mq_flags,
            maxmsg: a.mq_maxmsg,
            msgsize: a.mq_msgsize,
            curmsgs: a.mq_curmsgs,
        }
    }
}

fn ipc_fail<T>(err: IpcError, ret: T) -> T {
    shim_debug!("mqueue", "{err}");
    fail(err.errno(), ret)
}

/// `None` for a null timeout, the deadline otherwise.
unsafe fn deadline(ts: *const libc::timespec) -> Result<Option<Instant>, c_int> {
    if ts.is_null() {
        return Ok(None);
    }
    unsafe { realtime_deadline(ts) }
}

wrapper_fn! {
    /// `mode` is accepted and ignored; queues are private to the process.
    fn mq_open(name: *const c_char, oflag: c_int, _mode: libc::mode_t, attr: *const GlibcMqAttr) -> c_int {
        let Some(name) = c_str(name) else {
            return fail(libc::EINVAL, -1);
        };
        let attr = (!attr.is_null()).then(|| MqAttr::from(attr.read()));
        match QUEUES.open(name, oflag, attr) {
            Ok(mqd) => mqd,
            Err(e) => ipc_fail(e, -1),
        }
    }
}

wrapper_fn! {
    fn mq_close(mqd: c_int) -> c_int {
        QUEUES.close(mqd).map_or_else(|e| ipc_fail(e, -1), |()| 0)
    }
}

wrapper_fn! {
    fn mq_unlink(name: *const c_char) -> c_int {
        let Some(name) = c_str(name) else {
            return fail(libc::EINVAL, -1);
        };
        QUEUES.unlink(name).map_or_else(|e| ipc_fail(e, -1), |()| 0)
    }
}

wrapper_fn! {
    fn mq_timedsend(
        mqd: c_int,
        msg: *const c_char,
        len: usize,
        prio: c_uint,
        timeout: *const libc::timespec,
    ) -> c_int {
        let deadline = match deadline(timeout) {
            Ok(d) => d,
            Err(errno) => return fail(errno, -1),
        };
        let bytes: &[u8] = if len == 0 { &[] } else { std::slice::from_raw_parts(msg.cast(), len) };
        QUEUES
            .send(mqd, bytes, prio, deadline)
            .map_or_else(|e| ipc_fail(e, -1), |()| 0)
    }
}

wrapper_fn! {
    fn mq_send(mqd: c_int, msg: *const c_char, len: usize, prio: c_uint) -> c_int {
        mq_timedsend(mqd, msg, len, prio, std::ptr::null())
    }
}

wrapper_fn! {
    fn mq_timedreceive(
        mqd: c_int,
        buf: *mut c_char,
        len: usize,
        prio: *mut c_uint,
        timeout: *const libc::timespec,
    ) -> isize {
        let deadline = match deadline(timeout) {
            Ok(d) => d,
            Err(errno) => return fail(errno, -1),
        };
        let out: &mut [u8] = if len == 0 { &mut [] } else { std::slice::from_raw_parts_mut(buf.cast(), len) };
        match QUEUES.receive(mqd, out, deadline) {
            Ok((n, p)) => {
                if !prio.is_null() {
                    *prio = p;
                }
                n as isize
            }
            Err(e) => ipc_fail(e, -1),
        }
    }
}

wrapper_fn! {
    fn mq_receive(mqd: c_int, buf: *mut c_char, len: usize, prio: *mut c_uint) -> isize {
        mq_timedreceive(mqd, buf, len, prio, std::ptr::null())
    }
}

wrapper_fn! {
    fn mq_getattr(mqd: c_int, attr: *mut GlibcMqAttr) -> c_int {
        if attr.is_null() {
            return fail(libc::EINVAL, -1);
        }
        match QUEUES.getattr(mqd) {
            Ok(a) => {
                attr.write(a.into());
                0
            }
            Err(e) => ipc_fail(e, -1),
        }
    }
}

wrapper_fn! {
    fn mq_setattr(mqd: c_int, new: *const GlibcMqAttr, old: *mut GlibcMqAttr) -> c_int {
        if new.is_null() {
            return fail(libc::EINVAL, -1);
        }
        match QUEUES.setattr(mqd, (*new).mq_flags) {
            Ok(previous) => {
                if !old.is_null() {
                    old.write(previous.into());
                }
                0
            }
            Err(e) => ipc_fail(e, -1),
        }
    }
}
