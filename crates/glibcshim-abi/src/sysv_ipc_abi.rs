//! ABI layer for System V IPC: shared memory, semaphores and message
//! queues, emulated in process over the tables in `glibcshim_core::ipc`.
//!
//! `semctl` and `msgctl` take glibc's `struct` layouts; only the fields the
//! tables track are filled in.

use std::ffi::{c_int, c_long, c_void};
use std::sync::LazyLock;
use std::time::Instant;

use glibcshim_core::ipc::sem::{GETALL, GETNCNT, GETPID, GETVAL, GETZCNT, SETALL, SETVAL};
use glibcshim_core::ipc::{
    IPC_RMID, IPC_STAT, IpcError, IpcLimits, IpcResult, MsgTable, SegmentBacking, SemOp, SemTable,
    ShmTable,
};
use glibcshim_runtime::shim_debug;

use crate::util::{fail, relative_deadline};

// ---------------------------------------------------------------------------
// glibc structures
// ---------------------------------------------------------------------------

/// glibc's 64-bit `struct ipc_perm`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GlibcIpcPerm {
    pub key: i32,
    pub uid: u32,
    pub gid: u32,
    pub cuid: u32,
    pub cgid: u32,
    pub mode: u16,
    pad1: u16,
    pub seq: u16,
    pad2: u16,
    reserved: [u64; 2],
}

impl GlibcIpcPerm {
    fn owned(key: i32) -> Self {
        // SAFETY: plain id queries.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            key,
            uid,
            gid,
            cuid: uid,
            cgid: gid,
            mode: 0o600,
            ..Self::default()
        }
    }
}

/// glibc's 64-bit `struct shmid_ds`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GlibcShmidDs {
    pub shm_perm: GlibcIpcPerm,
    pub shm_segsz: usize,
    pub shm_atime: i64,
    pub shm_dtime: i64,
    pub shm_ctime: i64,
    pub shm_cpid: i32,
    pub shm_lpid: i32,
    pub shm_nattch: u64,
    reserved: [u64; 2],
}

/// glibc's 64-bit `struct msqid_ds`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GlibcMsqidDs {
    pub msg_perm: GlibcIpcPerm,
    pub msg_stime: i64,
    pub msg_rtime: i64,
    pub msg_ctime: i64,
    pub msg_cbytes: u64,
    pub msg_qnum: u64,
    pub msg_qbytes: u64,
    pub msg_lspid: i32,
    pub msg_lrpid: i32,
    reserved: [u64; 2],
}

/// glibc's `struct sembuf`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlibcSembuf {
    pub sem_num: u16,
    pub sem_op: i16,
    pub sem_flg: i16,
}

fn ipc_fail<T>(err: IpcError, ret: T) -> T {
    shim_debug!("sysv", "{err}");
    fail(err.errno(), ret)
}

fn status(result: IpcResult<()>) -> c_int {
    result.map_or_else(|e| ipc_fail(e, -1), |()| 0)
}

// ---------------------------------------------------------------------------
// Shared memory
// ---------------------------------------------------------------------------

/// Segments are anonymous shared mappings, attached at the same address
/// every time.
#[derive(Debug, Default)]
pub struct MmapBacking;

impl SegmentBacking for MmapBacking {
    fn allocate(&self, size: usize) -> IpcResult<usize> {
        // SAFETY: fresh anonymous mapping.
        let p = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(IpcError::TableFull(glibcshim_core::error::Resource::SharedMemory));
        }
        Ok(p as usize)
    }

    fn release(&self, addr: usize, size: usize) {
        // SAFETY: `addr` came from `allocate` with this size.
        unsafe { libc::munmap(addr as *mut c_void, size) };
    }
}

static SEGMENTS: LazyLock<ShmTable<MmapBacking>> =
    LazyLock::new(|| ShmTable::new(IpcLimits::default(), MmapBacking));
static SEMAPHORES: LazyLock<SemTable> = LazyLock::new(|| SemTable::new(IpcLimits::default()));
static MESSAGES: LazyLock<MsgTable> = LazyLock::new(|| MsgTable::new(IpcLimits::default()));

wrapper_fn! {
    fn shmget(key: c_int, size: usize, flags: c_int) -> c_int {
        SEGMENTS.get(key, size, flags).unwrap_or_else(|e| ipc_fail(e, -1))
    }
}

wrapper_fn! {
    /// `SHM_RDONLY` is not enforced: every attachment shares one mapping.
    fn shmat(id: c_int, addr: *const c_void, _flags: c_int) -> *mut c_void {
        match SEGMENTS.attach(id, addr as usize) {
            Ok(a) => a as *mut c_void,
            Err(e) => ipc_fail(e, usize::MAX as *mut c_void),
        }
    }
}

wrapper_fn! {
    fn shmdt(addr: *const c_void) -> c_int {
        status(SEGMENTS.detach(addr as usize))
    }
}

wrapper_fn! {
    fn shmctl(id: c_int, cmd: c_int, buf: *mut GlibcShmidDs) -> c_int {
        match cmd {
            IPC_STAT => {
                if buf.is_null() {
                    return fail(libc::EFAULT, -1);
                }
                match SEGMENTS.stat(id) {
                    Ok(st) => {
                        buf.write(GlibcShmidDs {
                            shm_perm: GlibcIpcPerm::owned(st.key),
                            shm_segsz: st.size,
                            shm_cpid: libc::getpid(),
                            shm_nattch: st.nattch as u64,
                            ..GlibcShmidDs::default()
                        });
                        0
                    }
                    Err(e) => ipc_fail(e, -1),
                }
            }
            IPC_RMID => status(SEGMENTS.remove(id)),
            _ => fail(libc::EINVAL, -1),
        }
    }
}

// ---------------------------------------------------------------------------
// Semaphores
// ---------------------------------------------------------------------------

wrapper_fn! {
    fn semget(key: c_int, nsems: c_int, flags: c_int) -> c_int {
        SEMAPHORES.get(key, nsems, flags).unwrap_or_else(|e| ipc_fail(e, -1))
    }
}

unsafe fn sem_ops(sops: *const GlibcSembuf, nsops: usize) -> Vec<SemOp> {
    if sops.is_null() || nsops == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(sops, nsops) }
        .iter()
        .map(|b| SemOp {
            num: b.sem_num,
            op: b.sem_op,
            flags: b.sem_flg,
        })
        .collect()
}

fn run_ops(id: c_int, ops: &[SemOp], deadline: Option<Instant>) -> c_int {
    // SAFETY: plain pid query.
    let pid = unsafe { libc::getpid() };
    status(SEMAPHORES.op(id, ops, pid, deadline))
}

wrapper_fn! {
    fn semop(id: c_int, sops: *mut GlibcSembuf, nsops: usize) -> c_int {
        run_ops(id, &sem_ops(sops, nsops), None)
    }
}

wrapper_fn! {
    fn semtimedop(id: c_int, sops: *mut GlibcSembuf, nsops: usize, timeout: *const libc::timespec) -> c_int {
        let deadline = if timeout.is_null() {
            None
        } else {
            match relative_deadline(timeout) {
                Ok(d) => d,
                Err(errno) => return fail(errno, -1),
            }
        };
        run_ops(id, &sem_ops(sops, nsops), deadline)
    }
}

wrapper_fn! {
    /// glibc declares `semctl` variadic; the `union semun` argument arrives
    /// as one register-sized word.
    fn semctl(id: c_int, num: c_int, cmd: c_int, arg: usize) -> c_int {
        let value = |r: IpcResult<i32>| r.unwrap_or_else(|e| ipc_fail(e, -1));
        match cmd {
            GETVAL => value(SEMAPHORES.getval(id, num)),
            GETNCNT => value(SEMAPHORES.getncnt(id, num)),
            GETZCNT => value(SEMAPHORES.getzcnt(id, num)),
            GETPID => value(SEMAPHORES.getpid(id, num)),
            SETVAL => status(SEMAPHORES.setval(id, num, arg as c_int)),
            GETALL => {
                let out = arg as *mut u16;
                if out.is_null() {
                    return fail(libc::EFAULT, -1);
                }
                match SEMAPHORES.getall(id) {
                    Ok(values) => {
                        std::ptr::copy_nonoverlapping(values.as_ptr(), out, values.len());
                        0
                    }
                    Err(e) => ipc_fail(e, -1),
                }
            }
            SETALL => {
                let input = arg as *const u16;
                if input.is_null() {
                    return fail(libc::EFAULT, -1);
                }
                let nsems = match SEMAPHORES.stat(id) {
                    Ok(st) => st.nsems,
                    Err(e) => return ipc_fail(e, -1),
                };
                status(SEMAPHORES.setall(id, std::slice::from_raw_parts(input, nsems)))
            }
            IPC_RMID => status(SEMAPHORES.remove(id)),
            _ => fail(libc::EINVAL, -1),
        }
    }
}

// ---------------------------------------------------------------------------
// Message queues
// ---------------------------------------------------------------------------

wrapper_fn! {
    fn msgget(key: c_int, flags: c_int) -> c_int {
        MESSAGES.get(key, flags).unwrap_or_else(|e| ipc_fail(e, -1))
    }
}

wrapper_fn! {
    /// `msgp` points at `{ long mtype; char mtext[msgsz]; }`.
    fn msgsnd(id: c_int, msgp: *const c_void, msgsz: usize, flags: c_int) -> c_int {
        if msgp.is_null() {
            return fail(libc::EFAULT, -1);
        }
        let mtype = msgp.cast::<c_long>().read_unaligned();
        let text = msgp.cast::<u8>().add(size_of::<c_long>());
        let data = std::slice::from_raw_parts(text, msgsz);
        status(MESSAGES.send(id, mtype, data, flags))
    }
}

wrapper_fn! {
    fn msgrcv(id: c_int, msgp: *mut c_void, msgsz: usize, msgtyp: c_long, flags: c_int) -> isize {
        if msgp.is_null() {
            return fail(libc::EFAULT, -1);
        }
        let text = msgp.cast::<u8>().add(size_of::<c_long>());
        let buf = std::slice::from_raw_parts_mut(text, msgsz);
        match MESSAGES.receive(id, buf, msgtyp, flags) {
            Ok((mtype, n)) => {
                msgp.cast::<c_long>().write_unaligned(mtype);
                n as isize
            }
            Err(e) => ipc_fail(e, -1),
        }
    }
}

wrapper_fn! {
    fn msgctl(id: c_int, cmd: c_int, buf: *mut GlibcMsqidDs) -> c_int {
        match cmd {
            IPC_STAT => {
                if buf.is_null() {
                    return fail(libc::EFAULT, -1);
                }
                match MESSAGES.stat(id) {
                    Ok(st) => {
                        buf.write(GlibcMsqidDs {
                            msg_perm: GlibcIpcPerm::owned(st.key),
                            msg_cbytes: st.cbytes as u64,
                            msg_qnum: st.qnum as u64,
                            msg_qbytes: st.qbytes as u64,
                            ..GlibcMsqidDs::default()
                        });
                        0
                    }
                    Err(e) => ipc_fail(e, -1),
                }
            }
            IPC_RMID => status(MESSAGES.remove(id)),
            _ => fail(libc::EINVAL, -1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign_tls;
    use glibcshim_core::ipc::msg::MSG_NOERROR;
    use glibcshim_core::ipc::{IPC_CREAT, IPC_NOWAIT, IPC_PRIVATE};

    #[test]
    fn glibc_struct_sizes() {
        assert_eq!(size_of::<GlibcIpcPerm>(), 48);
        assert_eq!(size_of::<GlibcShmidDs>(), 112);
        assert_eq!(size_of::<GlibcMsqidDs>(), 120);
        assert_eq!(size_of::<GlibcSembuf>(), 6);
    }

    #[test]
    fn shm_attach_write_stat_remove() {
        unsafe {
            let id = shmget(IPC_PRIVATE, 4096, IPC_CREAT | 0o600);
            assert!(id >= 0);
            let p = shmat(id, std::ptr::null(), 0);
            assert_ne!(p as usize, usize::MAX);
            *(p as *mut u32) = 0xfeed;
            let again = shmat(id, p, 0);
            assert_eq!(*(again as *const u32), 0xfeed);

            let mut ds = GlibcShmidDs::default();
            assert_eq!(shmctl(id, IPC_STAT, &mut ds), 0);
            assert_eq!((ds.shm_segsz, ds.shm_nattch), (4096, 2));

            assert_eq!(shmctl(id, IPC_RMID, std::ptr::null_mut()), 0);
            assert_eq!(shmdt(again), 0);
            assert_eq!(shmdt(p), 0);
            assert_eq!(shmdt(p), -1);
            assert_eq!(foreign_tls::errno(), libc::EINVAL);
        }
    }

    #[test]
    fn semaphore_values_and_nowait() {
        unsafe {
            let id = semget(IPC_PRIVATE, 2, IPC_CREAT | 0o600);
            assert!(id >= 0);
            assert_eq!(semctl(id, 1, SETVAL, 3), 0);
            let mut take = [GlibcSembuf {
                sem_num: 1,
                sem_op: -2,
                sem_flg: IPC_NOWAIT as i16,
            }];
            assert_eq!(semop(id, take.as_mut_ptr(), 1), 0);
            assert_eq!(semctl(id, 1, GETVAL, 0), 1);
            assert_eq!(semop(id, take.as_mut_ptr(), 1), -1);
            assert_eq!(foreign_tls::errno(), libc::EAGAIN);

            let mut all = [0u16; 2];
            assert_eq!(semctl(id, 0, GETALL, all.as_mut_ptr() as usize), 0);
            assert_eq!(all, [0, 1]);
            assert_eq!(semctl(id, 0, IPC_RMID, 0), 0);
        }
    }

    #[repr(C)]
    struct Msg {
        mtype: c_long,
        text: [u8; 8],
    }

    #[test]
    fn msg_type_selection_and_truncation() {
        unsafe {
            let id = msgget(IPC_PRIVATE, IPC_CREAT | 0o600);
            assert!(id >= 0);
            for (mtype, text) in [(3, *b"three\0\0\0"), (1, *b"one\0\0\0\0\0")] {
                let m = Msg { mtype, text };
                assert_eq!(msgsnd(id, (&raw const m).cast(), 8, 0), 0);
            }
            let mut out = Msg { mtype: 0, text: [0; 8] };
            // Lowest type not above 5.
            let n = msgrcv(id, (&raw mut out).cast(), 8, -5, IPC_NOWAIT);
            assert_eq!((n, out.mtype), (8, 1));

            assert_eq!(msgrcv(id, (&raw mut out).cast(), 2, 0, IPC_NOWAIT), -1);
            assert_eq!(foreign_tls::errno(), libc::E2BIG);
            let n = msgrcv(id, (&raw mut out).cast(), 2, 0, IPC_NOWAIT | MSG_NOERROR);
            assert_eq!((n, &out.text[..2]), (2, &b"th"[..]));

            let mut ds = GlibcMsqidDs::default();
            assert_eq!(msgctl(id, IPC_STAT, &mut ds), 0);
            assert_eq!(ds.msg_qnum, 0);
            assert_eq!(msgctl(id, IPC_RMID, std::ptr::null_mut()), 0);
        }
    }
}
