//! The two operations that touch the hardware thread pointer.
//!
//! Everything else in the shim reaches per-thread state through Rust
//! thread-locals. Only the code here reads the register, and only the
//! descriptor thunk runs with the foreign caller's register state.
//!
//! A TLS descriptor is two words: the function compiled code calls, and an
//! argument. Code generated for `-mtls-dialect=gnu2` (x86_64) or the
//! aarch64 default calls `desc[0]` with the descriptor address in
//! `rax`/`x0` and adds the returned value to its thread pointer. The thunk
//! therefore returns `address - thread_pointer`, and must leave every other
//! register as it found it.

use std::arch::naked_asm;
#[cfg(target_arch = "x86_64")]
use std::sync::Once;
#[cfg(target_arch = "x86_64")]
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::foreign_tls;

/// Argument word of an installed descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsDescArg {
    pub module_id: u64,
    pub offset: u64,
}

/// Current value of the thread-pointer register (`fs` base on x86_64,
/// `tpidr_el0` on aarch64).
#[inline(always)]
pub fn read_thread_pointer() -> usize {
    let tp: usize;
    #[cfg(target_arch = "x86_64")]
    unsafe {
        // SAFETY: fs:0 holds the TCB self-pointer on every x86_64 Linux libc.
        std::arch::asm!(
            "mov {}, qword ptr fs:0",
            out(reg) tp,
            options(nostack, preserves_flags, readonly),
        );
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!(
            "mrs {}, tpidr_el0",
            out(reg) tp,
            options(nomem, nostack, preserves_flags),
        );
    }
    tp
}

/// Write a descriptor pointing at the dynamic-arena thunk.
///
/// # Safety
///
/// `slot` must be the writable, 16-byte descriptor of a relocated image and
/// `arg` must outlive every use of that descriptor.
pub unsafe fn install_tlsdesc_thunk(slot: *mut usize, arg: *const TlsDescArg) {
    #[cfg(target_arch = "x86_64")]
    XSAVE_INIT.call_once(|| XSAVE_AREA_SIZE.store(xsave_area_size(), Ordering::Relaxed));
    unsafe {
        slot.write(tlsdesc_dynamic as *const () as usize);
        slot.add(1).write(arg as usize);
    }
}

/// Portable half of the thunk. `desc` is the descriptor address.
extern "C" fn tlsdesc_resolve(desc: *const usize) -> usize {
    // SAFETY: the thunk is only reachable through descriptors written by
    // `install_tlsdesc_thunk`, whose second word is a live `TlsDescArg`.
    let arg = unsafe { &*(desc.add(1).read() as *const TlsDescArg) };
    foreign_tls::arena_address(arg.module_id, arg.offset).wrapping_sub(read_thread_pointer())
}

/// Bytes `xsave` needs for every state component the OS enabled, or 0 when
/// the CPU lacks `xsave` and the thunk falls back to `fxsave`.
#[cfg(target_arch = "x86_64")]
static XSAVE_AREA_SIZE: AtomicUsize = AtomicUsize::new(0);
#[cfg(target_arch = "x86_64")]
static XSAVE_INIT: Once = Once::new();

#[cfg(target_arch = "x86_64")]
fn xsave_area_size() -> usize {
    if !std::arch::is_x86_feature_detected!("xsave") {
        return 0;
    }
    // SAFETY: leaf 0xD exists whenever xsave is supported.
    let leaf = unsafe { std::arch::x86_64::__cpuid_count(0xd, 0) };
    // EBX: size for the components currently enabled in XCR0.
    (leaf.ebx as usize).max(576)
}

// The resolver is ordinary Rust: it locks, allocates and may log, so it can
// touch any vector, x87 or MXCSR state. All of it is saved with `xsave`
// (all enabled components) or `fxsave` around the call. The xsave header
// must be zero for `xrstor` to accept a standard-format area.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn tlsdesc_dynamic() {
    naked_asm!(
        "push rbp",
        "mov rbp, rsp",
        "push rdi",
        "push rsi",
        "push rdx",
        "push rcx",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "mov rdi, rax",
        "mov rcx, qword ptr [rip + {size}]",
        "test rcx, rcx",
        "jz 2f",
        "sub rsp, rcx",
        "and rsp, -64",
        "xor eax, eax",
        "mov qword ptr [rsp + 512], rax",
        "mov qword ptr [rsp + 520], rax",
        "mov qword ptr [rsp + 528], rax",
        "mov qword ptr [rsp + 536], rax",
        "mov qword ptr [rsp + 544], rax",
        "mov qword ptr [rsp + 552], rax",
        "mov qword ptr [rsp + 560], rax",
        "mov qword ptr [rsp + 568], rax",
        "mov eax, -1",
        "mov edx, -1",
        "xsave64 [rsp]",
        "call {resolve}",
        "mov r11, rax",
        "mov eax, -1",
        "mov edx, -1",
        "xrstor64 [rsp]",
        "mov rax, r11",
        "jmp 3f",
        "2:",
        "sub rsp, 512",
        "and rsp, -16",
        "fxsave64 [rsp]",
        "call {resolve}",
        "fxrstor64 [rsp]",
        "3:",
        "lea rsp, [rbp - 64]",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rcx",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rbp",
        "ret",
        size = sym XSAVE_AREA_SIZE,
        resolve = sym tlsdesc_resolve,
    );
}

// q0-q31 cover the full vector registers without SVE; with SVE only their
// low 128 bits survive the call.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn tlsdesc_dynamic() {
    naked_asm!(
        "sub sp, sp, #688",
        "stp x29, x30, [sp]",
        "mov x29, sp",
        "stp x1, x2, [sp, #16]",
        "stp x3, x4, [sp, #32]",
        "stp x5, x6, [sp, #48]",
        "stp x7, x8, [sp, #64]",
        "stp x9, x10, [sp, #80]",
        "stp x11, x12, [sp, #96]",
        "stp x13, x14, [sp, #112]",
        "stp x15, x16, [sp, #128]",
        "stp x17, x18, [sp, #144]",
        "stp q0, q1, [sp, #160]",
        "stp q2, q3, [sp, #192]",
        "stp q4, q5, [sp, #224]",
        "stp q6, q7, [sp, #256]",
        "stp q8, q9, [sp, #288]",
        "stp q10, q11, [sp, #320]",
        "stp q12, q13, [sp, #352]",
        "stp q14, q15, [sp, #384]",
        "stp q16, q17, [sp, #416]",
        "stp q18, q19, [sp, #448]",
        "stp q20, q21, [sp, #480]",
        "stp q22, q23, [sp, #512]",
        "stp q24, q25, [sp, #544]",
        "stp q26, q27, [sp, #576]",
        "stp q28, q29, [sp, #608]",
        "stp q30, q31, [sp, #640]",
        "mrs x9, fpcr",
        "mrs x10, fpsr",
        "stp x9, x10, [sp, #672]",
        "bl {resolve}",
        "ldp x9, x10, [sp, #672]",
        "msr fpcr, x9",
        "msr fpsr, x10",
        "ldp q30, q31, [sp, #640]",
        "ldp q28, q29, [sp, #608]",
        "ldp q26, q27, [sp, #576]",
        "ldp q24, q25, [sp, #544]",
        "ldp q22, q23, [sp, #512]",
        "ldp q20, q21, [sp, #480]",
        "ldp q18, q19, [sp, #448]",
        "ldp q16, q17, [sp, #416]",
        "ldp q14, q15, [sp, #384]",
        "ldp q12, q13, [sp, #352]",
        "ldp q10, q11, [sp, #320]",
        "ldp q8, q9, [sp, #288]",
        "ldp q6, q7, [sp, #256]",
        "ldp q4, q5, [sp, #224]",
        "ldp q2, q3, [sp, #192]",
        "ldp q0, q1, [sp, #160]",
        "ldp x17, x18, [sp, #144]",
        "ldp x15, x16, [sp, #128]",
        "ldp x13, x14, [sp, #112]",
        "ldp x11, x12, [sp, #96]",
        "ldp x9, x10, [sp, #80]",
        "ldp x7, x8, [sp, #64]",
        "ldp x5, x6, [sp, #48]",
        "ldp x3, x4, [sp, #32]",
        "ldp x1, x2, [sp, #16]",
        "ldp x29, x30, [sp]",
        "add sp, sp, #688",
        "ret",
        resolve = sym tlsdesc_resolve,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_pointer_is_stable_and_per_thread() {
        let here = read_thread_pointer();
        assert_ne!(here, 0);
        assert_eq!(here, read_thread_pointer());
        let other = std::thread::spawn(read_thread_pointer).join().unwrap();
        assert_ne!(here, other);
    }

    #[test]
    fn installed_descriptor_resolves_into_arena() {
        let arg = TlsDescArg {
            module_id: u64::MAX,
            offset: 0,
        };
        let mut desc = [0usize; 2];
        unsafe { install_tlsdesc_thunk(desc.as_mut_ptr(), &arg) };
        assert_eq!(desc[0], tlsdesc_dynamic as *const () as usize);
        assert_eq!(desc[1], &arg as *const TlsDescArg as usize);

        // An unknown module lands on zeroed scratch.
        let off = tlsdesc_resolve(desc.as_ptr());
        let addr = read_thread_pointer().wrapping_add(off);
        assert_eq!(unsafe { (addr as *const u64).read() }, 0);
    }

    /// Caller-saved registers as seen after the call, and the returned
    /// offset.
    #[cfg(target_arch = "x86_64")]
    fn call_descriptor(desc: *const usize) -> (usize, [u64; 8], [f64; 16]) {
        let mut gp: [u64; 8] = [11, 12, 13, 14, 15, 16, 17, 18];
        let mut v: [f64; 16] = std::array::from_fn(|i| i as f64 + 0.25);
        let off: usize;
        // SAFETY: `desc` was written by `install_tlsdesc_thunk`; the thunk
        // clobbers only rax.
        unsafe {
            std::arch::asm!(
                "call qword ptr [rax]",
                inout("rax") desc => off,
                inout("rdi") gp[0], inout("rsi") gp[1], inout("rdx") gp[2], inout("rcx") gp[3],
                inout("r8") gp[4], inout("r9") gp[5], inout("r10") gp[6], inout("r11") gp[7],
                inout("xmm0") v[0], inout("xmm1") v[1], inout("xmm2") v[2], inout("xmm3") v[3],
                inout("xmm4") v[4], inout("xmm5") v[5], inout("xmm6") v[6], inout("xmm7") v[7],
                inout("xmm8") v[8], inout("xmm9") v[9], inout("xmm10") v[10], inout("xmm11") v[11],
                inout("xmm12") v[12], inout("xmm13") v[13], inout("xmm14") v[14], inout("xmm15") v[15],
            );
        }
        (off, gp, v)
    }

    #[cfg(target_arch = "aarch64")]
    fn call_descriptor(desc: *const usize) -> (usize, [u64; 8], [f64; 16]) {
        let mut gp: [u64; 8] = [11, 12, 13, 14, 15, 16, 17, 18];
        let mut v: [f64; 16] = std::array::from_fn(|i| i as f64 + 0.25);
        let off: usize;
        // SAFETY: `desc` was written by `install_tlsdesc_thunk`; the thunk
        // clobbers only x0 (and the link register).
        unsafe {
            std::arch::asm!(
                "ldr x16, [x0]",
                "blr x16",
                inout("x0") desc => off,
                out("x16") _, out("x30") _,
                inout("x1") gp[0], inout("x2") gp[1], inout("x3") gp[2], inout("x4") gp[3],
                inout("x9") gp[4], inout("x10") gp[5], inout("x15") gp[6], inout("x17") gp[7],
                inout("v0") v[0], inout("v1") v[1], inout("v2") v[2], inout("v3") v[3],
                inout("v4") v[4], inout("v5") v[5], inout("v6") v[6], inout("v7") v[7],
                inout("v16") v[8], inout("v17") v[9], inout("v18") v[10], inout("v19") v[11],
                inout("v20") v[12], inout("v21") v[13], inout("v30") v[14], inout("v31") v[15],
            );
        }
        (off, gp, v)
    }

    #[test]
    fn thunk_returns_tp_relative_offset_and_preserves_registers() {
        let slot = foreign_tls::reserve_slot(32, 16, &[0xab; 8]).unwrap();
        let arg = TlsDescArg {
            module_id: slot.module_id,
            offset: 4,
        };
        let mut desc = [0usize; 2];
        unsafe { install_tlsdesc_thunk(desc.as_mut_ptr(), &arg) };

        let (off, gp, v) = call_descriptor(desc.as_ptr());
        let addr = read_thread_pointer().wrapping_add(off);
        assert_eq!(addr, foreign_tls::arena_address(slot.module_id, 4));
        assert_eq!(unsafe { (addr as *const u8).read() }, 0xab);
        assert_eq!(unsafe { (addr as *const u8).add(4).read() }, 0);
        assert_eq!(gp, [11, 12, 13, 14, 15, 16, 17, 18]);
        assert_eq!(v, std::array::from_fn::<f64, 16, _>(|i| i as f64 + 0.25));

        // Same answer on a second call, and per thread.
        assert_eq!(call_descriptor(desc.as_ptr()).0, off);
        let desc_addr = desc.as_ptr() as usize;
        let module_id = slot.module_id;
        let (other_addr, expected) = std::thread::spawn(move || {
            let (off, _, _) = call_descriptor(desc_addr as *const usize);
            (
                read_thread_pointer().wrapping_add(off),
                foreign_tls::arena_address(module_id, 4),
            )
        })
        .join()
        .unwrap();
        assert_eq!(other_addr, expected);
        assert_ne!(other_addr, addr);

        foreign_tls::release_slot(slot.module_id);
    }
}
