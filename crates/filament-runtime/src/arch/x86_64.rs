//! x86_64 context switching
//!
//! Inline naked assembly, stable since Rust 1.88.

use std::arch::naked_asm;

/// Callee-saved register file of a suspended execution point.
///
/// Only the System V callee-saved set plus stack and instruction pointers
/// is kept; a fiber only ever suspends at a voluntary call site, so
/// caller-saved registers are dead by definition.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SavedRegs {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
}

impl SavedRegs {
    pub const fn zeroed() -> Self {
        Self {
            rsp: 0,
            rip: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
        }
    }
}

/// Initialize a fresh execution point on `stack_top`.
///
/// When first switched to, execution begins in the entry trampoline with
/// `entry_fn`/`entry_arg` staged in r12/r13.
///
/// # Safety
///
/// `regs` must point to valid `SavedRegs` memory and `stack_top` must be
/// the high end of a live, writable stack.
#[inline]
pub unsafe fn init_context(
    regs: *mut SavedRegs,
    stack_top: *mut u8,
    entry_fn: usize,
    entry_arg: usize,
) {
    // 16-byte aligned at the trampoline so the stack is correctly aligned
    // immediately before its `call` per the System V AMD64 ABI.
    let aligned_sp = (stack_top as usize) & !0xF;

    let regs = &mut *regs;
    regs.rsp = aligned_sp as u64;
    regs.rip = entry_trampoline as usize as u64;
    regs.rbx = 0;
    regs.rbp = 0;
    regs.r12 = entry_fn as u64;
    regs.r13 = entry_arg as u64;
    regs.r14 = 0;
    regs.r15 = 0;
}

/// Trampoline that calls the entry function with its argument.
///
/// The entry function must never return; the fiber leaves through a final
/// context switch instead. `ud2` traps if it somehow does.
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!("mov rdi, r13", "call r12", "ud2",);
}

/// Voluntary context switch.
///
/// Saves the current callee-saved registers to `save` and loads the ones
/// in `load`. Returns (to the caller of `switch_context`) only when some
/// other execution point later switches back to `save`.
///
/// # Safety
///
/// `load` must hold a register file produced by `init_context` or a prior
/// save, whose stack is still alive. Never switch to an execution point
/// that another thread could switch to concurrently.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_save: *mut SavedRegs, _load: *const SavedRegs) {
    naked_asm!(
        // Save callee-saved registers to save (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load callee-saved registers from load (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        // Jump to the loaded RIP
        "jmp rax",
        // Resume point for the saved context: return to switch_context's
        // caller via the restored stack.
        "1:",
        "ret",
    );
}
