//! # Interrupt Dispatch Module
//!
//! The assembly trampolines in `structures::idt` deliver every interrupt
//! and exception to `isr_dispatch` below with a uniform `(vector,
//! error_code)` pair. This module owns the table of high-level callbacks,
//! the PIC pair, the timer tick counter and the helpers for masking
//! interrupts around critical sections.
//!
//! Callbacks run with interrupts disabled (interrupt gates clear IF) and
//! must be short and re-entrancy-safe with respect to their own state.

use crate::exceptions::pic8259::ChainedPics;
use crate::utils::debug::LogLevel;
use crate::utils::io::{cli, hlt, sti};
use core::arch::asm;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// IRQ0 unmasked, IRQ1 unmasked, everything else (including the whole
/// slave) masked until a driver asks for more.
const PIC_1_MASK: u8 = 0xfc;
const PIC_2_MASK: u8 = 0xff;

/// Global instance of chained PICs.
pub static PICS: Mutex<ChainedPics> =
	Mutex::new(unsafe { ChainedPics::new_contiguous(PIC_1_OFFSET) });

pub static TICKS: AtomicU32 = AtomicU32::new(0);

/// Enumeration of interrupt indexes.
///
/// Represents the remapped hardware interrupt lines.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
#[repr(u8)]
pub enum InterruptIndex {
	Timer = PIC_1_OFFSET,
	Keyboard,
	Cascade,
	Com2,
	Com1,
	Lpt2,
	Floppy,
	Lpt1,
	Rtc,
	Free1,
	Free2,
	Free3,
	Ps2Mouse,
	Coprocessor,
	PrimaryAtaHardDisk,
	SecondaryAtaHardDisk,
}

impl InterruptIndex {
	pub fn as_u8(self) -> u8 {
		self as u8
	}

	pub fn as_usize(self) -> usize {
		usize::from(self.as_u8())
	}
}

/// High-level interrupt callback.
pub type InterruptHandler = fn();

/// Parallel dispatch table to the IDT. Written during driver init only;
/// read from interrupt context afterwards.
static mut HANDLERS: [Option<InterruptHandler>; 256] = [None; 256];

static EXCEPTION_NAMES: [&str; 32] = [
	"Divide By Zero",
	"Debug",
	"Non-Maskable Interrupt",
	"Breakpoint",
	"Overflow",
	"Bound Range Exceeded",
	"Invalid Opcode",
	"Coprocessor Not Available",
	"Double Fault",
	"Coprocessor Segment Overrun",
	"Invalid Task State Segment",
	"Segment Not Present",
	"Stack Fault",
	"General Protection Fault",
	"Page Fault",
	"Reserved",
	"Math Fault",
	"Alignment Check",
	"Machine Check",
	"SIMD Floating Point Exception",
	"Virtualization Exception",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
];

/// Registers a callback for an interrupt vector.
pub fn register(vector: u8, handler: InterruptHandler) {
	without_interrupts(|| unsafe {
		HANDLERS[vector as usize] = Some(handler);
	});
}

/// Common dispatcher behind every assembly stub.
///
/// Runs the registered callback if any. Unhandled CPU exceptions are
/// fatal: the vector is written straight into the VGA buffer (no locks,
/// the machine state cannot be trusted) and the CPU is parked. Hardware
/// vectors are acknowledged at the PIC on the way out.
#[no_mangle]
extern "C" fn isr_dispatch(vector: u64, error_code: u64) {
	let vector = (vector & 0xff) as usize;

	let handler = unsafe { HANDLERS[vector] };
	match handler {
		Some(handler) => handler(),
		None => {
			if vector < 32 {
				fatal_exception(vector, error_code);
			}
		}
	}

	if (32..48).contains(&vector) {
		unsafe {
			PICS.lock().notify_end_of_interrupt(vector as u8);
		}
	}
}

/// Paint the vector number white-on-red in the top-left corner and halt.
/// Deliberately lock-free: the exception may have fired while the VGA
/// writer or the serial port was held.
fn fatal_exception(vector: usize, error_code: u64) -> ! {
	cli();

	let vga = 0xb8000 as *mut u16;
	let message = b"EXCEPTION:    ";
	unsafe {
		for (i, &byte) in message.iter().enumerate() {
			vga.add(i).write_volatile(0x4f00 | byte as u16);
		}
		vga.add(11).write_volatile(0x4f00 | (b'0' + (vector / 10) as u8) as u16);
		vga.add(12).write_volatile(0x4f00 | (b'0' + (vector % 10) as u8) as u16);
	}

	log!(
		LogLevel::Panic,
		"Unhandled exception {}: {} (error code {:#x})",
		vector,
		EXCEPTION_NAMES[vector],
		error_code
	);

	loop {
		hlt();
	}
}

fn timer_interrupt() {
	TICKS.fetch_add(1, Ordering::SeqCst);
}

pub fn get_tick_count() -> u32 {
	TICKS.load(Ordering::SeqCst)
}

/// Initializes the interrupt subsystem: remaps the PIC pair onto vectors
/// 32..48, sets the initial masks, hooks the timer tick and enables
/// interrupts. The IDT itself must already be loaded.
pub fn init() {
	unsafe {
		let mut pics = PICS.lock();
		pics.initialize();
		pics.write_masks(PIC_1_MASK, PIC_2_MASK);
	}
	log!(
		LogLevel::Info,
		"PIC remapped (master: {:#x}, slave: {:#x})",
		PIC_1_OFFSET,
		PIC_2_OFFSET
	);

	register(InterruptIndex::Timer.as_u8(), timer_interrupt);

	enable();
	log!(LogLevel::Info, "Interrupts enabled");
}

/// Enables interrupts on the CPU.
pub fn enable() {
	sti();
}

/// Disables interrupts on the CPU.
pub fn disable() {
	cli();
}

fn are_enabled() -> bool {
	let rflags: u64;
	unsafe {
		asm!("pushfq", "pop {}", out(reg) rflags, options(nomem, preserves_flags));
	}
	rflags & (1 << 9) != 0
}

/// Runs a closure with interrupts masked, restoring the previous state
/// afterwards. Used by every console path so an IRQ handler can never
/// observe a half-held writer lock.
pub fn without_interrupts<F, R>(f: F) -> R
where
	F: FnOnce() -> R,
{
	let were_enabled = are_enabled();
	if were_enabled {
		disable();
	}
	let result = f();
	if were_enabled {
		enable();
	}
	result
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn timer_ticks_advance_while_halted() {
		let start = get_tick_count();
		// the PIT fires at ~18.2 Hz; a handful of halts must see at
		// least one tick
		for _ in 0..32 {
			hlt();
		}
		assert!(get_tick_count() > start);
	}

	#[test_case]
	fn without_interrupts_restores_the_flag() {
		assert!(are_enabled());
		without_interrupts(|| {
			assert!(!are_enabled());
		});
		assert!(are_enabled());
	}
}
