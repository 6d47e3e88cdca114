//! # Global Descriptor Table (64-bit)
//!
//! The boot assembly runs on a two-entry throwaway GDT that exists only
//! to reach long mode. Once Rust is running we switch to the real table:
//! null descriptor, ring-0 code and data, ring-3 code and data (present
//! but unused until user mode exists) and a TSS. In long mode the
//! base/limit fields of the code and data descriptors are ignored; what
//! matters is the access byte and the L bit.

use core::arch::asm;
use lazy_static::lazy_static;

const CODE_KERNEL: u8 = 0x9a; // Code, ring 0, execute/read
const DATA_KERNEL: u8 = 0x92; // Data, ring 0, read/write
const CODE_USER: u8 = 0xfa; // Code, ring 3, execute/read
const DATA_USER: u8 = 0xf2; // Data, ring 3, read/write
const TSS_AVAILABLE: u8 = 0x89; // 64-bit TSS, available

const GRANULARITY_LONG_MODE: u8 = 0xa0; // G=1, L=1
const GRANULARITY_DATA: u8 = 0xc0; // G=1, D/B=1
const MAX_SEGMENT_SIZE: u32 = 0xfffff;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
const TSS_SELECTOR: u16 = 0x28;

/// Global Descriptor Table entry structure.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct GdtEntry {
	limit_low: u16,
	base_low: u16,
	base_middle: u8,
	access: u8,
	granularity: u8,
	base_high: u8,
}

impl GdtEntry {
	/// Creates a new GDT entry.
	fn new(limit: u32, base: u32, access: u8, granularity: u8) -> GdtEntry {
		GdtEntry {
			limit_low: (limit & 0xffff) as u16,
			base_low: (base & 0xffff) as u16,
			base_middle: ((base >> 16) & 0xff) as u8,
			access,
			granularity: (granularity & 0xf0) | (((limit >> 16) & 0x0f) as u8),
			base_high: ((base >> 24) & 0xff) as u8,
		}
	}

	const fn null() -> GdtEntry {
		GdtEntry {
			limit_low: 0,
			base_low: 0,
			base_middle: 0,
			access: 0,
			granularity: 0,
			base_high: 0,
		}
	}
}

/// 64-bit Task State Segment. No user mode means no stack switching yet,
/// but the descriptor layout must still be valid for `ltr`.
#[repr(C, packed)]
struct TaskStateSegment {
	reserved0: u32,
	rsp: [u64; 3],
	reserved1: u64,
	ist: [u64; 7],
	reserved2: u64,
	reserved3: u16,
	iopb_offset: u16,
}

static TSS: TaskStateSegment = TaskStateSegment {
	reserved0: 0,
	rsp: [0; 3],
	reserved1: 0,
	ist: [0; 7],
	reserved2: 0,
	reserved3: 0,
	iopb_offset: core::mem::size_of::<TaskStateSegment>() as u16,
};

lazy_static! {
	static ref GDT: [GdtEntry; 7] = {
		let tss_base = &TSS as *const TaskStateSegment as u64;
		let tss_limit = (core::mem::size_of::<TaskStateSegment>() - 1) as u32;

		// A 64-bit TSS descriptor spans two slots: the first is an
		// ordinary entry with the low 32 base bits, the second holds
		// bits 32..64 of the base.
		let tss_low = GdtEntry::new(tss_limit, (tss_base & 0xffffffff) as u32, TSS_AVAILABLE, 0x00);
		let tss_high = GdtEntry {
			limit_low: ((tss_base >> 32) & 0xffff) as u16,
			base_low: ((tss_base >> 48) & 0xffff) as u16,
			base_middle: 0,
			access: 0,
			granularity: 0,
			base_high: 0,
		};

		[
			GdtEntry::null(),
			GdtEntry::new(MAX_SEGMENT_SIZE, 0, CODE_KERNEL, GRANULARITY_LONG_MODE),
			GdtEntry::new(MAX_SEGMENT_SIZE, 0, DATA_KERNEL, GRANULARITY_DATA),
			GdtEntry::new(MAX_SEGMENT_SIZE, 0, CODE_USER, GRANULARITY_LONG_MODE),
			GdtEntry::new(MAX_SEGMENT_SIZE, 0, DATA_USER, GRANULARITY_DATA),
			tss_low,
			tss_high,
		]
	};
}

/// Global Descriptor Table register structure.
#[repr(C, packed)]
struct GdtRegister {
	size: u16,
	offset: u64,
}

/// Loads the GDT.
unsafe fn load_gdt() {
	let gdt_register = GdtRegister {
		size: (core::mem::size_of_val(&*GDT) - 1) as u16,
		offset: GDT.as_ptr() as u64,
	};

	asm!("lgdt [{}]", in(reg) &gdt_register, options(readonly, nostack, preserves_flags));
}

/// Reloads CS with a far return, then the data segment registers.
unsafe fn load_segment_registers() {
	asm!(
		"push {code}",
		"lea rax, [55f + rip]",
		"push rax",
		"retfq",
		"55:",
		"mov ax, {data}",
		"mov ds, ax",
		"mov es, ax",
		"mov fs, ax",
		"mov gs, ax",
		"mov ss, ax",
		code = const KERNEL_CODE_SELECTOR as u64,
		data = const KERNEL_DATA_SELECTOR as u64,
		out("rax") _,
	);
}

unsafe fn load_tss() {
	asm!("ltr ax", in("ax") TSS_SELECTOR, options(nostack, preserves_flags));
}

/// Initializes the GDT.
pub fn init() {
	unsafe {
		load_gdt();
		load_segment_registers();
		load_tss();
	}
	println_serial!("GDT successfully loaded");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn entry_packs_limit_and_granularity() {
		let entry = GdtEntry::new(MAX_SEGMENT_SIZE, 0, CODE_KERNEL, GRANULARITY_LONG_MODE);
		let (limit_low, granularity, access) = (entry.limit_low, entry.granularity, entry.access);
		assert_eq!(limit_low, 0xffff);
		assert_eq!(granularity, 0xaf);
		assert_eq!(access, 0x9a);
	}

	#[test_case]
	fn entry_splits_base_across_fields() {
		let entry = GdtEntry::new(0, 0x12345678, DATA_KERNEL, GRANULARITY_DATA);
		let (base_low, base_middle, base_high) = (entry.base_low, entry.base_middle, entry.base_high);
		assert_eq!(base_low, 0x5678);
		assert_eq!(base_middle, 0x34);
		assert_eq!(base_high, 0x12);
	}
}
