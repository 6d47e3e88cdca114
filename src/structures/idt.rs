//! # Interrupt Descriptor Table (IDT)
//!
//! This module owns the 256-gate IDT and the assembly stubs behind it.
//! Every stub normalizes the stack to the same shape (a pseudo error
//! code of 0 for vectors the CPU does not supply one for, then the
//! vector number, then all general-purpose registers) and funnels into
//! a common trampoline that calls the high-level dispatcher in
//! `exceptions::interrupts` with `(vector, error_code)`.
//!
//! ## Overview
//!
//! Vectors 0..32 are CPU exceptions (some of which push a hardware error
//! code), 32..48 are the remapped PIC lines, and the rest are left as
//! non-present gates so a stray software interrupt faults into the
//! general-protection handler instead of jumping through a null pointer.

use crate::structures::gdt::KERNEL_CODE_SELECTOR;
use crate::utils::debug::LogLevel;
use core::arch::{asm, global_asm};

/// Represents an Interrupt Descriptor Table (IDT) entry.
///
/// In long mode a gate carries a 64-bit handler offset split over three
/// fields, an interrupt-stack-table index (unused here) and the usual
/// type/attribute byte.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct IdtDescriptor {
	offset_low: u16,
	selector: u16,
	ist: u8,
	type_attributes: u8,
	offset_mid: u16,
	offset_high: u32,
	reserved: u32,
}

impl IdtDescriptor {
	fn new(offset: u64, selector: u16, type_attributes: u8) -> IdtDescriptor {
		IdtDescriptor {
			offset_low: (offset & 0xffff) as u16,
			selector,
			ist: 0,
			type_attributes,
			offset_mid: ((offset >> 16) & 0xffff) as u16,
			offset_high: ((offset >> 32) & 0xffffffff) as u32,
			reserved: 0,
		}
	}

	const fn missing() -> IdtDescriptor {
		IdtDescriptor {
			offset_low: 0,
			selector: 0,
			ist: 0,
			type_attributes: 0,
			offset_mid: 0,
			offset_high: 0,
			reserved: 0,
		}
	}
}

/// Present, ring 0, 64-bit interrupt gate (interrupts stay disabled
/// while the handler runs).
const INTERRUPT_GATE: u8 = 0x8e;

global_asm!(
	r#"
.macro isr_stub num
.global isr\num
isr\num:
	pushq $0
	pushq $\num
	jmp isr_common
.endm

# Vectors 8, 10-14 and 17 push a hardware error code before the stub
# runs, so only the vector number is added on top of it.
.macro isr_stub_err num
.global isr\num
isr\num:
	pushq $\num
	jmp isr_common
.endm

.macro irq_stub num
.global irq\num
irq\num:
	pushq $0
	pushq $(\num + 32)
	jmp isr_common
.endm

isr_stub 0
isr_stub 1
isr_stub 2
isr_stub 3
isr_stub 4
isr_stub 5
isr_stub 6
isr_stub 7
isr_stub_err 8
isr_stub 9
isr_stub_err 10
isr_stub_err 11
isr_stub_err 12
isr_stub_err 13
isr_stub_err 14
isr_stub 15
isr_stub 16
isr_stub_err 17
isr_stub 18
isr_stub 19
isr_stub 20
isr_stub 21
isr_stub 22
isr_stub 23
isr_stub 24
isr_stub 25
isr_stub 26
isr_stub 27
isr_stub 28
isr_stub 29
isr_stub 30
isr_stub 31

irq_stub 0
irq_stub 1
irq_stub 2
irq_stub 3
irq_stub 4
irq_stub 5
irq_stub 6
irq_stub 7
irq_stub 8
irq_stub 9
irq_stub 10
irq_stub 11
irq_stub 12
irq_stub 13
irq_stub 14
irq_stub 15

# Common trampoline: save every GP register, hand (vector, error code)
# to the dispatcher, restore, drop the two pushed words and return.
isr_common:
	pushq %rax
	pushq %rcx
	pushq %rdx
	pushq %rbx
	pushq %rbp
	pushq %rsi
	pushq %rdi
	pushq %r8
	pushq %r9
	pushq %r10
	pushq %r11
	pushq %r12
	pushq %r13
	pushq %r14
	pushq %r15

	movq 120(%rsp), %rdi
	movq 128(%rsp), %rsi
	cld
	call isr_dispatch

	popq %r15
	popq %r14
	popq %r13
	popq %r12
	popq %r11
	popq %r10
	popq %r9
	popq %r8
	popq %rdi
	popq %rsi
	popq %rbp
	popq %rbx
	popq %rdx
	popq %rcx
	popq %rax
	addq $16, %rsp
	iretq
"#,
	options(att_syntax)
);

extern "C" {
	fn isr0();
	fn isr1();
	fn isr2();
	fn isr3();
	fn isr4();
	fn isr5();
	fn isr6();
	fn isr7();
	fn isr8();
	fn isr9();
	fn isr10();
	fn isr11();
	fn isr12();
	fn isr13();
	fn isr14();
	fn isr15();
	fn isr16();
	fn isr17();
	fn isr18();
	fn isr19();
	fn isr20();
	fn isr21();
	fn isr22();
	fn isr23();
	fn isr24();
	fn isr25();
	fn isr26();
	fn isr27();
	fn isr28();
	fn isr29();
	fn isr30();
	fn isr31();
	fn irq0();
	fn irq1();
	fn irq2();
	fn irq3();
	fn irq4();
	fn irq5();
	fn irq6();
	fn irq7();
	fn irq8();
	fn irq9();
	fn irq10();
	fn irq11();
	fn irq12();
	fn irq13();
	fn irq14();
	fn irq15();
}

const EXCEPTION_STUBS: [unsafe extern "C" fn(); 32] = [
	isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11, isr12, isr13,
	isr14, isr15, isr16, isr17, isr18, isr19, isr20, isr21, isr22, isr23, isr24, isr25, isr26,
	isr27, isr28, isr29, isr30, isr31,
];

const IRQ_STUBS: [unsafe extern "C" fn(); 16] = [
	irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13,
	irq14, irq15,
];

static mut IDT: [IdtDescriptor; 256] = [IdtDescriptor::missing(); 256];

/// Represents the register structure used for loading the IDT.
#[repr(C, packed)]
struct IdtRegister {
	size: u16,
	offset: u64,
}

unsafe fn fill_idt() {
	let idt = &mut *core::ptr::addr_of_mut!(IDT);

	for (vector, stub) in EXCEPTION_STUBS.iter().enumerate() {
		idt[vector] = IdtDescriptor::new(*stub as u64, KERNEL_CODE_SELECTOR, INTERRUPT_GATE);
	}
	for (line, stub) in IRQ_STUBS.iter().enumerate() {
		idt[32 + line] = IdtDescriptor::new(*stub as u64, KERNEL_CODE_SELECTOR, INTERRUPT_GATE);
	}
}

/// Initializes and loads the Interrupt Descriptor Table (IDT).
///
/// Populates the exception and IRQ gates, then points the CPU's IDT
/// register at the table. Interrupts stay disabled until
/// `exceptions::interrupts::init` has remapped the PIC.
pub fn init() {
	unsafe {
		fill_idt();

		let idt_register = IdtRegister {
			size: (core::mem::size_of::<[IdtDescriptor; 256]>() - 1) as u16,
			offset: core::ptr::addr_of!(IDT) as u64,
		};

		asm!("lidt [{}]", in(reg) &idt_register, options(readonly, nostack, preserves_flags));
	}

	log!(
		LogLevel::Info,
		"IDT successfully loaded at {:#x}",
		core::ptr::addr_of!(IDT) as u64
	);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn gate_splits_offset_across_fields() {
		let gate = IdtDescriptor::new(0xdead_beef_cafe, KERNEL_CODE_SELECTOR, INTERRUPT_GATE);
		let (low, mid, high) = (gate.offset_low, gate.offset_mid, gate.offset_high);
		assert_eq!(low, 0xcafe);
		assert_eq!(mid, 0xbeef);
		assert_eq!(high, 0xdead);
	}

	#[test_case]
	fn gate_descriptor_is_sixteen_bytes() {
		assert_eq!(core::mem::size_of::<IdtDescriptor>(), 16);
	}

	#[test_case]
	fn exception_and_irq_gates_are_present() {
		unsafe { fill_idt() };
		let idt = unsafe { &*core::ptr::addr_of!(IDT) };
		for vector in 0..48 {
			let attributes = idt[vector].type_attributes;
			assert_eq!(attributes, INTERRUPT_GATE);
		}
		let unused = idt[100].type_attributes;
		assert_eq!(unused, 0);
	}
}
