//! # 32-bit Entry and Long-Mode Bring-up
//!
//! The bootloader drops us in 32-bit protected mode with paging off, the
//! multiboot2 magic in `eax` and the info-structure pointer in `ebx`.
//! Before any Rust code can run we have to prove the CPU supports long
//! mode, build an identity-mapped page hierarchy, switch the MMU on and
//! far-jump into a 64-bit code segment. All of that lives in the single
//! assembly block below; `kernel_main` is the first Rust on the other
//! side.
//!
//! ## Overview
//!
//! The identity map covers the first 64 MiB with 2 MiB pages: one PML4
//! entry, one PDPT entry and 32 page-directory entries marked
//! present/writable/huge. That window holds the kernel image, the frame
//! allocator's physical window, the heap and every DMA buffer the NIC
//! will ever publish, so virtual addresses can be handed to devices
//! unchanged.
//!
//! Failures before the console exists are reported as a single letter in
//! the top-left VGA cell: `C` for no CPUID, `L` for no long mode.

use core::arch::global_asm;

global_asm!(
	r#"
.section .boot.text, "ax"
.code32
.global _start
_start:
	movl $boot_stack_top, %esp

	# eax/ebx carry the multiboot2 magic and info pointer. Park them in
	# edi/esi, which survive the mode switch and become the first two
	# System V arguments of kernel_main.
	movl %eax, %edi
	movl %ebx, %esi

	call check_cpuid
	call check_long_mode
	call setup_page_tables
	call enable_paging

	lgdt boot_gdt_ptr
	ljmp $0x08, $long_mode_entry

# CPUID exists iff bit 21 of EFLAGS can be flipped.
check_cpuid:
	pushfl
	popl %eax
	movl %eax, %ecx
	xorl $(1 << 21), %eax
	pushl %eax
	popfl
	pushfl
	popl %eax
	pushl %ecx
	popfl
	cmpl %ecx, %eax
	je 1f
	ret
1:
	movb $'C', %al
	jmp boot_error

check_long_mode:
	movl $0x80000000, %eax
	cpuid
	cmpl $0x80000001, %eax
	jb 1f
	movl $0x80000001, %eax
	cpuid
	testl $(1 << 29), %edx
	jz 1f
	ret
1:
	movb $'L', %al
	jmp boot_error

# PML4[0] -> PDPT, PDPT[0] -> PD, PD[0..32] -> 2 MiB huge pages.
setup_page_tables:
	movl $boot_pdpt, %eax
	orl $0x3, %eax
	movl %eax, boot_pml4

	movl $boot_pd, %eax
	orl $0x3, %eax
	movl %eax, boot_pdpt

	movl $0, %ecx
1:
	movl $0x200000, %eax
	mull %ecx
	orl $0x83, %eax
	movl %eax, boot_pd(,%ecx,8)
	incl %ecx
	cmpl $32, %ecx
	jne 1b
	ret

enable_paging:
	movl $boot_pml4, %eax
	movl %eax, %cr3

	movl %cr4, %eax
	orl $(1 << 5), %eax
	movl %eax, %cr4

	movl $0xC0000080, %ecx
	rdmsr
	orl $(1 << 8), %eax
	wrmsr

	movl %cr0, %eax
	orl $(1 << 31), %eax
	movl %eax, %cr0
	ret

# al holds a single diagnostic letter. White-on-red in the first cell.
boot_error:
	movb %al, (0xb8000)
	movb $0x4f, (0xb8001)
1:
	hlt
	jmp 1b

.code64
long_mode_entry:
	movw $0x10, %ax
	movw %ax, %ds
	movw %ax, %es
	movw %ax, %fs
	movw %ax, %gs
	movw %ax, %ss

	movq $boot_stack_top, %rsp
	xorl %ebp, %ebp
	call kernel_main
1:
	cli
	hlt
	jmp 1b

.section .boot.rodata, "a"
.align 8
boot_gdt:
	.quad 0
	.quad 0x00209A0000000000    # ring 0 code, long-mode bit set
	.quad 0x0000920000000000    # ring 0 data, writable
boot_gdt_ptr:
	.word boot_gdt_ptr - boot_gdt - 1
	.quad boot_gdt

.section .boot.bss, "aw", @nobits
.align 4096
boot_pml4:
	.skip 4096
boot_pdpt:
	.skip 4096
boot_pd:
	.skip 4096
boot_stack_bottom:
	.skip 65536
boot_stack_top:
"#,
	options(att_syntax)
);
