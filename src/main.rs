//! # ferrox
//!
//! Educational x86_64 kernel. The boot assembly in `boot::entry` brings
//! the CPU from the multiboot2 handoff into long mode and lands in
//! `kernel_main`, which initializes every subsystem in dependency order
//! and hands control to the interactive shell.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(crate::testing::runner)]
#![reexport_test_harness_main = "test_main"]

#[macro_use]
mod macros;
mod boot;
mod drivers;
mod exceptions;
mod memory;
mod net;
mod shell;
mod structures;
mod testing;
mod utils;
mod vga;

use core::panic::PanicInfo;
use drivers::{ata, pci};
use exceptions::{interrupts, keyboard};
use memory::{frame_allocator, kheap};
use utils::debug::{self, LogLevel};
use utils::io::hlt;
use vga::video_graphics_array::{self, ColorCode};

/// First Rust code after the long-mode switch. Paging is on, interrupts
/// are off, the boot GDT is live and a 64 KiB stack is set up; the two
/// arguments are the multiboot2 registers forwarded by the boot
/// assembly.
#[no_mangle]
pub extern "C" fn kernel_main(multiboot_magic: u32, multiboot_addr: u32) -> ! {
	init(multiboot_magic, multiboot_addr);

	#[cfg(test)]
	{
		test_main();
		testing::exit_qemu(testing::QemuExitCode::Success);
	}

	#[cfg(not(test))]
	shell::run()
}

fn init(multiboot_magic: u32, multiboot_addr: u32) {
	debug::init_serial_port();
	boot::multiboot::init(multiboot_magic, multiboot_addr);

	video_graphics_array::clear_screen();
	print_banner();

	video_graphics_array::set_color(ColorCode::Yellow, ColorCode::Black);
	println!("[BOOT] Initializing ferrox...");
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);

	print!("  - GDT ... ");
	structures::gdt::init();
	println!("OK");

	print!("  - IDT ... ");
	structures::idt::init();
	println!("OK");

	print!("  - Interrupts ... ");
	interrupts::init();
	println!("OK");

	print!("  - Physical memory ... ");
	frame_allocator::init();
	println!("OK");

	print!("  - Kernel heap ... ");
	kheap::init();
	println!("OK");

	print!("  - Keyboard ... ");
	keyboard::init();
	println!("OK");

	print!("  - PCI bus ... ");
	pci::init();
	println!("OK ({} devices)", pci::device_count());

	print!("  - ATA disk ... ");
	ata::init();
	if ata::is_present() {
		println!("OK");
	} else {
		println!("NO DISK");
	}

	print!("  - Network ... ");
	net::init();
	if net::is_initialized() {
		println!("OK");
	} else {
		println!("NO DEVICE");
	}

	video_graphics_array::set_color(ColorCode::LightGreen, ColorCode::Black);
	println!("[BOOT] Initialization complete!\n");
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);

	print_system_info();
}

fn print_banner() {
	video_graphics_array::set_color(ColorCode::LightCyan, ColorCode::Black);
	println!();
	println!("   __                          ");
	println!("  / _| ___ _ __ _ __ _____  __ ");
	println!(" | |_ / _ \\ '__| '__/ _ \\ \\/ / ");
	println!(" |  _|  __/ |  | | | (_) >  <  ");
	println!(" |_|  \\___|_|  |_|  \\___/_/\\_\\ ");
	println!();
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);
	println!(" Educational x86_64 operating system");
	println!(" ====================================\n");
}

fn print_system_info() {
	let (total, _used, free) = kheap::heap_stats();

	video_graphics_array::set_color(ColorCode::LightGreen, ColorCode::Black);
	println!("[SYSTEM INFO]");
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);
	println!("  Heap: {} KB total, {} KB free", total / 1024, free / 1024);

	if ata::is_present() {
		println!("  Disk: ATA drive detected");
	} else {
		println!("  Disk: no drive detected");
	}

	if net::is_initialized() {
		let mac = net::get_mac();
		println!(
			"  Network: {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
			mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
		);
	} else {
		println!("  Network: not initialized");
	}

	println!();
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
	interrupts::disable();
	log!(LogLevel::Panic, "{}", info);
	println!("{}", info);
	loop {
		hlt();
	}
}
