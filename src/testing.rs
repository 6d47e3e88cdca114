//! Custom in-kernel test framework.
//!
//! `cargo test` builds the same kernel with the test harness woven in;
//! the boot path runs as usual, then `test_main` executes every
//! `#[test_case]` function and the kernel reports the verdict to QEMU
//! through the isa-debug-exit device instead of starting the shell.

#![cfg_attr(not(test), allow(dead_code))]

use crate::utils::io::outl;

pub trait Testable {
	fn run(&self);
}

impl<T: Fn()> Testable for T {
	fn run(&self) {
		print_serial!("{}...\t", core::any::type_name::<T>());
		self();
		println_serial!("[ok]");
	}
}

pub fn runner(tests: &[&dyn Testable]) {
	println_serial!("Running {} tests", tests.len());
	for (i, test) in tests.iter().enumerate() {
		print_serial!("{}/{} - ", i + 1, tests.len());
		test.run();
	}
}

#[repr(u32)]
#[allow(dead_code)]
pub enum QemuExitCode {
	Success = 0x10,
	Failed = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
	unsafe {
		outl(0xf4, exit_code as u32);
	}
	// only reached when the exit device is missing
	loop {
		crate::utils::io::hlt();
	}
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
	println_serial!("[failed]");
	println_serial!("{}", info);
	exit_qemu(QemuExitCode::Failed)
}
