use crate::exceptions::interrupts;
use crate::utils::debug::DEBUG;
use crate::vga::video_graphics_array::WRITER;
use core::fmt;

#[macro_export]
macro_rules! print {
	($($arg:tt)*) => ($crate::macros::print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
	() => (print!("\n"));
	($($arg:tt)*) => (print!("{}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! print_serial {
	($($arg:tt)*) => {
		$crate::macros::print_serial(format_args!($($arg)*))
	};
}

#[macro_export]
macro_rules! println_serial {
	() => (print_serial!("\n"));
	($($arg:tt)*) => (print_serial!("{}\n", format_args!($($arg)*)));
}

/// Leveled boot/diagnostic logging to the serial port.
#[macro_export]
macro_rules! log {
	($level:expr, $($arg:tt)*) => {
		println_serial!("[ {} ] {}", $level.as_str(), format_args!($($arg)*))
	};
}

pub fn print(args: fmt::Arguments) {
	use core::fmt::Write;
	interrupts::without_interrupts(|| {
		WRITER.lock().write_fmt(args).unwrap();
	});
}

pub fn print_serial(args: fmt::Arguments) {
	use core::fmt::Write;
	interrupts::without_interrupts(|| {
		DEBUG.lock().write_fmt(args).unwrap();
	});
}
