//! # Shell Command Processing Module
//!
//! Implementation of the built-in commands. Each command receives the
//! whitespace-split argument list (command name included) and talks to
//! the rest of the kernel through the public subsystem interfaces.

use crate::drivers::ata;
use crate::memory::kheap;
use crate::net;
use crate::utils::io::{outb, outw};
use crate::utils::librs::{hang, hexdump, parse_ipv4, parse_u32};
use crate::vga::video_graphics_array::{self, ColorCode};

pub const MAX_LINE_LENGTH: usize = 256;
pub const MAX_ARGS: usize = 16;

struct Command {
	name: &'static str,
	description: &'static str,
	func: fn(&[&str]),
}

static COMMANDS: [Command; 10] = [
	Command {
		name: "help",
		description: "Display this help message",
		func: help,
	},
	Command {
		name: "clear",
		description: "Clear the screen",
		func: clear,
	},
	Command {
		name: "echo",
		description: "Echo text to screen",
		func: echo,
	},
	Command {
		name: "meminfo",
		description: "Display memory information",
		func: meminfo,
	},
	Command {
		name: "diskread",
		description: "Read a disk sector (diskread <lba>)",
		func: diskread,
	},
	Command {
		name: "diskwrite",
		description: "Write to disk sector (diskwrite <lba> <text>)",
		func: diskwrite,
	},
	Command {
		name: "netinfo",
		description: "Display network information",
		func: netinfo,
	},
	Command {
		name: "ping",
		description: "Send ICMP ping (ping <ip>)",
		func: ping,
	},
	Command {
		name: "reboot",
		description: "Reboot the system",
		func: reboot,
	},
	Command {
		name: "halt",
		description: "Halt the system",
		func: halt,
	},
];

/// Dispatches one parsed command line.
pub fn execute(args: &[&str]) {
	if args.is_empty() {
		return;
	}

	for command in COMMANDS.iter() {
		if command.name == args[0] {
			(command.func)(args);
			return;
		}
	}

	video_graphics_array::set_color(ColorCode::LightRed, ColorCode::Black);
	println!("Unknown command: {}", args[0]);
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);
	println!("Type 'help' for a list of commands.");
}

fn help(_args: &[&str]) {
	video_graphics_array::set_color(ColorCode::LightCyan, ColorCode::Black);
	println!("\nShell commands:");
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);
	for command in COMMANDS.iter() {
		println!("  {:12} - {}", command.name, command.description);
	}
	println!();
}

fn clear(_args: &[&str]) {
	video_graphics_array::clear_screen();
}

fn echo(args: &[&str]) {
	for (i, arg) in args.iter().enumerate().skip(1) {
		if i > 1 {
			print!(" ");
		}
		print!("{}", arg);
	}
	println!();
}

fn meminfo(_args: &[&str]) {
	let (total, used, free) = kheap::heap_stats();
	video_graphics_array::set_color(ColorCode::LightCyan, ColorCode::Black);
	println!("\nMemory information:");
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);
	println!("  Heap total: {} KB", total / 1024);
	println!("  Heap used:  {} KB", used / 1024);
	println!("  Heap free:  {} KB", free / 1024);
	println!();
}

fn error(message: &str) {
	video_graphics_array::set_color(ColorCode::LightRed, ColorCode::Black);
	println!("Error: {}", message);
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);
}

fn diskread(args: &[&str]) {
	let lba = match args.get(1).and_then(|arg| parse_u32(arg)) {
		Some(lba) => lba,
		None => {
			println!("Usage: diskread <lba>");
			return;
		}
	};

	if !ata::is_present() {
		error("No disk present");
		return;
	}

	let mut buffer = [0u8; ata::SECTOR_SIZE];
	println!("Reading sector {}...", lba);

	match ata::read_sectors(lba, 1, &mut buffer) {
		Ok(()) => hexdump(lba * ata::SECTOR_SIZE as u32, &buffer),
		Err(reason) => error(reason),
	}
}

fn diskwrite(args: &[&str]) {
	let lba = match args.get(1).and_then(|arg| parse_u32(arg)) {
		Some(lba) => lba,
		None => {
			println!("Usage: diskwrite <lba> <text>");
			return;
		}
	};
	let text = match args.get(2) {
		Some(text) => *text,
		None => {
			println!("Usage: diskwrite <lba> <text>");
			return;
		}
	};

	if !ata::is_present() {
		error("No disk present");
		return;
	}

	let mut buffer = [0u8; ata::SECTOR_SIZE];
	let len = core::cmp::min(text.len(), ata::SECTOR_SIZE);
	buffer[..len].copy_from_slice(&text.as_bytes()[..len]);

	match ata::write_sectors(lba, 1, &buffer) {
		Ok(()) => println!("Wrote {} byte(s) to sector {}", len, lba),
		Err(reason) => error(reason),
	}
}

fn netinfo(_args: &[&str]) {
	video_graphics_array::set_color(ColorCode::LightCyan, ColorCode::Black);
	println!("\nNetwork information:");
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);

	if !net::is_initialized() {
		println!("  No network device");
		println!();
		return;
	}

	let mac = net::get_mac();
	let ip = net::get_ip().to_ne_bytes();
	println!(
		"  MAC: {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
		mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
	);
	println!("  IP:  {}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
	println!();
}

fn ping(args: &[&str]) {
	let dest_ip = match args.get(1).and_then(|arg| parse_ipv4(arg)) {
		Some(ip) => ip,
		None => {
			println!("Usage: ping <a.b.c.d>");
			return;
		}
	};

	if !net::is_initialized() {
		error("No network device");
		return;
	}

	match net::ping(dest_ip) {
		Ok(()) => println!("Echo request sent"),
		Err(reason) => error(reason),
	}
}

/// Pulse the reset line through the keyboard controller.
fn reboot(_args: &[&str]) {
	unsafe {
		outb(0x64, 0xfe);
	}
}

fn halt(_args: &[&str]) {
	println!("System halted.");
	unsafe {
		// QEMU/Bochs ACPI shutdown; falls through to a hlt loop on
		// real hardware.
		outw(0x604, 0x2000);
	}
	hang();
}
