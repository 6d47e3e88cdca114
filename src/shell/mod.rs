//! # Interactive Shell
//!
//! Prompt loop on top of the keyboard line reader. Lines are split on
//! whitespace and dispatched to the builtin table; after every command
//! the network subsystem gets one poll so inbound ARP and ping traffic
//! is answered while the shell idles at the prompt.

use crate::exceptions::keyboard;
use crate::net;
use crate::vga::video_graphics_array::{self, ColorCode};

/// Shell builtins
pub mod builtins;

use builtins::{MAX_ARGS, MAX_LINE_LENGTH};

fn prompt() {
	video_graphics_array::set_color(ColorCode::LightCyan, ColorCode::Black);
	print!("ferrox");
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);
	print!("> ");
}

/// Splits a line into at most `MAX_ARGS` whitespace-separated tokens.
fn parse_args<'a>(line: &'a str, args: &mut [&'a str; MAX_ARGS]) -> usize {
	let mut count = 0;
	for token in line.split_whitespace() {
		if count == MAX_ARGS {
			break;
		}
		args[count] = token;
		count += 1;
	}
	count
}

/// Runs the shell forever.
pub fn run() -> ! {
	video_graphics_array::set_color(ColorCode::LightGreen, ColorCode::Black);
	println!("Welcome to the ferrox shell!");
	video_graphics_array::set_color(ColorCode::White, ColorCode::Black);
	println!("Type 'help' for a list of commands.\n");

	let mut line = [0u8; MAX_LINE_LENGTH];

	loop {
		prompt();

		let len = keyboard::read_line(&mut line).unwrap_or(0);
		if let Ok(text) = core::str::from_utf8(&line[..len]) {
			let mut args = [""; MAX_ARGS];
			let count = parse_args(text, &mut args);
			builtins::execute(&args[..count]);
		}

		net::poll();
	}
}
