//! # PS/2 Keyboard Module
//!
//! IRQ1 handler and the scancode-to-character pipeline. The handler
//! reads one byte from the controller, folds modifier state in, and
//! pushes the resulting ASCII byte into a ring buffer that the rest of
//! the kernel drains through `has_char` / `get_char` / `read_line`.
//!
//! ## Overview
//!
//! The ring is single-producer (the interrupt handler) and
//! single-consumer (whoever is reading a line). The producer only
//! advances `head` after writing the cell and the consumer only
//! advances `tail` after reading it, so no lock is needed; when the
//! buffer is full new bytes are silently dropped.

use crate::exceptions::interrupts::{self, InterruptIndex};
use crate::utils::io::{hlt, inb};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const KBD_DATA_PORT: u16 = 0x60;
const KBD_STATUS_PORT: u16 = 0x64;

const KBD_BUFFER_SIZE: usize = 256;

static mut KBD_BUFFER: [u8; KBD_BUFFER_SIZE] = [0; KBD_BUFFER_SIZE];
static BUFFER_HEAD: AtomicUsize = AtomicUsize::new(0);
static BUFFER_TAIL: AtomicUsize = AtomicUsize::new(0);

static SHIFT_PRESSED: AtomicBool = AtomicBool::new(false);
static CTRL_PRESSED: AtomicBool = AtomicBool::new(false);
static ALT_PRESSED: AtomicBool = AtomicBool::new(false);
static CAPS_LOCK: AtomicBool = AtomicBool::new(false);

const SC_LSHIFT: u8 = 0x2a;
const SC_RSHIFT: u8 = 0x36;
const SC_CTRL: u8 = 0x1d;
const SC_ALT: u8 = 0x38;
const SC_CAPS: u8 = 0x3a;

/// End-of-text, what a terminal sends for Ctrl+C.
const ETX: u8 = 3;

/// US scancode set 1 to ASCII.
#[rustfmt::skip]
static SCANCODE_TO_ASCII: [u8; 128] = [
	0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 8,
	b'\t', b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n',
	0, b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`',
	0, b'\\', b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', 0,
	b'*', 0, b' ', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, b'-', 0, 0, 0, b'+', 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Same table with shift held.
#[rustfmt::skip]
static SCANCODE_TO_ASCII_SHIFT: [u8; 128] = [
	0, 27, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 8,
	b'\t', b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n',
	0, b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~',
	0, b'|', b'Z', b'X', b'C', b'V', b'B', b'N', b'M', b'<', b'>', b'?', 0,
	b'*', 0, b' ', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, b'-', 0, 0, 0, b'+', 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
	0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Translate a press scancode into an ASCII byte given the current
/// modifier state. Returns 0 for keys with no character meaning.
fn translate(scancode: u8, shift: bool, caps_lock: bool, ctrl: bool) -> u8 {
	let mut c = if shift {
		SCANCODE_TO_ASCII_SHIFT[scancode as usize]
	} else {
		SCANCODE_TO_ASCII[scancode as usize]
	};

	if caps_lock {
		if c.is_ascii_lowercase() {
			c = c.to_ascii_uppercase();
		} else if c.is_ascii_uppercase() {
			c = c.to_ascii_lowercase();
		}
	}

	if ctrl && (c == b'c' || c == b'C') {
		c = ETX;
	}

	c
}

fn buffer_put(c: u8) {
	let head = BUFFER_HEAD.load(Ordering::Relaxed);
	let next = (head + 1) % KBD_BUFFER_SIZE;
	if next == BUFFER_TAIL.load(Ordering::Acquire) {
		return; // full, byte dropped
	}
	unsafe {
		KBD_BUFFER[head] = c;
	}
	BUFFER_HEAD.store(next, Ordering::Release);
}

fn buffer_get() -> Option<u8> {
	let tail = BUFFER_TAIL.load(Ordering::Relaxed);
	if tail == BUFFER_HEAD.load(Ordering::Acquire) {
		return None;
	}
	let c = unsafe { KBD_BUFFER[tail] };
	BUFFER_TAIL.store((tail + 1) % KBD_BUFFER_SIZE, Ordering::Release);
	Some(c)
}

/// IRQ1 callback. Modifier keys update their flags on both press and
/// release; caps lock toggles on press only; everything else is
/// translated and queued on press.
fn keyboard_interrupt() {
	let scancode = unsafe { inb(KBD_DATA_PORT) };

	let released = scancode & 0x80 != 0;
	let scancode = scancode & 0x7f;

	match scancode {
		SC_LSHIFT | SC_RSHIFT => {
			SHIFT_PRESSED.store(!released, Ordering::SeqCst);
			return;
		}
		SC_CTRL => {
			CTRL_PRESSED.store(!released, Ordering::SeqCst);
			return;
		}
		SC_ALT => {
			ALT_PRESSED.store(!released, Ordering::SeqCst);
			return;
		}
		SC_CAPS => {
			if !released {
				let caps = CAPS_LOCK.load(Ordering::SeqCst);
				CAPS_LOCK.store(!caps, Ordering::SeqCst);
			}
			return;
		}
		_ => {}
	}

	if released {
		return;
	}

	let c = translate(
		scancode,
		SHIFT_PRESSED.load(Ordering::SeqCst),
		CAPS_LOCK.load(Ordering::SeqCst),
		CTRL_PRESSED.load(Ordering::SeqCst),
	);

	if c != 0 {
		buffer_put(c);
	}
}

/// Initializes the keyboard driver: resets all state, drains whatever
/// the controller buffered during boot and hooks IRQ1.
pub fn init() {
	BUFFER_HEAD.store(0, Ordering::SeqCst);
	BUFFER_TAIL.store(0, Ordering::SeqCst);
	SHIFT_PRESSED.store(false, Ordering::SeqCst);
	CTRL_PRESSED.store(false, Ordering::SeqCst);
	ALT_PRESSED.store(false, Ordering::SeqCst);
	CAPS_LOCK.store(false, Ordering::SeqCst);

	unsafe {
		while inb(KBD_STATUS_PORT) & 0x01 != 0 {
			inb(KBD_DATA_PORT);
		}
	}

	interrupts::register(InterruptIndex::Keyboard.as_u8(), keyboard_interrupt);
}

/// True if a character is waiting in the buffer.
pub fn has_char() -> bool {
	BUFFER_HEAD.load(Ordering::Acquire) != BUFFER_TAIL.load(Ordering::Acquire)
}

/// Blocking read of one character. Halts the CPU between interrupts
/// while the buffer is empty.
pub fn get_char() -> u8 {
	loop {
		if let Some(c) = buffer_get() {
			return c;
		}
		hlt();
	}
}

/// Reads a line into `buffer`, echoing as it goes. Returns the line
/// length on Enter, or `None` when the read was cancelled with Ctrl+C.
/// Backspace removes the last byte (and erases it on screen); input
/// beyond the buffer commits as if Enter had been pressed.
pub fn read_line(buffer: &mut [u8]) -> Option<usize> {
	let mut pos = 0;

	while pos < buffer.len() {
		let c = get_char();

		match c {
			b'\n' | b'\r' => {
				println!();
				return Some(pos);
			}
			8 | 127 => {
				if pos > 0 {
					pos -= 1;
					print!("\x08 \x08");
				}
			}
			ETX => {
				println!("^C");
				return None;
			}
			b' '..=b'~' => {
				buffer[pos] = c;
				pos += 1;
				print!("{}", c as char);
			}
			_ => {}
		}
	}

	Some(pos)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn drain() {
		while buffer_get().is_some() {}
	}

	#[test_case]
	fn translate_applies_shift() {
		assert_eq!(translate(0x23, false, false, false), b'h');
		assert_eq!(translate(0x23, true, false, false), b'H');
		assert_eq!(translate(0x02, true, false, false), b'!');
	}

	#[test_case]
	fn caps_lock_inverts_letter_case_only() {
		assert_eq!(translate(0x23, false, true, false), b'H');
		assert_eq!(translate(0x23, true, true, false), b'h');
		// digits are unaffected by caps lock
		assert_eq!(translate(0x02, false, true, false), b'1');
	}

	#[test_case]
	fn ctrl_c_yields_etx() {
		assert_eq!(translate(0x2e, false, false, true), ETX);
		assert_eq!(translate(0x2e, true, false, true), ETX);
	}

	#[test_case]
	fn ring_buffer_is_fifo_and_empty_when_drained() {
		drain();
		assert!(!has_char());
		buffer_put(b'a');
		buffer_put(b'b');
		assert!(has_char());
		assert_eq!(buffer_get(), Some(b'a'));
		assert_eq!(buffer_get(), Some(b'b'));
		assert_eq!(buffer_get(), None);
	}

	#[test_case]
	fn full_ring_drops_without_corruption() {
		drain();
		for i in 0..KBD_BUFFER_SIZE + 16 {
			buffer_put((i & 0x7f) as u8);
		}
		// capacity is one less than the array size
		let mut count = 0;
		while let Some(_) = buffer_get() {
			count += 1;
		}
		assert_eq!(count, KBD_BUFFER_SIZE - 1);
		assert!(!has_char());
	}

	#[test_case]
	fn read_line_applies_backspace_editing() {
		drain();
		for &byte in b"hello\x08\x08p\n" {
			buffer_put(byte);
		}
		let mut line = [0u8; 16];
		let len = read_line(&mut line).unwrap();
		assert_eq!(&line[..len], b"help");
	}
}
