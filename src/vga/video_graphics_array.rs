//! Module for VGA text mode buffer manipulation.
//!
//! Provides functionality to write text to the VGA text mode buffer,
//! which is a common method for displaying text on the screen in many
//! bare-metal or low-level systems, especially in the context of early
//! kernel development.
//!
//! ## Overview
//!
//! The VGA text mode buffer is a region of memory mapped to the display
//! hardware at physical address `0xb8000` (identity-mapped here). The
//! buffer is 25 lines high and 80 columns wide; each character cell is
//! two bytes, one for the ASCII character and one for the color
//! attribute. The hardware cursor is steered through the index/data
//! port pair at `0x3d4`/`0x3d5`.

use crate::utils::io::outb;
use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;

const VGA_BUFFER_ADDRESS: usize = 0xb8000;
pub const VGA_COLUMNS: usize = 80;
pub const VGA_ROWS: usize = 25;

const VGA_CTRL_REGISTER: u16 = 0x3d4;
const VGA_DATA_REGISTER: u16 = 0x3d5;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColorCode {
	Black = 0x0,
	Blue = 0x1,
	Green = 0x2,
	Cyan = 0x3,
	Red = 0x4,
	Magenta = 0x5,
	Brown = 0x6,
	LightGray = 0x7,
	DarkGray = 0x8,
	LightBlue = 0x9,
	LightGreen = 0xa,
	LightCyan = 0xb,
	LightRed = 0xc,
	Pink = 0xd,
	Yellow = 0xe,
	White = 0xf,
}

/// Represents a color code for a character cell in the VGA text buffer.
///
/// A color code consists of a foreground color and a background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct Color(u8);

impl Color {
	fn new(foreground: ColorCode, background: ColorCode) -> Color {
		Color(((background as u8) << 4) | (foreground as u8))
	}
}

#[repr(transparent)]
struct VgaBuffer {
	cells: [[u16; VGA_COLUMNS]; VGA_ROWS],
}

pub struct Writer {
	column_position: usize,
	row_position: usize,
	color: Color,
	buffer: &'static mut VgaBuffer,
}

lazy_static! {
	/// Global writer instance for the VGA buffer, protected by a mutex
	/// for safe concurrent access.
	pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
		column_position: 0,
		row_position: 0,
		color: Color::new(ColorCode::White, ColorCode::Black),
		buffer: unsafe { &mut *(VGA_BUFFER_ADDRESS as *mut VgaBuffer) },
	});
}

impl Writer {
	fn cell(&self, byte: u8) -> u16 {
		((self.color.0 as u16) << 8) | byte as u16
	}

	pub fn write_byte(&mut self, byte: u8) {
		match byte {
			b'\n' => self.new_line(),
			0x08 => self.backspace(),
			byte => {
				if self.column_position >= VGA_COLUMNS {
					self.new_line();
				}
				self.buffer.cells[self.row_position][self.column_position] = self.cell(byte);
				self.column_position += 1;
			}
		}
		self.update_cursor();
	}

	pub fn write_string(&mut self, s: &str) {
		for byte in s.bytes() {
			match byte {
				0x20..=0x7e | b'\n' | 0x08 => self.write_byte(byte),
				_ => self.write_byte(0xfe),
			}
		}
	}

	fn new_line(&mut self) {
		self.column_position = 0;
		if self.row_position < VGA_ROWS - 1 {
			self.row_position += 1;
		} else {
			self.scroll();
		}
	}

	fn backspace(&mut self) {
		if self.column_position > 0 {
			self.column_position -= 1;
			self.buffer.cells[self.row_position][self.column_position] = self.cell(b' ');
		}
	}

	fn scroll(&mut self) {
		for row in 1..VGA_ROWS {
			self.buffer.cells[row - 1] = self.buffer.cells[row];
		}
		let blank = self.cell(b' ');
		self.buffer.cells[VGA_ROWS - 1] = [blank; VGA_COLUMNS];
	}

	pub fn clear_screen(&mut self) {
		let blank = self.cell(b' ');
		for row in 0..VGA_ROWS {
			self.buffer.cells[row] = [blank; VGA_COLUMNS];
		}
		self.column_position = 0;
		self.row_position = 0;
		self.update_cursor();
	}

	pub fn set_color(&mut self, foreground: ColorCode, background: ColorCode) {
		self.color = Color::new(foreground, background);
	}

	fn update_cursor(&self) {
		let position = self.row_position * VGA_COLUMNS + self.column_position;
		unsafe {
			outb(VGA_CTRL_REGISTER, 0x0f);
			outb(VGA_DATA_REGISTER, (position & 0xff) as u8);
			outb(VGA_CTRL_REGISTER, 0x0e);
			outb(VGA_DATA_REGISTER, ((position >> 8) & 0xff) as u8);
		}
	}
}

impl fmt::Write for Writer {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.write_string(s);
		Ok(())
	}
}

/// Sets the text color for subsequent output.
pub fn set_color(foreground: ColorCode, background: ColorCode) {
	WRITER.lock().set_color(foreground, background);
}

/// Clears the screen and homes the cursor.
pub fn clear_screen() {
	WRITER.lock().clear_screen();
}
