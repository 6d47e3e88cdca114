//! # Programmable Interrupt Controller (PIC)
//!
//! Provides functionality to interact with and manage the Programmable
//! Interrupt Controllers (PICs) in x86 systems. This module defines
//! structures and methods for initializing the PICs, handling interrupt
//! masks, and sending end-of-interrupt commands.
//!
//! ## Overview
//!
//! The PICs are a pair of 8259A chips cascaded through IRQ2: the slave's
//! INT output feeds the master's IRQ2 input, giving 15 usable lines. At
//! power-on they deliver IRQs on vectors 8..15, which collide with CPU
//! exceptions, so initialization reprograms both chips with new vector
//! offsets, re-describes the cascade wiring and puts them in 8086 mode.

use crate::utils::io::{inb, io_wait, outb};

const CMD_INIT: u8 = 0x11;
const CMD_END_OF_INTERRUPT: u8 = 0x20;
const MODE_8086: u8 = 0x01;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xa0;
const PIC2_DATA: u16 = 0xa1;

struct Pic {
	offset: u8,
	command: u16,
	data: u16,
}

impl Pic {
	fn handles_interrupt(&self, interrupt_id: u8) -> bool {
		self.offset <= interrupt_id && interrupt_id < self.offset + 8
	}

	unsafe fn end_of_interrupt(&mut self) {
		outb(self.command, CMD_END_OF_INTERRUPT);
	}

	unsafe fn read_mask(&mut self) -> u8 {
		inb(self.data)
	}

	unsafe fn write_mask(&mut self, mask: u8) {
		outb(self.data, mask);
	}
}

/// Represents a pair of chained PICs.
pub struct ChainedPics {
	pics: [Pic; 2],
}

impl ChainedPics {
	/// Creates a new pair of chained PICs.
	pub const unsafe fn new(offset1: u8, offset2: u8) -> ChainedPics {
		ChainedPics {
			pics: [
				Pic {
					offset: offset1,
					command: PIC1_COMMAND,
					data: PIC1_DATA,
				},
				Pic {
					offset: offset2,
					command: PIC2_COMMAND,
					data: PIC2_DATA,
				},
			],
		}
	}

	pub const unsafe fn new_contiguous(primary_offset: u8) -> ChainedPics {
		Self::new(primary_offset, primary_offset + 8)
	}

	/// Runs the ICW1..ICW4 initialization sequence on both chips:
	/// vector offsets, cascade wiring (slave on IRQ2, slave identity 2)
	/// and 8086 mode.
	pub unsafe fn initialize(&mut self) {
		outb(self.pics[0].command, CMD_INIT);
		io_wait();
		outb(self.pics[1].command, CMD_INIT);
		io_wait();

		outb(self.pics[0].data, self.pics[0].offset);
		io_wait();
		outb(self.pics[1].data, self.pics[1].offset);
		io_wait();

		outb(self.pics[0].data, 0x04);
		io_wait();
		outb(self.pics[1].data, 0x02);
		io_wait();

		outb(self.pics[0].data, MODE_8086);
		io_wait();
		outb(self.pics[1].data, MODE_8086);
		io_wait();
	}

	pub unsafe fn read_masks(&mut self) -> [u8; 2] {
		[self.pics[0].read_mask(), self.pics[1].read_mask()]
	}

	pub unsafe fn write_masks(&mut self, mask1: u8, mask2: u8) {
		self.pics[0].write_mask(mask1);
		self.pics[1].write_mask(mask2);
	}

	pub fn handles_interrupt(&self, interrupt_id: u8) -> bool {
		self.pics.iter().any(|p| p.handles_interrupt(interrupt_id))
	}

	/// Acknowledge an interrupt: the master always gets an EOI, the
	/// slave additionally when the line came in through it.
	pub unsafe fn notify_end_of_interrupt(&mut self, interrupt_id: u8) {
		if self.handles_interrupt(interrupt_id) {
			if self.pics[1].handles_interrupt(interrupt_id) {
				self.pics[1].end_of_interrupt();
			}
			self.pics[0].end_of_interrupt();
		}
	}
}
