//! # ATA PIO Disk Driver
//!
//! Polled, PIO-mode driver for the legacy IDE interface: LBA-28
//! addressing, master drive only, 512-byte sectors moved one 16-bit
//! word at a time through the data register.
//!
//! ## Overview
//!
//! Probing reads the status register of the primary channel; 0xFF means
//! a floating bus (nothing attached), in which case the secondary
//! channel gets the same treatment. A drive that answers IDENTIFY marks
//! the driver present; otherwise every operation returns a generic
//! failure. There is no timer in this kernel, so every wait is a
//! counted poll sized generously for emulated hardware.

use crate::utils::debug::LogLevel;
use crate::utils::io::{inb, inw, io_wait, outb, outw};
use bitflags::bitflags;
use lazy_static::lazy_static;
use spin::Mutex;

const ATA_PRIMARY_IO: u16 = 0x1f0;
const ATA_PRIMARY_CTRL: u16 = 0x3f6;
const ATA_SECONDARY_IO: u16 = 0x170;
const ATA_SECONDARY_CTRL: u16 = 0x376;

const ATA_REG_DATA: u16 = 0x00;
const ATA_REG_SECCOUNT: u16 = 0x02;
const ATA_REG_LBA_LO: u16 = 0x03;
const ATA_REG_LBA_MID: u16 = 0x04;
const ATA_REG_LBA_HI: u16 = 0x05;
const ATA_REG_DRIVE: u16 = 0x06;
const ATA_REG_STATUS: u16 = 0x07;
const ATA_REG_COMMAND: u16 = 0x07;

const ATA_CMD_READ_PIO: u8 = 0x20;
const ATA_CMD_WRITE_PIO: u8 = 0x30;
const ATA_CMD_IDENTIFY: u8 = 0xec;

const ATA_DRIVE_MASTER: u8 = 0xe0;
const ATA_LBA_MODE: u8 = 0x40;

const SRST: u8 = 0x04;

/// Iteration budget for status polls. Wall-clock meaning depends on the
/// host; sized so an emulated disk never trips it.
const ATA_TIMEOUT: u32 = 100_000;

pub const SECTOR_SIZE: usize = 512;

bitflags! {
	struct AtaStatus: u8 {
		const ERR = 1 << 0;
		const IDX = 1 << 1;
		const CORR = 1 << 2;
		const DRQ = 1 << 3;
		const DSC = 1 << 4;
		const DF = 1 << 5;
		const DRDY = 1 << 6;
		const BSY = 1 << 7;
	}
}

pub struct AtaDrive {
	io_base: u16,
	ctrl_base: u16,
	present: bool,
}

lazy_static! {
	pub static ref ATA: Mutex<AtaDrive> = Mutex::new(AtaDrive {
		io_base: ATA_PRIMARY_IO,
		ctrl_base: ATA_PRIMARY_CTRL,
		present: false,
	});
}

impl AtaDrive {
	fn status(&self) -> AtaStatus {
		AtaStatus::from_bits_truncate(unsafe { inb(self.io_base + ATA_REG_STATUS) })
	}

	fn wait_ready(&self) -> Result<(), &'static str> {
		for _ in 0..ATA_TIMEOUT {
			if !self.status().contains(AtaStatus::BSY) {
				return Ok(());
			}
		}
		Err("ATA timeout waiting for BSY to clear")
	}

	fn wait_drq(&self) -> Result<(), &'static str> {
		for _ in 0..ATA_TIMEOUT {
			let status = self.status();
			if status.contains(AtaStatus::ERR) {
				return Err("ATA error bit set");
			}
			if status.contains(AtaStatus::DRQ) {
				return Ok(());
			}
		}
		Err("ATA timeout waiting for DRQ")
	}

	/// Pulse SRST on the control register, settling between edges.
	fn soft_reset(&self) {
		unsafe {
			outb(self.ctrl_base, SRST);
			io_wait();
			io_wait();
			io_wait();
			io_wait();
			outb(self.ctrl_base, 0x00);
			io_wait();
		}
	}

	/// IDENTIFY handshake on the master drive. Returns true when an ATA
	/// drive answered and its 256-word identify block was drained.
	fn identify(&self) -> bool {
		unsafe {
			outb(self.io_base + ATA_REG_DRIVE, ATA_DRIVE_MASTER);
			io_wait();

			outb(self.io_base + ATA_REG_SECCOUNT, 0);
			outb(self.io_base + ATA_REG_LBA_LO, 0);
			outb(self.io_base + ATA_REG_LBA_MID, 0);
			outb(self.io_base + ATA_REG_LBA_HI, 0);

			outb(self.io_base + ATA_REG_COMMAND, ATA_CMD_IDENTIFY);
			io_wait();
		}

		if self.status().is_empty() {
			return false; // no drive
		}

		if self.wait_ready().is_err() {
			return false;
		}

		// A non-ATA device (ATAPI) parks a signature in the LBA registers.
		unsafe {
			if inb(self.io_base + ATA_REG_LBA_MID) != 0
				|| inb(self.io_base + ATA_REG_LBA_HI) != 0
			{
				return false;
			}
		}

		if self.wait_drq().is_err() {
			return false;
		}

		for _ in 0..256 {
			unsafe {
				inw(self.io_base + ATA_REG_DATA);
			}
		}

		true
	}

	fn init(&mut self) {
		self.present = false;

		self.io_base = ATA_PRIMARY_IO;
		self.ctrl_base = ATA_PRIMARY_CTRL;

		let mut status = unsafe { inb(self.io_base + ATA_REG_STATUS) };
		if status == 0xff {
			// floating bus, try the secondary channel
			self.io_base = ATA_SECONDARY_IO;
			self.ctrl_base = ATA_SECONDARY_CTRL;
			status = unsafe { inb(self.io_base + ATA_REG_STATUS) };
			if status == 0xff {
				return;
			}
		}

		self.soft_reset();

		if self.identify() {
			self.present = true;
		}
	}

	pub fn is_present(&self) -> bool {
		self.present
	}

	/// Programs drive select, sector count and the 28-bit LBA, then
	/// issues `command`.
	fn setup_transfer(&self, lba: u32, count: u8, command: u8) -> Result<(), &'static str> {
		self.wait_ready()?;

		unsafe {
			outb(
				self.io_base + ATA_REG_DRIVE,
				ATA_DRIVE_MASTER | ATA_LBA_MODE | ((lba >> 24) & 0x0f) as u8,
			);
			io_wait();

			outb(self.io_base + ATA_REG_SECCOUNT, count);
			outb(self.io_base + ATA_REG_LBA_LO, (lba & 0xff) as u8);
			outb(self.io_base + ATA_REG_LBA_MID, ((lba >> 8) & 0xff) as u8);
			outb(self.io_base + ATA_REG_LBA_HI, ((lba >> 16) & 0xff) as u8);

			outb(self.io_base + ATA_REG_COMMAND, command);
		}

		Ok(())
	}

	/// Reads `count` sectors starting at `lba` into `buffer`. A count of
	/// 0 transfers one sector; 0 would mean 256 to the hardware.
	pub fn read_sectors(
		&self,
		lba: u32,
		count: u8,
		buffer: &mut [u8],
	) -> Result<(), &'static str> {
		if !self.present {
			return Err("No ATA drive present");
		}

		let count = if count == 0 { 1 } else { count };
		if buffer.len() < count as usize * SECTOR_SIZE {
			return Err("Buffer too small for sector count");
		}

		self.setup_transfer(lba, count, ATA_CMD_READ_PIO)?;

		for sector in 0..count as usize {
			self.wait_drq()?;

			let base = sector * SECTOR_SIZE;
			for chunk in buffer[base..base + SECTOR_SIZE].chunks_exact_mut(2) {
				let word = unsafe { inw(self.io_base + ATA_REG_DATA) };
				chunk[0] = word as u8;
				chunk[1] = (word >> 8) as u8;
			}
		}

		Ok(())
	}

	/// Writes `count` sectors starting at `lba` from `buffer`. Same
	/// count normalization as `read_sectors`.
	pub fn write_sectors(&self, lba: u32, count: u8, buffer: &[u8]) -> Result<(), &'static str> {
		if !self.present {
			return Err("No ATA drive present");
		}

		let count = if count == 0 { 1 } else { count };
		if buffer.len() < count as usize * SECTOR_SIZE {
			return Err("Buffer too small for sector count");
		}

		self.setup_transfer(lba, count, ATA_CMD_WRITE_PIO)?;

		for sector in 0..count as usize {
			self.wait_drq()?;

			let base = sector * SECTOR_SIZE;
			for chunk in buffer[base..base + SECTOR_SIZE].chunks_exact(2) {
				let word = chunk[0] as u16 | ((chunk[1] as u16) << 8);
				unsafe {
					outw(self.io_base + ATA_REG_DATA, word);
				}
			}

			unsafe {
				io_wait();
			}
		}

		// let the drive settle before the caller issues anything else
		self.wait_ready()?;

		Ok(())
	}
}

pub fn init() {
	let mut ata = ATA.lock();
	ata.init();
	if ata.is_present() {
		log!(
			LogLevel::Info,
			"ATA drive present (I/O base {:#x})",
			ata.io_base
		);
	} else {
		log!(LogLevel::Warning, "No ATA drive detected");
	}
}

pub fn is_present() -> bool {
	ATA.lock().is_present()
}

pub fn read_sectors(lba: u32, count: u8, buffer: &mut [u8]) -> Result<(), &'static str> {
	ATA.lock().read_sectors(lba, count, buffer)
}

pub fn write_sectors(lba: u32, count: u8, buffer: &[u8]) -> Result<(), &'static str> {
	ATA.lock().write_sectors(lba, count, buffer)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn sector_round_trip_or_consistent_absence() {
		let mut out = [0u8; SECTOR_SIZE];

		if !is_present() {
			// dormant driver: every operation reports failure
			assert!(read_sectors(0, 1, &mut out).is_err());
			assert!(write_sectors(0, 1, &out).is_err());
			return;
		}

		let mut sector = [0u8; SECTOR_SIZE];
		sector[..5].copy_from_slice(b"hello");
		write_sectors(7, 1, &sector).unwrap();
		read_sectors(7, 1, &mut out).unwrap();
		assert_eq!(&out[..5], b"hello");
		assert_eq!(&out[5..], &sector[5..]);
	}

	#[test_case]
	fn count_zero_means_one_sector() {
		if !is_present() {
			return;
		}
		let sector = [0x5a_u8; SECTOR_SIZE];
		write_sectors(9, 0, &sector).unwrap();
		let mut out = [0u8; SECTOR_SIZE];
		read_sectors(9, 0, &mut out).unwrap();
		assert_eq!(out[0], 0x5a);
		assert_eq!(out[SECTOR_SIZE - 1], 0x5a);
	}

	#[test_case]
	fn short_buffer_is_rejected() {
		if !is_present() {
			return;
		}
		let mut short = [0u8; 100];
		assert!(read_sectors(0, 1, &mut short).is_err());
	}
}
