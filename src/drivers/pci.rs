//! # PCI Bus Enumerator
//!
//! Configuration-space access through the classical 0xCF8/0xCFC
//! address/data port pair, plus a one-shot scan that captures every
//! present function into a fixed-capacity registry. Drivers look their
//! hardware up by vendor/device pair or by class/subclass and never
//! touch the scan loop themselves.

use crate::utils::debug::LogLevel;
use crate::utils::io::{inl, outl};
use lazy_static::lazy_static;
use spin::Mutex;

const PCI_CONFIG_ADDRESS: u16 = 0xcf8;
const PCI_CONFIG_DATA: u16 = 0xcfc;

const PCI_ENABLE_BIT: u32 = 1 << 31;

const MAX_PCI_DEVICES: usize = 32;

/// One discovered PCI function, as read at enumeration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDevice {
	pub bus: u8,
	pub device: u8,
	pub function: u8,
	pub vendor_id: u16,
	pub device_id: u16,
	pub class_code: u8,
	pub subclass: u8,
	pub prog_if: u8,
	pub revision: u8,
	pub bar: [u32; 6],
	pub irq_line: u8,
}

impl PciDevice {
	const fn empty() -> PciDevice {
		PciDevice {
			bus: 0,
			device: 0,
			function: 0,
			vendor_id: 0,
			device_id: 0,
			class_code: 0,
			subclass: 0,
			prog_if: 0,
			revision: 0,
			bar: [0; 6],
			irq_line: 0,
		}
	}
}

pub struct PciRegistry {
	devices: [PciDevice; MAX_PCI_DEVICES],
	count: usize,
}

lazy_static! {
	pub static ref PCI: Mutex<PciRegistry> = Mutex::new(PciRegistry {
		devices: [PciDevice::empty(); MAX_PCI_DEVICES],
		count: 0,
	});
}

/// Builds the CONFIG_ADDRESS encoding for one dword of config space.
fn pci_address(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
	PCI_ENABLE_BIT
		| ((bus as u32) << 16)
		| ((device as u32) << 11)
		| ((function as u32) << 8)
		| (offset as u32 & 0xfc)
}

pub fn config_read(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
	unsafe {
		outl(PCI_CONFIG_ADDRESS, pci_address(bus, device, function, offset));
		inl(PCI_CONFIG_DATA)
	}
}

pub fn config_write(bus: u8, device: u8, function: u8, offset: u8, value: u32) {
	unsafe {
		outl(PCI_CONFIG_ADDRESS, pci_address(bus, device, function, offset));
		outl(PCI_CONFIG_DATA, value);
	}
}

fn config_read16(bus: u8, device: u8, function: u8, offset: u8) -> u16 {
	let value = config_read(bus, device, function, offset);
	((value >> ((offset & 2) * 8)) & 0xffff) as u16
}

fn config_read8(bus: u8, device: u8, function: u8, offset: u8) -> u8 {
	let value = config_read(bus, device, function, offset);
	((value >> ((offset & 3) * 8)) & 0xff) as u8
}

fn device_exists(bus: u8, device: u8, function: u8) -> bool {
	config_read16(bus, device, function, 0) != 0xffff
}

fn read_device(bus: u8, device: u8, function: u8) -> PciDevice {
	let class_info = config_read(bus, device, function, 0x08);

	let mut dev = PciDevice {
		bus,
		device,
		function,
		vendor_id: config_read16(bus, device, function, 0x00),
		device_id: config_read16(bus, device, function, 0x02),
		revision: (class_info & 0xff) as u8,
		prog_if: ((class_info >> 8) & 0xff) as u8,
		subclass: ((class_info >> 16) & 0xff) as u8,
		class_code: ((class_info >> 24) & 0xff) as u8,
		bar: [0; 6],
		irq_line: config_read8(bus, device, function, 0x3c),
	};

	for (i, bar) in dev.bar.iter_mut().enumerate() {
		*bar = config_read(bus, device, function, 0x10 + (i as u8) * 4);
	}

	dev
}

impl PciRegistry {
	/// Scans every bus/device/function and captures what answers. A
	/// function-0 vendor of 0xFFFF means the slot is empty; header-type
	/// bit 7 decides whether functions 1..8 are worth probing.
	fn enumerate(&mut self) {
		self.count = 0;

		for bus in 0..=255u8 {
			for device in 0..32u8 {
				for function in 0..8u8 {
					if !device_exists(bus, device, function) {
						if function == 0 {
							break;
						}
						continue;
					}

					if self.count < MAX_PCI_DEVICES {
						self.devices[self.count] = read_device(bus, device, function);
						self.count += 1;
					}

					if function == 0 {
						let header_type = config_read8(bus, device, 0, 0x0e);
						if header_type & 0x80 == 0 {
							break;
						}
					}
				}
			}
		}
	}

	pub fn find_device(&self, vendor_id: u16, device_id: u16) -> Option<PciDevice> {
		self.devices[..self.count]
			.iter()
			.find(|dev| dev.vendor_id == vendor_id && dev.device_id == device_id)
			.copied()
	}

	pub fn find_class(&self, class_code: u8, subclass: u8) -> Option<PciDevice> {
		self.devices[..self.count]
			.iter()
			.find(|dev| dev.class_code == class_code && dev.subclass == subclass)
			.copied()
	}

	pub fn device_count(&self) -> usize {
		self.count
	}

	pub fn device_at(&self, index: usize) -> Option<PciDevice> {
		if index < self.count {
			Some(self.devices[index])
		} else {
			None
		}
	}
}

/// Sets the Bus Master Enable bit in the function's command register so
/// the device may DMA into guest memory.
pub fn enable_bus_master(dev: &PciDevice) {
	let command = config_read(dev.bus, dev.device, dev.function, 0x04);
	config_write(dev.bus, dev.device, dev.function, 0x04, command | (1 << 2));
}

pub fn init() {
	let mut pci = PCI.lock();
	pci.enumerate();
	log!(LogLevel::Info, "PCI bus: {} function(s) found", pci.count);
}

pub fn device_count() -> usize {
	PCI.lock().device_count()
}

pub fn find_device(vendor_id: u16, device_id: u16) -> Option<PciDevice> {
	PCI.lock().find_device(vendor_id, device_id)
}

pub fn find_class(class_code: u8, subclass: u8) -> Option<PciDevice> {
	PCI.lock().find_class(class_code, subclass)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn address_encoding_packs_the_fields() {
		assert_eq!(pci_address(0, 0, 0, 0), 0x8000_0000);
		assert_eq!(pci_address(1, 2, 3, 0x3c), 0x8001_133c);
		// offsets are dword-aligned in the encoding
		assert_eq!(pci_address(0, 0, 0, 0x3e), pci_address(0, 0, 0, 0x3c));
	}

	#[test_case]
	fn repeated_lookups_return_identical_records() {
		let pci = PCI.lock();
		if pci.device_count() == 0 {
			return;
		}
		let first = pci.device_at(0).unwrap();
		let a = pci.find_device(first.vendor_id, first.device_id).unwrap();
		let b = pci.find_device(first.vendor_id, first.device_id).unwrap();
		assert_eq!(a, b);
	}

	#[test_case]
	fn host_bridge_is_found_by_class() {
		let pci = PCI.lock();
		if pci.device_count() == 0 {
			return;
		}
		// every PC chipset QEMU emulates exposes a host bridge
		let bridge = pci.find_class(0x06, 0x00).unwrap();
		assert_eq!(pci.find_class(0x06, 0x00).unwrap(), bridge);
	}
}
