//! # Multiboot2 Header and Info Parsing
//!
//! The header below is what makes the kernel image bootable: GRUB scans
//! the first 32 KiB of the file for the magic value and refuses to load
//! anything without it. The parsing half walks the info structure the
//! bootloader hands over and narrates the interesting tags to the serial
//! log; the kernel itself manages a fixed physical window and does not
//! depend on the memory map.

use crate::utils::debug::LogLevel;

const MULTIBOOT_HEADER_MAGIC: u32 = 0xe85250d6;
const MULTIBOOT_HEADER_ARCHITECTURE: u32 = 0;
const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x36d76289;

#[used]
#[link_section = ".multiboot_header"]
static MULTIBOOT_HEADER: MultibootHeader = MultibootHeader {
	magic: MULTIBOOT_HEADER_MAGIC,
	architecture: MULTIBOOT_HEADER_ARCHITECTURE,
	header_length: core::mem::size_of::<MultibootHeader>() as u32,
	checksum: (0_u32)
		.wrapping_sub(MULTIBOOT_HEADER_MAGIC)
		.wrapping_sub(MULTIBOOT_HEADER_ARCHITECTURE)
		.wrapping_sub(core::mem::size_of::<MultibootHeader>() as u32),
	end_tag_type: 0,
	end_tag_flags: 0,
	end_tag_size: 8,
};

#[repr(C, align(8))]
struct MultibootHeader {
	magic: u32,
	architecture: u32,
	header_length: u32,
	checksum: u32,
	end_tag_type: u16,
	end_tag_flags: u16,
	end_tag_size: u32,
}

#[repr(C)]
struct MultibootInfo {
	total_size: u32,
	reserved: u32,
}

#[repr(C)]
struct MultibootTag {
	tag_type: u32,
	size: u32,
}

#[repr(C)]
struct MultibootTagBasicMemInfo {
	tag_type: u32,
	size: u32,
	mem_lower: u32,
	mem_upper: u32,
}

#[repr(C)]
struct MultibootMemoryMapTag {
	tag_type: u32,
	size: u32,
	entry_size: u32,
	entry_version: u32,
}

#[repr(C)]
struct MultibootMemoryMapEntry {
	addr: u64,
	len: u64,
	entry_type: u32,
	zero: u32,
}

const MULTIBOOT_TAG_TYPE_END: u32 = 0;
const MULTIBOOT_TAG_TYPE_BASIC_MEMINFO: u32 = 4;
const MULTIBOOT_TAG_TYPE_MMAP: u32 = 6;

/// Validate the handoff registers and narrate the info tags. Panics on a
/// bad magic since nothing about the machine state can be trusted then.
pub fn init(magic: u32, addr: u32) {
	if magic != MULTIBOOT_BOOTLOADER_MAGIC {
		panic!("Invalid multiboot magic number: {:#x}", magic);
	}

	if addr & 0x7 != 0 {
		panic!("Unaligned multiboot address: {:#x}", addr);
	}

	let multiboot_info: &MultibootInfo = unsafe { &*(addr as usize as *const MultibootInfo) };
	log!(
		LogLevel::Info,
		"Multiboot info at {:#x}, size {:#x}",
		addr,
		multiboot_info.total_size
	);

	let mut current_tag =
		(addr as usize + core::mem::size_of::<MultibootInfo>()) as *const MultibootTag;
	let mut tag: &MultibootTag = unsafe { &*current_tag };

	while tag.tag_type != MULTIBOOT_TAG_TYPE_END {
		match tag.tag_type {
			MULTIBOOT_TAG_TYPE_BASIC_MEMINFO => {
				let meminfo = unsafe { &*(current_tag as *const MultibootTagBasicMemInfo) };
				println_serial!(
					"  Mem lower: {}KB, mem upper: {}KB",
					meminfo.mem_lower,
					meminfo.mem_upper
				);
			}
			MULTIBOOT_TAG_TYPE_MMAP => {
				let mmap = unsafe { &*(current_tag as *const MultibootMemoryMapTag) };
				let entries = (current_tag as usize
					+ core::mem::size_of::<MultibootMemoryMapTag>())
					as *const MultibootMemoryMapEntry;
				println_serial!("  Memory map:");
				for i in 0..(mmap.size - core::mem::size_of::<MultibootMemoryMapTag>() as u32)
					/ mmap.entry_size
				{
					let entry = unsafe { &*entries.add(i as usize) };
					println_serial!(
						"    {:#010x}-{:#010x} type {}",
						entry.addr,
						entry.addr + entry.len,
						entry.entry_type
					);
				}
			}
			_ => {}
		}
		current_tag =
			((current_tag as usize + tag.size as usize + 7) & !7) as *const MultibootTag;
		tag = unsafe { &*current_tag };
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn header_checksum_cancels_out() {
		let header = &MULTIBOOT_HEADER;
		let sum = header
			.magic
			.wrapping_add(header.architecture)
			.wrapping_add(header.header_length)
			.wrapping_add(header.checksum);
		assert_eq!(sum, 0);
	}

	#[test_case]
	fn header_ends_with_end_tag() {
		assert_eq!(MULTIBOOT_HEADER.end_tag_type, 0);
		assert_eq!(MULTIBOOT_HEADER.end_tag_size, 8);
	}
}
