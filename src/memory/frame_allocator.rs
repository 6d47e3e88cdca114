//! # Physical Frame Allocator
//!
//! Bitmap allocator over a fixed window of physical memory, carved into
//! 4 KiB frames. Bit `i` stands for frame `base + i * 4096`; a set bit
//! means the frame is taken. Single frames are handed out first-free,
//! contiguous runs by a linear scan. That scan is O(n), which is fine
//! for the boot-time allocations this serves.
//!
//! The window starts above the kernel heap so the two allocators never
//! overlap; frames outside the window are invisible here.

use crate::utils::debug::LogLevel;
use lazy_static::lazy_static;
use spin::Mutex;

pub const FRAME_SIZE: usize = 4096;

/// Physical window managed by the global allocator: 14 MiB starting at
/// 8 MiB, past the kernel image and the heap region.
const PMM_BASE: u64 = 0x80_0000;
const PMM_SIZE: usize = 14 * 1024 * 1024;

const MAX_FRAMES: usize = PMM_SIZE / FRAME_SIZE;
const BITMAP_BYTES: usize = MAX_FRAMES / 8;

pub struct FrameAllocator {
	bitmap: [u8; BITMAP_BYTES],
	base: u64,
	total_frames: usize,
	free_frames: usize,
}

lazy_static! {
	pub static ref PMM: Mutex<FrameAllocator> =
		Mutex::new(FrameAllocator::new(PMM_BASE, PMM_SIZE));
}

impl FrameAllocator {
	/// Creates an allocator over `[base, base + size)` with every frame
	/// free. `size` is truncated to whole frames and clamped to the
	/// bitmap capacity.
	pub const fn new(base: u64, size: usize) -> FrameAllocator {
		let mut frames = size / FRAME_SIZE;
		if frames > MAX_FRAMES {
			frames = MAX_FRAMES;
		}
		FrameAllocator {
			bitmap: [0; BITMAP_BYTES],
			base,
			total_frames: frames,
			free_frames: frames,
		}
	}

	fn set_bit(&mut self, frame: usize) {
		self.bitmap[frame / 8] |= 1 << (frame % 8);
	}

	fn clear_bit(&mut self, frame: usize) {
		self.bitmap[frame / 8] &= !(1 << (frame % 8));
	}

	fn test_bit(&self, frame: usize) -> bool {
		self.bitmap[frame / 8] & (1 << (frame % 8)) != 0
	}

	fn frame_address(&self, frame: usize) -> u64 {
		self.base + (frame * FRAME_SIZE) as u64
	}

	/// Allocates a single frame and returns its physical address.
	pub fn allocate_frame(&mut self) -> Result<u64, &'static str> {
		if self.free_frames == 0 {
			return Err("Out of physical memory");
		}

		for frame in 0..self.total_frames {
			if !self.test_bit(frame) {
				self.set_bit(frame);
				self.free_frames -= 1;
				return Ok(self.frame_address(frame));
			}
		}

		Err("Out of physical memory")
	}

	/// Allocates `count` physically contiguous frames. Either the whole
	/// run is reserved or nothing is.
	pub fn allocate_frames(&mut self, count: usize) -> Result<u64, &'static str> {
		if count == 0 {
			return Err("Zero-frame allocation");
		}
		if self.free_frames < count {
			return Err("Out of physical memory");
		}

		let mut run_start = 0;
		let mut run_length = 0;

		for frame in 0..self.total_frames {
			if self.test_bit(frame) {
				run_length = 0;
				continue;
			}
			if run_length == 0 {
				run_start = frame;
			}
			run_length += 1;
			if run_length == count {
				for taken in run_start..run_start + count {
					self.set_bit(taken);
				}
				self.free_frames -= count;
				return Ok(self.frame_address(run_start));
			}
		}

		Err("Out of physical memory")
	}

	/// Frees the frame containing `address`. Addresses outside the
	/// window and frames that are already free are silently ignored.
	pub fn free_frame(&mut self, address: u64) {
		if address < self.base
			|| address >= self.base + (self.total_frames * FRAME_SIZE) as u64
		{
			return;
		}

		let frame = (address - self.base) as usize / FRAME_SIZE;
		if self.test_bit(frame) {
			self.clear_bit(frame);
			self.free_frames += 1;
		}
	}

	/// Frees `count` frames starting at `address`.
	pub fn free_frames(&mut self, address: u64, count: usize) {
		for i in 0..count {
			self.free_frame(address + (i * FRAME_SIZE) as u64);
		}
	}

	pub fn free_count(&self) -> usize {
		self.free_frames
	}

	pub fn total_count(&self) -> usize {
		self.total_frames
	}
}

pub fn init() {
	let pmm = PMM.lock();
	log!(
		LogLevel::Info,
		"Physical memory manager: {} frames ({} KiB) at {:#x}",
		pmm.total_count(),
		pmm.total_count() * FRAME_SIZE / 1024,
		PMM_BASE
	);
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE: u64 = 0x10_0000;

	fn fresh() -> FrameAllocator {
		FrameAllocator::new(BASE, 256 * FRAME_SIZE)
	}

	#[test_case]
	fn allocations_are_aligned_and_in_window() {
		let mut pmm = fresh();
		for _ in 0..256 {
			let addr = pmm.allocate_frame().unwrap();
			assert_eq!(addr as usize % FRAME_SIZE, 0);
			assert!(addr >= BASE && addr < BASE + (256 * FRAME_SIZE) as u64);
		}
		assert!(pmm.allocate_frame().is_err());
	}

	#[test_case]
	fn free_count_round_trips() {
		let mut pmm = fresh();
		let before = pmm.free_count();
		let addr = pmm.allocate_frame().unwrap();
		assert_eq!(pmm.free_count(), before - 1);
		pmm.free_frame(addr);
		assert_eq!(pmm.free_count(), before);
	}

	#[test_case]
	fn contiguous_runs_come_back_in_order() {
		let mut pmm = fresh();
		assert_eq!(pmm.allocate_frames(4).unwrap(), BASE);
		assert_eq!(pmm.allocate_frames(4).unwrap(), BASE + 4 * FRAME_SIZE as u64);
		pmm.free_frames(BASE, 4);
		assert_eq!(pmm.allocate_frames(4).unwrap(), BASE);
	}

	#[test_case]
	fn short_runs_are_skipped() {
		let mut pmm = fresh();
		let a = pmm.allocate_frame().unwrap();
		let b = pmm.allocate_frame().unwrap();
		let c = pmm.allocate_frame().unwrap();
		pmm.free_frame(a);
		pmm.free_frame(b);
		// two-frame hole before c, open space after it
		let run = pmm.allocate_frames(3).unwrap();
		assert!(run > c);
	}

	#[test_case]
	fn exact_fit_run_succeeds_one_more_fails() {
		let mut pmm = FrameAllocator::new(BASE, 8 * FRAME_SIZE);
		assert!(pmm.allocate_frames(9).is_err());
		assert_eq!(pmm.allocate_frames(8).unwrap(), BASE);
		assert_eq!(pmm.free_count(), 0);
	}

	#[test_case]
	fn zero_frames_is_an_error() {
		let mut pmm = fresh();
		assert!(pmm.allocate_frames(0).is_err());
		assert_eq!(pmm.free_count(), 256);
	}

	#[test_case]
	fn bogus_frees_are_ignored() {
		let mut pmm = fresh();
		pmm.free_frame(0);
		pmm.free_frame(BASE + (512 * FRAME_SIZE) as u64);
		pmm.free_frame(BASE); // never allocated
		assert_eq!(pmm.free_count(), 256);
	}
}
