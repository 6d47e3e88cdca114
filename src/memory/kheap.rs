//! # Kernel Heap
//!
//! First-fit allocator over a caller-provided byte region. Every
//! allocation is preceded by a `BlockHeader` and the headers form a
//! singly linked list in address order; the first block covers the whole
//! region at init. Freeing marks the block and runs one left-to-right
//! coalescing pass so adjacent free neighbors always end up merged.
//!
//! Payload pointers are 16-byte aligned (the header is padded to 32
//! bytes and the region base is aligned up, so the arithmetic works out
//! for every block). Callers needing stronger alignment are on their
//! own. Misuse is tolerated quietly: freeing null, freeing twice or
//! freeing garbage inside the region is a no-op; the only observable
//! failure is out-of-memory.

use lazy_static::lazy_static;
use spin::Mutex;

/// Payload alignment, and the rounding unit for allocation sizes.
const ALIGNMENT: usize = 16;

/// Smallest payload worth creating a block for when splitting.
const MIN_PAYLOAD: usize = 16;

/// Header preceding every block. `size` is the payload capacity in
/// bytes, excluding the header itself.
#[repr(C, align(16))]
struct BlockHeader {
	size: usize,
	free: bool,
	next: *mut BlockHeader,
}

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

pub struct KernelHeap {
	start: *mut BlockHeader,
	size: usize,
	used: usize,
}

// The raw pointers only ever reference the heap region this instance
// owns, so moving the instance across the lock is sound.
unsafe impl Send for KernelHeap {}

lazy_static! {
	pub static ref HEAP: Mutex<KernelHeap> = Mutex::new(KernelHeap::empty());
}

fn align_up(value: usize, align: usize) -> usize {
	(value + align - 1) & !(align - 1)
}

impl KernelHeap {
	pub const fn empty() -> KernelHeap {
		KernelHeap {
			start: core::ptr::null_mut(),
			size: 0,
			used: 0,
		}
	}

	/// Takes ownership of `[start, start + size)` and formats it as one
	/// free block. The base is aligned up to 16 bytes first.
	///
	/// # Safety
	///
	/// The region must be unused, writable memory that outlives the heap.
	pub unsafe fn init(&mut self, start: *mut u8, size: usize) {
		let aligned = align_up(start as usize, ALIGNMENT);
		let size = size - (aligned - start as usize);

		self.start = aligned as *mut BlockHeader;
		self.size = size;
		self.used = 0;

		(*self.start).size = size - HEADER_SIZE;
		(*self.start).free = true;
		(*self.start).next = core::ptr::null_mut();
	}

	/// Allocates `size` bytes, first-fit. Returns the payload pointer.
	pub fn alloc(&mut self, size: usize) -> Result<*mut u8, &'static str> {
		if self.start.is_null() {
			return Err("Heap not initialized");
		}
		if size == 0 {
			return Err("Zero-byte allocation");
		}

		let size = align_up(size, ALIGNMENT);

		let mut block = self.start;
		unsafe {
			while !block.is_null() {
				if (*block).free && (*block).size >= size {
					self.split_block(block, size);
					(*block).free = false;
					self.used += (*block).size + HEADER_SIZE;
					return Ok((block as *mut u8).add(HEADER_SIZE));
				}
				block = (*block).next;
			}
		}

		Err("Out of heap memory")
	}

	/// Allocates and zeroes `count * size` bytes.
	pub fn calloc(&mut self, count: usize, size: usize) -> Result<*mut u8, &'static str> {
		let total = count.checked_mul(size).ok_or("Allocation size overflow")?;
		let ptr = self.alloc(total)?;
		unsafe {
			core::ptr::write_bytes(ptr, 0, total);
		}
		Ok(ptr)
	}

	/// Splits `block` so it holds exactly `size` payload bytes, when the
	/// remainder can still host a header plus a minimal payload.
	unsafe fn split_block(&mut self, block: *mut BlockHeader, size: usize) {
		let remaining = (*block).size - size;
		if remaining < HEADER_SIZE + MIN_PAYLOAD {
			return;
		}

		let new_block = (block as *mut u8).add(HEADER_SIZE + size) as *mut BlockHeader;
		(*new_block).size = remaining - HEADER_SIZE;
		(*new_block).free = true;
		(*new_block).next = (*block).next;

		(*block).size = size;
		(*block).next = new_block;
	}

	/// Returns a payload pointer to the heap. Null pointers, pointers
	/// outside the region and already-free blocks are ignored.
	pub fn free(&mut self, ptr: *mut u8) {
		if ptr.is_null() || self.start.is_null() {
			return;
		}

		let header = (ptr as usize).wrapping_sub(HEADER_SIZE) as *mut BlockHeader;
		let heap_start = self.start as usize;
		let heap_end = heap_start + self.size;
		if (header as usize) < heap_start || (header as usize) >= heap_end {
			return;
		}

		unsafe {
			if (*header).free {
				return;
			}
			(*header).free = true;
			self.used -= (*header).size + HEADER_SIZE;
		}

		self.merge_free_blocks();
	}

	/// Single pass that merges every run of adjacent free blocks.
	fn merge_free_blocks(&mut self) {
		let mut block = self.start;
		unsafe {
			while !block.is_null() && !(*block).next.is_null() {
				let next = (*block).next;
				if (*block).free && (*next).free {
					(*block).size += HEADER_SIZE + (*next).size;
					(*block).next = (*next).next;
					// stay on this block, it may absorb more
				} else {
					block = next;
				}
			}
		}
	}

	/// `(total, used, free)` in bytes. `used` counts header plus payload
	/// of every live allocation.
	pub fn stats(&self) -> (usize, usize, usize) {
		(self.size, self.used, self.size - self.used)
	}

	#[cfg(test)]
	fn block_count(&self) -> usize {
		let mut count = 0;
		let mut block = self.start;
		unsafe {
			while !block.is_null() {
				count += 1;
				block = (*block).next;
			}
		}
		count
	}
}

/// Heap region: 4 MiB starting at 4 MiB physical, identity-mapped at
/// boot and below the frame allocator's window.
pub const KERNEL_HEAP_START: usize = 0x40_0000;
pub const KERNEL_HEAP_SIZE: usize = 4 * 1024 * 1024;

pub fn init() {
	unsafe {
		HEAP.lock().init(KERNEL_HEAP_START as *mut u8, KERNEL_HEAP_SIZE);
	}
}

pub fn kmalloc(size: usize) -> Result<*mut u8, &'static str> {
	HEAP.lock().alloc(size)
}

pub fn kcalloc(count: usize, size: usize) -> Result<*mut u8, &'static str> {
	HEAP.lock().calloc(count, size)
}

pub fn kfree(ptr: *mut u8) {
	HEAP.lock().free(ptr);
}

pub fn heap_stats() -> (usize, usize, usize) {
	HEAP.lock().stats()
}

#[cfg(test)]
mod tests {
	use super::*;

	const REGION_SIZE: usize = 8192;

	#[repr(C, align(16))]
	struct TestRegion([u8; REGION_SIZE]);

	static mut TEST_REGION: TestRegion = TestRegion([0; REGION_SIZE]);

	fn fresh() -> KernelHeap {
		let mut heap = KernelHeap::empty();
		unsafe {
			heap.init(core::ptr::addr_of_mut!(TEST_REGION) as *mut u8, REGION_SIZE);
		}
		heap
	}

	#[test_case]
	fn split_then_coalesce_back_to_one_block() {
		let mut heap = fresh();
		let a = heap.alloc(64).unwrap();
		let b = heap.alloc(64).unwrap();
		let c = heap.alloc(64).unwrap();
		assert_eq!(heap.block_count(), 4);

		heap.free(b);
		heap.free(a);
		heap.free(c);

		assert_eq!(heap.block_count(), 1);
		let (total, used, free) = heap.stats();
		assert_eq!(used, 0);
		assert_eq!(free, total);
	}

	#[test_case]
	fn zero_sized_alloc_fails() {
		let mut heap = fresh();
		assert!(heap.alloc(0).is_err());
	}

	#[test_case]
	fn double_free_is_a_no_op() {
		let mut heap = fresh();
		let a = heap.alloc(128).unwrap();
		let b = heap.alloc(32).unwrap();
		heap.free(a);
		let stats_after_first = heap.stats();
		heap.free(a);
		heap.free(core::ptr::null_mut());
		assert_eq!(heap.stats(), stats_after_first);
		heap.free(b);
	}

	#[test_case]
	fn payloads_are_sixteen_byte_aligned() {
		let mut heap = fresh();
		for size in [1, 7, 16, 33, 100] {
			let ptr = heap.alloc(size).unwrap();
			assert_eq!(ptr as usize % 16, 0);
		}
	}

	#[test_case]
	fn unsplittable_remainder_stays_in_block() {
		let mut heap = fresh();
		let a = heap.alloc(64).unwrap();
		let _rest = heap.alloc(REGION_SIZE / 2).unwrap();
		heap.free(a);

		// 64-byte hole; a 48-byte request leaves a 16-byte remainder,
		// too small for a header plus payload, so no split happens.
		let blocks_before = heap.block_count();
		let reused = heap.alloc(48).unwrap();
		assert_eq!(reused, a);
		assert_eq!(heap.block_count(), blocks_before);
		let (_, used, _) = heap.stats();
		// the reused block still accounts for its full 64-byte payload
		assert!(used >= 64 + REGION_SIZE / 2);
	}

	#[test_case]
	fn used_plus_free_equals_total_throughout() {
		let mut heap = fresh();
		let mut ptrs = [core::ptr::null_mut(); 8];
		for (i, slot) in ptrs.iter_mut().enumerate() {
			*slot = heap.alloc(32 * (i + 1)).unwrap();
			let (total, used, free) = heap.stats();
			assert_eq!(used + free, total);
		}
		for ptr in ptrs {
			heap.free(ptr);
			let (total, used, free) = heap.stats();
			assert_eq!(used + free, total);
		}
	}

	#[test_case]
	fn calloc_zeroes_recycled_memory() {
		let mut heap = fresh();
		let ptr = heap.alloc(64).unwrap();
		unsafe {
			core::ptr::write_bytes(ptr, 0xaa, 64);
		}
		heap.free(ptr);
		let ptr = heap.calloc(16, 4).unwrap();
		for i in 0..64 {
			assert_eq!(unsafe { *ptr.add(i) }, 0);
		}
	}

	#[test_case]
	fn exhaustion_reports_out_of_memory() {
		let mut heap = fresh();
		let stats_before = heap.stats();
		assert!(heap.alloc(REGION_SIZE * 2).is_err());
		assert_eq!(heap.stats(), stats_before);
	}
}
