//! # Virtio Network Driver
//!
//! Driver for the legacy (transitional) virtio-net PCI device, the
//! paravirtual NIC QEMU exposes with `disable-modern=on`. All device
//! communication happens over two split virtqueues (queue 0 receives,
//! queue 1 transmits) whose rings live in DMA-visible kernel heap
//! memory that the device learns about as a raw page frame number.
//!
//! ## Overview
//!
//! A split virtqueue is three co-allocated structures: a descriptor
//! table (`addr`/`len`/`flags`/`next` per slot), an available ring the
//! driver writes, and a used ring the device writes. Because the whole
//! kernel runs identity-mapped, a buffer's virtual address doubles as
//! its DMA address. Ring fields shared with the device are only touched
//! through volatile accesses, and every descriptor publication is
//! fenced before the `avail.idx` store that makes it visible; the
//! device may look at the rings at any moment, notify or not.

use crate::drivers::pci;
use crate::memory::kheap::{kcalloc, kmalloc};
use crate::utils::debug::LogLevel;
use crate::utils::io::{inb, inl, inw, outb, outl, outw};
use core::sync::atomic::{compiler_fence, Ordering};
use lazy_static::lazy_static;
use spin::Mutex;

const VIRTIO_VENDOR_ID: u16 = 0x1af4;
const VIRTIO_NET_DEVICE_ID: u16 = 0x1000;

/* Legacy virtio-pci configuration offsets, relative to BAR0. */
const VIRTIO_PCI_HOST_FEATURES: u16 = 0x00;
const VIRTIO_PCI_GUEST_FEATURES: u16 = 0x04;
const VIRTIO_PCI_QUEUE_PFN: u16 = 0x08;
const VIRTIO_PCI_QUEUE_SIZE: u16 = 0x0c;
const VIRTIO_PCI_QUEUE_SEL: u16 = 0x0e;
const VIRTIO_PCI_QUEUE_NOTIFY: u16 = 0x10;
const VIRTIO_PCI_STATUS: u16 = 0x12;
const VIRTIO_PCI_CONFIG: u16 = 0x14;

const VIRTIO_STATUS_ACKNOWLEDGE: u8 = 0x01;
const VIRTIO_STATUS_DRIVER: u8 = 0x02;
const VIRTIO_STATUS_DRIVER_OK: u8 = 0x04;

const VIRTQ_DESC_F_WRITE: u16 = 0x02;

const RX_QUEUE_INDEX: u16 = 0;
const TX_QUEUE_INDEX: u16 = 1;

/// Fallback when the device's size hint is absent or unreasonable.
const DEFAULT_QUEUE_SIZE: u16 = 16;
const MAX_QUEUE_SIZE: u16 = 256;

const PAGE_SIZE: usize = 4096;

/// Every slot gets a buffer this large, enough for a full Ethernet
/// frame plus the virtio-net header.
const NET_BUFFER_SIZE: usize = 2048;

/// The 10-byte header prepended to every packet in both directions.
#[repr(C, packed)]
struct VirtioNetHeader {
	flags: u8,
	gso_type: u8,
	hdr_len: u16,
	gso_size: u16,
	csum_start: u16,
	csum_offset: u16,
}

const VIRTIO_NET_HDR_SIZE: usize = core::mem::size_of::<VirtioNetHeader>();

/// One descriptor table entry.
#[repr(C, packed)]
struct VirtqDesc {
	addr: u64,
	len: u32,
	flags: u16,
	next: u16,
}

const DESC_SIZE: usize = core::mem::size_of::<VirtqDesc>();

/// Byte offsets of the three ring structures inside one queue
/// allocation, plus the total span. The descriptor table starts
/// page-aligned; the used ring starts on the next page boundary after
/// the available ring, exactly the layout the legacy PFN register
/// implies.
fn ring_layout(size: u16) -> (usize, usize, usize) {
	let size = size as usize;
	let desc_bytes = size * DESC_SIZE;
	let avail_bytes = 2 * 3 + 2 * size; // flags, idx, ring[], used_event
	let used_bytes = 2 * 3 + 8 * size; // flags, idx, ring[], avail_event

	let avail_offset = desc_bytes;
	let used_offset = align_up(desc_bytes + avail_bytes, PAGE_SIZE);
	let total = used_offset + align_up(used_bytes, PAGE_SIZE);

	(avail_offset, used_offset, total)
}

fn align_up(value: usize, align: usize) -> usize {
	(value + align - 1) & !(align - 1)
}

/// Driver-side view of one virtqueue. `desc`, `avail` and `used` point
/// into the shared allocation; `buffers` are the per-slot bounce
/// buffers this driver owns; `last_used_idx` trails the device's free
/// running `used.idx` for edge detection.
struct Virtqueue {
	desc: *mut VirtqDesc,
	avail: *mut u16,
	used: *mut u16,
	size: u16,
	last_used_idx: u16,
	buffers: [*mut u8; MAX_QUEUE_SIZE as usize],
}

impl Virtqueue {
	const fn empty() -> Virtqueue {
		Virtqueue {
			desc: core::ptr::null_mut(),
			avail: core::ptr::null_mut(),
			used: core::ptr::null_mut(),
			size: 0,
			last_used_idx: 0,
			buffers: [core::ptr::null_mut(); MAX_QUEUE_SIZE as usize],
		}
	}

	/// Allocates the ring memory and the per-slot buffers. The rings
	/// are pinned heap memory for the life of the kernel.
	fn init(&mut self, size: u16) -> Result<(), &'static str> {
		let (avail_offset, used_offset, total) = ring_layout(size);

		// over-allocate one page so the base can be aligned up
		let mem = kcalloc(1, total + PAGE_SIZE)?;
		let base = align_up(mem as usize, PAGE_SIZE);

		self.desc = base as *mut VirtqDesc;
		self.avail = (base + avail_offset) as *mut u16;
		self.used = (base + used_offset) as *mut u16;
		self.size = size;
		self.last_used_idx = 0;

		for slot in 0..size as usize {
			self.buffers[slot] = kmalloc(NET_BUFFER_SIZE)?;
		}

		Ok(())
	}

	fn pfn(&self) -> u32 {
		(self.desc as usize / PAGE_SIZE) as u32
	}

	unsafe fn write_desc(&self, slot: u16, addr: u64, len: u32, flags: u16) {
		let desc = self.desc.add(slot as usize);
		core::ptr::addr_of_mut!((*desc).addr).write_volatile(addr);
		core::ptr::addr_of_mut!((*desc).len).write_volatile(len);
		core::ptr::addr_of_mut!((*desc).flags).write_volatile(flags);
		core::ptr::addr_of_mut!((*desc).next).write_volatile(0);
	}

	#[cfg(test)]
	unsafe fn desc_addr(&self, slot: u16) -> u64 {
		core::ptr::addr_of!((*self.desc.add(slot as usize)).addr).read_volatile()
	}

	/// Publishes a descriptor index into the available ring. The ring
	/// entry must be globally visible before the device can observe the
	/// new `avail.idx`, hence the fence between the two stores.
	unsafe fn avail_push(&self, desc_index: u16) {
		let idx = self.avail.add(1).read_volatile();
		self.avail
			.add(2 + (idx % self.size) as usize)
			.write_volatile(desc_index);
		compiler_fence(Ordering::SeqCst);
		self.avail.add(1).write_volatile(idx.wrapping_add(1));
	}

	unsafe fn used_idx(&self) -> u16 {
		self.used.add(1).read_volatile()
	}

	/// Reads `{id, len}` from a used-ring slot.
	unsafe fn used_elem(&self, index: u16) -> (u32, u32) {
		let elem = (self.used.add(2) as *mut u32).add(2 * (index % self.size) as usize);
		(elem.read_volatile(), elem.add(1).read_volatile())
	}
}

pub struct VirtioNet {
	io_base: u16,
	initialized: bool,
	mac: [u8; 6],
	rx: Virtqueue,
	tx: Virtqueue,
	tx_next: u16,
}

// Ring and buffer pointers reference pinned heap memory owned by this
// singleton; handing the instance across the lock is sound.
unsafe impl Send for VirtioNet {}

lazy_static! {
	pub static ref VIRTIO_NET: Mutex<VirtioNet> = Mutex::new(VirtioNet {
		io_base: 0,
		initialized: false,
		mac: [0; 6],
		rx: Virtqueue::empty(),
		tx: Virtqueue::empty(),
		tx_next: 0,
	});
}

impl VirtioNet {
	fn status_write(&self, value: u8) {
		unsafe {
			outb(self.io_base + VIRTIO_PCI_STATUS, value);
		}
	}

	/// Selects queue `index`, sizes it from the device hint and hands
	/// the ring's page frame number over.
	fn setup_queue(&mut self, index: u16) -> Result<(), &'static str> {
		unsafe {
			outw(self.io_base + VIRTIO_PCI_QUEUE_SEL, index);
		}

		let mut size = unsafe { inw(self.io_base + VIRTIO_PCI_QUEUE_SIZE) };
		if size == 0 || size > MAX_QUEUE_SIZE {
			size = DEFAULT_QUEUE_SIZE;
		}

		let queue = if index == RX_QUEUE_INDEX {
			&mut self.rx
		} else {
			&mut self.tx
		};
		queue.init(size)?;

		unsafe {
			outl(self.io_base + VIRTIO_PCI_QUEUE_PFN, queue.pfn());
		}

		Ok(())
	}

	/// Hands one RX slot back to the device as a device-writable buffer.
	unsafe fn seed_rx_slot(&self, slot: u16) {
		self.rx.write_desc(
			slot,
			self.rx.buffers[slot as usize] as u64,
			NET_BUFFER_SIZE as u32,
			VIRTQ_DESC_F_WRITE,
		);
		self.rx.avail_push(slot);
	}

	fn notify(&self, queue_index: u16) {
		unsafe {
			outw(self.io_base + VIRTIO_PCI_QUEUE_NOTIFY, queue_index);
		}
	}

	/// Legacy bring-up sequence: reset, acknowledge, negotiate nothing,
	/// publish both rings, seed RX, read the MAC, go live.
	fn init(&mut self) -> Result<(), &'static str> {
		let dev = pci::find_device(VIRTIO_VENDOR_ID, VIRTIO_NET_DEVICE_ID)
			.ok_or("No virtio-net device on the PCI bus")?;

		self.io_base = (dev.bar[0] & 0xfffc) as u16;

		pci::enable_bus_master(&dev);

		self.status_write(0);
		self.status_write(VIRTIO_STATUS_ACKNOWLEDGE);
		self.status_write(VIRTIO_STATUS_ACKNOWLEDGE | VIRTIO_STATUS_DRIVER);

		// no optional features are negotiated
		let _host_features = unsafe { inl(self.io_base + VIRTIO_PCI_HOST_FEATURES) };
		unsafe {
			outl(self.io_base + VIRTIO_PCI_GUEST_FEATURES, 0);
		}

		self.setup_queue(RX_QUEUE_INDEX)?;
		self.setup_queue(TX_QUEUE_INDEX)?;

		for slot in 0..self.rx.size {
			unsafe {
				self.seed_rx_slot(slot);
			}
		}
		self.notify(RX_QUEUE_INDEX);

		for (i, byte) in self.mac.iter_mut().enumerate() {
			*byte = unsafe { inb(self.io_base + VIRTIO_PCI_CONFIG + i as u16) };
		}

		self.status_write(
			VIRTIO_STATUS_ACKNOWLEDGE | VIRTIO_STATUS_DRIVER | VIRTIO_STATUS_DRIVER_OK,
		);

		self.initialized = true;
		Ok(())
	}

	pub fn is_initialized(&self) -> bool {
		self.initialized
	}

	pub fn mac(&self) -> [u8; 6] {
		self.mac
	}

	/// Queues one frame for transmission and rings the TX doorbell.
	///
	/// Slots rotate monotonically without consulting the TX used ring;
	/// a burst deeper than the queue can reuse a slot the device still
	/// owns. Tracking TX completions would lift that limit.
	pub fn send(&mut self, frame: &[u8]) -> Result<(), &'static str> {
		if !self.initialized {
			return Err("Network device not initialized");
		}
		if frame.len() > NET_BUFFER_SIZE - VIRTIO_NET_HDR_SIZE {
			return Err("Frame too large");
		}

		let slot = self.tx_next;
		self.tx_next = (self.tx_next + 1) % self.tx.size;

		let buffer = self.tx.buffers[slot as usize];
		unsafe {
			core::ptr::write_bytes(buffer, 0, VIRTIO_NET_HDR_SIZE);
			core::ptr::copy_nonoverlapping(
				frame.as_ptr(),
				buffer.add(VIRTIO_NET_HDR_SIZE),
				frame.len(),
			);

			self.tx.write_desc(
				slot,
				buffer as u64,
				(VIRTIO_NET_HDR_SIZE + frame.len()) as u32,
				0,
			);
			self.tx.avail_push(slot);
		}

		self.notify(TX_QUEUE_INDEX);
		Ok(())
	}

	/// Non-blocking receive. Returns the payload length copied into
	/// `buffer`, or 0 when no packet is pending (or the device wrote
	/// less than a virtio-net header, which is treated as nothing).
	/// The slot goes straight back onto the RX ring either way.
	pub fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, &'static str> {
		if !self.initialized {
			return Err("Network device not initialized");
		}

		unsafe {
			if self.rx.last_used_idx == self.rx.used_idx() {
				return Ok(0);
			}

			let (id, total_len) = self.rx.used_elem(self.rx.last_used_idx);
			self.rx.last_used_idx = self.rx.last_used_idx.wrapping_add(1);

			let mut len = 0;
			if total_len as usize > VIRTIO_NET_HDR_SIZE && (id as usize) < self.rx.size as usize
			{
				len = core::cmp::min(total_len as usize - VIRTIO_NET_HDR_SIZE, buffer.len());
				core::ptr::copy_nonoverlapping(
					self.rx.buffers[id as usize].add(VIRTIO_NET_HDR_SIZE),
					buffer.as_mut_ptr(),
					len,
				);
			}

			if (id as usize) < self.rx.size as usize {
				self.seed_rx_slot(id as u16);
				self.notify(RX_QUEUE_INDEX);
			}

			Ok(len)
		}
	}
}

pub fn init() -> Result<(), &'static str> {
	let result = VIRTIO_NET.lock().init();
	match result {
		Ok(()) => {
			let mac = VIRTIO_NET.lock().mac();
			log!(
				LogLevel::Info,
				"virtio-net up, MAC {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
				mac[0],
				mac[1],
				mac[2],
				mac[3],
				mac[4],
				mac[5]
			);
		}
		Err(reason) => log!(LogLevel::Warning, "virtio-net: {}", reason),
	}
	result
}

pub fn is_initialized() -> bool {
	VIRTIO_NET.lock().is_initialized()
}

pub fn get_mac() -> [u8; 6] {
	VIRTIO_NET.lock().mac()
}

pub fn send(frame: &[u8]) -> Result<(), &'static str> {
	VIRTIO_NET.lock().send(frame)
}

pub fn receive(buffer: &mut [u8]) -> Result<usize, &'static str> {
	VIRTIO_NET.lock().receive(buffer)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn net_header_is_ten_bytes() {
		assert_eq!(VIRTIO_NET_HDR_SIZE, 10);
		assert_eq!(DESC_SIZE, 16);
	}

	#[test_case]
	fn ring_layout_respects_alignment() {
		for size in [8u16, 16, 128, 256] {
			let (avail_offset, used_offset, total) = ring_layout(size);
			assert_eq!(avail_offset, size as usize * DESC_SIZE);
			assert_eq!(used_offset % PAGE_SIZE, 0);
			assert!(used_offset >= avail_offset + 6 + 2 * size as usize);
			assert_eq!(total % PAGE_SIZE, 0);
			assert!(total >= used_offset + 6 + 8 * size as usize);
		}
	}

	#[test_case]
	fn seeded_rx_descriptors_point_at_their_buffers() {
		let net = VIRTIO_NET.lock();
		if !net.is_initialized() {
			return;
		}
		for slot in 0..net.rx.size {
			let addr = unsafe { net.rx.desc_addr(slot) };
			assert_eq!(addr, net.rx.buffers[slot as usize] as u64);
		}
	}

	#[test_case]
	fn send_rejects_oversized_frames() {
		let mut net = VIRTIO_NET.lock();
		if !net.is_initialized() {
			return;
		}
		let frame = [0u8; NET_BUFFER_SIZE];
		assert!(net.send(&frame).is_err());
	}
}
