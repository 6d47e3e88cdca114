//! # Ethernet Layer
//!
//! Frame assembly and filtering on top of the virtio-net driver. All
//! byte-order conversion for the link layer happens here; the driver
//! below moves raw bytes.

use crate::drivers::virtio_net;
use spin::Mutex;

pub const ETH_MTU: usize = 1500;
pub const ETH_FRAME_MAX: usize = 1518;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

const BROADCAST_MAC: [u8; 6] = [0xff; 6];

/// Ethernet frame header.
#[repr(C, packed)]
pub struct EthHeader {
	pub dest: [u8; 6],
	pub src: [u8; 6],
	pub ethertype: u16,
}

pub const ETH_HEADER_SIZE: usize = core::mem::size_of::<EthHeader>();

static OUR_MAC: Mutex<[u8; 6]> = Mutex::new([0; 6]);

pub fn init() {
	*OUR_MAC.lock() = virtio_net::get_mac();
}

pub fn get_mac() -> [u8; 6] {
	*OUR_MAC.lock()
}

impl EthHeader {
	fn as_bytes(&self) -> &[u8] {
		unsafe {
			core::slice::from_raw_parts(self as *const EthHeader as *const u8, ETH_HEADER_SIZE)
		}
	}
}

/// Sends one frame to `dest` with the given ethertype.
pub fn send(dest: &[u8; 6], ethertype: u16, data: &[u8]) -> Result<(), &'static str> {
	if data.len() > ETH_MTU {
		return Err("Payload exceeds MTU");
	}

	let header = EthHeader {
		dest: *dest,
		src: get_mac(),
		ethertype: ethertype.to_be(),
	};

	let mut frame = [0u8; ETH_FRAME_MAX];
	frame[..ETH_HEADER_SIZE].copy_from_slice(header.as_bytes());
	frame[ETH_HEADER_SIZE..ETH_HEADER_SIZE + data.len()].copy_from_slice(data);

	virtio_net::send(&frame[..ETH_HEADER_SIZE + data.len()])
}

pub fn send_broadcast(ethertype: u16, data: &[u8]) -> Result<(), &'static str> {
	send(&BROADCAST_MAC, ethertype, data)
}

/// Non-blocking receive of one frame. On success the header fields come
/// back host-order in `(dest, src, ethertype)` and the payload lands in
/// `data`; returns the payload length, 0 when nothing usable arrived.
pub fn receive(data: &mut [u8]) -> Result<([u8; 6], u16, usize), &'static str> {
	let mut frame = [0u8; ETH_FRAME_MAX];
	let len = virtio_net::receive(&mut frame)?;

	if len <= ETH_HEADER_SIZE {
		return Ok(([0; 6], 0, 0));
	}

	let mut dest = [0u8; 6];
	dest.copy_from_slice(&frame[0..6]);
	let ethertype = u16::from_be_bytes([frame[12], frame[13]]);

	let payload_len = core::cmp::min(len - ETH_HEADER_SIZE, data.len());
	data[..payload_len].copy_from_slice(&frame[ETH_HEADER_SIZE..ETH_HEADER_SIZE + payload_len]);

	Ok((dest, ethertype, payload_len))
}

/// True when a destination MAC addresses this host (or everyone).
pub fn is_for_us(mac: &[u8; 6]) -> bool {
	*mac == get_mac() || *mac == BROADCAST_MAC
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn header_is_fourteen_bytes() {
		assert_eq!(ETH_HEADER_SIZE, 14);
	}

	#[test_case]
	fn broadcast_always_passes_the_filter() {
		assert!(is_for_us(&[0xff; 6]));
	}
}
