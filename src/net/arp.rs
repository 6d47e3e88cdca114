//! # ARP
//!
//! Address resolution over Ethernet: a small cache mapping IPv4
//! addresses to MACs, request/reply generation, and the learn-on-any-
//! valid-packet rule. The cache evicts slot 0 when full.

use crate::net::ethernet::{self, ETHERTYPE_ARP};
use spin::Mutex;

const ARP_REQUEST: u16 = 1;
const ARP_REPLY: u16 = 2;

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;

const ARP_CACHE_SIZE: usize = 16;

/// ARP packet as it travels on the wire. The 16-bit fields are
/// big-endian; `spa`/`tpa` stay in network order throughout the kernel.
#[repr(C, packed)]
struct ArpPacket {
	htype: u16,
	ptype: u16,
	hlen: u8,
	plen: u8,
	oper: u16,
	sha: [u8; 6],
	spa: u32,
	tha: [u8; 6],
	tpa: u32,
}

const ARP_PACKET_SIZE: usize = core::mem::size_of::<ArpPacket>();

impl ArpPacket {
	fn as_bytes(&self) -> &[u8] {
		unsafe {
			core::slice::from_raw_parts(self as *const ArpPacket as *const u8, ARP_PACKET_SIZE)
		}
	}
}

#[derive(Clone, Copy)]
struct ArpEntry {
	ip: u32,
	mac: [u8; 6],
	valid: bool,
}

static ARP_CACHE: Mutex<[ArpEntry; ARP_CACHE_SIZE]> = Mutex::new(
	[ArpEntry {
		ip: 0,
		mac: [0; 6],
		valid: false,
	}; ARP_CACHE_SIZE],
);

pub fn init() {
	let mut cache = ARP_CACHE.lock();
	for entry in cache.iter_mut() {
		entry.valid = false;
	}
}

/// Looks an IP up in the cache.
pub fn lookup(ip: u32) -> Option<[u8; 6]> {
	ARP_CACHE
		.lock()
		.iter()
		.find(|entry| entry.valid && entry.ip == ip)
		.map(|entry| entry.mac)
}

fn cache_add(ip: u32, mac: [u8; 6]) {
	let mut cache = ARP_CACHE.lock();

	let slot = cache
		.iter()
		.position(|entry| !entry.valid || entry.ip == ip)
		.unwrap_or(0);

	cache[slot] = ArpEntry {
		ip,
		mac,
		valid: true,
	};
}

fn build_packet(oper: u16, tha: [u8; 6], tpa: u32) -> ArpPacket {
	ArpPacket {
		htype: HTYPE_ETHERNET.to_be(),
		ptype: PTYPE_IPV4.to_be(),
		hlen: 6,
		plen: 4,
		oper: oper.to_be(),
		sha: ethernet::get_mac(),
		spa: crate::net::get_ip(),
		tha,
		tpa,
	}
}

/// Broadcasts a who-has request for `target_ip`.
pub fn request(target_ip: u32) -> Result<(), &'static str> {
	let packet = build_packet(ARP_REQUEST, [0; 6], target_ip);
	ethernet::send_broadcast(ETHERTYPE_ARP, packet.as_bytes())
}

fn reply(dest_mac: [u8; 6], dest_ip: u32) -> Result<(), &'static str> {
	let packet = build_packet(ARP_REPLY, dest_mac, dest_ip);
	ethernet::send(&dest_mac, ETHERTYPE_ARP, packet.as_bytes())
}

/// Handles one inbound ARP packet: learn the sender, answer requests
/// aimed at our address, drop everything malformed.
pub fn process(data: &[u8]) {
	if data.len() < ARP_PACKET_SIZE {
		return;
	}

	let htype = u16::from_be_bytes([data[0], data[1]]);
	let ptype = u16::from_be_bytes([data[2], data[3]]);
	if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || data[4] != 6 || data[5] != 4 {
		return;
	}

	let oper = u16::from_be_bytes([data[6], data[7]]);
	let mut sha = [0u8; 6];
	sha.copy_from_slice(&data[8..14]);
	let spa = u32::from_ne_bytes([data[14], data[15], data[16], data[17]]);
	let tpa = u32::from_ne_bytes([data[24], data[25], data[26], data[27]]);

	cache_add(spa, sha);

	if tpa != crate::net::get_ip() {
		return;
	}

	if oper == ARP_REQUEST {
		let _ = reply(sha, spa);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn packet_is_twenty_eight_bytes() {
		assert_eq!(ARP_PACKET_SIZE, 28);
	}

	#[test_case]
	fn cache_learns_and_overwrites_same_ip() {
		init();
		cache_add(0x0100000a, [1, 2, 3, 4, 5, 6]);
		assert_eq!(lookup(0x0100000a), Some([1, 2, 3, 4, 5, 6]));
		cache_add(0x0100000a, [6, 5, 4, 3, 2, 1]);
		assert_eq!(lookup(0x0100000a), Some([6, 5, 4, 3, 2, 1]));
		assert_eq!(lookup(0x0200000a), None);
		init();
	}

	#[test_case]
	fn full_cache_evicts_slot_zero() {
		init();
		for i in 0..ARP_CACHE_SIZE as u32 {
			cache_add(0x100 + i, [i as u8; 6]);
		}
		assert_eq!(lookup(0x100), Some([0; 6]));
		cache_add(0x999, [0xee; 6]);
		// the newcomer landed in slot 0, over the oldest entry
		assert_eq!(lookup(0x100), None);
		assert_eq!(lookup(0x999), Some([0xee; 6]));
		init();
	}
}
