//! # IPv4 and ICMP
//!
//! Just enough of the internet layer to answer and originate pings:
//! header construction with the ones-complement checksum, an echo
//! transmitter with a rolling sequence number, and the inbound dispatch
//! that answers echo requests. Anything short, non-IPv4 or not
//! addressed to us is dropped without comment. Addresses stay in
//! network byte order end to end.

use crate::net::arp;
use crate::net::ethernet::{self, ETHERTYPE_IPV4, ETH_MTU};
use core::sync::atomic::{AtomicU16, Ordering};

const IP_PROTO_ICMP: u8 = 1;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;

const PING_PACKET_SIZE: usize = 64;
const PING_ID: u16 = 0x1234;

static PING_SEQ: AtomicU16 = AtomicU16::new(0);

/// IPv4 header, no options.
#[repr(C, packed)]
struct IpHeader {
	version_ihl: u8,
	tos: u8,
	total_len: u16,
	id: u16,
	flags_frag: u16,
	ttl: u8,
	protocol: u8,
	checksum: u16,
	src_ip: u32,
	dest_ip: u32,
}

const IP_HEADER_SIZE: usize = core::mem::size_of::<IpHeader>();

/// ICMP echo header.
#[repr(C, packed)]
struct IcmpHeader {
	icmp_type: u8,
	code: u8,
	checksum: u16,
	id: u16,
	seq: u16,
}

const ICMP_HEADER_SIZE: usize = core::mem::size_of::<IcmpHeader>();

impl IpHeader {
	fn as_bytes(&self) -> &[u8] {
		unsafe {
			core::slice::from_raw_parts(self as *const IpHeader as *const u8, IP_HEADER_SIZE)
		}
	}
}

impl IcmpHeader {
	fn as_bytes(&self) -> &[u8] {
		unsafe {
			core::slice::from_raw_parts(self as *const IcmpHeader as *const u8, ICMP_HEADER_SIZE)
		}
	}
}

/// RFC 1071 ones-complement sum over a byte slice.
fn checksum(data: &[u8]) -> u16 {
	let mut sum: u32 = 0;

	for chunk in data.chunks(2) {
		let word = if chunk.len() == 2 {
			u16::from_ne_bytes([chunk[0], chunk[1]])
		} else {
			u16::from_ne_bytes([chunk[0], 0])
		};
		sum += word as u32;
	}

	while sum >> 16 != 0 {
		sum = (sum & 0xffff) + (sum >> 16);
	}

	!(sum as u16)
}

/// Wraps `payload` in an IPv4 header and sends it towards `dest_ip`.
/// Without an ARP mapping a request is fired instead and the caller is
/// told to retry.
fn ip_send(dest_ip: u32, protocol: u8, payload: &[u8]) -> Result<(), &'static str> {
	if payload.len() > ETH_MTU - IP_HEADER_SIZE {
		return Err("Payload too large");
	}

	let mut header = IpHeader {
		version_ihl: 0x45,
		tos: 0,
		total_len: ((IP_HEADER_SIZE + payload.len()) as u16).to_be(),
		id: PING_SEQ.load(Ordering::Relaxed).to_be(),
		flags_frag: 0,
		ttl: 64,
		protocol,
		checksum: 0,
		src_ip: crate::net::get_ip(),
		dest_ip,
	};
	header.checksum = checksum(header.as_bytes());

	let mut packet = [0u8; ETH_MTU];
	packet[..IP_HEADER_SIZE].copy_from_slice(header.as_bytes());
	packet[IP_HEADER_SIZE..IP_HEADER_SIZE + payload.len()].copy_from_slice(payload);

	let dest_mac = match arp::lookup(dest_ip) {
		Some(mac) => mac,
		None => {
			arp::request(dest_ip)?;
			return Err("ARP resolution in progress, retry");
		}
	};

	ethernet::send(
		&dest_mac,
		ETHERTYPE_IPV4,
		&packet[..IP_HEADER_SIZE + payload.len()],
	)
}

/// Sends one ICMP echo request with a patterned payload, 64 bytes in
/// total.
pub fn ping(dest_ip: u32) -> Result<(), &'static str> {
	let seq = PING_SEQ.fetch_add(1, Ordering::Relaxed);

	let mut header = IcmpHeader {
		icmp_type: ICMP_ECHO_REQUEST,
		code: 0,
		checksum: 0,
		id: PING_ID.to_be(),
		seq: seq.to_be(),
	};

	let mut packet = [0u8; PING_PACKET_SIZE];
	for (i, byte) in packet.iter_mut().enumerate().skip(ICMP_HEADER_SIZE) {
		*byte = i as u8;
	}
	packet[..ICMP_HEADER_SIZE].copy_from_slice(header.as_bytes());

	header.checksum = checksum(&packet);
	packet[..ICMP_HEADER_SIZE].copy_from_slice(header.as_bytes());

	ip_send(dest_ip, IP_PROTO_ICMP, &packet)
}

/// Echoes a request's payload back with the type flipped to reply.
fn echo_reply(dest_ip: u32, request: &[u8]) -> Result<(), &'static str> {
	let mut packet = [0u8; ETH_MTU - IP_HEADER_SIZE];
	let len = core::cmp::min(request.len(), packet.len());
	packet[..len].copy_from_slice(&request[..len]);

	packet[0] = ICMP_ECHO_REPLY;
	packet[1] = 0;
	packet[2] = 0;
	packet[3] = 0;

	let icmp_checksum = checksum(&packet[..len]);
	packet[2..4].copy_from_slice(&icmp_checksum.to_ne_bytes());

	ip_send(dest_ip, IP_PROTO_ICMP, &packet[..len])
}

/// Handles one inbound IPv4 datagram: answers echo requests addressed
/// to us, ignores the rest.
pub fn ip_process(data: &[u8]) {
	if data.len() < IP_HEADER_SIZE {
		return;
	}

	if data[0] >> 4 != 4 {
		return;
	}

	let dest_ip = u32::from_ne_bytes([data[16], data[17], data[18], data[19]]);
	if dest_ip != crate::net::get_ip() {
		return;
	}

	let header_len = ((data[0] & 0x0f) * 4) as usize;
	let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
	if header_len < IP_HEADER_SIZE || total_len > data.len() || total_len < header_len {
		return;
	}

	let src_ip = u32::from_ne_bytes([data[12], data[13], data[14], data[15]]);
	let payload = &data[header_len..total_len];

	if data[9] == IP_PROTO_ICMP
		&& payload.len() >= ICMP_HEADER_SIZE
		&& payload[0] == ICMP_ECHO_REQUEST
	{
		let _ = echo_reply(src_ip, payload);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_case]
	fn header_sizes_match_the_wire() {
		assert_eq!(IP_HEADER_SIZE, 20);
		assert_eq!(ICMP_HEADER_SIZE, 8);
	}

	#[test_case]
	fn checksum_matches_rfc1071_example() {
		// RFC 1071 worked example; the folded sum is 0xddf2 in network
		// order, which reads back as 0xf2dd on this little-endian CPU.
		let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
		let sum = checksum(&data);
		assert_eq!(!sum, 0xf2dd);
	}

	#[test_case]
	fn checksum_of_zeroes_is_all_ones() {
		assert_eq!(checksum(&[0, 0, 0, 0]), 0xffff);
	}

	#[test_case]
	fn checksummed_header_verifies_to_zero() {
		let mut header = IpHeader {
			version_ihl: 0x45,
			tos: 0,
			total_len: 20u16.to_be(),
			id: 7u16.to_be(),
			flags_frag: 0,
			ttl: 64,
			protocol: IP_PROTO_ICMP,
			checksum: 0,
			src_ip: 0x0f02000a,
			dest_ip: 0x0202000a,
		};
		header.checksum = checksum(header.as_bytes());
		assert_eq!(checksum(header.as_bytes()), 0);
	}
}
