//! # Network Subsystem
//!
//! Facade tying the layers together: the virtio driver at the bottom,
//! Ethernet framing above it, ARP and ICMP on top. The shell only ever
//! talks to this module.

use crate::drivers::virtio_net;
use crate::net::ethernet::{ETHERTYPE_ARP, ETHERTYPE_IPV4, ETH_MTU};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Ethernet frame construction and filtering
pub mod ethernet;

/// Address resolution
pub mod arp;

/// IPv4 and ICMP echo
pub mod icmp;

/// 10.0.2.15, QEMU user networking's default guest address, stored in
/// network byte order.
const DEFAULT_IP: u32 = 0x0f02000a;

static OUR_IP: AtomicU32 = AtomicU32::new(DEFAULT_IP);
static NET_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Brings the whole stack up. Without a NIC on the bus the subsystem
/// stays dormant and every operation fails gently.
pub fn init() {
	if virtio_net::init().is_err() {
		return;
	}

	ethernet::init();
	arp::init();

	NET_INITIALIZED.store(true, Ordering::SeqCst);
}

pub fn is_initialized() -> bool {
	NET_INITIALIZED.load(Ordering::SeqCst) && virtio_net::is_initialized()
}

pub fn get_mac() -> [u8; 6] {
	if is_initialized() {
		ethernet::get_mac()
	} else {
		[0; 6]
	}
}

/// Our IPv4 address in network byte order.
pub fn get_ip() -> u32 {
	OUR_IP.load(Ordering::SeqCst)
}

pub fn set_ip(ip: u32) {
	OUR_IP.store(ip, Ordering::SeqCst);
}

/// Sends a raw Ethernet frame (header included).
pub fn send_packet(data: &[u8]) -> Result<(), &'static str> {
	if !is_initialized() {
		return Err("Network not initialized");
	}
	virtio_net::send(data)
}

/// Receives a raw frame, non-blocking. Ok(0) means nothing pending.
pub fn receive_packet(buffer: &mut [u8]) -> Result<usize, &'static str> {
	if !is_initialized() {
		return Err("Network not initialized");
	}
	virtio_net::receive(buffer)
}

/// Drains at most one pending frame and feeds it to the matching
/// protocol handler. Frames not addressed to us and unknown ethertypes
/// are dropped silently.
pub fn poll() {
	if !is_initialized() {
		return;
	}

	let mut payload = [0u8; ETH_MTU];
	let (dest, ethertype, len) = match ethernet::receive(&mut payload) {
		Ok(result) => result,
		Err(_) => return,
	};
	if len == 0 {
		return;
	}

	if !ethernet::is_for_us(&dest) {
		return;
	}

	match ethertype {
		ETHERTYPE_ARP => arp::process(&payload[..len]),
		ETHERTYPE_IPV4 => icmp::ip_process(&payload[..len]),
		_ => {}
	}
}

/// Fires one ICMP echo request at `dest_ip` (network byte order).
pub fn ping(dest_ip: u32) -> Result<(), &'static str> {
	if !is_initialized() {
		return Err("Network not initialized");
	}
	icmp::ping(dest_ip)
}
