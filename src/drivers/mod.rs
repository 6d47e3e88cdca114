//! Drivers Module

/// ATA PIO disk driver
pub mod ata;

/// PCI bus enumeration
pub mod pci;

/// Virtio legacy network card
pub mod virtio_net;
