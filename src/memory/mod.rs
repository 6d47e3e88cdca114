//! Memory Module

/// Bitmap-backed physical frame allocator
pub mod frame_allocator;

/// First-fit kernel heap
pub mod kheap;
