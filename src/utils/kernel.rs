//! Kernel image loading and integrity bookkeeping.

use std::fmt;
use std::fs;
use std::io;

use log::debug;

// =============================================================================
// Public Interface
// =============================================================================

/// A kernel image ready to be pushed: the raw bytes, loaded once from disk,
/// plus the size and checksum derived from them before anything goes on the
/// wire.
pub struct KernelImage {
    bytes: Vec<u8>,
    checksum: u32,
}

impl KernelImage {
    /// Load the image file into memory and derive its checksum.
    pub fn load(path: &str) -> io::Result<KernelImage> {
        let bytes = fs::read(path)?;
        debug!("loaded kernel image {} ({} bytes)", path, bytes.len());
        Ok(KernelImage::from_bytes(bytes))
    }

    /// Wrap image bytes already in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> KernelImage {
        let checksum = wrapping_checksum(&bytes);
        KernelImage { bytes, checksum }
    }

    /// Image size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// The integrity checksum the device recomputes on its side: the unsigned
    /// 32-bit wrapping sum of all image bytes, matching what the firmware
    /// computes. Derived once, before any transmission. A plain sum is blind
    /// to byte order, so a reordered payload with the same bytes still passes.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The raw image bytes, in push order.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for KernelImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelImage")
            .field("size", &self.bytes.len())
            .field("checksum", &self.checksum)
            .finish()
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn wrapping_checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0_u32, |sum, &byte| sum.wrapping_add(u32::from(byte)))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn checksum_of_a_small_image() {
    let image = KernelImage::from_bytes(vec![1, 2, 3, 4]);
    assert_eq!(image.checksum(), 10);
    assert_eq!(image.size(), 4);
}

#[test]
fn checksum_is_order_independent() {
    let a = KernelImage::from_bytes(vec![1, 2, 3, 4]);
    let b = KernelImage::from_bytes(vec![4, 3, 2, 1]);
    let c = KernelImage::from_bytes(vec![2, 4, 1, 3]);
    assert_eq!(a.checksum(), b.checksum());
    assert_eq!(a.checksum(), c.checksum());
}

#[test]
fn checksum_wraps_around_at_2_pow_32() {
    // 16_843_010 * 255 = 4_294_967_550, leaving 254 after the 2^32 wrap.
    let image = KernelImage::from_bytes(vec![0xFF; 16_843_010]);
    assert_eq!(image.checksum(), 254);
}

#[test]
fn empty_image() {
    let image = KernelImage::from_bytes(Vec::new());
    assert_eq!(image.size(), 0);
    assert_eq!(image.checksum(), 0);
    assert!(image.bytes().is_empty());
}

#[test]
fn load_reads_the_file() {
    let path = std::env::temp_dir().join(format!("uartboot-kernel-{}.bin", std::process::id()));
    fs::write(&path, [1_u8, 2, 3, 4]).unwrap();
    let image = KernelImage::load(path.to_str().unwrap()).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(image.size(), 4);
    assert_eq!(image.checksum(), 10);
}

#[test]
fn load_fails_for_a_missing_file() {
    assert!(KernelImage::load("/definitely/not/here/kernel8.img").is_err());
}
