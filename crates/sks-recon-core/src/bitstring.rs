//! Fixed-length bit strings, most significant bit first.
//!
//! Prefix-tree paths are bit strings: an element's path is the bit string
//! of its little-endian byte encoding, and a node's key is a prefix of the
//! paths of every element below it.

use std::fmt;

use crate::zp::Zp;

/// A sequence of bits addressed `0..len`, packed MSB-first into bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bitstring {
    bits: usize,
    buf: Vec<u8>,
}

impl Bitstring {
    /// An all-zero bit string of `bits` bits.
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            buf: vec![0; bits.div_ceil(8)],
        }
    }

    /// Build from packed bytes; bytes beyond `bits` are ignored.
    pub fn from_bytes(bits: usize, bytes: &[u8]) -> Self {
        let mut bs = Self::new(bits);
        bs.set_bytes(bytes);
        bs
    }

    /// The path of a field element: its little-endian bytes read MSB-first,
    /// sized to the bit length of the modulus.
    pub fn from_zp(z: &Zp) -> Self {
        Self::from_bytes(z.modulus().bits() as usize, &z.to_le_bytes())
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Packed bytes. Unused trailing bits of the last byte are zero.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Overwrite the contents from packed bytes, masking unused bits.
    pub fn set_bytes(&mut self, bytes: &[u8]) {
        let n = self.buf.len().min(bytes.len());
        self.buf.fill(0);
        self.buf[..n].copy_from_slice(&bytes[..n]);
        self.mask_tail();
    }

    fn mask_tail(&mut self) {
        let used = self.bits % 8;
        if used != 0 {
            if let Some(last) = self.buf.last_mut() {
                *last &= 0xffu8 << (8 - used);
            }
        }
    }

    fn locate(&self, i: usize) -> (usize, u8) {
        assert!(i < self.bits, "bit index {i} out of range for {} bits", self.bits);
        (i / 8, 1u8 << (7 - i % 8))
    }

    pub fn get(&self, i: usize) -> bool {
        let (byte, mask) = self.locate(i);
        self.buf[byte] & mask != 0
    }

    pub fn set(&mut self, i: usize) {
        let (byte, mask) = self.locate(i);
        self.buf[byte] |= mask;
    }

    pub fn clear(&mut self, i: usize) {
        let (byte, mask) = self.locate(i);
        self.buf[byte] &= !mask;
    }

    pub fn flip(&mut self, i: usize) {
        let (byte, mask) = self.locate(i);
        self.buf[byte] ^= mask;
    }

    /// Set bit `i` to `value`.
    pub fn assign(&mut self, i: usize, value: bool) {
        if value {
            self.set(i)
        } else {
            self.clear(i)
        }
    }

    /// The first `bits` bits, zero-extended if longer than `self`.
    pub fn prefix(&self, bits: usize) -> Self {
        let mut out = Self::new(bits);
        out.set_bytes(&self.buf);
        out
    }

    /// Whether `self` is a prefix of `other`.
    pub fn is_prefix_of(&self, other: &Bitstring) -> bool {
        self.bits <= other.bits && other.prefix(self.bits) == *self
    }

    /// Hex of the packed bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.buf)
    }
}

impl fmt::Display for Bitstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.bits {
            f.write_str(if self.get(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Bitstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitstring({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zp::p_sks;

    #[test]
    fn test_flip_and_bytes() {
        let mut bs = Bitstring::new(1);
        assert_eq!(bs.to_string(), "0");
        bs.flip(0);
        assert_eq!(bs.to_string(), "1");
        assert_eq!(bs.as_bytes()[0], 0x80);

        let mut bs = Bitstring::new(2);
        bs.flip(0);
        bs.flip(1);
        assert_eq!(bs.to_string(), "11");
        assert_eq!(bs.as_bytes()[0], 0xc0);
        bs.flip(0);
        assert_eq!(bs.to_string(), "01");
        assert_eq!(bs.as_bytes()[0], 0x40);
    }

    #[test]
    fn test_set_first_and_last() {
        let mut bs = Bitstring::new(16);
        bs.set(0);
        bs.set(15);
        assert_eq!(bs.to_string(), "1000000000000001");
        assert_eq!(bs.as_bytes(), &[0x80, 0x01]);
        bs.clear(0);
        assert!(!bs.get(0));
    }

    #[test]
    fn test_set_bytes_masks_tail() {
        let bs = Bitstring::from_bytes(3, &[0xff, 0xff]);
        assert_eq!(bs.as_bytes(), &[0xe0]);
        assert_eq!(bs.to_string(), "111");

        let bs = Bitstring::from_bytes(16, &[0x80, 0x00]);
        assert!(bs.get(0));
        assert!((1..16).all(|i| !bs.get(i)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_get_out_of_range() {
        Bitstring::new(4).get(4);
    }

    #[test]
    fn test_from_zp_uses_low_byte_first() {
        let p = p_sks();
        let cases = [
            ("54945054303302140323349777569652159744", false, false),
            ("251126436454877830379605469450395348293", false, true),
            ("188716858420292079269415903308294938757", true, false),
        ];
        for (s, b0, b1) in cases {
            let bs = Bitstring::from_zp(&Zp::from_dec_str(&p, s).unwrap());
            assert_eq!(bs.bit_len(), 129);
            assert_eq!((bs.get(0), bs.get(1)), (b0, b1), "{s}");
        }
    }

    #[test]
    fn test_prefix() {
        let bs = Bitstring::from_bytes(12, &[0xab, 0xc0]);
        let pre = bs.prefix(4);
        assert_eq!(pre.to_string(), "1010");
        assert!(pre.is_prefix_of(&bs));
        assert!(Bitstring::new(0).is_prefix_of(&bs));
        assert!(!Bitstring::from_bytes(4, &[0xb0]).is_prefix_of(&bs));
    }
}
