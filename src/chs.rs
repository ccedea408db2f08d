/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    chs.rs

    Defines a [DiskChs] representing cylinder, head, sector addressing and a
    [DriveGeometry] representing the bounds of a drive, with conversion
    between CHS addresses and linear block addresses.

*/

#![allow(dead_code)]

use std::fmt::Display;

use thiserror::Error;

/// A linear block address. Sectors are numbered row-major with the sector
/// number innermost: `lba = (c * heads + h) * sectors + s`.
pub type Lba = u32;

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("CHS address out of range for drive geometry")]
    ChsOutOfRange,
    #[error("LBA out of range for drive geometry")]
    LbaOutOfRange,
}

/// A structure representing a cylinder, head, sector address
///  - Cylinder (c)
///  - Head (h)
///  - Sector ID (s)
///
/// Sector IDs are 0-based. The field widths match the 4-byte wire encoding
/// `[c_hi, c_lo, h, s]`, so any address read off the bus is representable.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct DiskChs {
    pub(crate) c: u16,
    pub(crate) h: u8,
    pub(crate) s: u8,
}

impl From<(u16, u8, u8)> for DiskChs {
    fn from((c, h, s): (u16, u8, u8)) -> Self {
        Self { c, h, s }
    }
}

impl Display for DiskChs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{} s:{}]", self.c, self.h, self.s)
    }
}

impl DiskChs {
    /// Create a new `DiskChs` structure from cylinder, head and sector id components.
    pub fn new(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }
    /// Return the cylinder, head and sector id components in a tuple.
    #[inline]
    pub fn get(&self) -> (u16, u8, u8) {
        (self.c, self.h, self.s)
    }
    /// Return the cylinder (c) field.
    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    /// Return the head (h) field.
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    /// Return the sector id (s) field.
    #[inline]
    pub fn s(&self) -> u8 {
        self.s
    }

    /// Decode a `DiskChs` from its 4-byte wire representation.
    pub fn from_wire(bytes: [u8; 4]) -> Self {
        Self {
            c: u16::from_be_bytes([bytes[0], bytes[1]]),
            h: bytes[2],
            s: bytes[3],
        }
    }

    /// Encode a `DiskChs` into its 4-byte wire representation `[c_hi, c_lo, h, s]`.
    pub fn to_wire(&self) -> [u8; 4] {
        let c_bytes = self.c.to_be_bytes();
        [c_bytes[0], c_bytes[1], self.h, self.s]
    }

    /// Convert a [DiskChs] into an LBA sector address for the given geometry.
    /// Fails with [GeometryError::ChsOutOfRange] if any component is outside
    /// the geometry bounds.
    pub fn to_lba(&self, geom: &DriveGeometry) -> Result<Lba, GeometryError> {
        if self.c >= geom.c || self.h >= geom.h || self.s >= geom.s {
            return Err(GeometryError::ChsOutOfRange);
        }
        Ok((self.c as Lba * geom.h as Lba + self.h as Lba) * geom.s as Lba + self.s as Lba)
    }

    /// Convert an LBA sector address into a [DiskChs] for the given geometry.
    ///
    /// The one-past-end address `max_lba` is accepted and maps to cylinder
    /// `geom.c()`, head 0, sector 0: a drive left there by a verify-to-end
    /// must still be able to report its position. Anything beyond that fails
    /// with [GeometryError::LbaOutOfRange].
    pub fn from_lba(lba: Lba, geom: &DriveGeometry) -> Result<DiskChs, GeometryError> {
        if lba > geom.max_lba() {
            return Err(GeometryError::LbaOutOfRange);
        }
        let track = lba / geom.s as Lba;
        let s = lba - track * geom.s as Lba;
        let c = track / geom.h as Lba;
        let h = track - c * geom.h as Lba;
        Ok(DiskChs::new(c as u16, h as u8, s as u8))
    }
}

/// A structure representing how sectors are laid out on a drive
///  - Cylinder count (c)
///  - Head count (h)
///  - Sectors per track (s)
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct DriveGeometry {
    pub(crate) c: u16,
    pub(crate) h: u8,
    pub(crate) s: u8,
}

impl Display for DriveGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{} s:{}]", self.c, self.h, self.s)
    }
}

impl DriveGeometry {
    /// Create a new [DriveGeometry] from cylinder, head and sector count components.
    pub fn new(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }
    /// Return the cylinder count (c) field.
    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    /// Return the head count (h) field.
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    /// Return the sectors per track (s) field.
    #[inline]
    pub fn s(&self) -> u8 {
        self.s
    }

    /// Return the number of sectors represented by this geometry, which is
    /// also the first LBA past the end of the drive.
    pub fn max_lba(&self) -> Lba {
        self.c as Lba * self.h as Lba * self.s as Lba
    }

    /// Return a boolean indicating whether this geometry contains the
    /// specified [DiskChs] representing a sector address.
    pub fn contains(&self, chs: impl Into<DiskChs>) -> bool {
        let chs = chs.into();
        self.c > chs.c && self.h > chs.h && self.s > chs.s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chs_lba_roundtrip() {
        let geom = DriveGeometry::new(77, 2, 30);
        let mut expected_lba = 0;

        for c in 0..geom.c() {
            for h in 0..geom.h() {
                for s in 0..geom.s() {
                    let chs = DiskChs::new(c, h, s);
                    let lba = chs.to_lba(&geom).unwrap();
                    assert_eq!(lba, expected_lba);
                    assert_eq!(DiskChs::from_lba(lba, &geom).unwrap(), chs);
                    expected_lba += 1;
                }
            }
        }
        assert_eq!(expected_lba, geom.max_lba());
    }

    #[test]
    fn chs_out_of_range() {
        let geom = DriveGeometry::new(306, 4, 31);

        assert_eq!(DiskChs::new(306, 0, 0).to_lba(&geom), Err(GeometryError::ChsOutOfRange));
        assert_eq!(DiskChs::new(0, 4, 0).to_lba(&geom), Err(GeometryError::ChsOutOfRange));
        assert_eq!(DiskChs::new(0, 0, 31).to_lba(&geom), Err(GeometryError::ChsOutOfRange));
        assert_eq!(DiskChs::new(305, 3, 30).to_lba(&geom), Ok(geom.max_lba() - 1));
    }

    #[test]
    fn lba_end_of_drive() {
        let geom = DriveGeometry::new(77, 2, 30);

        // The one-past-end position is reportable...
        let end = DiskChs::from_lba(geom.max_lba(), &geom).unwrap();
        assert_eq!(end, DiskChs::new(77, 0, 0));

        // ...but nothing past it is.
        assert_eq!(
            DiskChs::from_lba(geom.max_lba() + 1, &geom),
            Err(GeometryError::LbaOutOfRange)
        );
    }

    #[test]
    fn wire_encoding_roundtrip() {
        let chs = DiskChs::new(0x0123, 0x02, 0x1d);
        assert_eq!(chs.to_wire(), [0x01, 0x23, 0x02, 0x1d]);
        assert_eq!(DiskChs::from_wire([0x01, 0x23, 0x02, 0x1d]), chs);
    }
}
