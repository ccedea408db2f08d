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

    disk_image.rs

    Implements the raw sector image backing a drive unit. An image is a plain
    random-access byte container: sector n occupies bytes [n*256, (n+1)*256).

*/

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{bail, Result};

use crate::chs::{DriveGeometry, Lba};

/// Size of sectors. The Amigo protocol only speaks 256-byte sectors.
pub const SECTOR_SIZE: usize = 256;

/// A trait alias for objects that support reading, writing, and seeking.
pub trait ImageIo: Read + Write + Seek {}

/// Implement ImageIo for all types that satisfy Read + Write + Seek.
impl<T: Read + Write + Seek> ImageIo for T {}

/// A headerless disk image addressed by LBA.
pub struct SectorImage {
    image: Box<dyn ImageIo>,
    geometry: DriveGeometry,
}

impl SectorImage {
    /// Open an image file read/write. The file is never truncated or grown
    /// beyond what sector writes reach.
    pub fn open(path: &Path, geometry: DriveGeometry) -> Result<SectorImage> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(SectorImage {
            image: Box::new(file),
            geometry,
        })
    }

    /// Wrap any seekable byte container as an image.
    pub fn from_io(image: Box<dyn ImageIo>, geometry: DriveGeometry) -> SectorImage {
        SectorImage { image, geometry }
    }

    /// Read the sector at `lba` into `buf`. A read past the end of the
    /// backing container yields zero-filled remainder bytes.
    pub fn read_sector(&mut self, buf: &mut [u8; SECTOR_SIZE], lba: Lba) -> Result<()> {
        if lba >= self.geometry.max_lba() {
            bail!("sector read past end of image: lba {}", lba);
        }
        self.image.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        buf.fill(0);
        let mut filled = 0;
        while filled < buf.len() {
            match self.image.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Write `data` to the sector at `lba`. Data longer than a sector is
    /// truncated; shorter data is zero-padded to a full sector.
    pub fn write_sector(&mut self, data: &[u8], lba: Lba) -> Result<()> {
        if lba >= self.geometry.max_lba() {
            bail!("sector write past end of image: lba {}", lba);
        }
        self.image.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        let len = data.len().min(SECTOR_SIZE);
        self.image.write_all(&data[..len])?;
        if len < SECTOR_SIZE {
            let padding = [0u8; SECTOR_SIZE];
            self.image.write_all(&padding[..SECTOR_SIZE - len])?;
        }
        Ok(())
    }

    /// Fill every sector of the image with `filler`.
    pub fn format(&mut self, filler: u8) -> Result<()> {
        self.image.seek(SeekFrom::Start(0))?;
        let sector = [filler; SECTOR_SIZE];
        for _ in 0..self.geometry.max_lba() {
            self.image.write_all(&sector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn test_image(geometry: DriveGeometry) -> SectorImage {
        let data = vec![0u8; geometry.max_lba() as usize * SECTOR_SIZE];
        SectorImage::from_io(Box::new(Cursor::new(data)), geometry)
    }

    #[test]
    fn write_then_read_sector() {
        let mut image = test_image(DriveGeometry::new(4, 2, 8));

        let data: Vec<u8> = (0..SECTOR_SIZE as u32).map(|i| (i % 251) as u8).collect();
        image.write_sector(&data, 17).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        image.read_sector(&mut buf, 17).unwrap();
        assert_eq!(&buf[..], &data[..]);

        image.read_sector(&mut buf, 16).unwrap();
        assert_eq!(buf, [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn short_write_is_padded() {
        let mut image = test_image(DriveGeometry::new(2, 1, 4));

        image.write_sector(&[0xaa; SECTOR_SIZE], 1).unwrap();
        image.write_sector(&[0x55; 10], 1).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        image.read_sector(&mut buf, 1).unwrap();
        assert_eq!(&buf[..10], &[0x55; 10]);
        assert_eq!(&buf[10..], &[0u8; SECTOR_SIZE - 10]);
    }

    #[test]
    fn long_write_is_truncated() {
        let mut image = test_image(DriveGeometry::new(2, 1, 4));

        image.write_sector(&[0x77; SECTOR_SIZE + 50], 0).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        image.read_sector(&mut buf, 0).unwrap();
        assert_eq!(buf, [0x77; SECTOR_SIZE]);
        image.read_sector(&mut buf, 1).unwrap();
        assert_eq!(buf, [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn format_fills_every_sector() {
        let geometry = DriveGeometry::new(3, 2, 5);
        let mut image = test_image(geometry);

        image.format(0xe5).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        for lba in 0..geometry.max_lba() {
            image.read_sector(&mut buf, lba).unwrap();
            assert_eq!(buf, [0xe5; SECTOR_SIZE]);
        }
    }

    #[test]
    fn out_of_range_access_fails() {
        let geometry = DriveGeometry::new(2, 1, 4);
        let mut image = test_image(geometry);

        let mut buf = [0u8; SECTOR_SIZE];
        assert!(image.read_sector(&mut buf, geometry.max_lba()).is_err());
        assert!(image.write_sector(&buf, geometry.max_lba()).is_err());
    }
}
