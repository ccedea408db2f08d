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

    drive_model.rs

    Defines the catalog of emulated drive models and their fixed data.

*/

use std::fmt::{Display, Formatter};

use lazy_static::lazy_static;

use crate::{chs::DriveGeometry, disk_image::SECTOR_SIZE};

/// Fixed data of one drive model.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DriveModel {
    pub name: &'static str,
    /// Byte pair sent in response to an Identify sequence.
    pub id_bytes: [u8; 2],
    /// Geometry of each unit.
    pub geometry: DriveGeometry,
    /// Number of units in the drive.
    pub units: usize,
    /// Whether the filler byte of a format command is ignored (the media is
    /// filled with 0xFF instead, unless overridden).
    pub ignore_format_filler: bool,
}

impl DriveModel {
    /// Return the capacity of one unit in bytes.
    pub fn unit_size(&self) -> usize {
        self.geometry.max_lba() as usize * SECTOR_SIZE
    }
}

impl Display for DriveModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let size_in_mb = self.unit_size() as f32 / 1024.0 / 1024.0;
        write!(
            f,
            "c:{} h:{} s:{} units:{} ({:.1}MB/unit)",
            self.geometry.c(),
            self.geometry.h(),
            self.geometry.s(),
            self.units,
            size_in_mb
        )
    }
}

lazy_static! {
    static ref DRIVE_MODELS: [DriveModel; 2] = [
        DriveModel {
            name: "9134b",
            id_bytes: [0x01, 0x0a],
            geometry: DriveGeometry::new(306, 4, 31),
            units: 1,
            ignore_format_filler: true,
        },
        DriveModel {
            name: "9895",
            id_bytes: [0x00, 0x81],
            geometry: DriveGeometry::new(77, 2, 30),
            units: 2,
            ignore_format_filler: false,
        },
    ];
}

/// Look up a drive model by name.
pub fn find_model(name: &str) -> Option<&'static DriveModel> {
    DRIVE_MODELS.iter().find(|model| model.name == name)
}

/// Return all known drive models, for the usage listing.
pub fn all_models() -> impl Iterator<Item = &'static DriveModel> {
    DRIVE_MODELS.iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_lookup() {
        let model = find_model("9895").unwrap();
        assert_eq!(model.id_bytes, [0x00, 0x81]);
        assert_eq!(model.units, 2);
        assert_eq!(model.geometry.max_lba(), 77 * 2 * 30);
        assert!(!model.ignore_format_filler);

        let model = find_model("9134b").unwrap();
        assert_eq!(model.id_bytes, [0x01, 0x0a]);
        assert_eq!(model.units, 1);
        assert!(model.ignore_format_filler);

        assert!(find_model("7905").is_none());
        assert_eq!(all_models().count(), 2);
    }
}
