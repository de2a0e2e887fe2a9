// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Disc image access
//!
//! Accepts a plain 2048-byte-per-sector ISO or a 2352-byte-per-sector raw
//! image (mode auto-detected from the sync pattern and mode byte of the
//! first sector). A `.cue` sheet resolves to its first `FILE ... BINARY`
//! sibling. Sectors are addressed by LBA and always deliver the 2048 user
//! bytes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::core::error::DiscError;

/// User-data bytes per sector
pub const SECTOR_SIZE: usize = 2048;

/// Raw (sync + header + data) sector size
const RAW_SECTOR_SIZE: u64 = 2352;

/// Physical layout of the backing image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorFormat {
    /// 2048-byte user sectors
    Iso2048,
    /// 2352-byte raw, mode 1: user data at +16
    RawMode1,
    /// 2352-byte raw, mode 2 form 1: user data at +24
    RawMode2,
}

/// A read-only disc image
pub struct DiscImage {
    file: File,
    format: SectorFormat,
    sectors: u32,
}

impl DiscImage {
    /// Open an image; `.cue` files resolve to their binary
    pub fn open(path: &Path) -> Result<Self, DiscError> {
        let bin_path = if path
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("cue"))
        {
            resolve_cue(path)?
        } else {
            path.to_path_buf()
        };

        let mut file = File::open(&bin_path)
            .map_err(|e| DiscError::Open(format!("{}: {}", bin_path.display(), e)))?;
        let len = file
            .metadata()
            .map_err(|e| DiscError::Open(e.to_string()))?
            .len();

        let format = detect_format(&mut file, len)?;
        let sectors = match format {
            SectorFormat::Iso2048 => len / SECTOR_SIZE as u64,
            _ => len / RAW_SECTOR_SIZE,
        } as u32;

        log::info!(
            "disc image {} ({:?}, {} sectors)",
            bin_path.display(),
            format,
            sectors
        );
        Ok(Self {
            file,
            format,
            sectors,
        })
    }

    pub fn format(&self) -> SectorFormat {
        self.format
    }

    pub fn sector_count(&self) -> u32 {
        self.sectors
    }

    /// Read the 2048 user bytes of one sector
    pub fn read_sector(&mut self, lba: u32) -> Result<[u8; SECTOR_SIZE], DiscError> {
        if lba >= self.sectors {
            return Err(DiscError::SectorOutOfRange(lba));
        }
        let offset = match self.format {
            SectorFormat::Iso2048 => lba as u64 * SECTOR_SIZE as u64,
            SectorFormat::RawMode1 => lba as u64 * RAW_SECTOR_SIZE + 16,
            SectorFormat::RawMode2 => lba as u64 * RAW_SECTOR_SIZE + 24,
        };
        let mut sector = [0u8; SECTOR_SIZE];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut sector)?;
        Ok(sector)
    }
}

/// Raw-sector sync pattern: 00, 10×FF, 00
const SYNC: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

fn detect_format(file: &mut File, len: u64) -> Result<SectorFormat, DiscError> {
    let mut head = [0u8; 16];
    file.seek(SeekFrom::Start(0))?;
    if file.read_exact(&mut head).is_ok() && head[..12] == SYNC {
        return match head[15] {
            1 => Ok(SectorFormat::RawMode1),
            2 => Ok(SectorFormat::RawMode2),
            _ => Err(DiscError::UnknownFormat),
        };
    }
    if len >= SECTOR_SIZE as u64 && len % SECTOR_SIZE as u64 == 0 {
        return Ok(SectorFormat::Iso2048);
    }
    Err(DiscError::UnknownFormat)
}

/// First `FILE "<name>.bin" BINARY` entry of a cue sheet, as a sibling
fn resolve_cue(cue_path: &Path) -> Result<PathBuf, DiscError> {
    let text = std::fs::read_to_string(cue_path)
        .map_err(|e| DiscError::CueSheet(format!("{}: {}", cue_path.display(), e)))?;

    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with("FILE") || !line.to_ascii_uppercase().ends_with("BINARY") {
            continue;
        }
        let Some(start) = line.find('"') else { continue };
        let Some(end) = line[start + 1..].find('"') else {
            continue;
        };
        let name = &line[start + 1..start + 1 + end];
        return Ok(cue_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(name));
    }
    Err(DiscError::CueSheet("no FILE ... BINARY entry".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_iso(dir: &Path, sectors: u32) -> PathBuf {
        let path = dir.join("image.iso");
        let mut f = File::create(&path).unwrap();
        for lba in 0..sectors {
            let mut sector = [0u8; SECTOR_SIZE];
            sector[0] = lba as u8;
            f.write_all(&sector).unwrap();
        }
        path
    }

    fn write_raw(dir: &Path, mode: u8, sectors: u32) -> PathBuf {
        let path = dir.join("image.bin");
        let mut f = File::create(&path).unwrap();
        for lba in 0..sectors {
            let mut sector = [0u8; 2352];
            sector[..12].copy_from_slice(&SYNC);
            sector[15] = mode;
            let user = if mode == 1 { 16 } else { 24 };
            sector[user] = lba as u8;
            f.write_all(&sector).unwrap();
        }
        path
    }

    #[test]
    fn test_iso_2048_detection_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_iso(dir.path(), 20);
        let mut disc = DiscImage::open(&path).unwrap();
        assert_eq!(disc.format(), SectorFormat::Iso2048);
        assert_eq!(disc.sector_count(), 20);
        assert_eq!(disc.read_sector(17).unwrap()[0], 17);
    }

    #[test]
    fn test_raw_mode1_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(dir.path(), 1, 18);
        let mut disc = DiscImage::open(&path).unwrap();
        assert_eq!(disc.format(), SectorFormat::RawMode1);
        assert_eq!(disc.read_sector(16).unwrap()[0], 16);
    }

    #[test]
    fn test_raw_mode2_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(dir.path(), 2, 18);
        let mut disc = DiscImage::open(&path).unwrap();
        assert_eq!(disc.format(), SectorFormat::RawMode2);
        assert_eq!(disc.read_sector(3).unwrap()[0], 3);
    }

    #[test]
    fn test_cue_resolves_sibling_binary() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), 1, 17);
        let cue = dir.path().join("game.cue");
        std::fs::write(
            &cue,
            "FILE \"image.bin\" BINARY\n  TRACK 01 MODE1/2352\n    INDEX 01 00:00:00\n",
        )
        .unwrap();

        let disc = DiscImage::open(&cue).unwrap();
        assert_eq!(disc.format(), SectorFormat::RawMode1);
    }

    #[test]
    fn test_sector_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_iso(dir.path(), 4);
        let mut disc = DiscImage::open(&path).unwrap();
        assert!(matches!(
            disc.read_sector(4),
            Err(DiscError::SectorOutOfRange(4))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.iso");
        std::fs::write(&path, b"short and odd-sized").unwrap();
        assert!(matches!(
            DiscImage::open(&path),
            Err(DiscError::UnknownFormat)
        ));
    }
}
