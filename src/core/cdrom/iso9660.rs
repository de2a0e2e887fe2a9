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

//! ISO-9660 directory walk and boot-path extraction
//!
//! Only what booting needs: the primary volume descriptor at LBA 16, a
//! case-insensitive path walk from the root directory (version suffixes
//! `;1` and trailing dots stripped), and the `BOOT = cdrom:\...` line of
//! SYSTEM.CNF.

use super::disc::{DiscImage, SECTOR_SIZE};
use crate::core::error::DiscError;

/// LBA of the primary volume descriptor
const PVD_LBA: u32 = 16;

/// One directory entry we care about
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub lba: u32,
    pub size: u32,
    pub is_dir: bool,
}

/// ISO-9660 view over a disc image
pub struct IsoFilesystem<'a> {
    disc: &'a mut DiscImage,
    root_lba: u32,
    root_size: u32,
}

impl<'a> IsoFilesystem<'a> {
    /// Validate the PVD and locate the root directory
    pub fn open(disc: &'a mut DiscImage) -> Result<Self, DiscError> {
        let pvd = disc.read_sector(PVD_LBA)?;
        if pvd[0] != 0x01 || &pvd[1..6] != b"CD001" {
            return Err(DiscError::NoVolumeDescriptor);
        }
        // Root directory record sits at offset 156; extent and size are
        // the little-endian halves of their both-endian fields.
        let root_lba = u32::from_le_bytes(pvd[158..162].try_into().unwrap());
        let root_size = u32::from_le_bytes(pvd[166..170].try_into().unwrap());
        Ok(Self {
            disc,
            root_lba,
            root_size,
        })
    }

    /// Find a file by path (`/` separated), case-insensitive
    pub fn find(&mut self, path: &str) -> Result<DirEntry, DiscError> {
        let mut lba = self.root_lba;
        let mut size = self.root_size;
        let mut found: Option<DirEntry> = None;

        for part in path.split('/').filter(|p| !p.is_empty()) {
            let entry = self
                .find_in_dir(lba, size, part)?
                .ok_or_else(|| DiscError::FileNotFound(path.to_string()))?;
            lba = entry.lba;
            size = entry.size;
            found = Some(entry);
        }
        found.ok_or_else(|| DiscError::FileNotFound(path.to_string()))
    }

    /// Read a whole file
    pub fn read_file(&mut self, entry: &DirEntry) -> Result<Vec<u8>, DiscError> {
        let mut data = Vec::with_capacity(entry.size as usize);
        let sectors = (entry.size as usize).div_ceil(SECTOR_SIZE);
        for i in 0..sectors {
            let sector = self.disc.read_sector(entry.lba + i as u32)?;
            let take = SECTOR_SIZE.min(entry.size as usize - data.len());
            data.extend_from_slice(&sector[..take]);
        }
        Ok(data)
    }

    fn find_in_dir(
        &mut self,
        lba: u32,
        size: u32,
        name: &str,
    ) -> Result<Option<DirEntry>, DiscError> {
        let wanted = normalize(name);
        let sectors = (size as usize).div_ceil(SECTOR_SIZE);

        for i in 0..sectors {
            let sector = self.disc.read_sector(lba + i as u32)?;
            let mut off = 0usize;
            while off < SECTOR_SIZE {
                let len = sector[off] as usize;
                if len == 0 {
                    // Records never cross sector boundaries; a zero length
                    // pads to the next sector.
                    break;
                }
                let name_len = sector[off + 32] as usize;
                let raw = &sector[off + 33..off + 33 + name_len];
                // Skip the "." and ".." pseudo entries.
                if !(name_len == 1 && (raw[0] == 0 || raw[0] == 1)) {
                    let entry_name = String::from_utf8_lossy(raw).to_string();
                    if normalize(&entry_name) == wanted {
                        return Ok(Some(DirEntry {
                            name: entry_name,
                            lba: u32::from_le_bytes(
                                sector[off + 2..off + 6].try_into().unwrap(),
                            ),
                            size: u32::from_le_bytes(
                                sector[off + 10..off + 14].try_into().unwrap(),
                            ),
                            is_dir: sector[off + 25] & 0x02 != 0,
                        }));
                    }
                }
                off += len;
            }
        }
        Ok(None)
    }
}

/// Case-fold and strip the `;1` version suffix and a trailing dot
fn normalize(name: &str) -> String {
    let base = name.split(';').next().unwrap_or(name);
    base.trim_end_matches('.').to_ascii_uppercase()
}

/// Extract the boot executable path from SYSTEM.CNF contents
///
/// `BOOT = <device>:[/\]<path>;<ver>`: the device prefix (`cdrom` plus
/// an optional digit) and leading separators are stripped, backslashes
/// normalise to forward slashes.
pub fn parse_boot_path(system_cnf: &str) -> Result<String, DiscError> {
    for line in system_cnf.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("boot") {
            continue;
        }
        let mut path = value.trim().replace('\\', "/");
        if let Some((device, rest)) = path.split_once(':') {
            if device.to_ascii_lowercase().starts_with("cdrom") {
                path = rest.to_string();
            }
        }
        let path = path.trim_start_matches('/');
        let path = path.split(';').next().unwrap_or(path);
        if path.is_empty() {
            return Err(DiscError::BootPathNotFound(line.to_string()));
        }
        return Ok(path.to_string());
    }
    Err(DiscError::BootPathNotFound("no BOOT line".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    /// Build a minimal single-directory ISO with the given files
    fn build_iso(dir: &std::path::Path, files: &[(&str, &[u8])]) -> PathBuf {
        let total_sectors = 32 + files.len() * 16;
        let mut image = vec![0u8; total_sectors * SECTOR_SIZE];

        // PVD at sector 16.
        let pvd = 16 * SECTOR_SIZE;
        image[pvd] = 0x01;
        image[pvd + 1..pvd + 6].copy_from_slice(b"CD001");
        // Root directory record at +156: extent 20, size one sector.
        image[pvd + 158..pvd + 162].copy_from_slice(&20u32.to_le_bytes());
        image[pvd + 166..pvd + 170].copy_from_slice(&(SECTOR_SIZE as u32).to_le_bytes());

        // Root directory at sector 20; file data from sector 24.
        let mut off = 20 * SECTOR_SIZE;
        for (i, (name, data)) in files.iter().enumerate() {
            let lba = 24 + i as u32 * 16;
            let start = 24 * SECTOR_SIZE + i * 16 * SECTOR_SIZE;
            image[start..start + data.len()].copy_from_slice(data);

            let name_bytes = name.as_bytes();
            let rec_len = 33 + name_bytes.len() + (name_bytes.len() + 1) % 2;
            image[off] = rec_len as u8;
            image[off + 2..off + 6].copy_from_slice(&lba.to_le_bytes());
            image[off + 10..off + 14].copy_from_slice(&(data.len() as u32).to_le_bytes());
            image[off + 32] = name_bytes.len() as u8;
            image[off + 33..off + 33 + name_bytes.len()].copy_from_slice(name_bytes);
            off += rec_len;
        }

        let path = dir.join("test.iso");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&image).unwrap();
        path
    }

    #[test]
    fn test_pvd_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_iso(dir.path(), &[]);
        let mut disc = DiscImage::open(&path).unwrap();
        assert!(IsoFilesystem::open(&mut disc).is_ok());
    }

    #[test]
    fn test_missing_pvd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.iso");
        std::fs::write(&path, vec![0u8; 20 * SECTOR_SIZE]).unwrap();
        let mut disc = DiscImage::open(&path).unwrap();
        assert!(matches!(
            IsoFilesystem::open(&mut disc),
            Err(DiscError::NoVolumeDescriptor)
        ));
    }

    #[test]
    fn test_find_is_case_insensitive_and_strips_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_iso(dir.path(), &[("SYSTEM.CNF;1", b"BOOT = cdrom:\\MAIN.EXE;1\n")]);
        let mut disc = DiscImage::open(&path).unwrap();
        let mut fs = IsoFilesystem::open(&mut disc).unwrap();

        let entry = fs.find("system.cnf").unwrap();
        let data = fs.read_file(&entry).unwrap();
        assert!(data.starts_with(b"BOOT"));
    }

    #[test]
    fn test_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_iso(dir.path(), &[]);
        let mut disc = DiscImage::open(&path).unwrap();
        let mut fs = IsoFilesystem::open(&mut disc).unwrap();
        assert!(matches!(
            fs.find("NOPE.EXE"),
            Err(DiscError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_boot_path_parsing() {
        assert_eq!(
            parse_boot_path("BOOT = cdrom:\\SLUS_123.45;1\r\nTCB = 4\r\n").unwrap(),
            "SLUS_123.45"
        );
        assert_eq!(
            parse_boot_path("BOOT=cdrom2:/DIR/GAME.EXE;1").unwrap(),
            "DIR/GAME.EXE"
        );
        assert_eq!(parse_boot_path("boot = cdrom:MAIN.EXE").unwrap(), "MAIN.EXE");
        assert!(parse_boot_path("VMODE = NTSC").is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Main.Exe;1"), "MAIN.EXE");
        assert_eq!(normalize("DIR."), "DIR");
    }
}
