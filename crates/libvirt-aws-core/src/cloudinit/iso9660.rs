//! Minimal ISO 9660 writer: one volume, files in the root directory only.
//!
//! Enough for a cloud-init NoCloud seed. Linux mounts it with the default
//! `map=normal`, so `USER-DATA;1` shows up as `user-data`.

use crate::{HypervisorError, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};

pub const SECTOR: usize = 2048;

const PVD_SECTOR: u32 = 16;
const TERMINATOR_SECTOR: u32 = 17;
const L_PATH_TABLE_SECTOR: u32 = 18;
const M_PATH_TABLE_SECTOR: u32 = 19;
const ROOT_SECTOR: u32 = 20;
const FIRST_FILE_SECTOR: u32 = 21;

/// Path table with only the root entry.
const PATH_TABLE_LEN: u32 = 10;

#[derive(Debug, Clone)]
pub struct IsoImage {
    volume_id: String,
    files: Vec<(String, Vec<u8>)>,
}

impl IsoImage {
    pub fn new(volume_id: &str) -> Self {
        Self {
            volume_id: volume_id.to_string(),
            files: Vec::new(),
        }
    }

    /// Add a root-level file. `name` is stored upper-cased with a `;1` version.
    pub fn file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files
            .push((format!("{};1", name.to_ascii_uppercase()), data.into()));
        self
    }

    pub fn build(mut self, now: DateTime<Utc>) -> Result<Vec<u8>> {
        if self.volume_id.len() > 32 {
            return Err(HypervisorError::Provision(format!(
                "volume id '{}' is longer than 32 bytes",
                self.volume_id
            )));
        }
        if let Some((name, _)) = self.files.iter().find(|(name, _)| name.len() > 30) {
            return Err(HypervisorError::Provision(format!(
                "file name '{}' is too long",
                name
            )));
        }
        // Directory records are sorted by identifier.
        self.files.sort_by(|a, b| a.0.cmp(&b.0));

        let stamp = record_date(now);

        let mut extents = Vec::with_capacity(self.files.len());
        let mut next = FIRST_FILE_SECTOR;
        for (_, data) in &self.files {
            extents.push(next);
            next += sectors(data.len()).max(1);
        }
        let total_sectors = next;

        let mut root = Vec::with_capacity(SECTOR);
        root.extend(dir_record(&[0], ROOT_SECTOR, SECTOR as u32, true, &stamp));
        root.extend(dir_record(&[1], ROOT_SECTOR, SECTOR as u32, true, &stamp));
        for ((name, data), extent) in self.files.iter().zip(&extents) {
            root.extend(dir_record(
                name.as_bytes(),
                *extent,
                data.len() as u32,
                false,
                &stamp,
            ));
        }
        if root.len() > SECTOR {
            return Err(HypervisorError::Provision(
                "too many files for a single-sector root directory".to_string(),
            ));
        }

        let mut image = vec![0u8; total_sectors as usize * SECTOR];
        write_sector(&mut image, PVD_SECTOR, &self.primary_descriptor(total_sectors, &stamp, now));
        write_sector(&mut image, TERMINATOR_SECTOR, &terminator());
        write_sector(&mut image, L_PATH_TABLE_SECTOR, &path_table(true));
        write_sector(&mut image, M_PATH_TABLE_SECTOR, &path_table(false));
        write_sector(&mut image, ROOT_SECTOR, &root);
        for ((_, data), extent) in self.files.iter().zip(&extents) {
            let start = *extent as usize * SECTOR;
            image[start..start + data.len()].copy_from_slice(data);
        }

        Ok(image)
    }

    fn primary_descriptor(&self, total_sectors: u32, stamp: &[u8; 7], now: DateTime<Utc>) -> Vec<u8> {
        let mut d = vec![0u8; SECTOR];
        d[0] = 1;
        d[1..6].copy_from_slice(b"CD001");
        d[6] = 1;
        padded(&mut d[8..40], "LINUX");
        padded(&mut d[40..72], &self.volume_id);
        both_u32(&mut d[80..88], total_sectors);
        both_u16(&mut d[120..124], 1);
        both_u16(&mut d[124..128], 1);
        both_u16(&mut d[128..132], SECTOR as u16);
        both_u32(&mut d[132..140], PATH_TABLE_LEN);
        d[140..144].copy_from_slice(&L_PATH_TABLE_SECTOR.to_le_bytes());
        d[148..152].copy_from_slice(&M_PATH_TABLE_SECTOR.to_be_bytes());
        d[156..190].copy_from_slice(&dir_record(&[0], ROOT_SECTOR, SECTOR as u32, true, stamp));
        // Volume set, publisher, preparer, application, then the three
        // file identifiers.
        for range in [190..318, 318..446, 446..574, 574..702, 702..739, 739..776, 776..813] {
            padded(&mut d[range], "");
        }
        let created = volume_date(Some(now));
        d[813..830].copy_from_slice(&created);
        d[830..847].copy_from_slice(&created);
        d[847..864].copy_from_slice(&volume_date(None));
        d[864..881].copy_from_slice(&volume_date(None));
        d[881] = 1;
        d
    }
}

fn sectors(len: usize) -> u32 {
    len.div_ceil(SECTOR) as u32
}

fn write_sector(image: &mut [u8], sector: u32, data: &[u8]) {
    let start = sector as usize * SECTOR;
    image[start..start + data.len()].copy_from_slice(data);
}

fn padded(field: &mut [u8], value: &str) {
    field.fill(b' ');
    field[..value.len()].copy_from_slice(value.as_bytes());
}

fn both_u16(field: &mut [u8], value: u16) {
    field[..2].copy_from_slice(&value.to_le_bytes());
    field[2..4].copy_from_slice(&value.to_be_bytes());
}

fn both_u32(field: &mut [u8], value: u32) {
    field[..4].copy_from_slice(&value.to_le_bytes());
    field[4..8].copy_from_slice(&value.to_be_bytes());
}

fn dir_record(name: &[u8], extent: u32, len: u32, dir: bool, stamp: &[u8; 7]) -> Vec<u8> {
    let padding = usize::from(name.len() % 2 == 0);
    let size = 33 + name.len() + padding;
    let mut r = vec![0u8; size];
    r[0] = size as u8;
    both_u32(&mut r[2..10], extent);
    both_u32(&mut r[10..18], len);
    r[18..25].copy_from_slice(stamp);
    r[25] = if dir { 0x02 } else { 0x00 };
    both_u16(&mut r[28..32], 1);
    r[32] = name.len() as u8;
    r[33..33 + name.len()].copy_from_slice(name);
    r
}

fn path_table(little_endian: bool) -> Vec<u8> {
    let mut t = vec![0u8; PATH_TABLE_LEN as usize];
    t[0] = 1;
    if little_endian {
        t[2..6].copy_from_slice(&ROOT_SECTOR.to_le_bytes());
        t[6..8].copy_from_slice(&1u16.to_le_bytes());
    } else {
        t[2..6].copy_from_slice(&ROOT_SECTOR.to_be_bytes());
        t[6..8].copy_from_slice(&1u16.to_be_bytes());
    }
    t
}

fn terminator() -> Vec<u8> {
    let mut d = vec![0u8; 7];
    d[0] = 255;
    d[1..6].copy_from_slice(b"CD001");
    d[6] = 1;
    d
}

fn record_date(now: DateTime<Utc>) -> [u8; 7] {
    [
        (now.year() - 1900).clamp(0, 255) as u8,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
        0,
    ]
}

/// `YYYYMMDDHHMMSScc` plus a zero UTC offset; all zeros when unset.
fn volume_date(at: Option<DateTime<Utc>>) -> [u8; 17] {
    let mut out = [b'0'; 17];
    out[16] = 0;
    if let Some(at) = at {
        out[..16].copy_from_slice(at.format("%Y%m%d%H%M%S00").to_string().as_bytes());
    }
    out
}
