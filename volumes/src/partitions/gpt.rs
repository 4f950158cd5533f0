// GUID partition table reader
//
// Primary header at LBA 1, entry array where the header says, backup header
// in the last sector. GUIDs are stored in the UEFI mixed-endian order. Both
// the header and the entry array are protected by IEEE CRC32.

use log::debug;
use uuid::Uuid;

use strata_core::{read_at, Result, StrataError, StreamRef};

use super::{PartitionInfo, PartitionTable, PartitionTableFactory, SECTOR_SIZE};

const HEADER_SIGNATURE: &[u8; 8] = b"EFI PART";
const HEADER_LBA: u64 = 1;
const MIN_HEADER_SIZE: u32 = 92;
const MIN_ENTRY_SIZE: u32 = 128;
const MAX_ENTRY_SIZE: u32 = 4096;
// Bounds the entry array read from untrusted headers.
const MAX_ENTRY_COUNT: u32 = 4096;

#[derive(Debug, Clone, Copy)]
struct GptHeader {
    disk_guid: Uuid,
    entries_lba: u64,
    entry_count: u32,
    entry_size: u32,
    entries_crc: u32,
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
        bytes[offset + 4],
        bytes[offset + 5],
        bytes[offset + 6],
        bytes[offset + 7],
    ])
}

fn guid_at(bytes: &[u8], offset: usize) -> Uuid {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&bytes[offset..offset + 16]);
    Uuid::from_bytes_le(raw)
}

/// IEEE CRC32 as GPT uses for its header and entry-array checksums.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

fn parse_header(sector: &[u8; 512]) -> Option<GptHeader> {
    if &sector[0..8] != HEADER_SIGNATURE {
        return None;
    }
    let header_size = le_u32(sector, 12);
    if header_size < MIN_HEADER_SIZE || header_size > 512 {
        return None;
    }
    let stored_crc = le_u32(sector, 16);
    let mut scratch = sector[..header_size as usize].to_vec();
    scratch[16..20].fill(0);
    if crc32(&scratch) != stored_crc {
        return None;
    }
    let entry_count = le_u32(sector, 80);
    let entry_size = le_u32(sector, 84);
    if entry_count == 0 || entry_count > MAX_ENTRY_COUNT {
        return None;
    }
    if entry_size < MIN_ENTRY_SIZE || entry_size > MAX_ENTRY_SIZE || entry_size % 8 != 0 {
        return None;
    }
    Some(GptHeader {
        disk_guid: guid_at(sector, 56),
        entries_lba: le_u64(sector, 72),
        entry_count,
        entry_size,
        entries_crc: le_u32(sector, 88),
    })
}

fn read_header_at(disk: &StreamRef, lba: u64) -> Result<Option<GptHeader>> {
    let mut sector = [0u8; 512];
    let n = read_at(disk, lba * SECTOR_SIZE, &mut sector)?;
    if n < 512 {
        return Ok(None);
    }
    Ok(parse_header(&sector))
}

/// Primary header, or the backup in the last sector when the primary is
/// corrupt.
fn load_header(disk: &StreamRef) -> Result<Option<GptHeader>> {
    if let Some(header) = read_header_at(disk, HEADER_LBA)? {
        return Ok(Some(header));
    }
    let total_sectors = disk.borrow().len()? / SECTOR_SIZE;
    if total_sectors > 2 {
        if let Some(header) = read_header_at(disk, total_sectors - 1)? {
            debug!("primary GPT header invalid; using backup");
            return Ok(Some(header));
        }
    }
    Ok(None)
}

/// The disk GUID, when a valid GPT is present.
pub fn disk_guid(disk: &StreamRef) -> Result<Option<Uuid>> {
    Ok(load_header(disk)?.map(|h| h.disk_guid))
}

#[derive(Debug)]
pub struct GptPartitionTable {
    disk_guid: Uuid,
    partitions: Vec<PartitionInfo>,
}

impl GptPartitionTable {
    pub fn open(disk: &StreamRef) -> Result<Self> {
        let header = load_header(disk)?
            .ok_or_else(|| StrataError::InvalidData("no valid GPT header".into()))?;

        let table_bytes = header.entry_count as usize * header.entry_size as usize;
        let mut entries = vec![0u8; table_bytes];
        let n = read_at(disk, header.entries_lba * SECTOR_SIZE, &mut entries)?;
        if n < table_bytes {
            return Err(StrataError::InvalidData("GPT entry array truncated".into()));
        }
        if crc32(&entries) != header.entries_crc {
            return Err(StrataError::InvalidData(
                "GPT entry array checksum mismatch".into(),
            ));
        }

        let mut partitions = Vec::new();
        for slot in 0..header.entry_count as usize {
            let entry = &entries[slot * header.entry_size as usize..][..header.entry_size as usize];
            let type_guid = guid_at(entry, 0);
            if type_guid.is_nil() {
                continue;
            }
            let first_lba = le_u64(entry, 32);
            let last_lba = le_u64(entry, 40);
            if last_lba < first_lba {
                debug!("GPT entry {slot} has inverted LBA range; skipped");
                continue;
            }
            partitions.push(PartitionInfo {
                index: partitions.len(),
                first_byte: first_lba * SECTOR_SIZE,
                byte_length: (last_lba - first_lba + 1) * SECTOR_SIZE,
                bios_type: 0,
                type_guid: Some(type_guid),
                partition_guid: Some(guid_at(entry, 16)),
                name: entry_name(entry),
            });
        }
        Ok(Self {
            disk_guid: header.disk_guid,
            partitions,
        })
    }

    pub fn disk_guid(&self) -> Uuid {
        self.disk_guid
    }
}

/// UTF-16LE partition name, NUL-trimmed; `None` when empty.
fn entry_name(entry: &[u8]) -> Option<String> {
    let mut units = Vec::new();
    let name_bytes = &entry[56..entry.len().min(128)];
    for pair in name_bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    if units.is_empty() {
        None
    } else {
        Some(String::from_utf16_lossy(&units))
    }
}

impl PartitionTable for GptPartitionTable {
    fn partitions(&self) -> &[PartitionInfo] {
        &self.partitions
    }
}

pub struct GptPartitionTableFactory;

impl PartitionTableFactory for GptPartitionTableFactory {
    fn name(&self) -> &'static str {
        "GPT"
    }

    fn is_partitioned(&self, disk: &StreamRef) -> Result<bool> {
        Ok(load_header(disk)?.is_some())
    }

    fn open(&self, disk: &StreamRef) -> Result<Box<dyn PartitionTable>> {
        Ok(Box::new(GptPartitionTable::open(disk)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitions::test_images::gpt_disk;
    use strata_core::shared;
    use strata_streams::MemStream;

    const SECTORS: u64 = 4096;

    fn type_basic() -> Uuid {
        Uuid::parse_str("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7").unwrap()
    }

    fn disk_of(image: Vec<u8>) -> StreamRef {
        shared(MemStream::from_vec(image))
    }

    #[test]
    fn parses_disk_guid_and_partitions() {
        let guid = Uuid::parse_str("6a898cc3-1dd2-11b2-99a6-080020736631").unwrap();
        let part_guid = Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap();
        let disk = disk_of(gpt_disk(
            SECTORS,
            guid,
            &[(type_basic(), part_guid, 2048, 4031, "System")],
        ));

        assert_eq!(disk_guid(&disk).unwrap(), Some(guid));
        let table = GptPartitionTable::open(&disk).unwrap();
        assert_eq!(table.disk_guid(), guid);
        let parts = table.partitions();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].first_byte, 2048 * 512);
        assert_eq!(parts[0].byte_length, (4031 - 2048 + 1) * 512);
        assert_eq!(parts[0].partition_guid, Some(part_guid));
        assert_eq!(parts[0].type_guid, Some(type_basic()));
        assert_eq!(parts[0].name.as_deref(), Some("System"));
        assert_eq!(parts[0].bios_type, 0);
    }

    #[test]
    fn corrupt_primary_header_falls_back_to_backup() {
        let guid = Uuid::parse_str("0fc63daf-8483-4772-8e79-3d69d8477de4").unwrap();
        let part_guid = Uuid::parse_str("99999999-8888-7777-6666-555555555555").unwrap();
        let mut image = gpt_disk(SECTORS, guid, &[(type_basic(), part_guid, 64, 127, "")]);
        // Flip one byte inside the primary header so its CRC fails.
        image[512 + 40] ^= 0xFF;

        let disk = disk_of(image);
        assert_eq!(disk_guid(&disk).unwrap(), Some(guid));
        let table = GptPartitionTable::open(&disk).unwrap();
        assert_eq!(table.partitions().len(), 1);
        assert_eq!(table.partitions()[0].name, None);
    }

    #[test]
    fn both_headers_corrupt_is_no_gpt() {
        let guid = Uuid::parse_str("0fc63daf-8483-4772-8e79-3d69d8477de4").unwrap();
        let mut image = gpt_disk(SECTORS, guid, &[]);
        image[512] ^= 0xFF;
        let backup_offset = ((SECTORS - 1) * 512) as usize;
        image[backup_offset] ^= 0xFF;

        let disk = disk_of(image);
        assert_eq!(disk_guid(&disk).unwrap(), None);
        assert!(matches!(
            GptPartitionTable::open(&disk),
            Err(StrataError::InvalidData(_))
        ));
    }

    #[test]
    fn corrupt_entry_array_is_rejected() {
        let guid = Uuid::parse_str("0fc63daf-8483-4772-8e79-3d69d8477de4").unwrap();
        let part_guid = Uuid::parse_str("99999999-8888-7777-6666-555555555555").unwrap();
        let mut image = gpt_disk(SECTORS, guid, &[(type_basic(), part_guid, 64, 127, "x")]);
        // Corrupt the entry array without touching either header. The backup
        // header references the same array, so both paths fail.
        image[1024] ^= 0xFF;

        let disk = disk_of(image);
        let err = GptPartitionTable::open(&disk).unwrap_err();
        assert!(matches!(err, StrataError::InvalidData(_)));
    }

    #[test]
    fn guid_round_trips_mixed_endian_layout() {
        let guid = Uuid::parse_str("12345678-9abc-def0-1122-334455667788").unwrap();
        let bytes = guid.to_bytes_le();
        // First three fields little-endian, the rest verbatim.
        assert_eq!(&bytes[0..4], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(&bytes[4..6], &[0xbc, 0x9a]);
        assert_eq!(&bytes[6..8], &[0xf0, 0xde]);
        assert_eq!(Uuid::from_bytes_le(bytes), guid);
    }

    #[test]
    fn crc32_matches_known_vector() {
        // Standard IEEE check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
