// Master boot record reader
//
// Layout: disk signature at offset 440, four 16-byte partition entries at
// 446, boot signature 0x55AA at 510. Extended partitions chain through EBRs
// whose link entries are relative to the extended container start.

use log::debug;

use strata_core::{read_at, Result, StrataError, StreamRef};

use super::{PartitionInfo, PartitionTable, PartitionTableFactory, SECTOR_SIZE};

const DISK_SIGNATURE_OFFSET: usize = 440;
const ENTRY_TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const PROTECTIVE_TYPE: u8 = 0xEE;
const MAX_LOGICAL_PARTITIONS: usize = 128;

/// Partition types that mark an extended container rather than a volume.
fn is_extended(kind: u8) -> bool {
    matches!(kind, 0x05 | 0x0F | 0x85)
}

#[derive(Debug, Clone, Copy)]
struct RawEntry {
    status: u8,
    kind: u8,
    start_lba: u32,
    sectors: u32,
}

impl RawEntry {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            status: bytes[0],
            kind: bytes[4],
            start_lba: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            sectors: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    fn is_used(&self) -> bool {
        self.kind != 0 && self.sectors != 0
    }
}

fn boot_signature_ok(sector: &[u8]) -> bool {
    sector[510] == 0x55 && sector[511] == 0xAA
}

fn read_sector(disk: &StreamRef, lba: u64) -> Result<Option<[u8; 512]>> {
    let mut sector = [0u8; 512];
    let n = read_at(disk, lba * SECTOR_SIZE, &mut sector)?;
    if n < 512 {
        return Ok(None);
    }
    Ok(Some(sector))
}

fn primary_entries(sector: &[u8]) -> [RawEntry; 4] {
    let mut entries = [RawEntry {
        status: 0,
        kind: 0,
        start_lba: 0,
        sectors: 0,
    }; 4];
    for (slot, entry) in entries.iter_mut().enumerate() {
        let offset = ENTRY_TABLE_OFFSET + slot * ENTRY_SIZE;
        *entry = RawEntry::parse(&sector[offset..offset + ENTRY_SIZE]);
    }
    entries
}

/// The 32-bit disk signature, when the sector carries a valid boot record.
pub fn disk_signature(disk: &StreamRef) -> Result<Option<u32>> {
    let Some(sector) = read_sector(disk, 0)? else {
        return Ok(None);
    };
    if !boot_signature_ok(&sector) {
        return Ok(None);
    }
    let offset = DISK_SIGNATURE_OFFSET;
    Ok(Some(u32::from_le_bytes([
        sector[offset],
        sector[offset + 1],
        sector[offset + 2],
        sector[offset + 3],
    ])))
}

/// Whether sector 0 holds a usable, non-protective partition table.
fn is_valid(disk: &StreamRef) -> Result<bool> {
    let Some(sector) = read_sector(disk, 0)? else {
        return Ok(false);
    };
    if !boot_signature_ok(&sector) {
        return Ok(false);
    }
    let total_sectors = disk.borrow().len()? / SECTOR_SIZE;
    let entries = primary_entries(&sector);
    let used: Vec<RawEntry> = entries.iter().copied().filter(|e| e.kind != 0).collect();
    if used.is_empty() {
        return Ok(false);
    }
    for entry in &used {
        if entry.status != 0x00 && entry.status != 0x80 {
            return Ok(false);
        }
        if entry.sectors == 0 {
            return Ok(false);
        }
        if entry.start_lba as u64 + entry.sectors as u64 > total_sectors {
            return Ok(false);
        }
    }
    // Overlapping primaries mean boot code, not a partition table.
    for i in 0..used.len() {
        for j in i + 1..used.len() {
            let (a, b) = (&used[i], &used[j]);
            let a_end = a.start_lba as u64 + a.sectors as u64;
            let b_end = b.start_lba as u64 + b.sectors as u64;
            if (a.start_lba as u64) < b_end && (b.start_lba as u64) < a_end {
                return Ok(false);
            }
        }
    }
    // A protective-only table belongs to the GPT reader.
    if used.iter().all(|e| e.kind == PROTECTIVE_TYPE) {
        return Ok(false);
    }
    Ok(true)
}

pub struct MbrPartitionTable {
    disk_signature: u32,
    partitions: Vec<PartitionInfo>,
}

impl MbrPartitionTable {
    pub fn open(disk: &StreamRef) -> Result<Self> {
        if !is_valid(disk)? {
            return Err(StrataError::InvalidData(
                "no valid master boot record".into(),
            ));
        }
        let Some(sector) = read_sector(disk, 0)? else {
            return Err(StrataError::InvalidData(
                "no valid master boot record".into(),
            ));
        };
        let total_sectors = disk.borrow().len()? / SECTOR_SIZE;
        let signature = u32::from_le_bytes([
            sector[DISK_SIGNATURE_OFFSET],
            sector[DISK_SIGNATURE_OFFSET + 1],
            sector[DISK_SIGNATURE_OFFSET + 2],
            sector[DISK_SIGNATURE_OFFSET + 3],
        ]);

        let mut partitions = Vec::new();
        for entry in primary_entries(&sector) {
            if !entry.is_used() || entry.kind == PROTECTIVE_TYPE {
                continue;
            }
            if is_extended(entry.kind) {
                walk_extended(disk, entry.start_lba as u64, total_sectors, &mut partitions)?;
            } else {
                push_partition(&mut partitions, entry.start_lba as u64, &entry);
            }
        }
        Ok(Self {
            disk_signature: signature,
            partitions,
        })
    }

    pub fn disk_signature(&self) -> u32 {
        self.disk_signature
    }
}

fn push_partition(partitions: &mut Vec<PartitionInfo>, start_lba: u64, entry: &RawEntry) {
    partitions.push(PartitionInfo {
        index: partitions.len(),
        first_byte: start_lba * SECTOR_SIZE,
        byte_length: entry.sectors as u64 * SECTOR_SIZE,
        bios_type: entry.kind,
        type_guid: None,
        partition_guid: None,
        name: None,
    });
}

/// Walk the EBR chain of an extended container, emitting logical partitions.
fn walk_extended(
    disk: &StreamRef,
    container_start: u64,
    total_sectors: u64,
    partitions: &mut Vec<PartitionInfo>,
) -> Result<()> {
    let mut visited = Vec::new();
    let mut ebr_lba = container_start;
    loop {
        if visited.contains(&ebr_lba) {
            debug!("EBR chain loops back to sector {ebr_lba}; stopping");
            break;
        }
        if visited.len() >= MAX_LOGICAL_PARTITIONS {
            debug!("EBR chain exceeds {MAX_LOGICAL_PARTITIONS} links; stopping");
            break;
        }
        visited.push(ebr_lba);

        let Some(sector) = read_sector(disk, ebr_lba)? else {
            break;
        };
        if !boot_signature_ok(&sector) {
            break;
        }
        let first = RawEntry::parse(&sector[ENTRY_TABLE_OFFSET..ENTRY_TABLE_OFFSET + ENTRY_SIZE]);
        let link = RawEntry::parse(
            &sector[ENTRY_TABLE_OFFSET + ENTRY_SIZE..ENTRY_TABLE_OFFSET + 2 * ENTRY_SIZE],
        );

        if first.is_used() && !is_extended(first.kind) {
            // Logical partition starts are relative to this EBR.
            let start = ebr_lba + first.start_lba as u64;
            if start + first.sectors as u64 <= total_sectors {
                push_partition(partitions, start, &first);
            } else {
                debug!("logical partition at sector {start} overruns the disk; skipped");
            }
        }

        if link.is_used() && is_extended(link.kind) {
            // Link entries are relative to the container start.
            ebr_lba = container_start + link.start_lba as u64;
        } else {
            break;
        }
    }
    Ok(())
}

impl PartitionTable for MbrPartitionTable {
    fn partitions(&self) -> &[PartitionInfo] {
        &self.partitions
    }
}

pub struct MbrPartitionTableFactory;

impl PartitionTableFactory for MbrPartitionTableFactory {
    fn name(&self) -> &'static str {
        "MBR"
    }

    fn is_partitioned(&self, disk: &StreamRef) -> Result<bool> {
        is_valid(disk)
    }

    fn open(&self, disk: &StreamRef) -> Result<Box<dyn PartitionTable>> {
        Ok(Box::new(MbrPartitionTable::open(disk)?))
    }
}
