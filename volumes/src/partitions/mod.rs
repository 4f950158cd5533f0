// Partition table probing and parsing

pub mod gpt;
pub mod mbr;

use strata_core::{Result, StreamRef};
use uuid::Uuid;

pub const SECTOR_SIZE: u64 = 512;

/// One partition as reported by a table reader, in byte units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    /// Position within the table's emit order.
    pub index: usize,
    pub first_byte: u64,
    pub byte_length: u64,
    /// MBR partition type; zero for GPT partitions.
    pub bios_type: u8,
    pub type_guid: Option<Uuid>,
    pub partition_guid: Option<Uuid>,
    pub name: Option<String>,
}

pub trait PartitionTable {
    fn partitions(&self) -> &[PartitionInfo];
}

pub trait PartitionTableFactory: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_partitioned(&self, disk: &StreamRef) -> Result<bool>;
    fn open(&self, disk: &StreamRef) -> Result<Box<dyn PartitionTable>>;
}

/// Probe order is GPT first, so a protective MBR is never reported as a real
/// table; the first reader that claims the disk supplies its tables.
pub fn table_factories() -> &'static [&'static dyn PartitionTableFactory] {
    static GPT: gpt::GptPartitionTableFactory = gpt::GptPartitionTableFactory;
    static MBR: mbr::MbrPartitionTableFactory = mbr::MbrPartitionTableFactory;
    static FACTORIES: [&'static dyn PartitionTableFactory; 2] = [&GPT, &MBR];
    &FACTORIES
}

pub fn is_partitioned(disk: &StreamRef) -> Result<bool> {
    for factory in table_factories() {
        if factory.is_partitioned(disk)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn get_partition_tables(disk: &StreamRef) -> Result<Vec<Box<dyn PartitionTable>>> {
    for factory in table_factories() {
        if factory.is_partitioned(disk)? {
            return Ok(vec![factory.open(disk)?]);
        }
    }
    Ok(Vec::new())
}

#[cfg(test)]
pub(crate) mod test_images {
    //! Synthetic disk images in the layouts the readers expect.

    use uuid::Uuid;

    use super::gpt::crc32;

    /// 512-byte MBR sector: `parts` is `(type, start_lba, sectors)`, laid out
    /// from entry slot 0. The first partition is flagged bootable.
    pub fn mbr_sector(signature: u32, parts: &[(u8, u32, u32)]) -> [u8; 512] {
        let mut sector = [0u8; 512];
        sector[440..444].copy_from_slice(&signature.to_le_bytes());
        for (slot, &(kind, start_lba, sectors)) in parts.iter().enumerate().take(4) {
            let offset = 446 + slot * 16;
            sector[offset] = if slot == 0 { 0x80 } else { 0x00 };
            sector[offset + 4] = kind;
            sector[offset + 8..offset + 12].copy_from_slice(&start_lba.to_le_bytes());
            sector[offset + 12..offset + 16].copy_from_slice(&sectors.to_le_bytes());
        }
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    /// Raw disk image with an MBR at sector 0.
    pub fn mbr_disk(total_sectors: u64, signature: u32, parts: &[(u8, u32, u32)]) -> Vec<u8> {
        let mut image = vec![0u8; (total_sectors * 512) as usize];
        image[..512].copy_from_slice(&mbr_sector(signature, parts));
        image
    }

    /// GPT header sector for entries at `entries_lba`.
    pub fn gpt_header_sector(
        current_lba: u64,
        backup_lba: u64,
        total_sectors: u64,
        disk_guid: Uuid,
        entries_lba: u64,
        entries: &[u8],
    ) -> [u8; 512] {
        let mut header = [0u8; 512];
        header[0..8].copy_from_slice(b"EFI PART");
        header[8..12].copy_from_slice(&[0x00, 0x00, 0x01, 0x00]);
        header[12..16].copy_from_slice(&92u32.to_le_bytes());
        header[24..32].copy_from_slice(&current_lba.to_le_bytes());
        header[32..40].copy_from_slice(&backup_lba.to_le_bytes());
        header[40..48].copy_from_slice(&34u64.to_le_bytes());
        header[48..56].copy_from_slice(&(total_sectors - 34).to_le_bytes());
        header[56..72].copy_from_slice(&disk_guid.to_bytes_le());
        header[72..80].copy_from_slice(&entries_lba.to_le_bytes());
        header[80..84].copy_from_slice(&128u32.to_le_bytes());
        header[84..88].copy_from_slice(&128u32.to_le_bytes());
        header[88..92].copy_from_slice(&crc32(entries).to_le_bytes());
        let header_crc = crc32(&header[..92]);
        header[16..20].copy_from_slice(&header_crc.to_le_bytes());
        header
    }

    /// 128 entry slots of 128 bytes; `parts` is
    /// `(type_guid, partition_guid, first_lba, last_lba, name)`.
    pub fn gpt_entries(parts: &[(Uuid, Uuid, u64, u64, &str)]) -> Vec<u8> {
        let mut entries = vec![0u8; 128 * 128];
        for (slot, &(type_guid, part_guid, first_lba, last_lba, name)) in
            parts.iter().enumerate().take(128)
        {
            let offset = slot * 128;
            entries[offset..offset + 16].copy_from_slice(&type_guid.to_bytes_le());
            entries[offset + 16..offset + 32].copy_from_slice(&part_guid.to_bytes_le());
            entries[offset + 32..offset + 40].copy_from_slice(&first_lba.to_le_bytes());
            entries[offset + 40..offset + 48].copy_from_slice(&last_lba.to_le_bytes());
            for (i, unit) in name.encode_utf16().take(36).enumerate() {
                entries[offset + 56 + i * 2..offset + 58 + i * 2]
                    .copy_from_slice(&unit.to_le_bytes());
            }
        }
        entries
    }

    /// Raw GPT disk image: protective MBR, primary header at LBA 1, entry
    /// array at LBA 2, backup header in the last sector.
    pub fn gpt_disk(
        total_sectors: u64,
        disk_guid: Uuid,
        parts: &[(Uuid, Uuid, u64, u64, &str)],
    ) -> Vec<u8> {
        let mut image = vec![0u8; (total_sectors * 512) as usize];
        let protective_sectors = (total_sectors - 1).min(u32::MAX as u64) as u32;
        image[..512].copy_from_slice(&mbr_sector(0, &[(0xEE, 1, protective_sectors)]));

        let entries = gpt_entries(parts);
        let primary = gpt_header_sector(1, total_sectors - 1, total_sectors, disk_guid, 2, &entries);
        image[512..1024].copy_from_slice(&primary);
        image[1024..1024 + entries.len()].copy_from_slice(&entries);

        let backup = gpt_header_sector(total_sectors - 1, 1, total_sectors, disk_guid, 2, &entries);
        let backup_offset = ((total_sectors - 1) * 512) as usize;
        image[backup_offset..backup_offset + 512].copy_from_slice(&backup);
        image
    }
}
