// Volume discovery over registered disks

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use strata_core::{shared, Extent, Result, StrataError, StreamRef};
use strata_streams::SubStream;

use crate::factory;
use crate::identity;
use crate::partitions::{self, PartitionInfo};

/// A disk registered with the volume manager.
#[derive(Clone)]
pub struct Disk {
    identity: String,
    ordinal: usize,
    content: StreamRef,
}

impl Disk {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn content(&self) -> &StreamRef {
        &self.content
    }
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk")
            .field("identity", &self.identity)
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeStatus {
    Healthy,
    FailedRedundancy,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhysicalVolumeType {
    EntireDisk,
    BiosPartition,
    GptPartition,
}

/// A disk region (or whole disk) that could hold a file system.
#[derive(Clone)]
pub struct PhysicalVolumeInfo {
    identity: String,
    disk_identity: String,
    volume_type: PhysicalVolumeType,
    partition_index: Option<usize>,
    partition_guid: Option<Uuid>,
    bios_type: u8,
    first_byte: u64,
    length: u64,
    disk: StreamRef,
}

impl PhysicalVolumeInfo {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn disk_identity(&self) -> &str {
        &self.disk_identity
    }

    pub fn volume_type(&self) -> PhysicalVolumeType {
        self.volume_type
    }

    pub fn partition_index(&self) -> Option<usize> {
        self.partition_index
    }

    pub fn partition_guid(&self) -> Option<Uuid> {
        self.partition_guid
    }

    pub fn bios_type(&self) -> u8 {
        self.bios_type
    }

    /// Offset of the volume within its disk.
    pub fn first_byte(&self) -> u64 {
        self.first_byte
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Open the volume content as a window over the disk stream.
    pub fn open(&self) -> Result<StreamRef> {
        Ok(shared(SubStream::new(
            self.disk.clone(),
            Extent::new(self.first_byte, self.length),
        )?))
    }
}

impl fmt::Debug for PhysicalVolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalVolumeInfo")
            .field("identity", &self.identity)
            .field("volume_type", &self.volume_type)
            .field("first_byte", &self.first_byte)
            .field("length", &self.length)
            .finish()
    }
}

/// Opens the content stream of a composite logical volume.
pub type VolumeOpener = Rc<dyn Fn() -> Result<StreamRef>>;

#[derive(Clone)]
enum LogicalVolumeSource {
    Physical(PhysicalVolumeInfo),
    Opener(VolumeOpener),
}

/// A file-system-visible volume, possibly spanning several physical volumes.
#[derive(Clone)]
pub struct LogicalVolumeInfo {
    identity: String,
    length: u64,
    bios_type: u8,
    status: VolumeStatus,
    source: LogicalVolumeSource,
}

impl LogicalVolumeInfo {
    /// One-to-one wrap of a physical volume.
    pub fn passthrough(volume: &PhysicalVolumeInfo) -> Self {
        Self {
            identity: volume.identity().to_string(),
            length: volume.length(),
            bios_type: volume.bios_type(),
            status: VolumeStatus::Healthy,
            source: LogicalVolumeSource::Physical(volume.clone()),
        }
    }

    /// Composite volume produced by a logical volume factory.
    pub fn from_opener(
        identity: String,
        length: u64,
        bios_type: u8,
        status: VolumeStatus,
        opener: VolumeOpener,
    ) -> Self {
        Self {
            identity,
            length,
            bios_type,
            status,
            source: LogicalVolumeSource::Opener(opener),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn bios_type(&self) -> u8 {
        self.bios_type
    }

    pub fn status(&self) -> VolumeStatus {
        self.status
    }

    pub fn open(&self) -> Result<StreamRef> {
        match &self.source {
            LogicalVolumeSource::Physical(volume) => volume.open(),
            LogicalVolumeSource::Opener(opener) => opener(),
        }
    }
}

impl fmt::Debug for LogicalVolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalVolumeInfo")
            .field("identity", &self.identity)
            .field("length", &self.length)
            .field("status", &self.status)
            .finish()
    }
}

/// Either kind of volume, as returned by identity lookup.
#[derive(Debug, Clone)]
pub enum VolumeInfo {
    Physical(PhysicalVolumeInfo),
    Logical(LogicalVolumeInfo),
}

impl VolumeInfo {
    pub fn identity(&self) -> &str {
        match self {
            VolumeInfo::Physical(v) => v.identity(),
            VolumeInfo::Logical(v) => v.identity(),
        }
    }

    pub fn length(&self) -> u64 {
        match self {
            VolumeInfo::Physical(v) => v.length(),
            VolumeInfo::Logical(v) => v.length(),
        }
    }

    pub fn open(&self) -> Result<StreamRef> {
        match self {
            VolumeInfo::Physical(v) => v.open(),
            VolumeInfo::Logical(v) => v.open(),
        }
    }
}

/// Discovers physical and logical volumes across a set of disks.
///
/// Disks are scanned lazily: any query first re-runs the scan when the disk
/// set changed, rebuilding both volume maps as a whole.
pub struct VolumeManager {
    disks: Vec<Disk>,
    physical: BTreeMap<String, PhysicalVolumeInfo>,
    logical: BTreeMap<String, LogicalVolumeInfo>,
    needs_scan: bool,
}

impl VolumeManager {
    pub fn new() -> Self {
        Self {
            disks: Vec::new(),
            physical: BTreeMap::new(),
            logical: BTreeMap::new(),
            needs_scan: false,
        }
    }

    /// Register a disk content stream; returns the derived disk identity.
    pub fn add_disk(&mut self, content: StreamRef) -> Result<String> {
        let ordinal = self.disks.len();
        let identity = identity::disk_identity(&content, ordinal);
        debug!("registered disk {identity} at ordinal {ordinal}");
        self.disks.push(Disk {
            identity: identity.clone(),
            ordinal,
            content,
        });
        self.needs_scan = true;
        Ok(identity)
    }

    pub fn get_physical_volumes(&mut self) -> Result<Vec<PhysicalVolumeInfo>> {
        self.ensure_scanned()?;
        Ok(self.physical.values().cloned().collect())
    }

    pub fn get_logical_volumes(&mut self) -> Result<Vec<LogicalVolumeInfo>> {
        self.ensure_scanned()?;
        Ok(self.logical.values().cloned().collect())
    }

    /// Look up a volume by identity, preferring the logical map.
    pub fn get_volume(&mut self, identity: &str) -> Result<Option<VolumeInfo>> {
        self.ensure_scanned()?;
        if let Some(volume) = self.logical.get(identity) {
            return Ok(Some(VolumeInfo::Logical(volume.clone())));
        }
        Ok(self
            .physical
            .get(identity)
            .map(|volume| VolumeInfo::Physical(volume.clone())))
    }

    /// Convenience scan of a single disk stream.
    pub fn physical_volumes_of(content: StreamRef) -> Result<Vec<PhysicalVolumeInfo>> {
        let mut manager = Self::new();
        manager.add_disk(content)?;
        manager.get_physical_volumes()
    }

    fn ensure_scanned(&mut self) -> Result<()> {
        if self.needs_scan {
            self.scan()?;
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<()> {
        let mut physical = BTreeMap::new();
        for disk in &self.disks {
            for volume in Self::scan_disk(disk)? {
                let identity = volume.identity().to_string();
                if physical.insert(identity.clone(), volume).is_some() {
                    return Err(StrataError::DuplicateVolume(identity));
                }
            }
        }

        let factories = factory::registered_factories();
        let mut logical = BTreeMap::new();
        for volume in physical.values() {
            let handled = factories
                .iter()
                .any(|factory| factory.handles_physical_volume(volume));
            if handled {
                continue;
            }
            let wrapped = LogicalVolumeInfo::passthrough(volume);
            let identity = wrapped.identity().to_string();
            if logical.insert(identity.clone(), wrapped).is_some() {
                return Err(StrataError::DuplicateVolume(identity));
            }
        }
        for factory in factories.iter() {
            factory.map_disks(&self.disks, &mut logical)?;
        }

        info!(
            "volume scan complete: {} disks, {} physical, {} logical",
            self.disks.len(),
            physical.len(),
            logical.len()
        );
        self.physical = physical;
        self.logical = logical;
        self.needs_scan = false;
        Ok(())
    }

    fn scan_disk(disk: &Disk) -> Result<Vec<PhysicalVolumeInfo>> {
        let tables = partitions::get_partition_tables(disk.content())?;
        if tables.is_empty() {
            debug!("disk {} is not partitioned; exposing whole disk", disk.identity());
            let length = disk.content().borrow().len()?;
            return Ok(vec![PhysicalVolumeInfo {
                identity: format!("PV:{}", disk.identity()),
                disk_identity: disk.identity().to_string(),
                volume_type: PhysicalVolumeType::EntireDisk,
                partition_index: None,
                partition_guid: None,
                bios_type: 0,
                first_byte: 0,
                length,
                disk: disk.content().clone(),
            }]);
        }

        let mut volumes = Vec::new();
        for table in &tables {
            for partition in table.partitions() {
                volumes.push(Self::volume_for_partition(disk, partition));
            }
        }
        Ok(volumes)
    }

    fn volume_for_partition(disk: &Disk, partition: &PartitionInfo) -> PhysicalVolumeInfo {
        let (identity, volume_type) = match partition.partition_guid {
            Some(guid) => (format!("PG{{{guid}}}"), PhysicalVolumeType::GptPartition),
            None => (
                format!("PV:{}:{}", disk.identity(), partition.index),
                PhysicalVolumeType::BiosPartition,
            ),
        };
        debug!(
            "disk {}: partition {} -> {}",
            disk.identity(),
            partition.index,
            identity
        );
        PhysicalVolumeInfo {
            identity,
            disk_identity: disk.identity().to_string(),
            volume_type,
            partition_index: Some(partition.index),
            partition_guid: partition.partition_guid,
            bios_type: partition.bios_type,
            first_byte: partition.first_byte,
            length: partition.byte_length,
            disk: disk.content().clone(),
        }
    }
}

impl Default for VolumeManager {
    fn default() -> Self {
        Self::new()
    }
}
