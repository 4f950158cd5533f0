pub mod factory;
pub mod identity;
pub mod manager;
pub mod partitions;

pub use factory::{register_logical_volume_factory, LogicalVolumeFactory};
pub use manager::{
    Disk, LogicalVolumeInfo, PhysicalVolumeInfo, PhysicalVolumeType, VolumeInfo, VolumeManager,
    VolumeOpener, VolumeStatus,
};
pub use partitions::{PartitionInfo, PartitionTable, PartitionTableFactory};
