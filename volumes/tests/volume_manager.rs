// Volume discovery end to end, including a spanning logical volume factory

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use strata_core::{read_at, shared, Ownership, Result, SparseStream, StreamRef};
use strata_streams::{ConcatStream, MemStream};
use strata_volumes::{
    register_logical_volume_factory, Disk, LogicalVolumeFactory, LogicalVolumeInfo,
    PhysicalVolumeInfo, VolumeManager, VolumeStatus,
};

/// MBR partition type claimed by the spanning factory below. Chosen to match
/// the type Windows uses for dynamic-disk members.
const SPAN_MEMBER_TYPE: u8 = 0x42;

/// Build a raw MBR disk image; `parts` is `(type, start_lba, sectors)`.
fn mbr_disk(total_sectors: u64, signature: u32, parts: &[(u8, u32, u32)]) -> Vec<u8> {
    let mut image = vec![0u8; (total_sectors * 512) as usize];
    image[440..444].copy_from_slice(&signature.to_le_bytes());
    for (slot, &(kind, start_lba, sectors)) in parts.iter().enumerate().take(4) {
        let offset = 446 + slot * 16;
        image[offset] = if slot == 0 { 0x80 } else { 0x00 };
        image[offset + 4] = kind;
        image[offset + 8..offset + 12].copy_from_slice(&start_lba.to_le_bytes());
        image[offset + 12..offset + 16].copy_from_slice(&sectors.to_le_bytes());
    }
    image[510] = 0x55;
    image[511] = 0xAA;
    image
}

fn disk_of(image: Vec<u8>) -> StreamRef {
    shared(MemStream::from_vec(image))
}

/// Concatenates every span-member partition across all disks, in disk order,
/// into one logical volume.
struct SpanningFactory;

impl LogicalVolumeFactory for SpanningFactory {
    fn name(&self) -> &'static str {
        "test-spanning"
    }

    fn handles_physical_volume(&self, volume: &PhysicalVolumeInfo) -> bool {
        volume.bios_type() == SPAN_MEMBER_TYPE
    }

    fn map_disks(
        &self,
        disks: &[Disk],
        result: &mut BTreeMap<String, LogicalVolumeInfo>,
    ) -> Result<()> {
        let mut members: Vec<StreamRef> = Vec::new();
        let mut total = 0;
        let mut first_disk = None;
        for disk in disks {
            for volume in VolumeManager::physical_volumes_of(disk.content().clone())? {
                if volume.bios_type() != SPAN_MEMBER_TYPE {
                    continue;
                }
                first_disk.get_or_insert_with(|| disk.identity().to_string());
                total += volume.length();
                members.push(volume.open()?);
            }
        }
        let Some(first_disk) = first_disk else {
            return Ok(());
        };

        let identity = format!("SP:{first_disk}");
        let opener: Rc<dyn Fn() -> Result<StreamRef>> = Rc::new(move || {
            Ok(shared(ConcatStream::new(
                members.clone(),
                Ownership::None,
            )?))
        });
        result.insert(
            identity.clone(),
            LogicalVolumeInfo::from_opener(
                identity,
                total,
                SPAN_MEMBER_TYPE,
                VolumeStatus::Healthy,
                opener,
            ),
        );
        Ok(())
    }
}

fn ensure_factory_registered() {
    register_logical_volume_factory(Arc::new(SpanningFactory));
    // Re-registration with the same name is a no-op.
    register_logical_volume_factory(Arc::new(SpanningFactory));
}

#[test]
fn spanning_factory_builds_a_concat_volume() {
    ensure_factory_registered();

    // Two disks, each with one ordinary partition and one span member.
    let mut image_a = mbr_disk(2048, 0xA1A1A1A1, &[(0x07, 64, 64), (SPAN_MEMBER_TYPE, 128, 64)]);
    let mut image_b = mbr_disk(2048, 0xB2B2B2B2, &[(SPAN_MEMBER_TYPE, 64, 32)]);
    image_a[128 * 512..128 * 512 + 5].copy_from_slice(b"FIRST");
    image_b[64 * 512..64 * 512 + 6].copy_from_slice(b"SECOND");

    let mut manager = VolumeManager::new();
    manager.add_disk(disk_of(image_a)).unwrap();
    manager.add_disk(disk_of(image_b)).unwrap();

    let logical = manager.get_logical_volumes().unwrap();

    // The ordinary partition is passed through; the two span members are
    // claimed by the factory and replaced with one composite volume.
    let passthrough: Vec<&LogicalVolumeInfo> = logical
        .iter()
        .filter(|v| v.bios_type() == 0x07)
        .collect();
    assert_eq!(passthrough.len(), 1);
    assert!(!logical
        .iter()
        .any(|v| v.identity().starts_with("PV:") && v.bios_type() == SPAN_MEMBER_TYPE));

    let span = logical
        .iter()
        .find(|v| v.identity() == "SP:DSA1A1A1A1")
        .expect("composite volume present");
    assert_eq!(span.length(), (64 + 32) * 512);
    assert_eq!(span.status(), VolumeStatus::Healthy);

    // The composite stream concatenates member content in disk order.
    let stream = span.open().unwrap();
    assert_eq!(stream.borrow().len().unwrap(), (64 + 32) * 512);
    let mut head = [0u8; 5];
    read_at(&stream, 0, &mut head).unwrap();
    assert_eq!(&head, b"FIRST");
    let mut second = [0u8; 6];
    read_at(&stream, 64 * 512, &mut second).unwrap();
    assert_eq!(&second, b"SECOND");
}

#[test]
fn physical_volumes_still_list_claimed_members() {
    ensure_factory_registered();

    let image = mbr_disk(2048, 0xC3C3C3C3, &[(SPAN_MEMBER_TYPE, 64, 64)]);
    let mut manager = VolumeManager::new();
    manager.add_disk(disk_of(image)).unwrap();

    // Claimed members disappear from the logical map but stay physical.
    let physical = manager.get_physical_volumes().unwrap();
    assert_eq!(physical.len(), 1);
    assert_eq!(physical[0].bios_type(), SPAN_MEMBER_TYPE);

    let volume = manager.get_volume(physical[0].identity()).unwrap().unwrap();
    assert_eq!(volume.length(), 64 * 512);
}

#[test]
fn unpartitioned_disk_round_trips_through_its_logical_volume() {
    ensure_factory_registered();

    let mut manager = VolumeManager::new();
    let identity = manager
        .add_disk(shared(MemStream::from_vec(vec![7u8; 512 * 1024])))
        .unwrap();
    assert_eq!(identity, "DO0");

    let logical = manager.get_logical_volumes().unwrap();
    assert_eq!(logical.len(), 1);
    assert_eq!(logical[0].identity(), "PV:DO0");
    assert_eq!(logical[0].length(), 512 * 1024);

    let stream = logical[0].open().unwrap();
    let mut buf = [0u8; 8];
    read_at(&stream, 1000, &mut buf).unwrap();
    assert_eq!(buf, [7u8; 8]);
}
