// Stable disk identity strings
//
// Priority: GPT disk GUID, then MBR disk signature, then insertion ordinal.
// File-system code may persist these, so the grammar is stable.

use log::debug;

use strata_core::StreamRef;

use crate::partitions::{gpt, mbr};

pub fn disk_identity(disk: &StreamRef, ordinal: usize) -> String {
    match gpt::disk_guid(disk) {
        Ok(Some(guid)) if !guid.is_nil() => return format!("DG{{{guid}}}"),
        Ok(_) => {}
        Err(err) => debug!("GPT probe failed while deriving a disk identity: {err}"),
    }
    match mbr::disk_signature(disk) {
        Ok(Some(signature)) if signature != 0 => return format!("DS{signature:08X}"),
        Ok(_) => {}
        Err(err) => debug!("MBR probe failed while deriving a disk identity: {err}"),
    }
    format!("DO{ordinal}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitions::test_images::{gpt_disk, mbr_disk};
    use strata_core::shared;
    use strata_streams::MemStream;
    use uuid::Uuid;

    fn disk_of(image: Vec<u8>) -> StreamRef {
        shared(MemStream::from_vec(image))
    }

    #[test]
    fn mbr_signature_identity() {
        let disk = disk_of(mbr_disk(128, 0xDEADBEEF, &[(0x07, 8, 64)]));
        assert_eq!(disk_identity(&disk, 0), "DSDEADBEEF");
    }

    #[test]
    fn gpt_guid_identity_wins_over_signature() {
        let guid = Uuid::parse_str("6a898cc3-1dd2-11b2-99a6-080020736631").unwrap();
        let part = Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap();
        let basic = Uuid::parse_str("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7").unwrap();
        let mut image = gpt_disk(4096, guid, &[(basic, part, 64, 127, "")]);
        // Even with a non-zero MBR signature the GUID takes priority.
        image[440..444].copy_from_slice(&0x12345678u32.to_le_bytes());

        let disk = disk_of(image);
        assert_eq!(
            disk_identity(&disk, 3),
            "DG{6a898cc3-1dd2-11b2-99a6-080020736631}"
        );
    }

    #[test]
    fn bare_disk_falls_back_to_ordinal() {
        let disk = disk_of(vec![0u8; 4096]);
        assert_eq!(disk_identity(&disk, 0), "DO0");
        assert_eq!(disk_identity(&disk, 7), "DO7");
    }

    #[test]
    fn zero_signature_does_not_count() {
        let disk = disk_of(mbr_disk(128, 0, &[(0x07, 8, 64)]));
        assert_eq!(disk_identity(&disk, 2), "DO2");
    }
}
