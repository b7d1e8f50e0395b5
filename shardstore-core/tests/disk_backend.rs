use std::io::{Read, Seek, SeekFrom, Write};

use shardstore_core::disk::{Disk, Part};
use shardstore_core::hash::Hasher;
use shardstore_core::id::{new_temp_filename, DataId, UploadId};
use shardstore_core::Error;

/// Deterministic byte stream; a fresh reader restarts the stream so repeat
/// calls see identical bytes.
struct DetReader {
    state: u64,
}

impl DetReader {
    fn new() -> DetReader {
        DetReader { state: 271828 }
    }
}

impl Read for DetReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        for b in out.iter_mut() {
            self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = self.state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            *b = (z ^ (z >> 31)) as u8;
        }
        Ok(out.len())
    }
}

fn det_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    DetReader::new().read_exact(&mut buf).unwrap();
    buf
}

fn new_disk(td: &tempfile::TempDir) -> Disk {
    Disk::new("d0", td.path()).unwrap()
}

/// Uploads the given parts (each a fresh deterministic stream) and publishes
/// them under a new data ID.
fn publish(disk: &Disk, parts: &[(&str, u64)]) -> DataId {
    let upload_id = UploadId::generate();
    disk.init_upload(&upload_id).unwrap();

    let mut disk_parts = Vec::new();
    for &(part_id, size) in parts {
        let temp = new_temp_filename();
        disk.save_temp_file(&temp, &mut DetReader::new(), size, true).unwrap();
        disk.upload_part(&upload_id, part_id, &temp).unwrap();
        disk_parts.push(Part { id: part_id.to_string(), size });
    }

    let data_id = DataId::generate();
    disk.complete_upload(&data_id, &upload_id, &disk_parts).unwrap();
    data_id
}

fn read_range(disk: &Disk, data_id: &DataId, offset: i64, length: u64) -> Vec<u8> {
    let mut out = Vec::new();
    disk.get(data_id, offset, length).unwrap().read_to_end(&mut out).unwrap();
    out
}

#[test]
fn disk_layout_is_created() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    assert_eq!(disk.id(), "d0");
    for sub in ["data", "tmp", "uploads", "trash"] {
        assert!(td.path().join(sub).is_dir(), "{sub}");
    }
}

#[test]
fn save_temp_file_returns_stream_digest() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let temp = new_temp_filename();
    let checksum = disk.save_temp_file(&temp, &mut DetReader::new(), 16279, true).unwrap();

    let mut hasher = Hasher::highway256(None).unwrap();
    hasher.update(&det_bytes(16279));
    assert_eq!(checksum, hasher.hex_sum());

    assert!(td.path().join("tmp").join(&temp).exists());
    assert!(td.path().join("tmp").join(format!("{temp}.checksum")).exists());
}

#[test]
fn second_remove_temp_file_fails() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let temp = new_temp_filename();
    disk.save_temp_file(&temp, &mut DetReader::new(), 4096, true).unwrap();

    disk.remove_temp_file(&temp, true).unwrap();
    assert!(disk.remove_temp_file(&temp, true).is_err());
}

#[test]
fn init_upload_is_exclusive() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let upload_id = UploadId::generate();
    disk.init_upload(&upload_id).unwrap();
    assert!(matches!(disk.init_upload(&upload_id), Err(Error::UploadIdAlreadyExist)));

    disk.revert_init_upload(&upload_id).unwrap();
    assert!(matches!(disk.revert_init_upload(&upload_id), Err(Error::UploadIdNotFound)));

    // A reverted init can be re-initialized.
    disk.init_upload(&upload_id).unwrap();
}

#[test]
fn upload_part_requires_init() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let temp = new_temp_filename();
    disk.save_temp_file(&temp, &mut DetReader::new(), 4096, true).unwrap();

    let upload_id = UploadId::generate();
    assert!(matches!(
        disk.upload_part(&upload_id, "1", &temp),
        Err(Error::UploadIdNotFound)
    ));

    disk.init_upload(&upload_id).unwrap();
    disk.upload_part(&upload_id, "1", &temp).unwrap();

    // The temp file moved, so a second promotion has nothing to rename.
    assert!(disk.upload_part(&upload_id, "1", &temp).is_err());
}

#[test]
fn revert_upload_part_restores_temp_file() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let temp = new_temp_filename();
    disk.save_temp_file(&temp, &mut DetReader::new(), 4096, true).unwrap();

    let upload_id = UploadId::generate();
    disk.init_upload(&upload_id).unwrap();
    disk.upload_part(&upload_id, "1", &temp).unwrap();
    assert!(!td.path().join("tmp").join(&temp).exists());

    disk.revert_upload_part(&upload_id, "1", &temp).unwrap();
    assert!(td.path().join("tmp").join(&temp).exists());
    assert!(td.path().join("tmp").join(format!("{temp}.checksum")).exists());

    assert!(matches!(
        disk.revert_upload_part(&upload_id, "1", &temp),
        Err(Error::PartNotFound)
    ));

    // Upload works again after the revert.
    disk.upload_part(&upload_id, "1", &temp).unwrap();
}

#[test]
fn abort_and_revert_abort() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let upload_id = UploadId::generate();
    disk.init_upload(&upload_id).unwrap();

    disk.abort_upload(&upload_id).unwrap();
    assert!(td.path().join("trash").join(upload_id.as_str()).exists());
    assert!(matches!(disk.abort_upload(&upload_id), Err(Error::UploadIdNotFound)));

    disk.revert_abort_upload(&upload_id).unwrap();
    assert!(td.path().join("uploads").join(upload_id.as_str()).exists());
    assert!(matches!(disk.revert_abort_upload(&upload_id), Err(Error::UploadIdNotFound)));
}

#[test]
fn complete_upload_publishes_manifest() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let data_id = publish(&disk, &[("3", 16279), ("8", 10992)]);

    let data_dir = td.path().join("data").join(data_id.as_str());
    assert!(data_dir.join("3.part").exists());
    assert!(data_dir.join("8.part.checksum").exists());

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(data_dir.join("data.json")).unwrap())
            .unwrap();
    assert_eq!(manifest["size"], 16279 + 10992);
    assert_eq!(manifest["parts"][0]["id"], "3");
    assert_eq!(manifest["parts"][1]["size"], 10992);
}

#[test]
fn complete_upload_state_errors() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let data_id = publish(&disk, &[("1", 4096)]);

    // Completing into an existing data ID fails.
    let upload_id = UploadId::generate();
    disk.init_upload(&upload_id).unwrap();
    assert!(matches!(
        disk.complete_upload(&data_id, &upload_id, &[]),
        Err(Error::DataIdAlreadyExist)
    ));

    // Completing an unknown upload fails.
    assert!(matches!(
        disk.complete_upload(&DataId::generate(), &UploadId::generate(), &[]),
        Err(Error::UploadIdNotFound)
    ));
}

#[test]
fn revert_complete_upload_unpublishes() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let upload_id = UploadId::generate();
    disk.init_upload(&upload_id).unwrap();
    let temp = new_temp_filename();
    disk.save_temp_file(&temp, &mut DetReader::new(), 4096, true).unwrap();
    disk.upload_part(&upload_id, "1", &temp).unwrap();

    let data_id = DataId::generate();
    let parts = [Part { id: "1".to_string(), size: 4096 }];
    disk.complete_upload(&data_id, &upload_id, &parts).unwrap();

    disk.revert_complete_upload(&data_id, &upload_id).unwrap();
    assert!(matches!(disk.get(&data_id, 0, 1), Err(Error::DataIdNotFound)));
    let upload_dir = td.path().join("uploads").join(upload_id.as_str());
    assert!(upload_dir.join("1.part").exists());
    assert!(!upload_dir.join("data.json").exists());

    assert!(matches!(
        disk.revert_complete_upload(&data_id, &upload_id),
        Err(Error::DataIdNotFound)
    ));

    // Completion works again after the revert.
    disk.complete_upload(&data_id, &upload_id, &parts).unwrap();
    assert_eq!(read_range(&disk, &data_id, 0, 4096), det_bytes(4096));
}

#[test]
fn get_reads_across_parts() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let parts: &[(&str, u64)] = &[("3", 16279), ("8", 10992), ("1", 25489)];
    let data_id = publish(&disk, parts);

    let mut expected = Vec::new();
    for &(_, size) in parts {
        expected.extend_from_slice(&det_bytes(size as usize));
    }

    for &(offset, length) in &[
        (0i64, 10u64),
        (10, 7),
        (0, 16279),
        (16279, 10992),
        (12958, 10992),
        (12958, 17343),
        (27271, 70),
        (0, 52760),
        (52759, 1),
        (0, 0),
    ] {
        let got = read_range(&disk, &data_id, offset, length);
        assert_eq!(
            got,
            &expected[offset as usize..offset as usize + length as usize],
            "window ({offset}, {length})"
        );
    }
}

#[test]
fn get_rejects_bad_windows() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);
    let data_id = publish(&disk, &[("1", 1000)]);

    assert!(matches!(disk.get(&data_id, 0, 1001), Err(Error::InsufficientData)));
    assert!(matches!(disk.get(&data_id, -2000, 1), Err(Error::InsufficientData)));
    assert!(matches!(disk.get(&DataId::generate(), 0, 1), Err(Error::DataIdNotFound)));

    // Negative offsets address from the end.
    assert_eq!(read_range(&disk, &data_id, -10, 10), det_bytes(1000)[990..]);
}

#[test]
fn bitrot_in_published_part_is_detected() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);
    let data_id = publish(&disk, &[("1", 16279)]);

    let part_file = td.path().join("data").join(data_id.as_str()).join("1.part");
    let mut f = std::fs::OpenOptions::new().read(true).write(true).open(&part_file).unwrap();
    f.seek(SeekFrom::Start(5000)).unwrap();
    let mut b = [0u8; 1];
    f.read_exact(&mut b).unwrap();
    f.seek(SeekFrom::Start(5000)).unwrap();
    f.write_all(&[b[0] ^ 0x80]).unwrap();
    drop(f);

    let mut out = Vec::new();
    let err = disk
        .get(&data_id, 0, 16279)
        .unwrap()
        .read_to_end(&mut out)
        .unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"), "{err}");
}

#[test]
fn clear_trash_empties_trash_only() {
    let td = tempfile::tempdir().unwrap();
    let disk = new_disk(&td);

    let upload_id = UploadId::generate();
    disk.init_upload(&upload_id).unwrap();
    disk.abort_upload(&upload_id).unwrap();
    assert!(td.path().join("trash").join(upload_id.as_str()).exists());

    let data_id = publish(&disk, &[("1", 4096)]);

    disk.clear_trash().unwrap();
    assert!(!td.path().join("trash").join(upload_id.as_str()).exists());
    assert_eq!(read_range(&disk, &data_id, 0, 4096), det_bytes(4096));

    // The aborted upload is gone for good.
    assert!(matches!(disk.revert_abort_upload(&upload_id), Err(Error::UploadIdNotFound)));
}
