//! Per-disk storage backend.
//!
//! Layout under the store directory:
//!
//! ```text
//! data/<DataId>/{<PartId>.part, <PartId>.part.checksum, data.json}
//! tmp/<TempFilename>{, .checksum}
//! uploads/<UploadId>/<PartId>.part{, .checksum}
//! trash/...
//! ```
//!
//! Every mutation publishes through an atomic rename so readers observe
//! either the pre-mutation or the fully-published layout, never a partial
//! one. `trash/` only holds entries awaiting asynchronous cleanup and is
//! never read by the data path.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::boundary;
use crate::checksum_file;
use crate::error::{Error, Result};
use crate::id::{DataId, UploadId};

/// One part of a published object as stored on this disk; `size` is the
/// physical shard-file size, not the logical part length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub id: String,
    pub size: u64,
}

/// Manifest of a published object on this disk, persisted as `data.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInfo {
    pub parts: Vec<Part>,
    pub size: u64,
}

pub struct Disk {
    id: String,
    store_dir: PathBuf,
    data_dir: PathBuf,
    tmp_dir: PathBuf,
    uploads_dir: PathBuf,
    trash_dir: PathBuf,
}

impl Disk {
    /// Validates the store directory with a short write probe and creates
    /// the four working subdirectories.
    pub fn new(id: &str, dir: &Path) -> Result<Disk> {
        let store_dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };

        let probe = store_dir.join(".isWritable");
        File::create(&probe)?;
        fs::remove_file(&probe)?;

        let data_dir = store_dir.join("data");
        let tmp_dir = store_dir.join("tmp");
        let uploads_dir = store_dir.join("uploads");
        let trash_dir = store_dir.join("trash");
        for dir in [&data_dir, &tmp_dir, &uploads_dir, &trash_dir] {
            match fs::create_dir(dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        }

        debug!(disk = id, dir = %store_dir.display(), "disk ready");

        Ok(Disk { id: id.to_string(), store_dir, data_dir, tmp_dir, uploads_dir, trash_dir })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Writes `size` bytes from `data` into `tmp/<filename>`, returning the
    /// whole-file hex digest.
    pub fn save_temp_file(
        &self,
        filename: &str,
        data: &mut dyn Read,
        size: u64,
        bitrot_protection: bool,
    ) -> Result<String> {
        checksum_file::write_file(&self.tmp_dir.join(filename), data, size, bitrot_protection)
    }

    pub fn remove_temp_file(&self, filename: &str, bitrot_protection: bool) -> Result<()> {
        checksum_file::remove_file(&self.tmp_dir.join(filename), bitrot_protection)
    }

    pub fn init_upload(&self, upload_id: &UploadId) -> Result<()> {
        match fs::create_dir(self.uploads_dir.join(upload_id.as_str())) {
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::UploadIdAlreadyExist)
            }
            result => Ok(result?),
        }
    }

    pub fn revert_init_upload(&self, upload_id: &UploadId) -> Result<()> {
        match fs::remove_dir(self.uploads_dir.join(upload_id.as_str())) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::UploadIdNotFound),
            result => Ok(result?),
        }
    }

    /// Promotes `tmp/<temp_file>` into the upload as `<part_id>.part`.
    pub fn upload_part(&self, upload_id: &UploadId, part_id: &str, temp_file: &str) -> Result<()> {
        let upload_dir = self.uploads_dir.join(upload_id.as_str());
        if !upload_dir.exists() {
            return Err(Error::UploadIdNotFound);
        }

        let src = self.tmp_dir.join(temp_file);
        let dest = upload_dir.join(format!("{part_id}.part"));
        checksum_file::rename_file(&src, &dest, true)
    }

    pub fn revert_upload_part(
        &self,
        upload_id: &UploadId,
        part_id: &str,
        temp_file: &str,
    ) -> Result<()> {
        let upload_dir = self.uploads_dir.join(upload_id.as_str());
        if !upload_dir.exists() {
            return Err(Error::UploadIdNotFound);
        }

        let part_file = upload_dir.join(format!("{part_id}.part"));
        let dest = self.tmp_dir.join(temp_file);
        match checksum_file::rename_file(&part_file, &dest, true) {
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                Err(Error::PartNotFound)
            }
            result => result,
        }
    }

    pub fn abort_upload(&self, upload_id: &UploadId) -> Result<()> {
        let upload_dir = self.uploads_dir.join(upload_id.as_str());
        let trash_dir = self.trash_dir.join(upload_id.as_str());
        match fs::rename(&upload_dir, &trash_dir) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::UploadIdNotFound),
            result => Ok(result?),
        }
    }

    pub fn revert_abort_upload(&self, upload_id: &UploadId) -> Result<()> {
        let trash_dir = self.trash_dir.join(upload_id.as_str());
        let upload_dir = self.uploads_dir.join(upload_id.as_str());
        match fs::rename(&trash_dir, &upload_dir) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::UploadIdNotFound),
            result => Ok(result?),
        }
    }

    /// Writes the manifest into the upload directory and atomically renames
    /// the whole directory into `data/`, publishing the object.
    pub fn complete_upload(
        &self,
        data_id: &DataId,
        upload_id: &UploadId,
        parts: &[Part],
    ) -> Result<()> {
        let upload_dir = self.uploads_dir.join(upload_id.as_str());
        if !upload_dir.exists() {
            return Err(Error::UploadIdNotFound);
        }

        let data_dir = self.data_dir.join(data_id.as_str());
        if data_dir.exists() {
            return Err(Error::DataIdAlreadyExist);
        }

        let data_info =
            DataInfo { parts: parts.to_vec(), size: parts.iter().map(|p| p.size).sum() };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(upload_dir.join("data.json"))?;
        serde_json::to_writer(&mut file, &data_info)?;
        file.write_all(b"\n")?;
        drop(file);

        fs::rename(&upload_dir, &data_dir)?;
        debug!(disk = %self.id, data_id = %data_id, "upload published");

        Ok(())
    }

    pub fn revert_complete_upload(&self, data_id: &DataId, upload_id: &UploadId) -> Result<()> {
        let data_dir = self.data_dir.join(data_id.as_str());
        let upload_dir = self.uploads_dir.join(upload_id.as_str());
        match fs::rename(&data_dir, &upload_dir) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(Error::DataIdNotFound),
            result => result?,
        }

        let _ = fs::remove_file(upload_dir.join("data.json"));

        Ok(())
    }

    /// Opens a `(offset, length)` window over the published object's shard
    /// data on this disk.
    pub fn get(&self, data_id: &DataId, offset: i64, length: u64) -> Result<Box<dyn Read + Send>> {
        let data_dir = self.data_dir.join(data_id.as_str());
        if !data_dir.exists() {
            return Err(Error::DataIdNotFound);
        }

        let file = File::open(data_dir.join("data.json"))?;
        let data_info: DataInfo = serde_json::from_reader(file)?;

        DataReader::new(data_dir, data_info, offset, length)
    }

    /// Deletes everything awaiting cleanup under `trash/`.
    pub fn clear_trash(&self) -> Result<()> {
        for entry in fs::read_dir(&self.trash_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }

        Ok(())
    }
}

/// Sequential reader over the parts of one published object, opening one
/// verified part reader at a time.
struct DataReader {
    data_dir: PathBuf,
    parts: Vec<Part>,
    index: usize,
    bytes_to_skip: i64,
    bytes_to_read: i64,
    current: Option<Box<dyn Read + Send>>,
}

impl DataReader {
    fn new(data_dir: PathBuf, data_info: DataInfo, offset: i64, length: u64) -> Result<Box<dyn Read + Send>> {
        let size = data_info.size as i64;

        let mut offset = offset;
        if offset < 0 {
            offset += size;
        }
        if offset < 0 || offset + length as i64 > size {
            return Err(Error::InsufficientData);
        }

        if length == 0 {
            return Ok(Box::new(DataReader {
                data_dir,
                parts: Vec::new(),
                index: 0,
                bytes_to_skip: 0,
                bytes_to_read: 0,
                current: None,
            }));
        }

        let part_sizes: Vec<i64> = data_info.parts.iter().map(|p| p.size as i64).collect();
        let (start_part, end_part, bytes_to_skip, bytes_to_read) =
            boundary::calc_part_boundaries(&part_sizes, offset, length as i64);

        Ok(Box::new(DataReader {
            data_dir,
            parts: data_info.parts[start_part as usize..end_part as usize].to_vec(),
            index: 0,
            bytes_to_skip,
            bytes_to_read,
            current: None,
        }))
    }

    fn open_next(&mut self) -> Result<()> {
        let part = &self.parts[self.index];
        let filename = self.data_dir.join(format!("{}.part", part.id));

        let mut offset = 0i64;
        if self.index == 0 {
            offset = self.bytes_to_skip;
        }

        let mut length = part.size - offset as u64;
        if self.index == self.parts.len() - 1 {
            length = self.bytes_to_read as u64;
        }

        self.current = Some(checksum_file::open_file(&filename, offset, length, true)?);
        self.index += 1;

        Ok(())
    }
}

impl Read for DataReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        loop {
            if self.current.is_none() {
                if self.index == self.parts.len() {
                    return Ok(0);
                }
                self.open_next().map_err(io::Error::from)?;
            }

            let n = self.current.as_mut().expect("part reader open").read(out)?;
            if n > 0 {
                return Ok(n);
            }

            // Part drained; advance to the next one.
            self.current = None;
        }
    }
}
