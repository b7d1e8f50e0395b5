//! Quorum-replicated fan-out over a set of shard disks.
//!
//! Every operation runs against all disks in parallel and succeeds iff at
//! least `min_success` per-disk calls succeed; on a failed quorum the paired
//! revert operation runs against the disks that did succeed, so an
//! orchestrator can treat each call as all-or-nothing.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::disk::{self, Disk};
use crate::encode;
use crate::error::{Error, MultiError, Result};
use crate::id::{DataId, UploadId};
use crate::pipe;
use crate::range_reader::{DataRangeReader, SharedShardReaderFn};
use crate::stripe::StripeInfo;

/// One logical part of a multipart upload, carrying its own codec
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripePart {
    #[serde(flatten)]
    pub info: StripeInfo,
    pub id: String,
}

/// Manifest of a published object across the shard-disk set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInfo {
    pub parts: Vec<StripePart>,
    pub size: u64,
}

pub struct ErasureGroup {
    shard_disks: Vec<Disk>,
    min_success: u64,
}

impl ErasureGroup {
    /// `min_success` bounds every fan-out; the trade-off between strict
    /// (`shard_disks.len()`) and required (`data_count`) quorums is left to
    /// the caller.
    pub fn new(shard_disks: Vec<Disk>, min_success: u64) -> ErasureGroup {
        ErasureGroup { shard_disks, min_success }
    }

    pub fn disks(&self) -> &[Disk] {
        &self.shard_disks
    }

    fn fan_out<F>(&self, op: F) -> Vec<Option<Error>>
    where
        F: Fn(&Disk) -> Result<()> + Sync,
    {
        self.shard_disks.par_iter().map(|disk| op(disk).err()).collect()
    }

    fn success_count(errs: &[Option<Error>]) -> u64 {
        errs.iter().filter(|e| e.is_none()).count() as u64
    }

    /// Runs `op` on every disk; on a failed quorum runs `revert` on every
    /// disk whose `op` succeeded before reporting the per-slot errors.
    fn quorum_op<F, R>(&self, name: &'static str, op: F, revert: R) -> Result<()>
    where
        F: Fn(&Disk) -> Result<()> + Sync,
        R: Fn(&Disk) -> Result<()> + Sync,
    {
        let errs = self.fan_out(op);
        if Self::success_count(&errs) >= self.min_success {
            return Ok(());
        }

        warn!(op = name, required = self.min_success, "quorum failed; reverting");

        self.shard_disks
            .par_iter()
            .zip(errs.par_iter())
            .filter(|(_, err)| err.is_none())
            .for_each(|(disk, _)| {
                let _ = revert(disk);
            });

        Err(Error::WriteQuorum(MultiError::new(name, &errs)))
    }

    /// Streaming erasure-coded write of one part into `tmp/` on every disk.
    ///
    /// `info.shard_ids` is populated from the group's disks. After the
    /// stream ends, every disk's whole-file digest is compared against the
    /// digest of the shards the encoder handed that disk; a disagreement
    /// means the bytes were damaged between RAM and disk, and that temp
    /// file is evicted. Fails unless `min_success` verified copies remain.
    /// Returns the whole-data hex digest.
    pub fn save_temp_file(
        &self,
        filename: &str,
        data: &mut dyn Read,
        bitrot_protection: bool,
        info: &mut StripeInfo,
    ) -> Result<String> {
        let count = info.shard_count();
        if count != self.shard_disks.len() as u64 {
            return Err(Error::InvalidShardCount);
        }

        let mut shard_id_map = HashMap::new();
        info.shard_ids = Vec::with_capacity(count as usize);
        for (i, disk) in self.shard_disks.iter().enumerate() {
            info.shard_ids.push(disk.id().to_string());
            shard_id_map.insert(disk.id().to_string(), i);
        }
        let shard_id_map = Mutex::new(shard_id_map);

        let shard_file_size = info.shard_file_size();

        let mut writer_slots = Vec::with_capacity(count as usize);
        let mut reader_ends = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (writer, reader) = pipe::pipe();
            writer_slots.push(Some(writer));
            reader_ends.push(reader);
        }
        let writer_slots = Mutex::new(writer_slots);

        let (encode_result, disk_sums) = thread::scope(|scope| {
            let handles: Vec<_> = self
                .shard_disks
                .iter()
                .zip(reader_ends)
                .map(|(disk, mut reader)| {
                    scope.spawn(move || {
                        disk.save_temp_file(filename, &mut reader, shard_file_size, bitrot_protection)
                    })
                })
                .collect();

            let get_shard_writer = |shard_id: &str| -> Result<Box<dyn std::io::Write + Send>> {
                let i = {
                    let map = shard_id_map.lock().expect("shard id map");
                    map[shard_id]
                };
                let writer = writer_slots.lock().expect("writer slots")[i]
                    .take()
                    .expect("shard writer taken once");
                Ok(Box::new(writer))
            };

            let mut shards: Vec<Vec<u8>> =
                (0..count).map(|_| vec![0u8; info.shard_size as usize]).collect();

            let encode_result =
                encode::write(&get_shard_writer, &mut shards, info, data, self.min_success);

            // Close any remaining pipes so the per-disk tasks observe EOF.
            drop(writer_slots);

            let disk_sums: Vec<Result<String>> =
                handles.into_iter().map(|h| h.join().expect("shard writer task")).collect();

            (encode_result, disk_sums)
        });

        let (shard_sums, data_sum) = encode_result?;

        let mut slots: Vec<Option<String>> = vec![None; count as usize];
        let mut success_count = count;
        for i in 0..count as usize {
            let verified = match &disk_sums[i] {
                Ok(sum) => !shard_sums[i].is_empty() && shard_sums[i] == *sum,
                Err(_) => false,
            };
            if verified {
                continue;
            }

            warn!(disk = self.shard_disks[i].id(), "shard digest mismatch; evicting temp file");
            let _ = self.shard_disks[i].remove_temp_file(filename, bitrot_protection);
            slots[i] = Some(match &disk_sums[i] {
                Ok(sum) => format!("checksum mismatch; expected: {}, got: {}", shard_sums[i], sum),
                Err(err) => err.to_string(),
            });
            success_count -= 1;
        }

        if success_count < self.min_success {
            return Err(Error::WriteQuorum(MultiError::from_messages("shard checksum", slots)));
        }

        Ok(data_sum)
    }

    pub fn remove_temp_file(&self, filename: &str, bitrot_protection: bool) -> Result<()> {
        let errs = self.fan_out(|disk| disk.remove_temp_file(filename, bitrot_protection));
        if Self::success_count(&errs) < self.min_success {
            return Err(Error::WriteQuorum(MultiError::new("remove temp file", &errs)));
        }

        Ok(())
    }

    pub fn init_upload(&self, upload_id: &UploadId) -> Result<()> {
        self.quorum_op(
            "init upload",
            |disk| disk.init_upload(upload_id),
            |disk| disk.revert_init_upload(upload_id),
        )
    }

    pub fn upload_part(&self, upload_id: &UploadId, part_id: &str, temp_file: &str) -> Result<()> {
        self.quorum_op(
            "upload part",
            |disk| disk.upload_part(upload_id, part_id, temp_file),
            |disk| disk.revert_upload_part(upload_id, part_id, temp_file),
        )
    }

    pub fn abort_upload(&self, upload_id: &UploadId) -> Result<()> {
        self.quorum_op(
            "abort upload",
            |disk| disk.abort_upload(upload_id),
            |disk| disk.revert_abort_upload(upload_id),
        )
    }

    /// Publishes the upload under `data_id`. All parts must reside on this
    /// group's disks (in any order); the per-disk manifest records each
    /// part's physical shard-file size.
    pub fn complete_upload(
        &self,
        data_id: &DataId,
        upload_id: &UploadId,
        parts: &[StripePart],
    ) -> Result<DataInfo> {
        for part in parts {
            if part.info.shard_ids.len() != self.shard_disks.len()
                || !part
                    .info
                    .shard_ids
                    .iter()
                    .all(|id| self.shard_disks.iter().any(|disk| disk.id() == id))
            {
                return Err(Error::ShardDiskMismatch);
            }
        }

        let disk_parts: Vec<disk::Part> = parts
            .iter()
            .map(|part| disk::Part { id: part.id.clone(), size: part.info.shard_file_size() })
            .collect();
        let size = parts.iter().map(|part| part.info.size).sum();

        self.quorum_op(
            "complete upload",
            |disk| disk.complete_upload(data_id, upload_id, &disk_parts),
            |disk| disk.revert_complete_upload(data_id, upload_id),
        )?;

        Ok(DataInfo { parts: parts.to_vec(), size })
    }

    /// Opens a `(offset, length)` window over the published object,
    /// reconstructing from parity wherever shard disks fail.
    pub fn get(
        &self,
        data_id: &DataId,
        data_info: &DataInfo,
        offset: i64,
        length: u64,
    ) -> Result<Box<dyn Read + Send + '_>> {
        let mut shard_id_map = HashMap::new();
        for (i, disk) in self.shard_disks.iter().enumerate() {
            shard_id_map.insert(disk.id().to_string(), i);
        }
        let shard_id_map = Mutex::new(shard_id_map);

        let disks = &self.shard_disks;
        let data_id = data_id.clone();
        let get_shard_reader: SharedShardReaderFn<'_> =
            Arc::new(move |shard_id: &str, offset: i64, length: u64| {
                let i = {
                    let map = shard_id_map.lock().expect("shard id map");
                    *map.get(shard_id).ok_or(Error::ShardDiskMismatch)?
                };
                disks[i].get(&data_id, offset, length)
            });

        Ok(Box::new(DataRangeReader::new(get_shard_reader, data_info, offset, length)?))
    }

    /// Fan-out of [`Disk::clear_trash`] across the group.
    pub fn clear_trash(&self) -> Result<()> {
        let errs = self.fan_out(|disk| disk.clear_trash());
        if Self::success_count(&errs) < self.min_success {
            return Err(Error::WriteQuorum(MultiError::new("clear trash", &errs)));
        }

        Ok(())
    }
}
