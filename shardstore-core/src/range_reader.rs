//! Stripe-aware range reader over a multi-part object.
//!
//! Each shard file holds the concatenation of every part's shard
//! contribution, not the logical data, so the reader tracks the physical
//! prefix (`shard_parts_size`) at which the current part begins inside each
//! shard file and adds it to every shard read.

use std::io::{self, Read};
use std::sync::Arc;

use crate::boundary;
use crate::decode;
use crate::error::{Error, Result};
use crate::group::{DataInfo, StripePart};

/// Shared shard lookup used by every per-part decoder; cloning the `Arc`
/// lets each part add its own physical prefix without re-capturing state.
pub type SharedShardReaderFn<'a> =
    Arc<dyn Fn(&str, i64, u64) -> Result<Box<dyn Read + Send>> + Send + Sync + 'a>;

/// One continuous sequential read over `(offset, length)` of a multi-part
/// object: walks the required parts, opens per-part stripe decoders lazily
/// and surfaces EOF only after the last part is drained.
pub struct DataRangeReader<'a> {
    get_shard_reader: SharedShardReaderFn<'a>,
    parts: Vec<StripePart>,
    index: usize,
    bytes_to_skip: i64,
    bytes_to_read: i64,
    shard_parts_size: u64,
    current: Option<decode::Reader<'a>>,
}

impl<'a> DataRangeReader<'a> {
    /// A negative offset addresses from the end of the data; windows outside
    /// the data fail with [`Error::InsufficientData`].
    pub fn new(
        get_shard_reader: SharedShardReaderFn<'a>,
        data_info: &DataInfo,
        offset: i64,
        length: u64,
    ) -> Result<DataRangeReader<'a>> {
        let size = data_info.size as i64;

        let mut offset = offset;
        if offset < 0 {
            offset += size;
        }
        if offset < 0 || offset + length as i64 > size {
            return Err(Error::InsufficientData);
        }

        if length == 0 {
            return Ok(DataRangeReader {
                get_shard_reader,
                parts: Vec::new(),
                index: 0,
                bytes_to_skip: 0,
                bytes_to_read: 0,
                shard_parts_size: 0,
                current: None,
            });
        }

        let part_sizes: Vec<i64> = data_info.parts.iter().map(|p| p.info.size as i64).collect();
        let (start_part, end_part, bytes_to_skip, bytes_to_read) =
            boundary::calc_part_boundaries(&part_sizes, offset, length as i64);

        // Physical on-disk offset within each shard file at which the first
        // required part begins.
        let mut shard_parts_size = 0u64;
        for part in &data_info.parts[..start_part as usize] {
            shard_parts_size += part.info.shard_file_size();
        }

        Ok(DataRangeReader {
            get_shard_reader,
            parts: data_info.parts[start_part as usize..end_part as usize].to_vec(),
            index: 0,
            bytes_to_skip,
            bytes_to_read,
            shard_parts_size,
            current: None,
        })
    }

    fn open_next(&mut self) -> Result<()> {
        let part = &self.parts[self.index];

        let mut offset = 0i64;
        if self.index == 0 {
            offset = self.bytes_to_skip;
        }

        let mut length = part.info.size - offset as u64;
        if self.index == self.parts.len() - 1 {
            length = self.bytes_to_read as u64;
        }

        let prefix = self.shard_parts_size as i64;
        let outer = Arc::clone(&self.get_shard_reader);
        let get: decode::ShardReaderFn<'a> =
            Box::new(move |shard_id, off, len| outer(shard_id, prefix + off, len));

        let reader = decode::Reader::new(get, &part.info, offset, length)?;

        self.shard_parts_size += part.info.shard_file_size();
        self.index += 1;
        self.current = Some(reader);

        Ok(())
    }
}

impl Read for DataRangeReader<'_> {
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

            let n = self.current.as_mut().expect("part decoder open").read(out)?;
            if n > 0 {
                return Ok(n);
            }

            // Part drained; advance to the next one.
            self.current = None;
        }
    }
}
