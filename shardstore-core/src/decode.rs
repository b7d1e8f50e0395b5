//! Streaming Reed-Solomon stripe decoder with on-the-fly reconstruction.

use std::io::{self, Read};

use rayon::prelude::*;

use crate::boundary;
use crate::error::{Error, MultiError, Result};
use crate::rs_codec::RsCodec;
use crate::stripe::{self, StripeInfo};

/// Supplies a reader over one shard file, looked up by shard ID, limited to
/// `(offset, length)` in shard-file coordinates. Called lazily: at most
/// `data_count` shards are opened up front, more only after read failures.
pub type ShardReaderFn<'a> =
    Box<dyn Fn(&str, i64, u64) -> Result<Box<dyn Read + Send>> + Send + Sync + 'a>;

/// Reads a `(offset, length)` window of the logical data of one
/// erasure-coded part, yielding exactly `length` bytes before EOF.
///
/// Every block is read as `data_count` full shards from the currently open
/// readers; when a data shard is unavailable it is rebuilt from parity. A
/// reader that fails is dropped and a replacement opened, up to
/// `data_count + parity_count` in total, after which the read fails with a
/// per-slot aggregate error.
pub struct Reader<'a> {
    get_shard_reader: ShardReaderFn<'a>,
    info: StripeInfo,
    codec: RsCodec,

    shard_size: u64,
    last_shard_size: u64,
    blocks_to_read: u64,
    bytes_to_skip_in_first_block: u64,
    bytes_to_read_in_last_block: u64,
    block_offset: i64,
    block_length: i64,

    readers: Vec<Option<Box<dyn Read + Send>>>,
    errs: Vec<Option<String>>,
    opened: usize,
    shards: Vec<Option<Vec<u8>>>,

    index: u64,
    ranges: Vec<(usize, usize)>,
    shard_index: usize,
    byte_index: usize,
    bytes_available: u64,
    pending_err: Option<Error>,
}

impl<'a> Reader<'a> {
    /// Panics when `info.shard_ids` disagrees with the shard counts or holds
    /// duplicates; those are caller bugs. A window that does not fit in
    /// `info.size` fails with [`Error::InsufficientData`]. A negative offset
    /// addresses from the end of the data.
    pub fn new(
        get_shard_reader: ShardReaderFn<'a>,
        info: &StripeInfo,
        offset: i64,
        length: u64,
    ) -> Result<Reader<'a>> {
        let count = info.shard_count() as usize;

        assert_eq!(info.shard_ids.len(), count, "len(shard_ids) != data_count+parity_count");
        let dups = stripe::duplicates(&info.shard_ids);
        assert!(dups.is_empty(), "duplicate IDs {dups:?} found in shard_ids");

        let codec = RsCodec::new(info.data_count, info.parity_count)?;

        let mut offset = offset;
        if offset < 0 {
            offset += info.size as i64;
        }
        if offset < 0 {
            return Err(Error::InsufficientData);
        }
        if offset as u64 + length > info.size {
            return Err(Error::InsufficientData);
        }

        let layout = info.compute();
        let mut last_shard_size = layout.last_shard_size;

        let (blocks_to_skip, blocks_to_read, bytes_to_skip_in_first_block, bytes_to_read_in_last_block, _) =
            boundary::calc_boundaries(
                info.size as i64,
                layout.block_size as i64,
                layout.block_count as i64,
                offset,
                length as i64,
            );

        // The trailing stripe is short only when the window actually reaches
        // the final block of the part.
        if (blocks_to_skip + blocks_to_read) as u64 != layout.block_count {
            last_shard_size = info.shard_size;
        }

        Ok(Reader {
            get_shard_reader,
            info: info.clone(),
            codec,
            shard_size: info.shard_size,
            last_shard_size,
            blocks_to_read: blocks_to_read as u64,
            bytes_to_skip_in_first_block: bytes_to_skip_in_first_block as u64,
            bytes_to_read_in_last_block: bytes_to_read_in_last_block as u64,
            block_offset: blocks_to_skip * info.shard_size as i64,
            block_length: last_shard_size as i64 + (blocks_to_read - 1) * info.shard_size as i64,
            readers: (0..count).map(|_| None).collect(),
            errs: vec![None; count],
            opened: 0,
            shards: vec![None; count],
            index: 0,
            ranges: Vec::new(),
            shard_index: 0,
            byte_index: 0,
            bytes_available: 0,
            pending_err: None,
        })
    }

    /// Opens readers for the next `needed` shard slots, slot order, data
    /// shards first. Keeps opening until that many succeeded or every slot
    /// has been tried.
    fn populate(&mut self, mut needed: u64) -> Result<()> {
        while needed > 0 {
            if self.opened == self.readers.len() {
                return Err(Error::ReadQuorum(MultiError::from_messages(
                    "get shard reader",
                    self.errs.clone(),
                )));
            }

            let start = self.opened;
            let end = (start + needed as usize).min(self.readers.len());
            let offset = self.block_offset;
            let length = self.block_length.max(0) as u64;

            let get = &self.get_shard_reader;
            let results: Vec<Result<Box<dyn Read + Send>>> = self.info.shard_ids[start..end]
                .par_iter()
                .map(|id| get(id, offset, length))
                .collect();

            let mut successes = 0u64;
            for (i, result) in results.into_iter().enumerate() {
                match result {
                    Ok(reader) => {
                        self.readers[start + i] = Some(reader);
                        successes += 1;
                    }
                    Err(err) => self.errs[start + i] = Some(err.to_string()),
                }
            }

            self.opened = end;
            needed -= needed.min(successes);
        }

        Ok(())
    }

    /// Reads one full shard of the current block from every live, not yet
    /// read slot in `[from..opened)`. Failed slots drop their reader.
    fn read_shards(&mut self, from: usize, shard_len: usize) {
        let opened = self.opened;
        self.readers[from..opened]
            .par_iter_mut()
            .zip(self.shards[from..opened].par_iter_mut())
            .zip(self.errs[from..opened].par_iter_mut())
            .for_each(|((reader, shard), err)| {
                let Some(r) = reader.as_mut() else {
                    return;
                };
                if shard.is_some() {
                    return;
                }

                let mut buf = vec![0u8; shard_len];
                match r.read_exact(&mut buf) {
                    Ok(()) => *shard = Some(buf),
                    Err(e) => {
                        *reader = None;
                        *err = Some(e.to_string());
                    }
                }
            });
    }

    fn read_block(&mut self) -> Result<bool> {
        if self.index == self.blocks_to_read {
            return Ok(false);
        }

        let shard_len = if self.index == self.blocks_to_read - 1 {
            self.last_shard_size as usize
        } else {
            self.shard_size as usize
        };

        for shard in self.shards.iter_mut() {
            *shard = None;
        }

        if self.opened == 0 {
            self.populate(self.info.data_count)?;
        }

        let mut from = 0;
        loop {
            self.read_shards(from, shard_len);

            let present = self.shards.iter().filter(|s| s.is_some()).count() as u64;
            if present >= self.info.data_count {
                break;
            }

            from = self.opened;
            self.populate(self.info.data_count - present)?;
        }

        self.block_offset += self.shard_size as i64;
        self.block_length -= self.shard_size as i64;

        let data_count = self.info.data_count as usize;
        if self.shards[..data_count].iter().any(|s| s.is_none()) {
            self.codec.reconstruct_data(&mut self.shards)?;
        }

        // Valid byte window per data shard for this block.
        let mut ranges = vec![(0usize, shard_len); data_count];
        let mut bytes_available = data_count as u64 * shard_len as u64;

        if self.index == 0 && self.bytes_to_skip_in_first_block > 0 {
            let mut skip = self.bytes_to_skip_in_first_block;
            bytes_available -= skip;
            for range in ranges.iter_mut() {
                let avail = (range.1 - range.0) as u64;
                if skip >= avail {
                    range.0 = range.1;
                    skip -= avail;
                } else {
                    range.0 += skip as usize;
                    break;
                }
            }
        }

        if self.index == self.blocks_to_read - 1 {
            let mut take = self.bytes_to_read_in_last_block;
            bytes_available = take;
            for range in ranges.iter_mut() {
                let avail = (range.1 - range.0) as u64;
                if take >= avail {
                    take -= avail;
                } else {
                    range.1 = range.0 + take as usize;
                    take = 0;
                }
            }
        }

        self.ranges = ranges;
        self.shard_index = 0;
        self.byte_index = 0;
        self.bytes_available = bytes_available;
        self.index += 1;

        Ok(true)
    }
}

impl Read for Reader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.pending_err.take() {
            return Err(err.into());
        }

        let mut n = 0;
        while n < out.len() {
            if self.bytes_available == 0 {
                match self.read_block() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        if n == 0 {
                            return Err(err.into());
                        }
                        self.pending_err = Some(err);
                        break;
                    }
                }
            }

            let (start, end) = self.ranges[self.shard_index];
            if start + self.byte_index == end {
                self.shard_index += 1;
                self.byte_index = 0;
                continue;
            }

            let shard = self.shards[self.shard_index].as_ref().expect("data shard present");
            let from = start + self.byte_index;
            let take = (end - from).min(out.len() - n);
            out[n..n + take].copy_from_slice(&shard[from..from + take]);

            self.byte_index += take;
            self.bytes_available -= take as u64;
            n += take;
        }

        Ok(n)
    }
}
