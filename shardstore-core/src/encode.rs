//! Streaming Reed-Solomon stripe encoder.

use std::io::{Read, Write};

use rayon::prelude::*;

use crate::error::{Error, MultiError, Result};
use crate::hash::Hasher;
use crate::rs_codec::RsCodec;
use crate::stripe::{self, StripeInfo};

/// Supplies the writer backing one shard, looked up by shard ID. Called
/// concurrently, once per shard, before the first stripe is encoded.
pub type GetShardWriter<'a> = dyn Fn(&str) -> Result<Box<dyn Write + Send>> + Send + Sync + 'a;

/// Reads blocks of `info.data_count * info.shard_size` bytes from `reader`,
/// erasure encodes each block and fans the resulting shards out to the
/// per-shard writers. A writer that fails is dropped for the remainder of
/// the stream; the call fails once fewer than `min_success_writers` remain.
///
/// Returns the per-shard hex digests (empty string for dropped slots) and
/// the digest of the whole data stream. The data digest covers exactly
/// `info.size` logical bytes; zero padding of the trailing stripe is not
/// hashed.
///
/// Panics when the shard buffers or shard IDs disagree with `info`; those
/// are caller bugs.
pub fn write(
    get_shard_writer: &GetShardWriter<'_>,
    shards: &mut [Vec<u8>],
    info: &StripeInfo,
    reader: &mut dyn Read,
    min_success_writers: u64,
) -> Result<(Vec<String>, String)> {
    let count = info.shard_count() as usize;

    assert_eq!(shards.len(), count, "len(shards) != data_count+parity_count");
    for (i, shard) in shards.iter().enumerate() {
        assert_eq!(shard.len() as u64, info.shard_size, "len(shards[{i}]) != shard_size");
    }
    assert_eq!(info.shard_ids.len(), count, "len(shard_ids) != data_count+parity_count");
    let dups = stripe::duplicates(&info.shard_ids);
    assert!(dups.is_empty(), "duplicate IDs {dups:?} found in shard_ids");

    let codec = RsCodec::new(info.data_count, info.parity_count)?;
    let layout = info.compute();

    // Acquire all writers up front, concurrently.
    let acquired: Vec<Result<Box<dyn Write + Send>>> =
        info.shard_ids.par_iter().map(|id| get_shard_writer(id)).collect();

    let mut writers: Vec<Option<Box<dyn Write + Send>>> = Vec::with_capacity(count);
    let mut errs: Vec<Option<Error>> = Vec::with_capacity(count);
    for result in acquired {
        match result {
            Ok(writer) => {
                writers.push(Some(writer));
                errs.push(None);
            }
            Err(err) => {
                writers.push(None);
                errs.push(Some(err));
            }
        }
    }

    let success_count = writers.iter().filter(|w| w.is_some()).count() as u64;
    if success_count < min_success_writers {
        return Err(Error::WriteQuorum(MultiError::new("get shard writer", &errs)));
    }

    let mut data_hasher = Hasher::highway256(None)?;
    let mut shard_hashers: Vec<Option<Hasher>> = Vec::with_capacity(count);
    for _ in 0..count {
        shard_hashers.push(Some(Hasher::highway256(None)?));
    }

    let mut block_size = layout.block_size;
    let mut shard_size = info.shard_size;

    for block in 0..layout.block_count {
        if block == layout.block_count - 1 {
            block_size = layout.last_block_size;

            if shard_size != layout.last_shard_size {
                shard_size = layout.last_shard_size;
                for shard in shards.iter_mut() {
                    shard.truncate(shard_size as usize);
                }
            }
        }

        read_data_shards(reader, shards, info.data_count as usize, block_size, &mut data_hasher)?;

        codec.encode(shards)?;
        if !codec.verify(shards)? {
            return Err(Error::EncodeVerifyFailed);
        }

        // Fan the stripe out to every still-live writer. A failing slot is
        // cleared and excluded from all subsequent stripes.
        writers
            .par_iter_mut()
            .zip(shard_hashers.par_iter_mut())
            .zip(errs.par_iter_mut())
            .zip(shards.par_iter())
            .for_each(|(((writer, hasher), err), shard)| {
                if let Some(w) = writer.as_mut() {
                    match w.write_all(shard) {
                        Ok(()) => {
                            if let Some(h) = hasher.as_mut() {
                                h.update(shard);
                            }
                            return;
                        }
                        Err(e) => *err = Some(e.into()),
                    }

                    *writer = None;
                    *hasher = None;
                }
            });

        let live = writers.iter().filter(|w| w.is_some()).count() as u64;
        if live < min_success_writers {
            return Err(Error::WriteQuorum(MultiError::new("shard write", &errs)));
        }
    }

    let shard_sums = shard_hashers
        .iter()
        .map(|h| h.as_ref().map(|h| h.hex_sum()).unwrap_or_default())
        .collect();

    Ok((shard_sums, data_hasher.hex_sum()))
}

/// Fills the data shards of one block with exactly `block_size` logical
/// bytes; unused tail bytes of the final data shard and all untouched
/// subsequent data shards are zeroed. Only the logical bytes reach the
/// whole-data hasher.
fn read_data_shards(
    reader: &mut dyn Read,
    shards: &mut [Vec<u8>],
    data_count: usize,
    block_size: u64,
    data_hasher: &mut Hasher,
) -> Result<()> {
    let mut remaining = block_size as usize;

    for shard in shards[..data_count].iter_mut() {
        let want = remaining.min(shard.len());
        if want > 0 {
            reader.read_exact(&mut shard[..want])?;
            data_hasher.update(&shard[..want]);
        }
        shard[want..].fill(0);
        remaining -= want;
    }

    Ok(())
}
