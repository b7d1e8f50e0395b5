//! Stripe geometry of an erasure-coded part.

use serde::{Deserialize, Serialize};

/// Codec parameters of one erasure-coded part. Immutable once the part is
/// written; embedded verbatim in the part manifest.
///
/// `shard_ids` must hold `data_count + parity_count` unique entries, data
/// shards first, then parity shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeInfo {
    #[serde(rename = "dataCount")]
    pub data_count: u64,
    #[serde(rename = "parityCount")]
    pub parity_count: u64,
    pub size: u64,
    #[serde(rename = "shardSize")]
    pub shard_size: u64,
    #[serde(rename = "shardIDs", default)]
    pub shard_ids: Vec<String>,
}

/// Derived block geometry of a [`StripeInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeLayout {
    pub block_count: u64,
    pub block_size: u64,
    pub last_block_size: u64,
    pub last_shard_size: u64,
}

impl StripeInfo {
    pub fn shard_count(&self) -> u64 {
        self.data_count + self.parity_count
    }

    /// Derives the block layout: a full block spans `data_count * shard_size`
    /// logical bytes; a short trailing block shrinks every shard to
    /// `ceil(last_block_size / data_count)`.
    pub fn compute(&self) -> StripeLayout {
        let block_size = self.data_count * self.shard_size;
        let mut block_count = self.size / block_size;
        let mut last_block_size = self.size - block_count * block_size;
        let last_shard_size;

        if last_block_size > 0 {
            block_count += 1;
            last_shard_size = last_block_size.div_ceil(self.data_count);
        } else {
            last_block_size = block_size;
            last_shard_size = self.shard_size;
        }

        StripeLayout { block_count, block_size, last_block_size, last_shard_size }
    }

    /// Physical size of each shard file backing this part.
    pub fn shard_file_size(&self) -> u64 {
        let layout = self.compute();
        if layout.block_count == 0 {
            return 0;
        }

        layout.last_shard_size + (layout.block_count - 1) * self.shard_size
    }
}

/// Returns the duplicated entries of `ids`, empty when all are unique.
pub(crate) fn duplicates(ids: &[String]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::new();
    let mut dups = Vec::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            dups.push(id.as_str());
        }
    }

    dups
}
