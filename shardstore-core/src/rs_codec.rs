use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{Error, Result};

/// Thin wrapper around the Reed-Solomon codec. A parity count of zero is
/// legal and degrades to plain striping: encode and verify are no-ops and
/// reconstruction is impossible.
pub struct RsCodec {
    pub data: usize,
    pub parity: usize,
    inner: Option<ReedSolomon>,
}

impl RsCodec {
    /// The GF(2^8) field limits `data + parity` to 256 shards; out-of-range
    /// counts surface [`Error::InvalidShardCount`] rather than a panic.
    pub fn new(data_count: u64, parity_count: u64) -> Result<RsCodec> {
        let data = data_count as usize;
        let parity = parity_count as usize;

        if data == 0 || data + parity > 256 {
            return Err(Error::InvalidShardCount);
        }

        let inner = if parity == 0 {
            None
        } else {
            Some(ReedSolomon::new(data, parity).map_err(|_| Error::InvalidShardCount)?)
        };

        Ok(RsCodec { data, parity, inner })
    }

    /// Fills the parity shards from the data shards.
    pub fn encode(&self, shards: &mut [Vec<u8>]) -> Result<()> {
        if let Some(rs) = &self.inner {
            rs.encode(shards)?;
        }

        Ok(())
    }

    /// Checks that the parity shards are consistent with the data shards.
    pub fn verify(&self, shards: &[Vec<u8>]) -> Result<bool> {
        match &self.inner {
            Some(rs) => Ok(rs.verify(shards)?),
            None => Ok(true),
        }
    }

    /// Rebuilds missing data shards (`None` slots) in place. Needs at least
    /// `data` shards present across the slice.
    pub fn reconstruct_data(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        match &self.inner {
            Some(rs) => {
                rs.reconstruct_data(shards)?;
                Ok(())
            }
            None => Err(Error::InsufficientData),
        }
    }
}
