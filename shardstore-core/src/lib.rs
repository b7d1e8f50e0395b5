//! Erasure-coded object storage data plane.
//!
//! Byte streams are split into fixed-size blocks, Reed-Solomon encoded into
//! N data + M parity shards, and persisted on independent disk backends with
//! per-block bitrot checksums. Reads open the minimum number of shards and
//! reconstruct missing ones on the fly.

pub mod boundary;
pub mod checksum_file;
pub mod decode;
pub mod disk;
pub mod encode;
pub mod error;
pub mod group;
pub mod hash;
pub mod id;
pub mod pipe;
pub mod range_reader;
pub mod rs_codec;
pub mod stripe;

pub use error::{Error, Result};
