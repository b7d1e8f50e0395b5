//! Bitrot-checksummed file container.
//!
//! A protected file `f` is stored as the data file plus a sidecar
//! `f.checksum`. The sidecar starts with one JSON header line followed by
//! one newline-terminated hex digest per 1 MiB block. Reads recompute every
//! block digest and fail on the first disagreement.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::boundary;
use crate::error::{Error, MultiError, Result};
use crate::hash::Hasher;

const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct ChecksumHeader {
    #[serde(rename = "hashName")]
    hash_name: String,
    #[serde(rename = "hashKey")]
    hash_key: String,
    #[serde(rename = "hashLength")]
    hash_length: u64,
    #[serde(rename = "blockSize")]
    block_size: u64,
    #[serde(rename = "blockCount")]
    block_count: u64,
    #[serde(rename = "dataLength")]
    data_length: u64,
}

fn sidecar_path(filename: &Path) -> std::path::PathBuf {
    let mut name = filename.as_os_str().to_os_string();
    name.push(".checksum");
    name.into()
}

struct ChecksumFile {
    file: File,
    hasher: Hasher,
    header: ChecksumHeader,
}

impl ChecksumFile {
    fn create(filename: &Path, block_size: u64, block_count: u64, size: u64) -> Result<ChecksumFile> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(sidecar_path(filename))?;

        let hasher = Hasher::highway256(None)?;
        let header = ChecksumHeader {
            hash_name: hasher.name().to_string(),
            hash_key: hasher.hash_key(),
            hash_length: hasher.hash_length(),
            block_size,
            block_count,
            data_length: size,
        };

        serde_json::to_writer(&mut file, &header)?;
        file.write_all(b"\n")?;

        Ok(ChecksumFile { file, hasher, header })
    }

    fn open(filename: &Path) -> Result<ChecksumFile> {
        let mut file = File::open(sidecar_path(filename))?;

        // The header is everything up to the first newline.
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        let header_len = loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }

            data.extend_from_slice(&buf[..n]);
            if let Some(i) = data.iter().position(|&b| b == b'\n') {
                data.truncate(i + 1);
                break i + 1;
            }
        };
        file.seek(SeekFrom::Start(header_len as u64))?;

        let header: ChecksumHeader = serde_json::from_slice(&data)?;

        let key = hex::decode(&header.hash_key).map_err(|_| Error::InvalidHashKey)?;
        let key = if key.is_empty() { None } else { Some(key) };
        let hasher = Hasher::new(&header.hash_name, key.as_deref())?;

        Ok(ChecksumFile { file, hasher, header })
    }

    /// Appends the digest line of one block.
    fn write_block_sum(&mut self, block: &[u8]) -> Result<()> {
        self.hasher.reset();
        self.hasher.update(block);

        let mut line = self.hasher.hex_sum();
        line.push('\n');
        self.file.write_all(line.as_bytes())?;

        Ok(())
    }

    /// Skips the digest lines of `block_count` blocks.
    fn skip(&mut self, block_count: u64) -> Result<()> {
        let bytes = block_count as i64 * (self.header.hash_length as i64 + 1);
        self.file.seek(SeekFrom::Current(bytes))?;
        Ok(())
    }

    /// Reads the next digest line.
    fn read_sum(&mut self) -> Result<String> {
        let mut buf = vec![0u8; self.header.hash_length as usize + 1];
        self.file.read_exact(&mut buf)?;
        buf.truncate(self.header.hash_length as usize);

        String::from_utf8(buf).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "malformed digest line").into()
        })
    }
}

/// Writes exactly `size` bytes from `reader` into `filename`, creating the
/// sidecar when `bitrot_protection` is set. Returns the hex HighwayHash-256
/// of the whole stream. Fails when `reader` yields fewer than `size` bytes.
pub fn write_file(
    filename: &Path,
    reader: &mut dyn Read,
    size: u64,
    bitrot_protection: bool,
) -> Result<String> {
    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(filename)?;

    let block_count = size.div_ceil(DEFAULT_BLOCK_SIZE);

    let mut checksum_file = if bitrot_protection {
        Some(ChecksumFile::create(filename, DEFAULT_BLOCK_SIZE, block_count, size)?)
    } else {
        None
    };

    let mut hasher = Hasher::highway256(None)?;
    let mut buf = vec![0u8; DEFAULT_BLOCK_SIZE as usize];

    for i in 0..block_count {
        if i == block_count - 1 {
            buf.truncate((size - i * DEFAULT_BLOCK_SIZE) as usize);
        }

        reader.read_exact(&mut buf)?;

        file.write_all(&buf)?;
        if let Some(cf) = checksum_file.as_mut() {
            cf.write_block_sum(&buf)?;
        }
        hasher.update(&buf);
    }

    Ok(hasher.hex_sum())
}

/// Removes `filename` and, when `bitrot_protection` is set, its sidecar. A
/// missing sidecar is an error even when the data file was removed.
pub fn remove_file(filename: &Path, bitrot_protection: bool) -> Result<()> {
    let err1 = fs::remove_file(filename).err();
    let err2 = if bitrot_protection {
        fs::remove_file(sidecar_path(filename)).err()
    } else {
        None
    };

    match (err1, err2) {
        (None, None) => Ok(()),
        (Some(err), None) => Err(err.into()),
        (None, Some(err)) => Err(err.into()),
        (err1, err2) => Err(Error::Multi(MultiError::new(
            "remove",
            &[err1.map(Error::from), err2.map(Error::from)],
        ))),
    }
}

/// Renames the sidecar first, then the data file; the upload machinery one
/// layer up rolls the sidecar back if the second rename fails.
pub fn rename_file(oldname: &Path, newname: &Path, bitrot_protection: bool) -> Result<()> {
    if bitrot_protection {
        fs::rename(sidecar_path(oldname), sidecar_path(newname))?;
    }

    fs::rename(oldname, newname)?;
    Ok(())
}

/// Opens a `(offset, length)` window of `filename`. With bitrot protection
/// the returned reader verifies every block digest before yielding bytes.
/// A negative offset addresses from the end of the data; windows outside
/// the data fail with [`Error::InsufficientData`].
pub fn open_file(
    filename: &Path,
    offset: i64,
    length: u64,
    bitrot_protection: bool,
) -> Result<Box<dyn Read + Send>> {
    let mut file = File::open(filename)?;

    if !bitrot_protection {
        let size = file.metadata()?.len() as i64;

        let mut offset = offset;
        if offset < 0 {
            offset += size;
        }
        if offset < 0 || offset + length as i64 > size {
            return Err(Error::InsufficientData);
        }

        file.seek(SeekFrom::Start(offset as u64))?;
        return Ok(Box::new(file.take(length)));
    }

    let mut checksum_file = ChecksumFile::open(filename)?;
    let size = checksum_file.header.data_length as i64;

    let mut offset = offset;
    if offset < 0 {
        offset += size;
    }
    if offset < 0 || offset + length as i64 > size {
        return Err(Error::InsufficientData);
    }

    let (blocks_to_skip, blocks_to_read, bytes_to_skip_in_first_block, bytes_to_read_in_last_block, last_block_size) =
        boundary::calc_boundaries(
            size,
            checksum_file.header.block_size as i64,
            checksum_file.header.block_count as i64,
            offset,
            length as i64,
        );

    checksum_file.skip(blocks_to_skip as u64)?;

    let mut bytes_to_skip = blocks_to_skip * checksum_file.header.block_size as i64;
    if checksum_file.header.block_count <= 1 {
        bytes_to_skip = blocks_to_skip * last_block_size;
    }
    file.seek(SeekFrom::Start(bytes_to_skip as u64))?;

    Ok(Box::new(ChecksummedReader {
        file,
        checksum_file,
        blocks_to_read,
        bytes_to_skip_in_first_block,
        bytes_to_read_in_last_block,
        last_block_size,
        index: 0,
        block: Vec::new(),
        pos: 0,
        end: 0,
        pending_err: None,
    }))
}

struct ChecksummedReader {
    file: File,
    checksum_file: ChecksumFile,

    blocks_to_read: i64,
    bytes_to_skip_in_first_block: i64,
    bytes_to_read_in_last_block: i64,
    last_block_size: i64,

    index: i64,
    block: Vec<u8>,
    pos: usize,
    end: usize,
    pending_err: Option<Error>,
}

impl ChecksummedReader {
    fn read_block(&mut self) -> Result<bool> {
        if self.index == self.blocks_to_read {
            return Ok(false);
        }

        let block_size = self.checksum_file.header.block_size as usize;
        let len = if self.index == self.blocks_to_read - 1 {
            self.last_block_size as usize
        } else {
            block_size
        };
        self.block.resize(len, 0);

        let expected = self.checksum_file.read_sum()?;
        self.file.read_exact(&mut self.block)?;

        self.checksum_file.hasher.reset();
        self.checksum_file.hasher.update(&self.block);
        let got = self.checksum_file.hasher.hex_sum();

        if got != expected {
            return Err(Error::ChecksumMismatch { expected, got });
        }

        let mut start = 0;
        let mut end = len;
        if self.index == 0 {
            start = self.bytes_to_skip_in_first_block as usize;
        }
        if self.index == self.blocks_to_read - 1 {
            end = start + self.bytes_to_read_in_last_block as usize;
        }

        self.pos = start;
        self.end = end;
        self.index += 1;

        Ok(true)
    }
}

impl Read for ChecksummedReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.pending_err.take() {
            return Err(err.into());
        }

        let mut n = 0;
        while n < out.len() {
            if self.pos == self.end {
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

            let take = (self.end - self.pos).min(out.len() - n);
            out[n..n + take].copy_from_slice(&self.block[self.pos..self.pos + take]);
            self.pos += take;
            n += take;
        }

        Ok(n)
    }
}
