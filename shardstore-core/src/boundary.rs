//! Block and part window arithmetic.
//!
//! Pure functions mapping a byte range onto block-aligned storage. All sizes
//! and offsets are `i64` so callers can thread negative sentinel offsets
//! through without conversion churn.

/// Maps `(offset, length)` onto the blocks of a stream of `size` bytes laid
/// out as `block_count` blocks of `block_size` (the final block may be
/// short). Returns `(blocks_to_skip, blocks_to_read,
/// bytes_to_skip_in_first_block, bytes_to_read_in_last_block,
/// last_block_size)`.
///
/// `last_block_size` describes the last block of the *read window*, not of
/// the whole stream: it is promoted to the full block size whenever the
/// window stops short of the final block.
///
/// Panics when `offset + length > size`; that is a caller bug, not a
/// recoverable condition.
pub fn calc_boundaries(
    size: i64,
    block_size: i64,
    block_count: i64,
    offset: i64,
    length: i64,
) -> (i64, i64, i64, i64, i64) {
    assert!(
        offset <= size && length <= size && offset + length <= size,
        "invalid offset/length for size"
    );

    let mut block_size = block_size;
    let mut last_block_size = size - (block_count - 1) * block_size;
    if last_block_size == 0 {
        last_block_size = block_size;
    }

    if block_count <= 1 {
        block_size = last_block_size;
    }

    let blocks_to_skip = offset / block_size;
    let bytes_to_skip_in_first_block = offset - blocks_to_skip * block_size;

    let mut blocks_to_read = 0;
    let mut length = length;

    if bytes_to_skip_in_first_block > 0 {
        blocks_to_read += 1;

        if length <= block_size - bytes_to_skip_in_first_block {
            return (blocks_to_skip, blocks_to_read, bytes_to_skip_in_first_block, length, block_size);
        }

        length -= block_size - bytes_to_skip_in_first_block;
    }

    let mut blocks_needed = length / block_size;
    let remainder = length - blocks_needed * block_size;
    let bytes_to_read_in_last_block = if remainder > 0 {
        blocks_needed += 1;
        remainder
    } else {
        block_size
    };
    blocks_to_read += blocks_needed;

    if blocks_to_skip + blocks_to_read != block_count {
        last_block_size = block_size;
    }

    (
        blocks_to_skip,
        blocks_to_read,
        bytes_to_skip_in_first_block,
        bytes_to_read_in_last_block,
        last_block_size,
    )
}

/// Maps `(offset, length)` onto a sequence of parts with the given sizes.
/// Returns `(start_part, end_part, bytes_to_skip_in_start_part,
/// bytes_to_read_in_end_part)`.
///
/// When the offset lies beyond the sum of all part sizes, `end_part` is
/// `part_sizes.len()` and the length comes back untouched; the caller treats
/// that as an insufficient-data condition.
pub fn calc_part_boundaries(part_sizes: &[i64], offset: i64, length: i64) -> (i64, i64, i64, i64) {
    let mut offset = offset;
    let mut length = length;
    let mut offset_found = false;
    let mut start_part = 0i64;
    let mut end_part = part_sizes.len() as i64;

    for (i, &size) in part_sizes.iter().enumerate() {
        let mut part_size = size;

        if !offset_found {
            if part_size <= offset {
                offset -= part_size;
                continue;
            }

            offset_found = true;
            start_part = i as i64;
            part_size -= offset;
        }

        if length <= part_size {
            end_part = i as i64 + 1;
            break;
        }

        length -= part_size;
    }

    (start_part, end_part, offset, length)
}
