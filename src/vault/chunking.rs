//! Splitting large plaintexts into fixed-size chunks and putting them back.
//!
//! Chunks are the unit of encryption for large secrets.  Each chunk is
//! sealed on its own, with associated data binding it to its node, its
//! index, the chunk count and the total plaintext length, so chunks cannot
//! be reordered or moved between secrets, and the recorded length cannot be
//! altered, without failing authentication.

use zeroize::Zeroizing;

use crate::cancel::Cancellation;
use crate::errors::{Result, VaultError};
use crate::vault::secret::NodeId;

/// Default chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Split `plaintext` into `ceil(len / chunk_size)` slices.
///
/// Every chunk but the last is exactly `chunk_size` bytes.  An empty input
/// yields a single empty chunk so that every version has a head record.
pub fn split(plaintext: &[u8], chunk_size: usize) -> Result<Vec<&[u8]>> {
    if chunk_size == 0 {
        return Err(VaultError::Validation(
            "chunk size must be greater than zero".into(),
        ));
    }
    if plaintext.is_empty() {
        return Ok(vec![plaintext]);
    }
    let chunks: Vec<&[u8]> = plaintext.chunks(chunk_size).collect();
    if u32::try_from(chunks.len()).is_err() {
        return Err(VaultError::Validation(format!(
            "secret needs {} chunks, more than a version can hold",
            chunks.len()
        )));
    }
    Ok(chunks)
}

/// Associated data for one chunk: `node id | index | count | total length`.
pub fn chunk_aad(
    node_id: &NodeId,
    chunk_index: u32,
    chunk_count: u32,
    total_length: u64,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(16 + 8 + 8);
    aad.extend_from_slice(node_id.0.as_bytes());
    aad.extend_from_slice(&chunk_index.to_be_bytes());
    aad.extend_from_slice(&chunk_count.to_be_bytes());
    aad.extend_from_slice(&total_length.to_be_bytes());
    aad
}

/// Concatenate decrypted chunks in index order.
///
/// `chunks` must arrive sorted by index and cover `0..chunk_count` with no
/// gaps or duplicates; their lengths must add up to exactly `expected_len`
/// bytes.  The buffer is sized from the chunks themselves, never from the
/// recorded length.
pub fn reassemble<I>(
    chunks: I,
    chunk_count: u32,
    expected_len: u64,
    cancel: &Cancellation,
) -> Result<Zeroizing<Vec<u8>>>
where
    I: IntoIterator<Item = (u32, Zeroizing<Vec<u8>>)>,
{
    let mut ordered = Vec::new();
    let mut total: u64 = 0;
    let mut next = 0u32;

    for (index, chunk) in chunks {
        cancel.check()?;
        if index != next {
            return Err(VaultError::ChunkIntegrity(format!(
                "expected chunk {next}, found chunk {index}"
            )));
        }
        total = total.saturating_add(chunk.len() as u64);
        ordered.push(chunk);
        next = next
            .checked_add(1)
            .ok_or_else(|| VaultError::ChunkIntegrity("chunk index overflow".into()))?;
    }

    if next != chunk_count {
        return Err(VaultError::ChunkIntegrity(format!(
            "found {next} of {chunk_count} chunks"
        )));
    }
    if total != expected_len {
        return Err(VaultError::ChunkIntegrity(format!(
            "reassembled {total} bytes, expected {expected_len}"
        )));
    }

    let mut out = Zeroizing::new(Vec::with_capacity(ordered.iter().map(|c| c.len()).sum()));
    for chunk in &ordered {
        out.extend_from_slice(chunk);
    }
    Ok(out)
}
