//! Test fixtures for generating spreadsheet data.

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Compute SHA-256 hash of data as hex string.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// A worker roster with a title block above the header row.
///
/// Every `error_every`-th row (1-based) has an empty `nombre`, so it fails
/// validation when `nombre` is required. Pass 0 for no bad rows.
#[allow(dead_code)]
pub fn roster_csv(rows: usize, error_every: usize) -> Bytes {
    let mut out = String::from("Worker roster,,\nExported 2026-10-01,,\n,,\ncodigo,nombre,cargo\n");
    for i in 1..=rows {
        let name = if error_every > 0 && i % error_every == 0 {
            String::new()
        } else {
            format!("Worker {i}")
        };
        out.push_str(&format!("W-{i:05},{name},operator\n"));
    }
    Bytes::from(out)
}

/// A roster padded with a wide notes column until it is at least `min_len` bytes.
#[allow(dead_code)]
pub fn padded_roster_csv(rows: usize, min_len: usize) -> Bytes {
    let per_row = (min_len / rows.max(1)).saturating_sub(24).max(1);
    let padding = "x".repeat(per_row);
    let mut out = String::from("codigo,nombre,notas\n");
    for i in 1..=rows {
        out.push_str(&format!("W-{i:05},Worker {i},{padding}\n"));
    }
    while out.len() < min_len {
        out.push_str(&format!("W-{:05},Filler,{padding}\n", rows + 1));
    }
    Bytes::from(out)
}

/// Split data into chunks of specified size.
#[allow(dead_code)]
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
    data.chunks(chunk_size)
        .map(Bytes::copy_from_slice)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let a = seeded_bytes(42, 100);
        let b = seeded_bytes(42, 100);
        assert_eq!(a, b);

        let c = seeded_bytes(43, 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_into_chunks() {
        let data = seeded_bytes(1, 100);
        let chunks = split_into_chunks(&data, 30);
        assert_eq!(chunks.len(), 4); // 30 + 30 + 30 + 10

        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(reassembled, data.as_ref());
    }

    #[test]
    fn test_roster_marks_every_nth_row_bad() {
        let csv = roster_csv(10, 5);
        let text = std::str::from_utf8(&csv).unwrap();
        assert!(text.contains("W-00005,,operator"));
        assert!(text.contains("W-00010,,operator"));
        assert!(text.contains("W-00004,Worker 4,operator"));
    }
}
