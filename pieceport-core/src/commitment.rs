//! Piece commitment (CommP) calculation.
//!
//! Data is padded to a power of two, split into 127-byte quads, fr32-expanded
//! into 128 bytes each and folded into a binary merkle tree of 32-byte nodes
//! hashed with SHA-256 truncated to 254 bits. The root is wrapped in a CIDv1
//! (`fil-commitment-unsealed` / `sha2-256-trunc254-padded`).

use crate::{PieceError, Result};
use bytes::Bytes;
use cid::Cid;
use cid::multihash::Multihash;
use sha2::{Digest, Sha256};

pub const NODE_SIZE: usize = 32;
pub const MIN_PIECE_SIZE: u64 = 128;

/// Multicodec for an unsealed Filecoin commitment.
pub const FIL_COMMITMENT_UNSEALED: u64 = 0xf101;
/// Multihash code for SHA-256 truncated to 254 bits over fr32 padded data.
pub const SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

const QUAD_UNPADDED: usize = 127;
const QUAD_PADDED: usize = 128;

pub type Node = [u8; NODE_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commitment {
    pub digest: Node,
    /// Size of the piece in the proof system (fr32 expanded, power of two).
    pub piece_size: u64,
}

impl Commitment {
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    pub fn content_id(&self) -> Result<String> {
        commitment_to_cid(&self.digest)
    }
}

/// Output of [`compute_commitment`].
#[derive(Debug, Clone)]
pub struct CommittedPiece {
    pub padded: Bytes,
    pub padded_size: u64,
    pub commitment: Commitment,
    pub content_id: String,
}

/// Pad with trailing zeros up to the next power of two. Inputs that already
/// have a power-of-two length are returned as-is.
pub fn pad_to_power_of_two(data: Bytes) -> Bytes {
    let len = data.len();
    if len == 0 || len.is_power_of_two() {
        return data;
    }

    let mut padded = Vec::with_capacity(len.next_power_of_two());
    padded.extend_from_slice(&data);
    padded.resize(len.next_power_of_two(), 0);
    Bytes::from(padded)
}

pub fn compute_commitment(data: Bytes) -> Result<CommittedPiece> {
    if data.is_empty() {
        return Err(PieceError::Validation(
            "cannot commit an empty piece".to_string(),
        ));
    }

    let padded = pad_to_power_of_two(data);
    let mut calc = CommPCalculator::new();
    calc.update(&padded);
    let commitment = calc.finish()?;
    let content_id = commitment.content_id()?;

    Ok(CommittedPiece {
        padded_size: padded.len() as u64,
        padded,
        commitment,
        content_id,
    })
}

/// Streaming CommP calculator. Leaves are pushed onto a per-level stack so
/// only one pending node per tree level is held in memory.
#[derive(Debug, Default)]
pub struct CommPCalculator {
    quad: Vec<u8>,
    levels: Vec<Option<Node>>,
    leaves: u64,
    consumed: u64,
}

impl CommPCalculator {
    pub fn new() -> Self {
        Self {
            quad: Vec::with_capacity(QUAD_UNPADDED),
            ..Self::default()
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.consumed += data.len() as u64;

        while !data.is_empty() {
            let take = (QUAD_UNPADDED - self.quad.len()).min(data.len());
            self.quad.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.quad.len() == QUAD_UNPADDED {
                self.flush_quad();
            }
        }
    }

    pub fn finish(mut self) -> Result<Commitment> {
        if self.consumed == 0 {
            return Err(PieceError::Validation(
                "commitment requires at least one byte".to_string(),
            ));
        }

        if !self.quad.is_empty() {
            self.flush_quad();
        }

        while !self.leaves.is_power_of_two() {
            let level = self.leaves.trailing_zeros() as usize;
            self.push_node(level, zero_commitment(level));
        }

        let top = self.leaves.trailing_zeros() as usize;
        let digest = self
            .levels
            .get(top)
            .copied()
            .flatten()
            .ok_or_else(|| PieceError::Internal("commitment tree has no root".to_string()))?;

        Ok(Commitment {
            digest,
            piece_size: self.leaves * NODE_SIZE as u64,
        })
    }

    fn flush_quad(&mut self) {
        let mut input = [0u8; QUAD_UNPADDED];
        input[..self.quad.len()].copy_from_slice(&self.quad);
        self.quad.clear();

        let expanded = fr32_expand(&input);
        for chunk in expanded.chunks_exact(NODE_SIZE) {
            let mut leaf = [0u8; NODE_SIZE];
            leaf.copy_from_slice(chunk);
            self.push_node(0, leaf);
        }
    }

    fn push_node(&mut self, mut level: usize, mut node: Node) {
        self.leaves += 1u64 << level;

        loop {
            if self.levels.len() <= level {
                self.levels.resize(level + 1, None);
            }

            match self.levels[level].take() {
                Some(left) => {
                    node = hash_pair(&left, &node);
                    level += 1;
                }
                None => {
                    self.levels[level] = Some(node);
                    return;
                }
            }
        }
    }
}

/// Spread 127 bytes (1016 bits) over four 32-byte slots holding 254 bits each.
fn fr32_expand(input: &[u8; QUAD_UNPADDED]) -> [u8; QUAD_PADDED] {
    let mut out = [0u8; QUAD_PADDED];

    for element in 0..4 {
        for j in 0..NODE_SIZE {
            let start = element * 254 + j * 8;
            let byte = start / 8;
            let shift = start % 8;

            let mut value = input[byte] >> shift;
            if shift > 0 && byte + 1 < QUAD_UNPADDED {
                value |= input[byte + 1] << (8 - shift);
            }
            out[element * NODE_SIZE + j] = value;
        }
        out[element * NODE_SIZE + NODE_SIZE - 1] &= 0x3f;
    }

    out
}

pub fn hash_pair(left: &Node, right: &Node) -> Node {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out: Node = hasher.finalize().into();
    out[NODE_SIZE - 1] &= 0x3f;
    out
}

/// Root of a subtree of `2^level` zero leaves.
pub fn zero_commitment(level: usize) -> Node {
    let mut node = [0u8; NODE_SIZE];
    for _ in 0..level {
        node = hash_pair(&node, &node);
    }
    node
}

/// Root commitment of a sector holding a single piece at offset zero, the
/// remainder filled with zero pieces.
pub fn unsealed_root(commitment: &Commitment, sector_size: u64) -> Result<Node> {
    let piece_size = commitment.piece_size;
    if !piece_size.is_power_of_two() || piece_size < MIN_PIECE_SIZE {
        return Err(PieceError::Validation(format!(
            "invalid piece size {}",
            piece_size
        )));
    }
    if !sector_size.is_power_of_two() || sector_size < piece_size {
        return Err(PieceError::Validation(format!(
            "piece size {} does not fit sector size {}",
            piece_size, sector_size
        )));
    }

    let piece_level = (piece_size / NODE_SIZE as u64).trailing_zeros() as usize;
    let sector_level = (sector_size / NODE_SIZE as u64).trailing_zeros() as usize;

    let mut zero = zero_commitment(piece_level);
    let mut node = commitment.digest;
    for _ in piece_level..sector_level {
        node = hash_pair(&node, &zero);
        zero = hash_pair(&zero, &zero);
    }

    Ok(node)
}

pub fn commitment_to_cid(digest: &Node) -> Result<String> {
    let hash = Multihash::<64>::wrap(SHA2_256_TRUNC254_PADDED, digest)
        .map_err(|e| PieceError::Internal(format!("failed to wrap commitment: {}", e)))?;
    Ok(Cid::new_v1(FIL_COMMITMENT_UNSEALED, hash).to_string())
}

pub fn cid_to_commitment(content_id: &str) -> Result<Node> {
    let cid = Cid::try_from(content_id).map_err(|e| {
        PieceError::Validation(format!("invalid piece cid {}: {}", content_id, e))
    })?;

    if cid.codec() != FIL_COMMITMENT_UNSEALED || cid.hash().code() != SHA2_256_TRUNC254_PADDED {
        return Err(PieceError::Validation(format!(
            "cid {} is not an unsealed piece commitment",
            content_id
        )));
    }

    cid.hash().digest().try_into().map_err(|_| {
        PieceError::Validation(format!(
            "cid {} carries a digest of {} bytes",
            content_id,
            cid.hash().digest().len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_128: &str = "3731bb99ac689f66eef5973e4a94da188f4ddcae580724fc6f3fd60dfd488333";
    const ZERO_2048_CID: &str = "baga6ea4seaqpy7usqklokfx2vxuynmupslkeutzexe2uqurdg5vhtebhxqmpqmy";

    #[test]
    fn test_pad_to_power_of_two() {
        let padded = pad_to_power_of_two(Bytes::from_static(b"hello world"));
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[..11], b"hello world");
        assert!(padded[11..].iter().all(|b| *b == 0));

        let exact = Bytes::from(vec![7u8; 1024]);
        assert_eq!(pad_to_power_of_two(exact.clone()), exact);
    }

    #[test]
    fn test_pad_is_idempotent() {
        for len in [1usize, 2, 3, 5, 100, 127, 128, 129, 1000, 4097] {
            let data = Bytes::from(vec![0xabu8; len]);
            let once = pad_to_power_of_two(data);
            assert!(once.len().is_power_of_two());
            assert!(once.len() >= len);
            assert_eq!(pad_to_power_of_two(once.clone()), once);
        }
    }

    #[test]
    fn test_fr32_expand_layout() {
        let mut input = [0u8; QUAD_UNPADDED];
        for (i, byte) in input.iter_mut().enumerate() {
            *byte = i as u8;
        }

        let out = fr32_expand(&input);
        assert_eq!(&out[..31], &input[..31]);
        assert_eq!(out[31], input[31] & 0x3f);
        assert_eq!(out[32], (input[31] >> 6) | (input[32] << 2));
        assert_eq!(out[64], (input[63] >> 4) | (input[64] << 4));
        assert_eq!(out[96], (input[95] >> 2) | (input[96] << 6));
        assert_eq!(out[127], input[126] >> 2);
        for slot in 0..4 {
            assert_eq!(out[slot * 32 + 31] & 0xc0, 0);
        }
    }

    #[test]
    fn test_zero_piece_commitments() {
        let small = compute_commitment(Bytes::from(vec![0u8; 64])).unwrap();
        assert_eq!(small.commitment.digest_hex(), ZERO_128);
        assert_eq!(small.commitment.piece_size, 128);
        assert_eq!(hex::encode(zero_commitment(2)), ZERO_128);

        let larger = compute_commitment(Bytes::from(vec![0u8; 1024])).unwrap();
        assert_eq!(larger.padded_size, 1024);
        assert_eq!(larger.commitment.piece_size, 2048);
        assert_eq!(larger.content_id, ZERO_2048_CID);
    }

    #[test]
    fn test_piece_size_follows_padded_size() {
        // 127 bytes pad to 128, which spills into a second quad.
        for (len, padded, piece_size) in [
            (1usize, 1u64, 128u64),
            (64, 64, 128),
            (127, 128, 256),
            (128, 128, 256),
            (200, 256, 512),
            (1024, 1024, 2048),
        ] {
            let piece = compute_commitment(Bytes::from(vec![1u8; len])).unwrap();
            assert_eq!(piece.padded_size, padded, "input of {} bytes", len);
            assert_eq!(piece.commitment.piece_size, piece_size, "input of {} bytes", len);
        }

        let spilled = compute_commitment(Bytes::from(vec![0u8; 127])).unwrap();
        assert_eq!(spilled.commitment.digest, zero_commitment(3));
    }

    #[test]
    fn test_known_data_commitment() {
        let piece = compute_commitment(Bytes::from_static(b"hello world")).unwrap();
        assert_eq!(piece.padded_size, 16);
        assert_eq!(
            piece.commitment.digest_hex(),
            "ee5c07b4ea161e8dc5a7ac1f29204f85c398223fb1b239a7c2ac716d257d451a"
        );
        assert_eq!(
            piece.content_id,
            "baga6ea4seaqo4xahwtvbmhunywt2yhzjebhylq4yei73dmrzu7bky4lnev6ukgq"
        );
    }

    #[test]
    fn test_commitment_is_deterministic_and_streaming() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 251) as u8).collect();
        let first = compute_commitment(Bytes::from(data.clone())).unwrap();
        let second = compute_commitment(Bytes::from(data)).unwrap();
        assert_eq!(first.commitment, second.commitment);

        let mut calc = CommPCalculator::new();
        for chunk in first.padded.chunks(33) {
            calc.update(chunk);
        }
        assert_eq!(calc.finish().unwrap(), first.commitment);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(
            compute_commitment(Bytes::new()),
            Err(PieceError::Validation(_))
        ));
        assert!(CommPCalculator::new().finish().is_err());
    }

    #[test]
    fn test_cid_round_trip() {
        let piece = compute_commitment(Bytes::from_static(b"some piece bytes")).unwrap();
        assert!(piece.content_id.starts_with("baga6ea4sea"));
        let digest = cid_to_commitment(&piece.content_id).unwrap();
        assert_eq!(digest, piece.commitment.digest);

        assert!(cid_to_commitment("not-a-cid").is_err());
    }

    #[test]
    fn test_unsealed_root() {
        let piece = compute_commitment(Bytes::from(vec![0u8; 64])).unwrap();
        assert_eq!(piece.commitment.piece_size, 128);

        let same = unsealed_root(&piece.commitment, 128).unwrap();
        assert_eq!(same, piece.commitment.digest);

        let root = unsealed_root(&piece.commitment, 512).unwrap();
        assert_eq!(
            hex::encode(root),
            "57a2381a28652bf47f6bef7aca679be4aede5871ab5cf3eb2c08114488cb8526"
        );

        assert!(unsealed_root(&piece.commitment, 64).is_err());
        assert!(unsealed_root(&piece.commitment, 1000).is_err());
    }
}
