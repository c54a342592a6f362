//! Chunk payload wire format.
//!
//! Two payload shapes share one byte stream and there is no type tag:
//! - Fresh: `background[res²] f32 LE` then `foreground[res²] f32 LE`
//! - Restored: `STAMP` then `background[res²] f32 LE` then a PNG of the
//!   edited foreground alpha mask
//!
//! The decoder always checks the stamp first. Payload length is never used to
//! guess the shape, since both can coincide for small resolutions.

use std::fmt;

use crumble_gen::GeneratedChunk;

pub mod mask;
pub mod wire;

pub use mask::{decode_mask, encode_mask, mask_resolution};

/// Leading bytes of a Restored payload. The first word read as a
/// little-endian `f32` is a NaN, which the generator never emits.
pub const STAMP: [u8; 8] = [0xFF, 0xFF, 0xC0, 0x7F, b'C', b'R', b'M', b'B'];
pub const STAMP_LENGTH: usize = STAMP.len();

const FLOAT_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Fresh {
        background: Vec<f32>,
        foreground: Vec<f32>,
    },
    Restored {
        background: Vec<f32>,
        /// Encoded image of the edited foreground alpha mask.
        mask_image: Vec<u8>,
    },
}

impl From<GeneratedChunk> for ChunkPayload {
    fn from(chunk: GeneratedChunk) -> Self {
        ChunkPayload::Fresh {
            background: chunk.background,
            foreground: chunk.foreground,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Fresh,
    Restored,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Fresh => f.write_str("fresh"),
            PayloadKind::Restored => f.write_str("restored"),
        }
    }
}

impl ChunkPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            ChunkPayload::Fresh { .. } => PayloadKind::Fresh,
            ChunkPayload::Restored { .. } => PayloadKind::Restored,
        }
    }

    pub fn background(&self) -> &[f32] {
        match self {
            ChunkPayload::Fresh { background, .. } | ChunkPayload::Restored { background, .. } => {
                background
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ChunkPayload::Fresh {
                background,
                foreground,
            } => {
                let mut out = Vec::with_capacity((background.len() + foreground.len()) * FLOAT_BYTES);
                write_floats(&mut out, background);
                write_floats(&mut out, foreground);
                out
            }
            ChunkPayload::Restored {
                background,
                mask_image,
            } => {
                let mut out =
                    Vec::with_capacity(STAMP_LENGTH + background.len() * FLOAT_BYTES + mask_image.len());
                out.extend_from_slice(&STAMP);
                write_floats(&mut out, background);
                out.extend_from_slice(mask_image);
                out
            }
        }
    }

    /// Decode a payload fetched for a chunk of the given resolution.
    pub fn decode(bytes: &[u8], resolution: u32) -> Result<ChunkPayload, DecodeError> {
        let samples = (resolution as usize) * (resolution as usize);
        let array_bytes = samples * FLOAT_BYTES;

        if is_restored(bytes) {
            let body = &bytes[STAMP_LENGTH..];
            if body.len() <= array_bytes {
                return Err(DecodeError::Truncated {
                    expected: STAMP_LENGTH + array_bytes + 1,
                    actual: bytes.len(),
                });
            }
            let (floats, image) = body.split_at(array_bytes);
            return Ok(ChunkPayload::Restored {
                background: read_floats(floats),
                mask_image: image.to_vec(),
            });
        }

        let expected = fresh_len(resolution);
        if bytes.len() < expected {
            return Err(DecodeError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(DecodeError::Oversized {
                expected,
                actual: bytes.len(),
            });
        }
        let (bg, fg) = bytes.split_at(array_bytes);
        Ok(ChunkPayload::Fresh {
            background: read_floats(bg),
            foreground: read_floats(fg),
        })
    }
}

/// True when the buffer starts with [`STAMP`].
pub fn is_restored(bytes: &[u8]) -> bool {
    bytes.len() >= STAMP_LENGTH && bytes[..STAMP_LENGTH] == STAMP
}

/// Exact byte length of a Fresh payload.
pub fn fresh_len(resolution: u32) -> usize {
    2 * (resolution as usize) * (resolution as usize) * FLOAT_BYTES
}

fn write_floats(out: &mut Vec<u8>, values: &[f32]) {
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn read_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(FLOAT_BYTES)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Malformed chunk bytes. Local to one chunk; the caller discards the
/// payload and fetches again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { expected: usize, actual: usize },
    Oversized { expected: usize, actual: usize },
    MaskSize { width: u32, height: u32, resolution: u32 },
    Image(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { expected, actual } => {
                write!(f, "truncated chunk payload: {} bytes, need {}", actual, expected)
            }
            DecodeError::Oversized { expected, actual } => {
                write!(f, "oversized chunk payload: {} bytes, expected {}", actual, expected)
            }
            DecodeError::MaskSize {
                width,
                height,
                resolution,
            } => write!(
                f,
                "mask image is {}x{}, chunk resolution is {}",
                width, height, resolution
            ),
            DecodeError::Image(msg) => write!(f, "mask image: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, sign: f32) -> Vec<f32> {
        (0..n).map(|i| sign * (i as f32 * 0.01)).collect()
    }

    #[test]
    fn test_fresh_round_trip() {
        let payload = ChunkPayload::Fresh {
            background: ramp(16, 1.0),
            foreground: ramp(16, -1.0),
        };
        let bytes = payload.encode();
        assert_eq!(bytes.len(), fresh_len(4));
        assert_eq!(ChunkPayload::decode(&bytes, 4), Ok(payload));
    }

    #[test]
    fn test_fresh_keeps_negative_zero() {
        let payload = ChunkPayload::Fresh {
            background: vec![0.0],
            foreground: vec![-0.0],
        };
        match ChunkPayload::decode(&payload.encode(), 1).expect("decode") {
            ChunkPayload::Fresh { foreground, .. } => assert!(foreground[0].is_sign_negative()),
            other => panic!("expected fresh, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_restored_round_trip() {
        let mask: Vec<u8> = (0..64).map(|i| if i % 3 == 0 { 0 } else { 255 }).collect();
        let payload = ChunkPayload::Restored {
            background: ramp(64, 1.0),
            mask_image: encode_mask(&mask, 8).expect("encode mask"),
        };
        let decoded = ChunkPayload::decode(&payload.encode(), 8).expect("decode");
        assert_eq!(decoded, payload);

        let ChunkPayload::Restored { mask_image, .. } = decoded else {
            panic!("expected restored");
        };
        assert_eq!(decode_mask(&mask_image, 8).expect("decode mask"), mask);
    }

    #[test]
    fn test_stamp_wins_over_length() {
        // 32 bytes is a complete fresh payload at resolution 2; with the stamp
        // in front it must still decode as restored.
        let mut bytes = STAMP.to_vec();
        for v in [1.5f32, 2.5, 3.5, 4.5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&[9u8; 8]);
        assert_eq!(bytes.len(), fresh_len(2));
        let decoded = ChunkPayload::decode(&bytes, 2).expect("decode");
        assert_eq!(decoded.kind(), PayloadKind::Restored);
        assert_eq!(decoded.background(), &[1.5, 2.5, 3.5, 4.5]);
    }

    #[test]
    fn test_same_length_different_prefix_is_fresh() {
        let mut bytes = STAMP.to_vec();
        bytes[7] ^= 0x01;
        bytes.extend_from_slice(&[0u8; 24]);
        let decoded = ChunkPayload::decode(&bytes, 2).expect("decode");
        assert_eq!(decoded.kind(), PayloadKind::Fresh);
    }

    #[test]
    fn test_truncated_fresh() {
        let bytes = vec![0u8; fresh_len(4) - 1];
        assert_eq!(
            ChunkPayload::decode(&bytes, 4),
            Err(DecodeError::Truncated {
                expected: fresh_len(4),
                actual: fresh_len(4) - 1
            })
        );
        assert!(matches!(
            ChunkPayload::decode(&vec![0u8; fresh_len(4) + 4], 4),
            Err(DecodeError::Oversized { .. })
        ));
    }

    #[test]
    fn test_restored_without_image_is_truncated() {
        let mut bytes = STAMP.to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            ChunkPayload::decode(&bytes, 2),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_generator_never_emits_stamp() {
        let chunk = crumble_gen::generate("stamp", 0, 0, 16, 6).expect("generate");
        let bytes = ChunkPayload::from(chunk).encode();
        assert!(!is_restored(&bytes));
    }
}
