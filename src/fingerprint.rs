use image::io::Reader;
use image::DynamicImage;
use img_hash::{HashAlg, HasherConfig}; // perceptual hash configuration
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// Exact content fingerprint: lowercase hex SHA-256 of the raw evidence bytes.
///
/// Any single-byte change (re-encoding, stripped EXIF) produces a completely
/// different value, so this only catches byte-identical resubmissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Perceptual fingerprint: a fixed-length bit vector (8x8 = 64 bits) that
/// survives recompression, resizing and small edits.
///
/// Empty when the bytes could not be decoded as an image. Stored as hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PerceptualFingerprint(Vec<u8>);

impl PerceptualFingerprint {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of differing bit positions, or `None` if either side is empty
    /// or the lengths differ.
    pub fn hamming_distance(&self, other: &PerceptualFingerprint) -> Option<u32> {
        if self.is_empty() || self.0.len() != other.0.len() {
            return None;
        }
        Some(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum(),
        )
    }
}

impl From<PerceptualFingerprint> for String {
    fn from(p: PerceptualFingerprint) -> Self {
        hex::encode(p.0)
    }
}

impl TryFrom<String> for PerceptualFingerprint {
    type Error = hex::FromHexError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(Self(hex::decode(s)?))
    }
}

/// SHA-256 of the raw bytes. Deterministic: same bytes, same fingerprint.
pub fn content_fingerprint(bytes: &[u8]) -> ContentFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ContentFingerprint(format!("{:x}", hasher.finalize()))
}

/// Largest image (in pixels) the perceptual fingerprint will decode.
/// 8192 x 8192; anything bigger is treated as undecodable.
pub const MAX_DECODE_PIXELS: u64 = 8192 * 8192;

/// DCT mean hash (pHash) of the decoded image.
///
/// Decode failures are not errors: the result is an empty fingerprint and the
/// similarity check is skipped for this submission. The header is read first
/// and oversized images are refused before any pixel buffer is allocated.
pub fn perceptual_fingerprint(bytes: &[u8]) -> PerceptualFingerprint {
    let img = match decode_bounded(bytes) {
        Some(img) => img,
        None => return PerceptualFingerprint::empty(),
    };

    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .hash_size(8, 8)
        .to_hasher();

    let hash = hasher.hash_image(&img);
    PerceptualFingerprint(hash.as_bytes().to_vec())
}

fn within_decode_limit(width: u32, height: u32) -> bool {
    u64::from(width) * u64::from(height) <= MAX_DECODE_PIXELS
}

fn decode_bounded(bytes: &[u8]) -> Option<DynamicImage> {
    let reader = || Reader::new(Cursor::new(bytes)).with_guessed_format();

    let (width, height) = match reader().map(Reader::into_dimensions) {
        Ok(Ok(dims)) => dims,
        Ok(Err(e)) => {
            debug!(error = %e, "evidence is not a decodable image; perceptual fingerprint skipped");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "evidence could not be sniffed; perceptual fingerprint skipped");
            return None;
        }
    };

    if !within_decode_limit(width, height) {
        debug!(width, height, "evidence image too large; perceptual fingerprint skipped");
        return None;
    }

    match reader().map(Reader::decode) {
        Ok(Ok(img)) => Some(img),
        Ok(Err(e)) => {
            debug!(error = %e, "evidence image failed to decode; perceptual fingerprint skipped");
            None
        }
        Err(e) => {
            debug!(error = %e, "evidence could not be sniffed; perceptual fingerprint skipped");
            None
        }
    }
}
