//! Binary format of a single corpus vector file (`00001.vec`).
//!
//! Header (39 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - checksum: u32 (CRC32 of the header fields before it and the payload)
//!
//! Payload:
//! - embedding: [f32; dimensions] (little-endian)

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + checksum(4)
const HEADER_SIZE: usize = 39;

/// Offset of the checksum field
const CHECKSUM_OFFSET: usize = 35;

/// Errors that can occur while decoding a vector file.
#[derive(Debug, thiserror::Error)]
pub enum VectorFileError {
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

/// A decoded vector file.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFile {
    pub model_id: [u8; 32],
    pub embedding: Vec<f32>,
}

impl VectorFile {
    pub fn new(model_id: [u8; 32], embedding: Vec<f32>) -> Self {
        Self {
            model_id,
            embedding,
        }
    }

    /// Name of the file holding item number `seq` (1-based) of a corpus of
    /// `total` items. Names sort in the same order as their numbers.
    pub fn file_name(seq: usize, total: usize) -> String {
        let width = total.to_string().len().max(5);
        format!("{seq:0width$}.vec")
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.embedding.len() * 4);

        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&self.model_id);
        bytes.extend_from_slice(&(self.embedding.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);

        for &value in &self.embedding {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let checksum = Self::compute_checksum(&bytes);
        bytes[CHECKSUM_OFFSET..HEADER_SIZE].copy_from_slice(&checksum.to_le_bytes());

        bytes
    }

    /// Decode a vector file, checking it against the expected model.
    pub fn decode(bytes: &[u8], expected_model_id: &[u8; 32]) -> Result<Self, VectorFileError> {
        if bytes.len() < HEADER_SIZE {
            return Err(VectorFileError::InvalidFormat(format!(
                "file has {} bytes, header needs {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let version = bytes[0];
        if version > FORMAT_VERSION {
            return Err(VectorFileError::VersionMismatch(version, FORMAT_VERSION));
        }

        let dimensions = u16::from_le_bytes([bytes[33], bytes[34]]) as usize;
        let expected_len = HEADER_SIZE + dimensions * 4;
        if bytes.len() != expected_len {
            return Err(VectorFileError::InvalidFormat(format!(
                "expected {} bytes for {} dimensions, got {}",
                expected_len,
                dimensions,
                bytes.len()
            )));
        }

        let stored_checksum = u32::from_le_bytes([
            bytes[CHECKSUM_OFFSET],
            bytes[CHECKSUM_OFFSET + 1],
            bytes[CHECKSUM_OFFSET + 2],
            bytes[CHECKSUM_OFFSET + 3],
        ]);
        if stored_checksum != Self::compute_checksum(bytes) {
            return Err(VectorFileError::ChecksumMismatch);
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&bytes[1..33]);
        if model_id != *expected_model_id {
            return Err(VectorFileError::ModelMismatch);
        }

        let embedding = bytes[HEADER_SIZE..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            model_id,
            embedding,
        })
    }

    /// CRC32 over everything except the checksum field itself.
    fn compute_checksum(bytes: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..CHECKSUM_OFFSET]);
        hasher.update(&bytes[HEADER_SIZE..]);
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    #[test]
    fn test_encode_decode() {
        let file = VectorFile::new(test_model_id(), vec![0.6, -0.8, 0.0]);
        let bytes = file.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 12);

        let decoded = VectorFile::decode(&bytes, &test_model_id()).unwrap();
        assert_eq!(decoded, file);
    }

    #[test]
    fn test_model_mismatch() {
        let bytes = VectorFile::new(test_model_id(), vec![1.0, 0.0]).encode();

        let mut wrong_model_id = [0u8; 32];
        wrong_model_id[0] = 0xFF;

        let result = VectorFile::decode(&bytes, &wrong_model_id);
        assert!(matches!(result, Err(VectorFileError::ModelMismatch)));
    }

    #[test]
    fn test_checksum_detects_payload_corruption() {
        let mut bytes = VectorFile::new(test_model_id(), vec![1.0, 0.0]).encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let result = VectorFile::decode(&bytes, &test_model_id());
        assert!(matches!(result, Err(VectorFileError::ChecksumMismatch)));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let bytes = VectorFile::new(test_model_id(), vec![1.0, 0.0]).encode();

        let result = VectorFile::decode(&bytes[..bytes.len() - 2], &test_model_id());
        assert!(matches!(result, Err(VectorFileError::InvalidFormat(_))));

        let result = VectorFile::decode(&bytes[..10], &test_model_id());
        assert!(matches!(result, Err(VectorFileError::InvalidFormat(_))));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut bytes = VectorFile::new(test_model_id(), vec![1.0]).encode();
        bytes[0] = FORMAT_VERSION + 1;

        let result = VectorFile::decode(&bytes, &test_model_id());
        assert!(matches!(result, Err(VectorFileError::VersionMismatch(2, 1))));
    }

    #[test]
    fn test_file_names_sort_numerically() {
        assert_eq!(VectorFile::file_name(7, 40), "00007.vec");
        assert_eq!(VectorFile::file_name(7, 250_000), "000007.vec");

        let mut names: Vec<String> = (1..=12).map(|i| VectorFile::file_name(i, 12)).collect();
        let expected = names.clone();
        names.sort();
        assert_eq!(names, expected);
    }
}
