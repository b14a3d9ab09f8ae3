//! GGUF header inspection
//!
//! Only the metadata block is read; tensor data is never touched.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use promptlab_core::ArtifactInfo;
use thiserror::Error;
use tracing::debug;

const MAGIC: &[u8; 4] = b"GGUF";
const MAX_STRING_LEN: u64 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum GgufError {
    #[error("not a GGUF file")]
    BadMagic,
    #[error("unsupported GGUF version {0}")]
    UnsupportedVersion(u32),
    #[error("malformed GGUF metadata: {0}")]
    Malformed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata value types from the GGUF format
mod value_type {
    pub const U8: u32 = 0;
    pub const I8: u32 = 1;
    pub const U16: u32 = 2;
    pub const I16: u32 = 3;
    pub const U32: u32 = 4;
    pub const I32: u32 = 5;
    pub const F32: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
    pub const ARRAY: u32 = 9;
    pub const U64: u32 = 10;
    pub const I64: u32 = 11;
    pub const F64: u32 = 12;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GgufHeader {
    pub info: ArtifactInfo,
    /// `general.type`: "model" or "adapter"
    pub kind: Option<String>,
    /// `adapter.type`, e.g. "lora"
    pub adapter_type: Option<String>,
}

impl GgufHeader {
    pub fn is_adapter(&self) -> bool {
        self.kind.as_deref() == Some("adapter") || self.adapter_type.is_some()
    }
}

pub fn inspect(path: &Path) -> Result<GgufHeader, GgufError> {
    let file = File::open(path)?;
    let size_bytes = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(GgufError::BadMagic);
    }

    let version = read_u32(&mut reader)?;
    if !(2..=3).contains(&version) {
        return Err(GgufError::UnsupportedVersion(version));
    }

    let tensor_count = read_u64(&mut reader)?;
    let kv_count = read_u64(&mut reader)?;

    let mut header = GgufHeader {
        info: ArtifactInfo {
            gguf_version: version,
            tensor_count,
            size_bytes,
            ..Default::default()
        },
        ..Default::default()
    };

    for _ in 0..kv_count {
        let key = read_string(&mut reader)?;
        let ty = read_u32(&mut reader)?;

        match (key.as_str(), ty) {
            ("general.architecture", value_type::STRING) => {
                header.info.architecture = Some(read_string(&mut reader)?);
            }
            ("general.name", value_type::STRING) => {
                header.info.name = Some(read_string(&mut reader)?);
            }
            ("general.type", value_type::STRING) => {
                header.kind = Some(read_string(&mut reader)?);
            }
            ("adapter.type", value_type::STRING) => {
                header.adapter_type = Some(read_string(&mut reader)?);
            }
            ("general.file_type", value_type::U32) => {
                header.info.file_type = Some(read_u32(&mut reader)?);
            }
            _ => skip_value(&mut reader, ty, size_bytes)?,
        }
    }

    debug!(
        path = %path.display(),
        arch = ?header.info.architecture,
        file_type = header.info.file_type_label(),
        "Inspected GGUF header"
    );
    Ok(header)
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, GgufError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, GgufError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string<R: Read>(r: &mut R) -> Result<String, GgufError> {
    let len = read_u64(r)?;
    if len > MAX_STRING_LEN {
        return Err(GgufError::Malformed(format!("string of {} bytes", len)));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| GgufError::Malformed(e.to_string()))
}

fn scalar_size(ty: u32) -> Option<i64> {
    match ty {
        value_type::U8 | value_type::I8 | value_type::BOOL => Some(1),
        value_type::U16 | value_type::I16 => Some(2),
        value_type::U32 | value_type::I32 | value_type::F32 => Some(4),
        value_type::U64 | value_type::I64 | value_type::F64 => Some(8),
        _ => None,
    }
}

/// `file_len` bounds every skip; a value can never be larger than the file
fn skip_value(r: &mut BufReader<File>, ty: u32, file_len: u64) -> Result<(), GgufError> {
    if let Some(size) = scalar_size(ty) {
        r.seek_relative(size)?;
        return Ok(());
    }

    match ty {
        value_type::STRING => {
            let len = read_u64(r)?;
            if len > MAX_STRING_LEN {
                return Err(GgufError::Malformed(format!("string of {} bytes", len)));
            }
            skip_bytes(r, len, file_len)?;
        }
        value_type::ARRAY => {
            let item_ty = read_u32(r)?;
            let count = read_u64(r)?;
            match scalar_size(item_ty) {
                Some(size) => {
                    let bytes = count.checked_mul(size as u64).ok_or_else(|| {
                        GgufError::Malformed(format!("array of {} items overflows", count))
                    })?;
                    skip_bytes(r, bytes, file_len)?;
                }
                None => {
                    for _ in 0..count {
                        skip_value(r, item_ty, file_len)?;
                    }
                }
            }
        }
        other => return Err(GgufError::Malformed(format!("unknown value type {}", other))),
    }
    Ok(())
}

fn skip_bytes(r: &mut BufReader<File>, bytes: u64, file_len: u64) -> Result<(), GgufError> {
    let offset = i64::try_from(bytes)
        .ok()
        .filter(|_| bytes <= file_len)
        .ok_or_else(|| {
            GgufError::Malformed(format!("value of {} bytes in a {} byte file", bytes, file_len))
        })?;
    r.seek_relative(offset)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_gguf, GgufFixture};

    #[test]
    fn test_reads_model_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gguf");
        write_gguf(&path, &GgufFixture::model("llama", 15));

        let header = inspect(&path).unwrap();
        assert_eq!(header.info.gguf_version, 3);
        assert_eq!(header.info.architecture.as_deref(), Some("llama"));
        assert_eq!(header.info.file_type_label(), "Q4_K_M");
        assert!(!header.is_adapter());
    }

    #[test]
    fn test_skips_unknown_keys_and_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gguf");
        let mut fixture = GgufFixture::model("qwen2", 1);
        fixture.with_token_list = true;
        write_gguf(&path, &fixture);

        let header = inspect(&path).unwrap();
        assert_eq!(header.info.architecture.as_deref(), Some("qwen2"));
        assert!(header.info.is_full_precision());
    }

    #[test]
    fn test_reads_adapter_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapter.gguf");
        write_gguf(&path, &GgufFixture::adapter("llama"));

        let header = inspect(&path).unwrap();
        assert!(header.is_adapter());
        assert_eq!(header.adapter_type.as_deref(), Some("lora"));
    }

    #[test]
    fn test_rejects_non_gguf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        std::fs::write(&path, b"{\"__metadata__\":{}}").unwrap();
        assert!(matches!(inspect(&path), Err(GgufError::BadMagic)));
    }

    fn header_with_array(item_ty: u32, count: u64) -> Vec<u8> {
        let key = b"tokenizer.ggml.scores";
        let mut bytes = b"GGUF".to_vec();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(&value_type::ARRAY.to_le_bytes());
        bytes.extend_from_slice(&item_ty.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes
    }

    #[test]
    fn test_huge_array_count_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostile.gguf");

        std::fs::write(&path, header_with_array(value_type::F64, 1 << 61)).unwrap();
        assert!(matches!(inspect(&path), Err(GgufError::Malformed(_))));

        std::fs::write(&path, header_with_array(value_type::U8, u64::MAX)).unwrap();
        assert!(matches!(inspect(&path), Err(GgufError::Malformed(_))));
    }

    #[test]
    fn test_oversized_string_skip_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostile.gguf");
        let key = b"general.description";
        let mut bytes = b"GGUF".to_vec();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(&value_type::STRING.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(inspect(&path), Err(GgufError::Malformed(_))));
    }

    #[test]
    fn test_rejects_old_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.gguf");
        let mut bytes = b"GGUF".to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(inspect(&path), Err(GgufError::UnsupportedVersion(1))));
    }
}
