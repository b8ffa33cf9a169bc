//! Sorted record files
//!
//! Used for bulk ingestion and for the reference engine's on-disk image.
//!
//! # File Structure
//!
//! ```text
//! +------------------+ 0
//! | Magic "MSST"     | 4 bytes
//! | Format version   | u32 LE
//! | Flags            | u32 LE (bit 0: metadata records allowed)
//! +------------------+ 12
//! | Record 1         | u32 LE key len | bincode(MvccKey) | u32 LE value len | value
//! | Record 2         |
//! | ...              |
//! +------------------+
//! | Record count     | u64 LE
//! | Footer CRC32     | u32 LE over every preceding byte
//! +------------------+
//! ```
//!
//! Records are strictly increasing in `MvccKey` order. Ingestion files never
//! carry metadata records (zero timestamp): the writer refuses them.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use strata_core::{Error, MvccKey, Result};

/// Magic bytes: "MSST"
pub const SST_MAGIC: [u8; 4] = *b"MSST";

/// Format version for forward compatibility
pub const SST_FORMAT_VERSION: u32 = 1;

const FLAG_ALLOW_METADATA: u32 = 1;
const HEADER_SIZE: usize = 12;
const FOOTER_SIZE: usize = 12;

/// Summary of a finished file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SstInfo {
    /// Number of records written
    pub records: u64,
    /// File size in bytes
    pub size: u64,
}

/// Streaming writer for sorted record files
pub struct SstWriter {
    path: PathBuf,
    out: BufWriter<File>,
    hasher: crc32fast::Hasher,
    allow_metadata: bool,
    last_key: Option<MvccKey>,
    records: u64,
    size: u64,
}

impl SstWriter {
    /// Create a file for bulk ingestion (data versions only)
    pub fn for_ingestion(path: &Path) -> Result<Self> {
        Self::create_inner(path, false)
    }

    /// Create a file that may also carry metadata records
    pub fn create(path: &Path) -> Result<Self> {
        Self::create_inner(path, true)
    }

    fn create_inner(path: &Path, allow_metadata: bool) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = SstWriter {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            hasher: crc32fast::Hasher::new(),
            allow_metadata,
            last_key: None,
            records: 0,
            size: 0,
        };
        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&SST_MAGIC);
        header.write_u32::<LittleEndian>(SST_FORMAT_VERSION)?;
        let flags = if allow_metadata { FLAG_ALLOW_METADATA } else { 0 };
        header.write_u32::<LittleEndian>(flags)?;
        writer.write_chunk(&header)?;
        Ok(writer)
    }

    fn write_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        self.hasher.update(bytes);
        self.out.write_all(bytes)?;
        self.size += bytes.len() as u64;
        Ok(())
    }

    /// Append a record; keys must arrive in strictly increasing order
    pub fn put(&mut self, key: &MvccKey, value: &[u8]) -> Result<()> {
        if !self.allow_metadata && !key.is_value() {
            return Err(Error::InvalidArgument(format!(
                "cannot write metadata key {} to an ingestion file",
                key
            )));
        }
        if let Some(last) = &self.last_key {
            if key <= last {
                return Err(Error::InvalidArgument(format!(
                    "keys out of order: {} after {}",
                    key, last
                )));
            }
        }
        let encoded_key = bincode::serialize(key)?;
        let mut record = Vec::with_capacity(encoded_key.len() + value.len() + 8);
        record.write_u32::<LittleEndian>(encoded_key.len() as u32)?;
        record.extend_from_slice(&encoded_key);
        record.write_u32::<LittleEndian>(value.len() as u32)?;
        record.extend_from_slice(value);
        self.write_chunk(&record)?;
        self.last_key = Some(key.clone());
        self.records += 1;
        Ok(())
    }

    /// Write the footer and sync the file to disk
    pub fn finish(mut self) -> Result<SstInfo> {
        let mut count = Vec::with_capacity(8);
        count.write_u64::<LittleEndian>(self.records)?;
        self.write_chunk(&count)?;
        let crc = self.hasher.clone().finalize();
        self.out.write_u32::<LittleEndian>(crc)?;
        self.size += 4;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        tracing::debug!(path = %self.path.display(), records = self.records, "finished sorted file");
        Ok(SstInfo {
            records: self.records,
            size: self.size,
        })
    }
}

/// Read and validate a whole sorted record file
pub fn read_sst(path: &Path) -> Result<Vec<(MvccKey, Vec<u8>)>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    decode_sst(&bytes)
}

fn decode_sst(bytes: &[u8]) -> Result<Vec<(MvccKey, Vec<u8>)>> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(Error::Corruption("sorted file too short".to_string()));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let expected_crc = Cursor::new(crc_bytes).read_u32::<LittleEndian>()?;
    let actual_crc = crc32fast::hash(body);
    if expected_crc != actual_crc {
        return Err(Error::Corruption(format!(
            "sorted file checksum mismatch: expected {:#010x}, got {:#010x}",
            expected_crc, actual_crc
        )));
    }

    let mut cursor = Cursor::new(body);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if magic != SST_MAGIC {
        return Err(Error::Corruption(format!("bad sorted file magic {:?}", magic)));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version > SST_FORMAT_VERSION {
        return Err(Error::Corruption(format!(
            "unsupported sorted file version {}",
            version
        )));
    }
    let flags = cursor.read_u32::<LittleEndian>()?;
    let allow_metadata = flags & FLAG_ALLOW_METADATA != 0;

    let records_end = (body.len() - 8) as u64;
    let mut records = Vec::new();
    while cursor.position() < records_end {
        let key_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut key_bytes = vec![0u8; key_len];
        cursor.read_exact(&mut key_bytes)?;
        let key: MvccKey = bincode::deserialize(&key_bytes)?;
        let value_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut value = vec![0u8; value_len];
        cursor.read_exact(&mut value)?;

        if !allow_metadata && !key.is_value() {
            return Err(Error::Corruption(format!(
                "metadata key {} in ingestion file",
                key
            )));
        }
        if let Some((last, _)) = records.last() {
            if &key <= last {
                return Err(Error::Corruption(format!(
                    "sorted file keys out of order at {}",
                    key
                )));
            }
        }
        records.push((key, value));
    }

    let count = cursor.read_u64::<LittleEndian>()?;
    if count != records.len() as u64 {
        return Err(Error::Corruption(format!(
            "sorted file record count {} does not match {} records",
            count,
            records.len()
        )));
    }
    Ok(records)
}
