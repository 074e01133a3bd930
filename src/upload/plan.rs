//! Chunk planner
//!
//! Splits `[0, file_size)` into consecutive parts of `part_size` bytes, the
//! last one taking the remainder.

use super::UploadError;

/// One planned part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based part number
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

impl Chunk {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Number of parts needed to cover `file_size`
pub fn total_parts(file_size: u64, part_size: u64) -> Result<u32, UploadError> {
    if part_size == 0 {
        return Err(UploadError::Configuration(
            "part size must be greater than zero".into(),
        ));
    }

    u32::try_from(file_size.div_ceil(part_size)).map_err(|_| {
        UploadError::Configuration(format!(
            "file of {} bytes needs too many parts of {} bytes",
            file_size, part_size
        ))
    })
}

/// Compute the part layout for a file.
///
/// A zero-length file yields an empty plan.
pub fn plan_chunks(file_size: u64, part_size: u64) -> Result<Vec<Chunk>, UploadError> {
    let count = total_parts(file_size, part_size)?;

    Ok((1..=count)
        .map(|part_number| {
            let offset = u64::from(part_number - 1) * part_size;
            Chunk {
                part_number,
                offset,
                length: part_size.min(file_size - offset),
            }
        })
        .collect())
}
