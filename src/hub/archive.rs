//! On-disk archive of session snapshots taken when an agent unregisters.
//!
//! File layout:
//! ```text
//! [magic: "KTMS"][version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! The JSON body carries the export document and its BLAKE3 digest, which is
//! re-verified on load.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Read, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExecutionError, TmsError, TmsResult};
use crate::session::SessionExport;

const ARCHIVE_VERSION: u8 = 1;

/// Magic bytes identifying an archive file.
pub const MAGIC: [u8; 4] = *b"KTMS";

/// Extension of archive files.
pub const EXTENSION: &str = "ktms";

/// Archives larger than this are rejected on load.
const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct ArchiveBody {
    digest: String,
    export: SessionExport,
}

fn archive_err(context: &str, err: impl std::fmt::Display) -> TmsError {
    ExecutionError::Archive {
        message: format!("{context}: {err}"),
    }
    .into()
}

/// Writes `snapshot` under `dir` and returns the file path.
///
/// The file is written to a temporary name, synced, then renamed.
pub fn archive_session(dir: &Path, snapshot: &SessionExport) -> TmsResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| archive_err("create archive dir", e))?;

    let body = ArchiveBody {
        digest: snapshot.digest()?,
        export: snapshot.clone(),
    };
    let name = format!(
        "{}-{}-{}.{EXTENSION}",
        file_stem(&snapshot.owner_agent),
        snapshot.session_id,
        snapshot.exported_at.timestamp_millis()
    );
    let final_path = dir.join(name);
    let temp_path = final_path.with_extension(format!("{EXTENSION}.tmp"));

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| archive_err("open archive", e))?;
    let mut writer = BufWriter::new(file);
    write_frame(&mut writer, &body).map_err(|e| archive_err("write archive", e))?;
    writer.flush().map_err(|e| archive_err("flush archive", e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| archive_err("sync archive", e))?;
    drop(writer);
    fs::rename(&temp_path, &final_path).map_err(|e| archive_err("rename archive", e))?;

    debug!(path = %final_path.display(), beliefs = snapshot.len(), "archive written");
    Ok(final_path)
}

/// Reads an archive, verifying framing, checksum, and digest.
pub fn load_archive(path: &Path) -> TmsResult<SessionExport> {
    let file = File::open(path).map_err(|e| archive_err("open archive", e))?;
    let body: ArchiveBody = read_frame(&mut BufReader::new(file)).map_err(|e| archive_err("read archive", e))?;
    let digest = body.export.digest()?;
    if digest != body.digest {
        return Err(archive_err(
            "verify archive",
            format!("digest mismatch: stored={}, computed={digest}", body.digest),
        ));
    }
    Ok(body.export)
}

/// Keeps agent ids usable as file names.
fn file_stem(owner: &str) -> String {
    owner
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn write_frame<T: Serialize>(writer: &mut impl Write, value: &T) -> IoResult<()> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "archive body exceeds 4 GiB"))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);

    writer.write_all(&MAGIC)?;
    writer.write_all(&[ARCHIVE_VERSION])?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&data)?;
    writer.write_all(&hasher.finalize().to_le_bytes())
}

fn read_frame<T: for<'de> Deserialize<'de>>(reader: &mut impl Read) -> IoResult<T> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != ARCHIVE_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported archive version: {} (expected {ARCHIVE_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_BODY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("archive size {len} exceeds maximum {MAX_BODY_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored:08x}, computed={computed:08x}"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}
