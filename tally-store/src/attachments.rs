//! Content-addressed attachment store
//!
//! One directory; each blob is a ZIP archive stored under the upper-case hex
//! form of its SHA-256 hash, no extension. Import hashes the stream while
//! copying to a `tmp.<uuid>` file in the same directory, scans the archive
//! for path escapes, then publishes with an atomic rename. Opening returns a
//! reader that verifies the on-disk bytes against the id once the stream has
//! been fully consumed.
//!
//! Safe for concurrent use: publication is a single rename, and an import
//! that loses the race simply adopts the already-published blob.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use sha2::{Digest, Sha256};
use tally_model::SecureHash;
use thiserror::Error;
use uuid::Uuid;

/// Attachment store failures.
#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed attachment: {0}")]
    Malformed(String),

    #[error("on-disk hash mismatch: expected {expected}, file hashes to {actual}")]
    HashMismatch {
        expected: SecureHash,
        actual: SecureHash,
    },
}

/// A directory of immutable, hash-named ZIP blobs.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AttachmentError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn blob_path(&self, id: &SecureHash) -> PathBuf {
        self.dir.join(id.to_upper_hex())
    }

    /// Whether a blob with this id is present (and not quarantined).
    pub fn contains(&self, id: &SecureHash) -> bool {
        self.blob_path(id).exists()
    }

    /// Open a blob for reading. The returned reader checks the actual hash
    /// against `id` once the stream has been consumed to the end.
    pub fn open_attachment(
        &self,
        id: &SecureHash,
    ) -> Result<Option<HashCheckingReader>, AttachmentError> {
        let path = self.blob_path(id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        Ok(Some(HashCheckingReader::new(file, *id, len)))
    }

    /// Import an attachment, returning its id.
    ///
    /// The stream is hashed as it is copied to a temp path; the archive is
    /// scanned for absolute paths, `..` segments, and backslashes before the
    /// temp is atomically renamed into place. Importing bytes that are
    /// already present is a no-op returning the existing id.
    pub fn import(&self, reader: &mut impl Read) -> Result<SecureHash, AttachmentError> {
        let tmp_path = self.dir.join(format!("tmp.{}", Uuid::new_v4()));
        let result = self.import_via_temp(reader, &tmp_path);
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn import_via_temp(
        &self,
        reader: &mut impl Read,
        tmp_path: &Path,
    ) -> Result<SecureHash, AttachmentError> {
        let mut tmp = File::create(tmp_path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
        }
        tmp.sync_all()?;
        drop(tmp);

        let id = SecureHash::Sha256(hasher.finalize().into());

        // Scan before publication: a blob that escapes its archive root must
        // never become openable.
        let mut scan_file = File::open(tmp_path)?;
        scan_zip_entry_names(&mut scan_file)?;

        let final_path = self.blob_path(&id);
        if final_path.exists() {
            // Idempotent import: the published blob wins.
            fs::remove_file(tmp_path)?;
            tracing::debug!(id = %id, "attachment already present");
            return Ok(id);
        }
        fs::rename(tmp_path, &final_path)?;
        tracing::debug!(id = %id, "attachment imported");
        Ok(id)
    }

    /// Move a corrupt blob aside so it is never served again. Keeps the bytes
    /// on disk for inspection.
    pub fn quarantine(&self, id: &SecureHash) -> Result<(), AttachmentError> {
        let path = self.blob_path(id);
        let target = self.dir.join(format!("{}.quarantine", id.to_upper_hex()));
        fs::rename(&path, &target)?;
        tracing::warn!(id = %id, "attachment quarantined");
        Ok(())
    }
}

/// Reader over a stored blob that verifies the on-disk hash at end of stream.
///
/// The check only fires when the file has been consumed to the end; partial
/// reads followed by a drop make no claim either way.
pub struct HashCheckingReader {
    file: File,
    expected: SecureHash,
    len: u64,
    consumed: u64,
    hasher: Option<Sha256>,
}

impl HashCheckingReader {
    fn new(file: File, expected: SecureHash, len: u64) -> Self {
        Self {
            file,
            expected,
            len,
            consumed: 0,
            hasher: Some(Sha256::new()),
        }
    }
}

impl Read for HashCheckingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        if n > 0 {
            self.consumed += n as u64;
            if let Some(h) = self.hasher.as_mut() {
                h.update(&buf[..n]);
            }
            return Ok(n);
        }
        // End of stream: verify only if the whole file went through us.
        if self.consumed == self.len {
            if let Some(h) = self.hasher.take() {
                let actual = SecureHash::Sha256(h.finalize().into());
                if actual != self.expected {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        AttachmentError::HashMismatch {
                            expected: self.expected,
                            actual,
                        },
                    ));
                }
            }
        }
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// ZIP entry-name scan
// ---------------------------------------------------------------------------

const EOCD_SIG: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
const CDH_SIG: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
const EOCD_FIXED_LEN: usize = 22;
const CDH_FIXED_LEN: usize = 46;

fn u16_at(buf: &[u8], off: usize) -> u64 {
    u16::from_le_bytes([buf[off], buf[off + 1]]) as u64
}

fn u32_at(buf: &[u8], off: usize) -> u64 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]) as u64
}

/// Walk the archive's central directory and validate every entry name.
///
/// Reads only the end-of-central-directory record and the central directory
/// headers; entry data is never touched.
fn scan_zip_entry_names(file: &mut File) -> Result<(), AttachmentError> {
    let file_len = file.metadata()?.len();
    if file_len < EOCD_FIXED_LEN as u64 {
        return Err(AttachmentError::Malformed("not a ZIP archive".into()));
    }

    // The EOCD sits in the last 22..22+65535 bytes, after a variable comment.
    let tail_len = file_len.min(EOCD_FIXED_LEN as u64 + u16::MAX as u64);
    file.seek(SeekFrom::Start(file_len - tail_len))?;
    let mut tail = vec![0u8; tail_len as usize];
    file.read_exact(&mut tail)?;

    let eocd_pos = tail
        .windows(4)
        .rposition(|w| w == EOCD_SIG)
        .ok_or_else(|| AttachmentError::Malformed("no end-of-central-directory record".into()))?;
    let eocd = &tail[eocd_pos..];
    if eocd.len() < EOCD_FIXED_LEN {
        return Err(AttachmentError::Malformed("truncated end-of-central-directory".into()));
    }

    let entry_count = u16_at(eocd, 10);
    let cd_size = u32_at(eocd, 12);
    let cd_offset = u32_at(eocd, 16);
    if cd_offset + cd_size > file_len {
        return Err(AttachmentError::Malformed("central directory out of bounds".into()));
    }

    file.seek(SeekFrom::Start(cd_offset))?;
    let mut cd = vec![0u8; cd_size as usize];
    file.read_exact(&mut cd)?;

    let mut pos = 0usize;
    for _ in 0..entry_count {
        if pos + CDH_FIXED_LEN > cd.len() {
            return Err(AttachmentError::Malformed("truncated central directory".into()));
        }
        let header = &cd[pos..];
        if header[..4] != CDH_SIG {
            return Err(AttachmentError::Malformed("bad central directory signature".into()));
        }
        let name_len = u16_at(header, 28) as usize;
        let extra_len = u16_at(header, 30) as usize;
        let comment_len = u16_at(header, 32) as usize;
        let name_end = pos + CDH_FIXED_LEN + name_len;
        if name_end > cd.len() {
            return Err(AttachmentError::Malformed("truncated entry name".into()));
        }
        let name_bytes = &cd[pos + CDH_FIXED_LEN..name_end];
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| AttachmentError::Malformed("entry name is not UTF-8".into()))?;
        validate_entry_name(name)?;
        pos = name_end + extra_len + comment_len;
    }
    Ok(())
}

fn validate_entry_name(name: &str) -> Result<(), AttachmentError> {
    if name.contains('\\') {
        return Err(AttachmentError::Malformed(format!(
            "entry name contains a backslash: {name:?}"
        )));
    }
    if name.starts_with('/') {
        return Err(AttachmentError::Malformed(format!(
            "entry name is an absolute path: {name:?}"
        )));
    }
    if name.split('/').any(|seg| seg == "..") {
        return Err(AttachmentError::Malformed(format!(
            "entry name escapes the archive root: {name:?}"
        )));
    }
    Ok(())
}
