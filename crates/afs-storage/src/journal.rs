use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::change::StorageChangeSet;
use crate::config::{JournalConfig, SyncMode};
use crate::error::StorageResult;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct JournalWriter {
    writer: BufWriter<File>,
    /// Current write offset in the journal file.
    offset: u64,
}

/// Append-only journal of flushed change sets.
///
/// On-disk format, one frame per change set:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (JSON change set)]
/// ```
///
/// Recovery reads front-to-back and stops at the first frame that is
/// truncated or fails its CRC: change sets after a torn frame are not
/// replayed, since replaying them out of sequence could break chunk layering.
pub struct ChangeJournal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    sync_mode: SyncMode,
}

impl ChangeJournal {
    /// Open (or create) the journal at the given path.
    pub fn open(path: &Path, sync_mode: SyncMode) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        info!(path = %path.display(), offset, "journal opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter {
                writer: BufWriter::new(file),
                offset,
            }),
            sync_mode,
        })
    }

    pub fn from_config(config: &JournalConfig) -> StorageResult<Self> {
        Self::open(&config.path, config.sync_mode)
    }

    /// Append a change set. Returns the byte offset of its frame.
    ///
    /// If the frame cannot be written completely, whatever reached the file
    /// is cut off again so the next append starts at the recorded offset.
    pub fn append(&self, changes: &StorageChangeSet) -> StorageResult<u64> {
        let payload = changes.to_json_bytes()?;
        let length = payload.len() as u32;
        let crc = crc32fast::hash(&payload);

        let mut w = self.writer.lock().expect("journal lock poisoned");
        if !w.writer.buffer().is_empty() {
            self.rewind(&mut w)?;
        }
        let frame_offset = w.offset;

        if let Err(e) = self.write_frame(&mut w.writer, length, crc, &payload) {
            warn!(offset = frame_offset, error = %e, "journal append failed; discarding partial frame");
            if let Err(rewind) = self.rewind(&mut w) {
                warn!(offset = frame_offset, error = %rewind, "journal rewind failed");
            }
            return Err(e.into());
        }

        w.offset += HEADER_SIZE as u64 + payload.len() as u64;

        debug!(offset = frame_offset, len = payload.len(), records = changes.len(), "journal append");
        Ok(frame_offset)
    }

    fn write_frame(&self, writer: &mut BufWriter<File>, length: u32, crc: u32, payload: &[u8]) -> io::Result<()> {
        writer.write_all(&length.to_le_bytes())?;
        writer.write_all(&crc.to_le_bytes())?;
        writer.write_all(payload)?;
        writer.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Cut the file back to the last complete frame and drop any bytes still
    /// buffered for an unfinished one.
    fn rewind(&self, w: &mut JournalWriter) -> io::Result<()> {
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        file.set_len(w.offset)?;
        let stale = std::mem::replace(&mut w.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of writing it out on drop.
        let (_, unwritten) = stale.into_parts();
        if let Ok(bytes) = unwritten {
            debug!(offset = w.offset, discarded = bytes.len(), "journal rewound");
        }
        Ok(())
    }

    /// Read back every intact change set, in append order.
    pub fn recover(&self) -> StorageResult<Vec<StorageChangeSet>> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut sets = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
                warn!(offset, length, file_len, "torn journal frame; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            file.read_exact(&mut payload)?;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "journal CRC mismatch; stopping recovery"
                );
                break;
            }

            match StorageChangeSet::from_json_bytes(&payload) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    warn!(offset, error = %e, "undecodable journal frame; stopping recovery");
                    break;
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        info!(recovered = sets.len(), "journal recovery complete");
        Ok(sets)
    }

    /// Remove every frame.
    pub fn truncate(&self) -> StorageResult<()> {
        let mut w = self.writer.lock().expect("journal lock poisoned");
        w.writer.flush()?;

        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        drop(file);

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = 0;

        debug!("journal truncated");
        Ok(())
    }

    /// Current write offset.
    pub fn offset(&self) -> u64 {
        self.writer.lock().expect("journal lock poisoned").offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ChangeJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeJournal")
            .field("path", &self.path)
            .field("offset", &self.offset())
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}
