//! Append-only command log for store mutations
//!
//! Each mutation is appended as one frame: a big-endian `u32` payload
//! length followed by the bincode encoding of a [`StoreCommand`]. Replaying
//! the frames in order rebuilds the store.

use crate::error::{GeoStoreError, Result};
use crate::geometry::Geometry;
use crate::types::{RecordId, SyncPolicy};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, trace, warn};

/// Upper bound on a single frame payload
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A logged store mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreCommand {
    Insert {
        id: RecordId,
        name: String,
        description: Option<String>,
        geometry: Geometry,
    },
    Replace {
        id: RecordId,
        name: String,
        description: Option<String>,
        geometry: Geometry,
    },
    Remove {
        id: RecordId,
    },
    /// Lowest id that may still be issued
    Watermark {
        next_id: RecordId,
    },
}

/// Append-only file holding [`StoreCommand`] frames
pub struct AOFFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    sync_policy: SyncPolicy,
    /// Bytes of the next frame to write before failing, and whether to
    /// flush them to the file first
    #[cfg(test)]
    fail_next_append: Option<(usize, bool)>,
}

impl AOFFile {
    /// Open with the default sync policy
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_policy(path, SyncPolicy::default())
    }

    /// Open (creating if needed) with a custom sync policy
    pub fn open_with_policy<P: AsRef<Path>>(path: P, sync_policy: SyncPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (file, writer, size) = Self::open_handles(&path)?;

        Ok(AOFFile {
            file,
            writer,
            path,
            size,
            sync_policy,
            #[cfg(test)]
            fail_next_append: None,
        })
    }

    fn open_handles(path: &Path) -> Result<(File, BufWriter<File>, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;

        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);
        Ok((file, writer, size))
    }

    /// Current file size in bytes, buffered writes included
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync_policy
    }

    /// Append one command, then flush or fsync according to the policy.
    ///
    /// A failed append leaves neither buffered nor written bytes of the
    /// frame behind: the file is cut back to the end of the previous frame.
    pub fn append(&mut self, command: &StoreCommand) -> Result<()> {
        let frame = encode_frame(command)?;
        let committed = self.size;

        if let Err(e) = self.write_frame(&frame) {
            if let Err(rollback) = self.roll_back(committed) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back a partial AOF append"
                );
            }
            return Err(e);
        }

        self.size += frame.len() as u64;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        #[cfg(test)]
        if let Some((written, flushed)) = self.fail_next_append.take() {
            self.writer.write_all(&frame[..written.min(frame.len())])?;
            if flushed {
                self.writer.flush()?;
            }
            return Err(GeoStoreError::Io(std::io::Error::other(
                "simulated write failure",
            )));
        }

        self.writer.write_all(frame)?;
        match self.sync_policy {
            SyncPolicy::Never => {}
            SyncPolicy::Flush => self.writer.flush()?,
            SyncPolicy::Always => self.sync()?,
        }
        Ok(())
    }

    /// Restore the file to `committed` bytes after a failed append.
    ///
    /// File contents followed by the writer's buffer always form a prefix of
    /// the logical log, so buffered bytes of earlier frames are written out
    /// and everything past `committed` is dropped.
    fn roll_back(&mut self, committed: u64) -> Result<()> {
        let fresh = BufWriter::new(self.file.try_clone()?);
        let (_, buffered) = std::mem::replace(&mut self.writer, fresh).into_parts();
        let mut buffered = buffered.unwrap_or_else(|panicked| panicked.into_inner());

        let on_disk = self.file.metadata()?.len();
        if on_disk < committed {
            let missing = (committed - on_disk) as usize;
            let restored = if buffered.len() >= missing {
                buffered.truncate(missing);
                self.file.write_all(&buffered).map_err(GeoStoreError::from)
            } else {
                Err(GeoStoreError::UnexpectedEof)
            };
            if let Err(e) = restored {
                // Earlier unsynced frames are lost; cut back to a frame boundary.
                self.file.set_len(on_disk)?;
                self.size = on_disk;
                self.replay()?;
                return Err(e);
            }
        }

        self.file.set_len(committed)?;
        trace!(path = %self.path.display(), committed, "rolled back partial append");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fail_next_append(&mut self, written: usize, flushed: bool) {
        self.fail_next_append = Some((written, flushed));
    }

    /// Read every complete command from the start of the file.
    ///
    /// A partial frame at the tail (an interrupted append) ends the replay
    /// and is cut off so later appends land on a frame boundary. A frame
    /// that is complete but undecodable is an error.
    pub fn replay(&mut self) -> Result<Vec<StoreCommand>> {
        self.writer.flush()?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut reader = BufReader::new(&mut self.file);
        let mut commands = Vec::new();
        let mut valid_len: u64 = 0;
        let mut truncated = false;

        loop {
            match read_frame(&mut reader) {
                Ok(Some((command, frame_len))) => {
                    commands.push(command);
                    valid_len += frame_len;
                }
                Ok(None) => break,
                Err(GeoStoreError::UnexpectedEof) => {
                    truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if truncated {
            warn!(
                path = %self.path.display(),
                valid_len,
                file_len = self.size,
                "AOF ends in a partial frame, discarding the tail"
            );
            self.file.set_len(valid_len)?;
            self.size = valid_len;
        }

        Ok(commands)
    }

    /// Atomically replace the log with `commands`.
    ///
    /// The new log is written to `<path>.rewrite`, fsynced, then renamed
    /// over the live log.
    pub fn rewrite(&mut self, commands: &[StoreCommand]) -> Result<()> {
        self.writer.flush()?;

        let rewrite_path = rewrite_path(&self.path);
        {
            let file = File::create(&rewrite_path)?;
            let mut writer = BufWriter::new(file);
            for command in commands {
                writer.write_all(&encode_frame(command)?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        let old_size = self.size;
        std::fs::rename(&rewrite_path, &self.path)?;

        let (file, writer, size) = Self::open_handles(&self.path)?;
        self.file = file;
        self.writer = writer;
        self.size = size;

        info!(
            path = %self.path.display(),
            old_size,
            new_size = size,
            commands = commands.len(),
            "AOF compacted"
        );
        Ok(())
    }

    /// Flush buffered writes to the OS
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for AOFFile {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn rewrite_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".rewrite");
    PathBuf::from(name)
}

fn encode_frame(command: &StoreCommand) -> Result<Bytes> {
    let payload = bincode::serialize(command)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(GeoStoreError::Serialization(format!(
            "command of {} bytes exceeds the frame limit",
            payload.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Read one frame. `Ok(None)` at a clean end of file; `UnexpectedEof` when
/// the file ends inside a frame.
fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<(StoreCommand, u64)>> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }

    let mut len_buf = [0u8; 4];
    read_exact_or_eof(reader, &mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(GeoStoreError::InvalidFormat);
    }

    let mut payload = vec![0u8; len];
    read_exact_or_eof(reader, &mut payload)?;

    let command = bincode::deserialize(&payload)?;
    Ok(Some((command, 4 + len as u64)))
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => GeoStoreError::UnexpectedEof,
        _ => GeoStoreError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use crate::spatial::Point;
    use tempfile::NamedTempFile;

    fn insert_point(id: RecordId) -> StoreCommand {
        StoreCommand::Insert {
            id,
            name: format!("loc-{}", id),
            description: None,
            geometry: Geometry::Point(Point::new(id as f64, 1.0)),
        }
    }

    #[test]
    fn test_aof_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        let aof = AOFFile::open(temp_file.path()).unwrap();
        assert_eq!(aof.size(), 0);
        assert_eq!(aof.sync_policy(), SyncPolicy::Flush);
    }

    #[test]
    fn test_command_replay() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut aof = AOFFile::open(temp_file.path()).unwrap();

        let area = StoreCommand::Replace {
            id: 2,
            name: "park".to_string(),
            description: Some("green".to_string()),
            geometry: Geometry::Polygon(
                Polygon::from_coords(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]).unwrap(),
            ),
        };
        let commands = vec![
            StoreCommand::Watermark { next_id: 1 },
            insert_point(1),
            area,
            StoreCommand::Remove { id: 1 },
        ];
        for command in &commands {
            aof.append(command).unwrap();
        }
        assert!(aof.size() > 0);

        let replayed = aof.replay().unwrap();
        assert_eq!(replayed, commands);
    }

    #[test]
    fn test_truncated_tail_is_discarded() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let mut aof = AOFFile::open(temp_file.path()).unwrap();
            aof.append(&insert_point(1)).unwrap();
            aof.append(&insert_point(2)).unwrap();
        }

        // Cut the last frame in half.
        let full_len = std::fs::metadata(temp_file.path()).unwrap().len();
        let file = OpenOptions::new().write(true).open(temp_file.path()).unwrap();
        file.set_len(full_len - 5).unwrap();
        drop(file);

        let mut aof = AOFFile::open(temp_file.path()).unwrap();
        let replayed = aof.replay().unwrap();
        assert_eq!(replayed, vec![insert_point(1)]);

        // Appends after recovery are readable.
        aof.append(&insert_point(3)).unwrap();
        let replayed = aof.replay().unwrap();
        assert_eq!(replayed, vec![insert_point(1), insert_point(3)]);
    }

    #[test]
    fn test_failed_append_leaves_no_torn_frame() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut aof = AOFFile::open(temp_file.path()).unwrap();
        aof.append(&insert_point(1)).unwrap();
        let committed = aof.size();

        // Part of the frame reaches the file before the write fails.
        aof.fail_next_append(7, true);
        assert!(matches!(
            aof.append(&insert_point(2)),
            Err(GeoStoreError::Io(_))
        ));
        assert_eq!(aof.size(), committed);
        assert_eq!(
            std::fs::metadata(temp_file.path()).unwrap().len(),
            committed
        );

        aof.append(&insert_point(2)).unwrap();
        drop(aof);

        let mut aof = AOFFile::open(temp_file.path()).unwrap();
        assert_eq!(aof.replay().unwrap(), vec![insert_point(1), insert_point(2)]);
    }

    #[test]
    fn test_failed_append_discards_buffered_bytes() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut aof = AOFFile::open_with_policy(temp_file.path(), SyncPolicy::Never).unwrap();

        // Frame 1 is acknowledged but still buffered when frame 2 fails.
        aof.append(&insert_point(1)).unwrap();
        aof.fail_next_append(5, false);
        assert!(aof.append(&insert_point(2)).is_err());

        aof.append(&insert_point(3)).unwrap();
        aof.sync().unwrap();
        assert_eq!(
            std::fs::metadata(temp_file.path()).unwrap().len(),
            aof.size()
        );
        assert_eq!(aof.replay().unwrap(), vec![insert_point(1), insert_point(3)]);
    }

    #[test]
    fn test_corrupt_frame_is_an_error() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), [0u8, 0, 0, 2, 0xff, 0xff]).unwrap();

        let mut aof = AOFFile::open(temp_file.path()).unwrap();
        assert!(matches!(
            aof.replay(),
            Err(GeoStoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_rewrite_replaces_log() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut aof = AOFFile::open_with_policy(temp_file.path(), SyncPolicy::Always).unwrap();

        for id in 1..=20 {
            aof.append(&insert_point(id)).unwrap();
        }
        for id in 1..=19 {
            aof.append(&StoreCommand::Remove { id }).unwrap();
        }
        let before = aof.size();

        let compacted = vec![StoreCommand::Watermark { next_id: 21 }, insert_point(20)];
        aof.rewrite(&compacted).unwrap();

        assert!(aof.size() < before);
        assert!(!rewrite_path(temp_file.path()).exists());
        assert_eq!(aof.replay().unwrap(), compacted);

        aof.append(&StoreCommand::Remove { id: 20 }).unwrap();
        assert_eq!(aof.replay().unwrap().len(), 3);
    }
}
