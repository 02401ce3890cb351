//! Streaming ZIP archive writer.
//!
//! Entries are written front to back without seeking: every file's local
//! header announces a data descriptor and a ZIP64 extra field, and the CRC
//! and 8-byte sizes follow the compressed data. The central directory is
//! assembled in memory and emitted by [`ZipWriter::finish`], switching to
//! ZIP64 records only when a count, size or offset does not fit the
//! classic fields.

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use std::collections::HashSet;
use std::io::{self, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::{Error, Result};

use super::structures::*;

/// Bytes read from a source per compression step.
const CHUNK_SIZE: usize = 64 * 1024;

/// Unix mode bits stored in the high half of the external attributes.
const FILE_MODE: u32 = 0o100644;
const DIR_MODE: u32 = 0o040755;
/// MS-DOS directory attribute.
const DOS_DIRECTORY: u32 = 0x10;

/// Central directory record kept until the archive is finished.
struct CentralRecord {
    name: String,
    method: CompressionMethod,
    flags: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
    dos: DosDateTime,
    /// Unix mtime for the extended timestamp field, when it fits one
    modified: Option<u32>,
    external_attrs: u32,
}

impl CentralRecord {
    fn needs_zip64(&self) -> bool {
        self.compressed_size >= ZIP64_SIZE_LIMIT
            || self.uncompressed_size >= ZIP64_SIZE_LIMIT
            || self.lfh_offset >= ZIP64_SIZE_LIMIT
    }

    /// Streamed entries announce ZIP64 up front, their size is unknown
    /// when the local header is written.
    fn is_streamed(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    fn version_needed(&self) -> u16 {
        if self.is_streamed() || self.needs_zip64() {
            VERSION_ZIP64
        } else {
            VERSION_DEFAULT
        }
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut zip64 = Vec::new();
        for value in [self.uncompressed_size, self.compressed_size, self.lfh_offset] {
            if value >= ZIP64_SIZE_LIMIT {
                zip64.write_u64::<LittleEndian>(value)?;
            }
        }

        let mut extra = Vec::new();
        if !zip64.is_empty() {
            extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            extra.write_u16::<LittleEndian>(zip64.len() as u16)?;
            extra.extend_from_slice(&zip64);
        }
        write_timestamp_extra(&mut extra, self.modified)?;

        w.write_all(CDFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
        w.write_u16::<LittleEndian>(self.version_needed())?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method.as_u16())?;
        w.write_u16::<LittleEndian>(self.dos.time)?;
        w.write_u16::<LittleEndian>(self.dos.date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(saturate(self.compressed_size))?;
        w.write_u32::<LittleEndian>(saturate(self.uncompressed_size))?;
        w.write_u16::<LittleEndian>(self.name.len() as u16)?;
        w.write_u16::<LittleEndian>(extra.len() as u16)?;
        w.write_u16::<LittleEndian>(0)?; // comment
        w.write_u16::<LittleEndian>(0)?; // disk number start
        w.write_u16::<LittleEndian>(0)?; // internal attributes
        w.write_u32::<LittleEndian>(self.external_attrs)?;
        w.write_u32::<LittleEndian>(saturate(self.lfh_offset))?;
        w.write_all(self.name.as_bytes())?;
        w.write_all(&extra)
    }
}

fn saturate(value: u64) -> u32 {
    value.min(ZIP64_SIZE_LIMIT) as u32
}

fn write_timestamp_extra<W: Write>(w: &mut W, modified: Option<u32>) -> io::Result<()> {
    let Some(modified) = modified else {
        return Ok(());
    };
    w.write_u16::<LittleEndian>(EXTENDED_TIMESTAMP_ID)?;
    w.write_u16::<LittleEndian>(5)?;
    w.write_u8(0x01)?; // mtime present
    w.write_u32::<LittleEndian>(modified)
}

/// The extended timestamp holds a signed 32-bit mtime; times outside
/// `0..=i32::MAX` are left to the DOS fields.
fn unix_seconds(at: DateTime<Utc>) -> Option<u32> {
    u32::try_from(at.timestamp())
        .ok()
        .filter(|secs| *secs <= i32::MAX as u32)
}

/// Data descriptor for a streamed entry. Sizes are always 8 bytes wide,
/// matching the ZIP64 extra announced in its local header.
fn data_descriptor(
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
) -> io::Result<Vec<u8>> {
    let mut descriptor = Vec::with_capacity(24);
    descriptor.extend_from_slice(DATA_DESCRIPTOR_SIGNATURE);
    descriptor.write_u32::<LittleEndian>(crc32)?;
    descriptor.write_u64::<LittleEndian>(compressed_size)?;
    descriptor.write_u64::<LittleEndian>(uncompressed_size)?;
    Ok(descriptor)
}

/// Writes a ZIP archive to any async sink.
pub struct ZipWriter<W> {
    inner: W,
    offset: u64,
    central: Vec<CentralRecord>,
    names: HashSet<String>,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            offset: 0,
            central: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Whether an entry with exactly this name was already written.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of entries written so far.
    pub fn len(&self) -> usize {
        self.central.len()
    }

    pub fn is_empty(&self) -> bool {
        self.central.is_empty()
    }

    /// Add an empty directory entry.
    ///
    /// # Arguments
    ///
    /// * `name` - Entry name, ending with `/`
    /// * `modified` - Modification time recorded for the entry
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEntryName`] for a name without the trailing slash,
    /// [`Error::DuplicateEntry`] if the name was already written.
    pub async fn add_directory(&mut self, name: &str, modified: DateTime<Utc>) -> Result<()> {
        if !name.ends_with('/') {
            return Err(Error::InvalidEntryName {
                name: name.to_string(),
                reason: "directory names end with '/'",
            });
        }
        self.claim(name)?;

        let record = CentralRecord {
            name: name.to_string(),
            method: CompressionMethod::Stored,
            flags: FLAG_UTF8,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            lfh_offset: self.offset,
            dos: DosDateTime::from_datetime(modified),
            modified: unix_seconds(modified),
            external_attrs: (DIR_MODE << 16) | DOS_DIRECTORY,
        };
        self.write_local_header(&record).await?;
        self.central.push(record);
        Ok(())
    }

    /// Deflate everything `source` yields into a new entry.
    ///
    /// # Arguments
    ///
    /// * `name` - Entry name; non-empty and not ending with `/`
    /// * `modified` - Modification time recorded for the entry
    /// * `source` - Reader drained until EOF
    ///
    /// # Returns
    ///
    /// The number of uncompressed bytes stored. Errors from the source,
    /// including `Interrupted`, abort the entry and are returned as they are.
    pub async fn add_file<S>(
        &mut self,
        name: &str,
        modified: DateTime<Utc>,
        source: &mut S,
    ) -> Result<u64>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        if name.is_empty() || name.ends_with('/') {
            return Err(Error::InvalidEntryName {
                name: name.to_string(),
                reason: "file names must be non-empty and not end with '/'",
            });
        }
        self.claim(name)?;

        let mut record = CentralRecord {
            name: name.to_string(),
            method: CompressionMethod::Deflate,
            flags: FLAG_UTF8 | FLAG_DATA_DESCRIPTOR,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            lfh_offset: self.offset,
            dos: DosDateTime::from_datetime(modified),
            modified: unix_seconds(modified),
            external_attrs: FILE_MODE << 16,
        };
        self.write_local_header(&record).await?;

        let mut compress = Compress::new(Compression::default(), false);
        let mut crc = Crc::new();
        let mut input = vec![0u8; CHUNK_SIZE];
        let mut output = Vec::with_capacity(CHUNK_SIZE);
        let mut uncompressed = 0u64;

        loop {
            let n = source.read(&mut input).await?;
            if n == 0 {
                break;
            }
            crc.update(&input[..n]);
            uncompressed += n as u64;

            let mut pos = 0;
            while pos < n {
                output.clear();
                let before = compress.total_in();
                compress
                    .compress_vec(&input[pos..n], &mut output, FlushCompress::None)
                    .map_err(io::Error::other)?;
                pos += (compress.total_in() - before) as usize;
                self.write_all(&output).await?;
            }
        }

        loop {
            output.clear();
            let status = compress
                .compress_vec(&[], &mut output, FlushCompress::Finish)
                .map_err(io::Error::other)?;
            self.write_all(&output).await?;
            if status == Status::StreamEnd {
                break;
            }
        }

        record.crc32 = crc.sum();
        record.compressed_size = compress.total_out();
        record.uncompressed_size = uncompressed;

        let descriptor =
            data_descriptor(record.crc32, record.compressed_size, record.uncompressed_size)?;
        self.write_all(&descriptor).await?;

        self.central.push(record);
        Ok(uncompressed)
    }

    /// Write the central directory and end records, then hand back the sink.
    ///
    /// # Returns
    ///
    /// The underlying sink, flushed but not synced to disk.
    pub async fn finish(mut self) -> Result<W> {
        let cd_offset = self.offset;
        let mut directory = Vec::new();
        for record in &self.central {
            record.write_to(&mut directory)?;
        }
        let cd_size = directory.len() as u64;
        let total = self.central.len() as u64;

        let mut tail = Vec::new();
        if total >= ZIP64_COUNT_LIMIT
            || cd_size >= ZIP64_SIZE_LIMIT
            || cd_offset >= ZIP64_SIZE_LIMIT
        {
            let eocd64_offset = cd_offset + cd_size;
            Zip64EOCD::new(total, cd_size, cd_offset).write_to(&mut tail)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            }
            .write_to(&mut tail)?;
        }
        EndOfCentralDirectory::new(total, cd_size, cd_offset).write_to(&mut tail)?;

        self.write_all(&directory).await?;
        self.write_all(&tail).await?;
        tokio::io::AsyncWriteExt::flush(&mut self.inner).await?;
        Ok(self.inner)
    }

    fn claim(&mut self, name: &str) -> Result<()> {
        if name.len() > u16::MAX as usize {
            return Err(Error::InvalidEntryName {
                name: name.to_string(),
                reason: "longer than 65535 bytes",
            });
        }
        if !self.names.insert(name.to_string()) {
            return Err(Error::DuplicateEntry {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn write_local_header(&mut self, record: &CentralRecord) -> Result<()> {
        let mut extra = Vec::with_capacity(29);
        // sizes of a streamed entry follow in an 8-byte data descriptor
        let size_field = if record.is_streamed() {
            extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            extra.write_u16::<LittleEndian>(16)?;
            extra.write_u64::<LittleEndian>(0)?;
            extra.write_u64::<LittleEndian>(0)?;
            ZIP64_SIZE_LIMIT as u32
        } else {
            0
        };
        write_timestamp_extra(&mut extra, record.modified)?;

        let mut header = Vec::with_capacity(LFH_SIZE + record.name.len() + extra.len());
        header.extend_from_slice(LFH_SIGNATURE);
        header.write_u16::<LittleEndian>(record.version_needed())?;
        header.write_u16::<LittleEndian>(record.flags)?;
        header.write_u16::<LittleEndian>(record.method.as_u16())?;
        header.write_u16::<LittleEndian>(record.dos.time)?;
        header.write_u16::<LittleEndian>(record.dos.date)?;
        header.write_u32::<LittleEndian>(record.crc32)?;
        header.write_u32::<LittleEndian>(size_field)?;
        header.write_u32::<LittleEndian>(size_field)?;
        header.write_u16::<LittleEndian>(record.name.len() as u16)?;
        header.write_u16::<LittleEndian>(extra.len() as u16)?;
        header.extend_from_slice(record.name.as_bytes());
        header.extend_from_slice(&extra);

        self.write_all(&header).await
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        tokio::io::AsyncWriteExt::write_all(&mut self.inner, data).await?;
        self.offset += data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::testing::MemoryReader;
    use crate::zip::{EntryReader, ZipParser};
    use crate::zip::parser::parse_cdfh;
    use chrono::TimeZone;
    use std::io::Cursor;
    use std::sync::Arc;

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 5, 6, 7, 8, 10).unwrap()
    }

    async fn read_entry(archive: &[u8], name: &str) -> Vec<u8> {
        let reader = Arc::new(MemoryReader(archive.to_vec()));
        let parser = ZipParser::new(Arc::clone(&reader));
        let entry = parser.find_entry(name).await.unwrap().unwrap();
        let offset = parser.get_data_offset(&entry).await.unwrap();
        let mut stream = EntryReader::new(reader, &entry, offset).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn writes_files_and_directories() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.add_directory("docs/", when()).await.unwrap();
        let body = b"hello, archive".repeat(1000);
        let written = writer
            .add_file("docs/readme.txt", when(), &mut body.as_slice())
            .await
            .unwrap();
        assert_eq!(written, body.len() as u64);
        writer
            .add_file("empty.txt", when(), &mut &b""[..])
            .await
            .unwrap();
        assert_eq!(writer.len(), 3);
        let archive = writer.finish().await.unwrap();

        let parser = ZipParser::new(Arc::new(MemoryReader(archive.clone())));
        let entries = parser.list_files().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["docs/", "docs/readme.txt", "empty.txt"]);

        assert!(entries[0].is_directory);
        assert_eq!(entries[1].compression_method, CompressionMethod::Deflate);
        assert!(entries[1].compressed_size < body.len() as u64);
        assert_eq!(entries[1].modified, Some(when().timestamp()));
        assert_eq!(entries[1].mod_date(), (2014, 5, 6));
        assert_eq!(entries[1].mod_time(), (7, 8, 10));

        assert_eq!(read_entry(&archive, "docs/readme.txt").await, body);
        assert!(read_entry(&archive, "empty.txt").await.is_empty());
    }

    #[tokio::test]
    async fn rejects_duplicates_and_bad_names() {
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_file("a.txt", when(), &mut &b"1"[..])
            .await
            .unwrap();
        assert!(writer.contains("a.txt"));

        let err = writer
            .add_file("a.txt", when(), &mut &b"2"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateEntry { .. }));

        let err = writer.add_directory("dir", when()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidEntryName { .. }));

        let err = writer
            .add_file("dir/", when(), &mut &b""[..])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntryName { .. }));
    }

    #[tokio::test]
    async fn switches_to_zip64_for_many_entries() {
        let mut writer = ZipWriter::new(Vec::new());
        for i in 0..70_000u32 {
            writer
                .add_directory(&format!("d{i}/"), when())
                .await
                .unwrap();
        }
        let archive = writer.finish().await.unwrap();

        let parser = ZipParser::new(Arc::new(MemoryReader(archive)));
        let (eocd, _) = parser.find_eocd().await.unwrap();
        assert!(eocd.is_zip64());

        let entries = parser.list_files().await.unwrap();
        assert_eq!(entries.len(), 70_000);
        assert_eq!(entries[69_999].file_name, "d69999/");
    }

    #[tokio::test]
    async fn streamed_entries_announce_zip64_sizes() {
        let mut writer = ZipWriter::new(Vec::new());
        let body = b"streamed body".repeat(50);
        writer
            .add_file("a.txt", when(), &mut body.as_slice())
            .await
            .unwrap();
        let archive = writer.finish().await.unwrap();

        // local header: version 4.5, saturated sizes, ZIP64 extra with both sizes
        assert_eq!(&archive[..4], LFH_SIGNATURE);
        assert_eq!(u16::from_le_bytes([archive[4], archive[5]]), VERSION_ZIP64);
        assert_eq!(&archive[18..26], &[0xFF; 8]);
        let name_len = u16::from_le_bytes([archive[26], archive[27]]) as usize;
        let extra = &archive[LFH_SIZE + name_len..];
        assert_eq!(u16::from_le_bytes([extra[0], extra[1]]), ZIP64_EXTRA_ID);
        assert_eq!(u16::from_le_bytes([extra[2], extra[3]]), 16);

        // the descriptor after the data carries 8-byte sizes
        let parser = ZipParser::new(Arc::new(MemoryReader(archive.clone())));
        let entry = parser.find_entry("a.txt").await.unwrap().unwrap();
        let data_offset = parser.get_data_offset(&entry).await.unwrap();
        let at = (data_offset + entry.compressed_size) as usize;
        let expected =
            data_descriptor(entry.crc32, entry.compressed_size, entry.uncompressed_size).unwrap();
        assert_eq!(&archive[at..at + 24], expected.as_slice());
        assert_eq!(&archive[at + 24..at + 28], CDFH_SIGNATURE);
        assert_eq!(read_entry(&archive, "a.txt").await, body);
    }

    #[test]
    fn oversized_entries_round_trip_through_the_central_directory() {
        let record = CentralRecord {
            name: "huge.bin".to_string(),
            method: CompressionMethod::Deflate,
            flags: FLAG_UTF8 | FLAG_DATA_DESCRIPTOR,
            crc32: 0xDEAD_BEEF,
            compressed_size: 5 << 30,
            uncompressed_size: 6 << 30,
            lfh_offset: 7 << 30,
            dos: DosDateTime::from_datetime(when()),
            modified: unix_seconds(when()),
            external_attrs: FILE_MODE << 16,
        };
        assert!(record.needs_zip64());

        let mut directory = Vec::new();
        record.write_to(&mut directory).unwrap();
        let entry = parse_cdfh(&mut Cursor::new(directory.as_slice())).unwrap();
        assert_eq!(entry.compressed_size, 5 << 30);
        assert_eq!(entry.uncompressed_size, 6 << 30);
        assert_eq!(entry.lfh_offset, 7 << 30);
        assert_eq!(entry.modified, Some(when().timestamp()));

        let descriptor = data_descriptor(record.crc32, 5 << 30, 6 << 30).unwrap();
        assert_eq!(descriptor.len(), 24);
        assert_eq!(&descriptor[8..16], &(5u64 << 30).to_le_bytes());
        assert_eq!(&descriptor[16..24], &(6u64 << 30).to_le_bytes());
    }

    #[tokio::test]
    async fn times_past_2038_fall_back_to_dos_fields() {
        let late = Utc.with_ymd_and_hms(2100, 1, 2, 3, 4, 6).unwrap();
        assert_eq!(unix_seconds(late), None);

        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_file("late.txt", late, &mut &b"x"[..])
            .await
            .unwrap();
        let archive = writer.finish().await.unwrap();

        let parser = ZipParser::new(Arc::new(MemoryReader(archive)));
        let entry = parser.find_entry("late.txt").await.unwrap().unwrap();
        assert_eq!(entry.modified, None);
        assert_eq!(entry.last_modified_millis(), late.timestamp_millis());
    }

    #[test]
    fn extended_timestamps_are_signed() {
        let record = CentralRecord {
            name: "old.txt".to_string(),
            method: CompressionMethod::Stored,
            flags: FLAG_UTF8,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            lfh_offset: 0,
            dos: DosDateTime::from_datetime(when()),
            modified: Some(u32::MAX),
            external_attrs: FILE_MODE << 16,
        };
        let mut directory = Vec::new();
        record.write_to(&mut directory).unwrap();
        let entry = parse_cdfh(&mut Cursor::new(directory.as_slice())).unwrap();
        assert_eq!(entry.modified, Some(-1));
    }
}
