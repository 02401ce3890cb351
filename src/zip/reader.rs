//! Streaming access to a single entry's decompressed bytes.

use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::{CompressionMethod, ZipFileEntry};

/// Compressed bytes fetched from the source per read.
const CHUNK_SIZE: u64 = 64 * 1024;

type Fetch = Pin<Box<dyn Future<Output = io::Result<Vec<u8>>> + Send>>;

/// Reader over one entry of an archive.
///
/// Holds its own reference to the archive source, so the underlying file
/// stays open exactly as long as the reader lives. Data is fetched lazily
/// in bounded chunks and inflated on the fly; the CRC-32 and length are
/// checked once the entry is exhausted.
pub struct EntryReader<R: ReadAt + 'static> {
    reader: Arc<R>,
    name: String,
    method: CompressionMethod,
    /// Next compressed byte to fetch
    next_offset: u64,
    end_offset: u64,
    input: Vec<u8>,
    consumed: usize,
    fetch: Option<Fetch>,
    inflater: Decompress,
    crc: Crc,
    produced: u64,
    expected_crc: u32,
    expected_size: u64,
    done: bool,
}

impl<R: ReadAt + 'static> EntryReader<R> {
    /// Create a reader for `entry`, whose data begins at `data_offset`.
    pub fn new(reader: Arc<R>, entry: &ZipFileEntry, data_offset: u64) -> Result<Self> {
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(Error::UnsupportedCompression(method));
        }

        Ok(Self {
            reader,
            name: entry.file_name.clone(),
            // an empty body needs no inflating, whatever the header says
            method: if entry.compressed_size == 0 {
                CompressionMethod::Stored
            } else {
                entry.compression_method
            },
            next_offset: data_offset,
            end_offset: data_offset + entry.compressed_size,
            input: Vec::new(),
            consumed: 0,
            fetch: None,
            // raw deflate, no zlib header
            inflater: Decompress::new(false),
            crc: Crc::new(),
            produced: 0,
            expected_crc: entry.crc32,
            expected_size: entry.uncompressed_size,
            done: false,
        })
    }

    /// Name of the entry being read.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed size recorded in the central directory.
    pub fn size(&self) -> u64 {
        self.expected_size
    }

    fn poll_fetch(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.fetch.is_none() {
            let reader = Arc::clone(&self.reader);
            let offset = self.next_offset;
            let len = CHUNK_SIZE.min(self.end_offset - offset) as usize;
            self.fetch = Some(Box::pin(async move {
                let mut chunk = vec![0u8; len];
                reader.read_exact_at(offset, &mut chunk).await?;
                Ok(chunk)
            }));
        }

        let Some(fetch) = self.fetch.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let chunk = ready!(fetch.as_mut().poll(cx));
        self.fetch = None;

        let chunk = chunk?;
        self.next_offset += chunk.len() as u64;
        self.input = chunk;
        self.consumed = 0;
        Poll::Ready(Ok(()))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.done = true;
        self.input = Vec::new();

        if self.produced != self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{}: expected {} bytes, read {}",
                    self.name, self.expected_size, self.produced
                ),
            ));
        }
        if self.crc.sum() != self.expected_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: CRC-32 mismatch", self.name),
            ));
        }
        Ok(())
    }
}

impl<R: ReadAt + 'static> AsyncRead for EntryReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.done || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.consumed == this.input.len() && this.next_offset < this.end_offset {
                ready!(this.poll_fetch(cx))?;
            }

            let exhausted =
                this.consumed == this.input.len() && this.next_offset >= this.end_offset;

            match this.method {
                CompressionMethod::Stored => {
                    if exhausted {
                        this.finish()?;
                        return Poll::Ready(Ok(()));
                    }
                    let n = (this.input.len() - this.consumed).min(buf.remaining());
                    let data = &this.input[this.consumed..this.consumed + n];
                    buf.put_slice(data);
                    this.crc.update(data);
                    this.produced += n as u64;
                    this.consumed += n;
                    return Poll::Ready(Ok(()));
                }
                _ => {
                    let out = buf.initialize_unfilled();
                    let before_in = this.inflater.total_in();
                    let before_out = this.inflater.total_out();
                    let status = this
                        .inflater
                        .decompress(&this.input[this.consumed..], out, FlushDecompress::None)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    let read = (this.inflater.total_in() - before_in) as usize;
                    let written = (this.inflater.total_out() - before_out) as usize;

                    this.consumed += read;
                    if written > 0 {
                        this.crc.update(&out[..written]);
                        this.produced += written as u64;
                        buf.advance(written);
                    }

                    if status == Status::StreamEnd {
                        this.finish()?;
                        return Poll::Ready(Ok(()));
                    }
                    if written > 0 {
                        return Poll::Ready(Ok(()));
                    }
                    if read == 0 && (exhausted || this.consumed < this.input.len()) {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("{}: truncated deflate stream", this.name),
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::testing::MemoryReader;
    use flate2::{Compress, Compression, FlushCompress};
    use tokio::io::AsyncReadExt;

    fn crc_of(data: &[u8]) -> u32 {
        let mut crc = Crc::new();
        crc.update(data);
        crc.sum()
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut compress = Compress::new(Compression::default(), false);
        let mut out = Vec::with_capacity(data.len() + 64);
        compress
            .compress_vec(data, &mut out, FlushCompress::Finish)
            .unwrap();
        out
    }

    fn entry(method: CompressionMethod, data: &[u8], compressed: &[u8]) -> ZipFileEntry {
        ZipFileEntry {
            file_name: "data.bin".to_string(),
            compression_method: method,
            compressed_size: compressed.len() as u64,
            uncompressed_size: data.len() as u64,
            crc32: crc_of(data),
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            modified: None,
            is_directory: false,
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn reads_stored_data_across_chunks() {
        let data = sample(CHUNK_SIZE as usize * 2 + 17);
        let mut source = b"junk".to_vec();
        source.extend_from_slice(&data);

        let entry = entry(CompressionMethod::Stored, &data, &data);
        let mut reader = EntryReader::new(Arc::new(MemoryReader(source)), &entry, 4).unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn inflates_deflate_data() {
        let data = sample(300_000);
        let compressed = deflate(&data);

        let entry = entry(CompressionMethod::Deflate, &data, &compressed);
        let mut reader = EntryReader::new(Arc::new(MemoryReader(compressed)), &entry, 0).unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), data.len());
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn detects_crc_mismatch() {
        let data = b"hello world".to_vec();
        let mut entry = entry(CompressionMethod::Stored, &data, &data);
        entry.crc32 ^= 1;

        let mut reader = EntryReader::new(Arc::new(MemoryReader(data)), &entry, 0).unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn detects_truncated_deflate() {
        let data = sample(10_000);
        let compressed = deflate(&data);
        let cut = &compressed[..compressed.len() / 2];

        let entry = entry(CompressionMethod::Deflate, &data, cut);
        let mut reader = EntryReader::new(Arc::new(MemoryReader(cut.to_vec())), &entry, 0).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).await.is_err());
    }

    #[test]
    fn rejects_unknown_methods() {
        let entry = entry(CompressionMethod::Unknown(12), b"", b"");
        let result = EntryReader::new(Arc::new(MemoryReader(Vec::new())), &entry, 0);
        assert!(matches!(result, Err(Error::UnsupportedCompression(12))));
    }
}
