//! Transparent gzip decompression
//!
//! A gzip file is recognized by its `1F 8B` magic. Its uncompressed size is
//! taken from the RFC 1952 trailer (last four bytes, little-endian), which
//! only holds the size modulo 2^32: files of 4 GiB or more report a wrapped
//! size.
//!
//! Seeking forward decompresses and discards data. Seeking backwards
//! restarts decompression from the beginning of the file.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
/// 10-byte header plus 8-byte trailer
const GZIP_MIN_LEN: u64 = 18;

/// Outcome of [`probe`]
pub enum Probe {
    Compressed(GzipStream),
    Plain(File),
}

/// Check `file` for gzip data.
///
/// Either way the file is handed back rewound to offset 0.
pub fn probe(mut file: File) -> io::Result<Probe> {
    let len = file.metadata()?.len();

    let mut magic = [0u8; 2];
    let is_gzip = len > GZIP_MIN_LEN && file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
    if !is_gzip {
        file.seek(SeekFrom::Start(0))?;
        return Ok(Probe::Plain(file));
    }

    let mut trailer = [0u8; 4];
    file.seek(SeekFrom::Start(len - 4))?;
    file.read_exact(&mut trailer)?;
    let uncompressed_size = u64::from(u32::from_le_bytes(trailer));
    file.seek(SeekFrom::Start(0))?;

    log::debug!(
        "gzip stream: {} bytes compressed, {} bytes uncompressed",
        len,
        uncompressed_size
    );
    Ok(Probe::Compressed(GzipStream::new(file, uncompressed_size)))
}

/// Decompressing reader with byte-accurate position tracking
pub struct GzipStream {
    decoder: Option<MultiGzDecoder<BufReader<File>>>,
    /// Uncompressed bytes consumed from the decoder
    position: u64,
    /// Bytes still to be skipped before the next read
    pending_skip: u64,
    uncompressed_size: u64,
}

impl GzipStream {
    fn new(file: File, uncompressed_size: u64) -> Self {
        Self {
            decoder: Some(MultiGzDecoder::new(BufReader::new(file))),
            position: 0,
            pending_skip: 0,
            uncompressed_size,
        }
    }

    /// Uncompressed size from the trailer
    pub fn size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Current uncompressed position
    pub fn tell(&self) -> u64 {
        self.position + self.pending_skip
    }

    /// Move to uncompressed offset `pos`.
    pub fn seek(&mut self, pos: u64) -> io::Result<u64> {
        if pos < self.position {
            self.rewind()?;
        }
        self.pending_skip = pos - self.position;
        Ok(pos)
    }

    fn decoder(&mut self) -> io::Result<&mut MultiGzDecoder<BufReader<File>>> {
        self.decoder
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "gzip stream lost after a failed rewind"))
    }

    fn rewind(&mut self) -> io::Result<()> {
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "gzip stream lost after a failed rewind"))?;
        let mut reader = decoder.into_inner();
        reader.seek(SeekFrom::Start(0))?;
        self.decoder = Some(MultiGzDecoder::new(reader));
        self.position = 0;
        self.pending_skip = 0;
        Ok(())
    }

    fn skip_pending(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 8192];
        while self.pending_skip > 0 {
            let want = self.pending_skip.min(scratch.len() as u64) as usize;
            let n = match self.decoder()?.read(&mut scratch[..want]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                // Seeked past the end
                self.pending_skip = 0;
                break;
            }
            self.position += n as u64;
            self.pending_skip -= n as u64;
        }
        Ok(())
    }
}

impl Read for GzipStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.skip_pending()?;
        let n = self.decoder()?.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn gzip_file(content: &[u8]) -> NamedTempFile {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        let compressed = encoder.finish().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&compressed).unwrap();
        file.flush().unwrap();
        file
    }

    fn open_stream(file: &NamedTempFile) -> GzipStream {
        match probe(File::open(file.path()).unwrap()).unwrap() {
            Probe::Compressed(stream) => stream,
            Probe::Plain(_) => panic!("not detected as gzip"),
        }
    }

    fn content() -> Vec<u8> {
        (0..100_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect()
    }

    #[test]
    fn test_plain_file_is_rewound() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"plain text that is long enough").unwrap();
        file.flush().unwrap();

        match probe(File::open(file.path()).unwrap()).unwrap() {
            Probe::Plain(mut f) => {
                let mut s = String::new();
                f.read_to_string(&mut s).unwrap();
                assert_eq!(s, "plain text that is long enough");
            }
            Probe::Compressed(_) => panic!("plain file detected as gzip"),
        }
    }

    #[test]
    fn test_tiny_file_with_magic_is_plain() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0x1F, 0x8B, 0x08, 0, 0, 0]).unwrap();
        file.flush().unwrap();
        assert!(matches!(probe(File::open(file.path()).unwrap()).unwrap(), Probe::Plain(_)));
    }

    #[test]
    fn test_decompresses_like_reference() {
        let data = content();
        let file = gzip_file(&data);
        let mut stream = open_stream(&file);
        assert_eq!(stream.size(), data.len() as u64);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(stream.tell(), data.len() as u64);
    }

    #[test]
    fn test_seek_forward_and_back() {
        let data = content();
        let file = gzip_file(&data);
        let mut stream = open_stream(&file);

        stream.seek(250_000).unwrap();
        assert_eq!(stream.tell(), 250_000);
        let mut buf = [0u8; 16];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &data[250_000..250_016]);

        stream.seek(10).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &data[10..26]);
        assert_eq!(stream.tell(), 26);
        assert_eq!(stream.size(), data.len() as u64);
    }

    #[test]
    fn test_seek_past_end() {
        let file = gzip_file(b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        let mut stream = open_stream(&file);
        stream.seek(100).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.tell(), 26);
    }

    #[test]
    fn test_concatenated_members() {
        let mut bytes = Vec::new();
        for part in [&b"first member, "[..], &b"second member"[..]] {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(part).unwrap();
            bytes.extend(encoder.finish().unwrap());
        }
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let mut stream = open_stream(&file);
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "first member, second member");
        // The trailer only describes the last member
        assert_eq!(stream.size(), 13);
    }
}
