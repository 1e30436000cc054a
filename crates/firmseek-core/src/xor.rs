//! Rotating-key XOR transform for downloaded firmware images.
//!
//! Input is processed in blocks as long as the key. Each block is XORed with
//! the current key, then the key is rotated left by one byte. A short final
//! block uses the key's leading bytes. Applying the transform twice with the
//! same initial key restores the input.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Key shipped with the vendor's image format
pub const DEFAULT_KEY_HEX: &str = "BA CD BC FE D6 CA DD D3 BA B9 A3 AB BF CB B5 BE";

/// A non-empty key that rotates after every block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatingKey {
    bytes: Vec<u8>,
}

impl RotatingKey {
    /// Creates a key from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(Error::invalid_key("key must not be empty"));
        }
        Ok(Self { bytes })
    }

    /// Parses a hex key; whitespace between digits is ignored
    pub fn from_hex(input: &str) -> Result<Self> {
        let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&digits)
            .map_err(|e| Error::invalid_key(format!("'{}' is not valid hex: {}", input, e)))?;
        Self::new(bytes)
    }

    /// Key length, which is also the block size
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; empty keys are rejected at construction
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Key bytes in their current rotation
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn rotate(&mut self) {
        self.bytes.rotate_left(1);
    }
}

impl Default for RotatingKey {
    fn default() -> Self {
        Self {
            bytes: vec![
                0xBA, 0xCD, 0xBC, 0xFE, 0xD6, 0xCA, 0xDD, 0xD3, 0xBA, 0xB9, 0xA3, 0xAB, 0xBF,
                0xCB, 0xB5, 0xBE,
            ],
        }
    }
}

/// Reads until `buf` is full or the input ends; returns bytes read
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Streams `reader` through the transform into `writer`.
///
/// `key` is consumed because its rotation state is meaningless afterwards.
/// Returns the number of bytes written.
pub fn transform<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    key: RotatingKey,
) -> Result<u64> {
    pump(reader, writer, key, Error::StreamRead, Error::StreamWrite)
}

fn pump<R, W, E>(
    reader: &mut R,
    writer: &mut W,
    mut key: RotatingKey,
    read_err: impl Fn(std::io::Error) -> E,
    write_err: impl Fn(std::io::Error) -> E,
) -> std::result::Result<u64, E>
where
    R: Read,
    W: Write,
{
    let mut block = vec![0u8; key.len()];
    let mut written = 0u64;

    loop {
        let n = read_block(reader, &mut block).map_err(&read_err)?;
        if n == 0 {
            break;
        }
        for (byte, k) in block[..n].iter_mut().zip(key.as_bytes()) {
            *byte ^= k;
        }
        writer.write_all(&block[..n]).map_err(&write_err)?;
        written += n as u64;
        key.rotate();

        if n < block.len() {
            break;
        }
    }

    writer.flush().map_err(&write_err)?;
    Ok(written)
}

/// Applies [`transform`] from `input` to `output`
pub fn transform_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    key: RotatingKey,
) -> Result<u64> {
    let (input, output) = (input.as_ref(), output.as_ref());
    debug!(key_len = key.len(), "transforming {}", input.display());

    let mut reader = BufReader::new(File::open(input).map_err(|e| Error::file_read(input, e))?);
    let mut writer =
        BufWriter::new(File::create(output).map_err(|e| Error::file_write(output, e))?);

    let written = pump(
        &mut reader,
        &mut writer,
        key,
        |e| Error::file_read(input, e),
        |e| Error::file_write(output, e),
    )?;

    info!(
        bytes = written,
        "wrote {} -> {}",
        input.display(),
        output.display()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn run(data: &[u8], key: &RotatingKey) -> Vec<u8> {
        let mut out = Vec::new();
        transform(&mut Cursor::new(data), &mut out, key.clone()).unwrap();
        out
    }

    #[test]
    fn test_key_rotates_after_each_block() {
        let key = RotatingKey::new(vec![0x01, 0x02, 0x03]).unwrap();
        let out = run(&[0u8; 7], &key);
        assert_eq!(out, [0x01, 0x02, 0x03, 0x02, 0x03, 0x01, 0x03]);
    }

    #[test]
    fn test_roundtrip_with_partial_block() {
        let key = RotatingKey::default();
        let plain: Vec<u8> = (0..=255u8).cycle().take(16 * 5 + 7).collect();

        let cipher = run(&plain, &key);
        assert_ne!(cipher, plain);
        assert_eq!(cipher.len(), plain.len());
        assert_eq!(run(&cipher, &key), plain);
    }

    #[test]
    fn test_empty_input() {
        assert!(run(&[], &RotatingKey::default()).is_empty());
    }

    #[test]
    fn test_from_hex() {
        assert_eq!(RotatingKey::from_hex(DEFAULT_KEY_HEX).unwrap(), RotatingKey::default());
        assert_eq!(
            RotatingKey::from_hex("0aff").unwrap().as_bytes(),
            &[0x0A, 0xFF]
        );
        assert!(RotatingKey::from_hex("").is_err());
        assert!(RotatingKey::from_hex("abc").is_err());
        assert!(matches!(
            RotatingKey::from_hex("zz").unwrap_err(),
            Error::InvalidKey(_)
        ));
    }

    /// Yields at most three bytes per read
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3).min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_short_reads_keep_block_alignment() {
        let key = RotatingKey::from_hex("01 02 03 04 05").unwrap();
        let plain = b"short reads must not shift block boundaries";

        let mut trickled = Vec::new();
        transform(&mut Trickle(plain), &mut trickled, key.clone()).unwrap();

        assert_eq!(trickled, run(plain, &key));
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(ErrorKind::BrokenPipe.into())
        }
    }

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stream_errors_name_their_side() {
        let key = RotatingKey::default();

        let err = transform(&mut Broken, &mut Vec::new(), key.clone()).unwrap_err();
        assert!(matches!(err, Error::StreamRead(_)));

        let err = transform(&mut Cursor::new(b"data"), &mut Broken, key).unwrap_err();
        assert!(matches!(err, Error::StreamWrite(_)));
    }

    #[test]
    fn test_transform_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("fw.enc");
        let output = dir.path().join("fw.bin");
        std::fs::write(&input, b"firmware image").unwrap();

        let written = transform_file(&input, &output, RotatingKey::default()).unwrap();

        assert_eq!(written, 14);
        assert_eq!(
            std::fs::read(&output).unwrap(),
            run(b"firmware image", &RotatingKey::default())
        );
        assert!(matches!(
            transform_file(dir.path().join("missing"), &output, RotatingKey::default()),
            Err(Error::FileRead { .. })
        ));
    }
}
