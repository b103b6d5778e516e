use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, WireError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Default maximum length-prefixed string size: 16 MiB.
pub const DEFAULT_MAX_STRING: usize = 16 * 1024 * 1024;

/// Default maximum count for argument lists and free batches.
pub const DEFAULT_MAX_BATCH: usize = 65_536;

/// Limits applied while decoding length prefixes.
///
/// All integers on the wire are big-endian; this is the one fixed byte order
/// both endpoints of a build must agree on.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Maximum string payload size in bytes. Default: 16 MiB.
    pub max_string_len: usize,
    /// Maximum entries in an argument list or free batch. Default: 65 536.
    pub max_batch_len: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_string_len: DEFAULT_MAX_STRING,
            max_batch_len: DEFAULT_MAX_BATCH,
        }
    }
}

/// Reads fixed-width primitive fields from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete fields.
/// A clean EOF surfaces as `WireError::ConnectionClosed`. Field reads retry
/// timed-out reads because the rest of the message is already in flight;
/// only `poll_u8` lets a timeout escape, so deadlines land between messages
/// and never inside one.
pub struct WireReader<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
}

impl<T: Read> WireReader<T> {
    /// Create a reader with default limits.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a reader with explicit limits.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read a single tag byte (blocking).
    pub fn read_u8(&mut self) -> Result<u8> {
        self.fill(1)?;
        Ok(self.buf.get_u8())
    }

    /// Try to read one byte, returning `None` on a timed-out read.
    ///
    /// This is the message-boundary primitive: the session loop polls for the
    /// next type tag against a deadline, while field reads inside a message
    /// block until the in-flight bytes arrive.
    pub fn poll_u8(&mut self) -> Result<Option<u8>> {
        if !self.buf.is_empty() {
            return Ok(Some(self.buf.get_u8()));
        }
        let mut one = [0u8; 1];
        loop {
            return match self.inner.read(&mut one) {
                Ok(0) => Err(WireError::ConnectionClosed),
                Ok(_) => Ok(Some(one[0])),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    Ok(None)
                }
                Err(err) => Err(WireError::Io(err)),
            };
        }
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.fill(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.fill(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.fill(8)?;
        Ok(self.buf.get_f64())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 0 || len as usize > self.config.max_string_len {
            tracing::warn!(len, max = self.config.max_string_len, "string prefix over limit");
            return Err(WireError::StringTooLarge {
                len: len as i64,
                max: self.config.max_string_len,
            });
        }
        let len = len as usize;
        self.fill(len)?;
        let bytes = self.buf.split_to(len);
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Read and validate a batch count (argument lists, free batches).
    pub fn read_batch_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        if len < 0 || len as usize > self.config.max_batch_len {
            tracing::warn!(len, max = self.config.max_batch_len, "batch prefix over limit");
            return Err(WireError::BatchTooLarge {
                len: len as i64,
                max: self.config.max_batch_len,
            });
        }
        Ok(len as usize)
    }

    /// Ensure at least `n` bytes are buffered.
    fn fill(&mut self, n: usize) -> Result<()> {
        while self.buf.len() < n {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(r) => r,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(err) => return Err(WireError::Io(err)),
            };
            if read == 0 {
                return Err(WireError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
        Ok(())
    }

    /// True if a previous read left bytes buffered (mid-message).
    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader limits.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

/// Writes fixed-width primitive fields to any `Write` stream.
///
/// Fields accumulate in an internal buffer; `flush` pushes the completed
/// message out in one burst, which keeps a message from interleaving with a
/// `Free` batch sent just before it.
pub struct WireWriter<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
}

impl<T: Write> WireWriter<T> {
    /// Create a writer with default limits.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a writer with explicit limits.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, v: &str) -> Result<()> {
        if v.len() > self.config.max_string_len {
            return Err(WireError::StringTooLarge {
                len: v.len() as i64,
                max: self.config.max_string_len,
            });
        }
        self.buf.put_i32(v.len() as i32);
        self.buf.put_slice(v.as_bytes());
        Ok(())
    }

    /// Write a batch count after validating it.
    pub fn write_batch_len(&mut self, len: usize) -> Result<()> {
        if len > self.config.max_batch_len {
            return Err(WireError::BatchTooLarge {
                len: len as i64,
                max: self.config.max_batch_len,
            });
        }
        self.buf.put_i32(len as i32);
        Ok(())
    }

    /// Write all buffered bytes to the stream and flush it (blocking).
    pub fn flush(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
        self.buf.clear();
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer limits.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn roundtrip<F: FnOnce(&mut WireWriter<Cursor<Vec<u8>>>)>(write: F) -> WireReader<Cursor<Vec<u8>>> {
        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        write(&mut writer);
        writer.flush().unwrap();
        WireReader::new(Cursor::new(writer.into_inner().into_inner()))
    }

    #[test]
    fn primitive_roundtrip() {
        let mut reader = roundtrip(|w| {
            w.write_u8(9);
            w.write_bool(true);
            w.write_bool(false);
            w.write_i32(-42);
            w.write_u32(7);
            w.write_f64(2.5);
        });

        assert_eq!(reader.read_u8().unwrap(), 9);
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());
        assert_eq!(reader.read_i32().unwrap(), -42);
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert_eq!(reader.read_f64().unwrap(), 2.5);
        assert!(!reader.has_buffered());
    }

    #[test]
    fn string_roundtrip() {
        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        writer.write_string("héllo").unwrap();
        writer.write_string("").unwrap();
        writer.flush().unwrap();

        let mut reader = WireReader::new(Cursor::new(writer.into_inner().into_inner()));
        assert_eq!(reader.read_string().unwrap(), "héllo");
        assert_eq!(reader.read_string().unwrap(), "");
    }

    #[test]
    fn integers_are_big_endian() {
        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        writer.write_i32(0x01020304);
        writer.flush().unwrap();
        assert_eq!(writer.into_inner().into_inner(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn negative_string_length_rejected() {
        let mut reader = WireReader::new(Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF]));
        let err = reader.read_string().unwrap_err();
        assert!(matches!(err, WireError::StringTooLarge { len: -1, .. }));
    }

    #[test]
    fn oversized_string_length_rejected() {
        let cfg = WireConfig {
            max_string_len: 8,
            ..WireConfig::default()
        };
        let mut reader = WireReader::with_config(Cursor::new(vec![0, 0, 0, 16]), cfg);
        let err = reader.read_string().unwrap_err();
        assert!(matches!(err, WireError::StringTooLarge { len: 16, .. }));
    }

    #[test]
    fn oversized_batch_rejected_both_directions() {
        let cfg = WireConfig {
            max_batch_len: 4,
            ..WireConfig::default()
        };
        let mut writer = WireWriter::with_config(Cursor::new(Vec::new()), cfg.clone());
        assert!(matches!(
            writer.write_batch_len(5).unwrap_err(),
            WireError::BatchTooLarge { len: 5, .. }
        ));

        let mut reader = WireReader::with_config(Cursor::new(vec![0, 0, 0, 5]), cfg);
        assert!(matches!(
            reader.read_batch_len().unwrap_err(),
            WireError::BatchTooLarge { len: 5, .. }
        ));
    }

    #[test]
    fn eof_is_connection_closed() {
        let mut reader = WireReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(matches!(
            reader.read_u8().unwrap_err(),
            WireError::ConnectionClosed
        ));
    }

    #[test]
    fn eof_mid_field_is_connection_closed() {
        // Two bytes of a four-byte integer.
        let mut reader = WireReader::new(Cursor::new(vec![0, 1]));
        assert!(matches!(
            reader.read_i32().unwrap_err(),
            WireError::ConnectionClosed
        ));
    }

    #[test]
    fn partial_reads_are_assembled() {
        struct ByteByByte {
            bytes: Vec<u8>,
            pos: usize,
        }
        impl std::io::Read for ByteByByte {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.pos >= self.bytes.len() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.bytes[self.pos];
                self.pos += 1;
                Ok(1)
            }
        }

        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        writer.write_string("slow").unwrap();
        writer.flush().unwrap();

        let mut reader = WireReader::new(ByteByByte {
            bytes: writer.into_inner().into_inner(),
            pos: 0,
        });
        assert_eq!(reader.read_string().unwrap(), "slow");
    }

    #[test]
    fn interrupted_read_retries() {
        struct InterruptedOnce {
            hit: bool,
            bytes: Vec<u8>,
            pos: usize,
        }
        impl std::io::Read for InterruptedOnce {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if !self.hit {
                    self.hit = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                let n = (self.bytes.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
                self.pos += n;
                Ok(n)
            }
        }

        let mut reader = WireReader::new(InterruptedOnce {
            hit: false,
            bytes: vec![0, 0, 0, 5],
            pos: 0,
        });
        assert_eq!(reader.read_i32().unwrap(), 5);
    }

    #[test]
    fn poll_returns_none_on_timeout() {
        struct AlwaysWouldBlock;
        impl std::io::Read for AlwaysWouldBlock {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::WouldBlock))
            }
        }

        let mut reader = WireReader::new(AlwaysWouldBlock);
        assert_eq!(reader.poll_u8().unwrap(), None);
    }

    #[test]
    fn poll_drains_buffered_bytes_before_touching_the_stream() {
        let mut reader = WireReader::new(Cursor::new(vec![7, 8]));
        assert_eq!(reader.read_u8().unwrap(), 7);
        // Pipelined byte may already sit in the buffer after a bulk read.
        reader.fill(1).unwrap();
        assert_eq!(reader.poll_u8().unwrap(), Some(8));
    }

    #[test]
    fn field_read_retries_a_timed_out_stream() {
        struct SlowBytes {
            bytes: Vec<u8>,
            pos: usize,
            stalled: bool,
        }
        impl std::io::Read for SlowBytes {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if !self.stalled {
                    self.stalled = true;
                    return Err(std::io::Error::from(ErrorKind::TimedOut));
                }
                self.stalled = false;
                if self.pos >= self.bytes.len() {
                    return Ok(0);
                }
                buf[0] = self.bytes[self.pos];
                self.pos += 1;
                Ok(1)
            }
        }

        let mut reader = WireReader::new(SlowBytes {
            bytes: vec![0, 0, 0, 9],
            pos: 0,
            stalled: false,
        });
        assert_eq!(reader.read_i32().unwrap(), 9);
    }

    #[test]
    fn write_zero_is_connection_closed() {
        struct ZeroWriter;
        impl std::io::Write for ZeroWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = WireWriter::new(ZeroWriter);
        writer.write_u8(1);
        assert!(matches!(
            writer.flush().unwrap_err(),
            WireError::ConnectionClosed
        ));
    }

    #[test]
    fn flush_clears_buffer_and_is_idempotent() {
        let mut writer = WireWriter::new(Cursor::new(Vec::new()));
        writer.write_u8(1);
        writer.flush().unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.into_inner().into_inner(), vec![1]);
    }
}
