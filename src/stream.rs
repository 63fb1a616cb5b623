//! Pull-model read streams and push-model write streams, modeled as a
//! cooperative producer/sink per the design notes: no callback fan-out.

use crate::cancel::CancellationToken;
use crate::error::FsError;

/// Flags accepted by [`crate::facade::FileSystem::create_write_stream`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WriteFlag {
    /// Create-or-truncate.
    Write,
    /// Append.
    Append,
    /// Exclusive create; EEXIST if the target exists.
    ExclusiveWrite,
    /// Exclusive append; EEXIST if the target exists.
    ExclusiveAppend,
}

/// The write-stream state machine from the facade's state-machine section.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WriteStreamState {
    Opening,
    Open,
    Closing,
    Closed,
    Failed,
}

/// A pull-model read stream over a byte range already fetched from the
/// backing tier. `pull()` hands back one `highWaterMark`-sized chunk per
/// call, honoring cooperative cancellation.
pub struct ReadStream {
    bytes: Vec<u8>,
    pos: usize,
    end: usize,
    high_water_mark: usize,
    cancel: CancellationToken,
    closed: bool,
}

impl ReadStream {
    /// Build a read stream over `bytes` bounded to `[start, end]` inclusive.
    /// `end` defaults to `bytes.len() - 1` and is silently clamped if it
    /// overshoots; `start > end` on a non-empty range is EINVAL.
    pub fn new(
        bytes: Vec<u8>,
        start: Option<u64>,
        end: Option<u64>,
        high_water_mark: Option<usize>,
        cancel: CancellationToken,
    ) -> Result<Self, FsError> {
        let size = bytes.len() as u64;
        let start = start.unwrap_or(0);
        let requested_end = end.unwrap_or_else(|| size.saturating_sub(1));
        let clamped_end = requested_end.min(size.saturating_sub(1));

        if size > 0 && start > clamped_end {
            return Err(FsError::inval("createReadStream", ""));
        }

        let end_exclusive = if size == 0 { 0 } else { (clamped_end + 1) as usize };
        let start = start as usize;
        let high_water_mark = high_water_mark.unwrap_or(64 * 1024).max(1);

        Ok(Self { bytes, pos: start, end: end_exclusive, high_water_mark, cancel, closed: size == 0 })
    }

    /// Pull the next chunk, or `None` once the stream is exhausted,
    /// cancelled, or was constructed over a zero-length file.
    pub async fn pull(&mut self) -> Option<Vec<u8>> {
        if self.closed || self.cancel.is_cancelled() {
            self.closed = true;
            return None;
        }
        if self.pos >= self.end {
            self.closed = true;
            return None;
        }
        let take = self.high_water_mark.min(self.end - self.pos);
        let chunk = self.bytes[self.pos..self.pos + take].to_vec();
        self.pos += take;
        Some(chunk)
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A push-model write stream: a cooperative sink collecting chunks until
/// `close()`. Finalization (merging against any existing content, per the
/// chosen flag) is performed by the facade, which owns the existing bytes.
pub struct WriteStream {
    flag: WriteFlag,
    start: Option<u64>,
    buffer: Vec<u8>,
    state: WriteStreamState,
    cancel: CancellationToken,
}

impl WriteStream {
    pub fn new(flag: WriteFlag, start: Option<u64>, cancel: CancellationToken) -> Self {
        Self { flag, start, buffer: Vec::new(), state: WriteStreamState::Opening, cancel }
    }

    pub fn open(&mut self) {
        if self.state == WriteStreamState::Opening {
            self.state = WriteStreamState::Open;
        }
    }

    pub fn flag(&self) -> WriteFlag {
        self.flag
    }

    pub fn start(&self) -> Option<u64> {
        self.start
    }

    pub fn state(&self) -> WriteStreamState {
        self.state
    }

    /// Push a chunk into the sink. Fails once the stream is no longer open.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), FsError> {
        if self.cancel.is_cancelled() {
            self.state = WriteStreamState::Closed;
            return Err(FsError::inval("write", ""));
        }
        if self.state != WriteStreamState::Open && self.state != WriteStreamState::Opening {
            return Err(FsError::new(crate::error::FsErrorKind::EBadF).with_syscall("write"));
        }
        self.state = WriteStreamState::Open;
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.buffer.clear();
        self.state = WriteStreamState::Closed;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Merge the buffered chunks against `existing` (the file's current
    /// content, if any) according to this stream's flag and optional start
    /// offset. Positional writes never implicitly truncate the tail; bytes
    /// past the prior end-of-file are zero-filled.
    pub fn finalize(mut self, existing: Option<Vec<u8>>) -> Result<Vec<u8>, FsError> {
        self.state = WriteStreamState::Closing;
        if self.cancel.is_cancelled() {
            self.state = WriteStreamState::Closed;
            return Err(FsError::inval("close", ""));
        }

        let result = match self.flag {
            WriteFlag::Append | WriteFlag::ExclusiveAppend => {
                let mut base = existing.unwrap_or_default();
                base.extend_from_slice(&self.buffer);
                base
            }
            WriteFlag::Write | WriteFlag::ExclusiveWrite => match self.start {
                None => self.buffer.clone(),
                Some(offset) => {
                    let mut base = existing.unwrap_or_default();
                    let offset = offset as usize;
                    if base.len() < offset {
                        base.resize(offset, 0);
                    }
                    let tail_start = offset + self.buffer.len();
                    if base.len() < tail_start {
                        base.resize(tail_start, 0);
                    }
                    base[offset..tail_start].copy_from_slice(&self.buffer);
                    base
                }
            },
        };

        self.state = WriteStreamState::Closed;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_stream_range_yields_expected_chunk_sizes() {
        let data: Vec<u8> = (0..100u16).map(|b| (b % 256) as u8).collect();
        let mut stream =
            ReadStream::new(data, Some(20), Some(29), Some(4), CancellationToken::new()).unwrap();
        let mut sizes = Vec::new();
        let mut total = Vec::new();
        while let Some(chunk) = stream.pull().await {
            sizes.push(chunk.len());
            total.extend(chunk);
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(total.len(), 10);
        assert_eq!(total, (20u16..30).map(|b| b as u8).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn empty_file_closes_immediately() {
        let mut stream = ReadStream::new(vec![], None, None, None, CancellationToken::new()).unwrap();
        assert!(stream.pull().await.is_none());
    }

    #[tokio::test]
    async fn start_greater_than_end_is_inval() {
        let data = vec![1, 2, 3];
        let err = ReadStream::new(data, Some(2), Some(0), None, CancellationToken::new()).unwrap_err();
        assert_eq!(err.kind, crate::error::FsErrorKind::EInval);
    }

    #[tokio::test]
    async fn end_overshoot_is_clamped() {
        let data = vec![1, 2, 3];
        let mut stream =
            ReadStream::new(data, Some(0), Some(999), Some(10), CancellationToken::new()).unwrap();
        let chunk = stream.pull().await.unwrap();
        assert_eq!(chunk, vec![1, 2, 3]);
        assert!(stream.pull().await.is_none());
    }

    #[tokio::test]
    async fn already_cancelled_token_yields_no_chunks() {
        let token = CancellationToken::new();
        token.cancel();
        let mut stream = ReadStream::new(vec![1, 2, 3], None, None, None, token).unwrap();
        assert!(stream.pull().await.is_none());
    }

    #[test]
    fn write_stream_append_preserves_existing_prefix() {
        let mut ws = WriteStream::new(WriteFlag::Append, None, CancellationToken::new());
        ws.write(b"world").unwrap();
        let result = ws.finalize(Some(b"hello ".to_vec())).unwrap();
        assert_eq!(result, b"hello world");
    }

    #[test]
    fn write_stream_positional_write_preserves_tail() {
        let mut ws = WriteStream::new(WriteFlag::Write, Some(2), CancellationToken::new());
        ws.write(b"XY").unwrap();
        let result = ws.finalize(Some(b"abcdef".to_vec())).unwrap();
        assert_eq!(result, b"abXYef");
    }

    #[test]
    fn write_stream_positional_write_past_eof_zero_fills() {
        let mut ws = WriteStream::new(WriteFlag::Write, Some(5), CancellationToken::new());
        ws.write(b"Z").unwrap();
        let result = ws.finalize(Some(b"ab".to_vec())).unwrap();
        assert_eq!(result, vec![b'a', b'b', 0, 0, 0, b'Z']);
    }

    #[test]
    fn cancel_before_close_discards_buffer() {
        let mut ws = WriteStream::new(WriteFlag::Write, None, CancellationToken::new());
        ws.write(b"partial").unwrap();
        ws.cancel();
        assert!(ws.finalize(None).is_err());
    }
}
