//! Backward line scanning over a seekable reader.
//!
//! [`TailScan`] reads fixed-size chunks from the end of a file towards its
//! start and yields complete lines newest-first, without loading the whole
//! file. The scan ends in one of two ways: the cursor reaches offset 0 and the
//! remaining carry buffer (the file's first line) is flushed, or the caller
//! stops pulling.

use std::io::{self, Read, Seek, SeekFrom};

/// Default number of bytes read per step.
pub const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Chunks remain before the cursor.
    Reading,
    /// The cursor is at 0; only the carry buffer is left.
    AtStart,
    /// Everything has been yielded.
    Done,
}

/// Iterator over the lines of a reader, last line first.
///
/// Lines are yielded as raw bytes without their `\n`. Empty lines (including
/// the one after a trailing newline) are yielded too; callers skip them.
#[derive(Debug)]
pub struct TailScan<R> {
    reader: R,
    cursor: u64,
    chunk_size: usize,
    /// Bytes before the first newline seen so far; may be a partial line.
    carry: Vec<u8>,
    /// Complete lines from the last chunk, oldest first.
    pending: Vec<Vec<u8>>,
    state: State,
}

impl<R: Read + Seek> TailScan<R> {
    /// Start a scan at the end of `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader cannot seek to its end.
    pub fn new(reader: R) -> io::Result<Self> {
        Self::with_chunk_size(reader, CHUNK_SIZE)
    }

    /// Start a scan with a custom chunk size (at least one byte).
    ///
    /// # Errors
    ///
    /// Returns an error if the reader cannot seek to its end.
    pub fn with_chunk_size(mut reader: R, chunk_size: usize) -> io::Result<Self> {
        let cursor = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            cursor,
            chunk_size: chunk_size.max(1),
            carry: Vec::new(),
            pending: Vec::new(),
            state: if cursor > 0 {
                State::Reading
            } else {
                State::AtStart
            },
        })
    }

    /// Move the cursor back one chunk and split it into lines.
    fn step(&mut self) -> io::Result<()> {
        let len = usize::try_from(self.cursor).map_or(self.chunk_size, |c| c.min(self.chunk_size));
        self.cursor -= len as u64;
        self.reader.seek(SeekFrom::Start(self.cursor))?;

        let mut buf = vec![0; len];
        self.reader.read_exact(&mut buf)?;
        buf.extend_from_slice(&self.carry);

        let mut pieces = buf.split(|byte| *byte == b'\n');
        self.carry = pieces.next().unwrap_or_default().to_vec();
        self.pending = pieces.map(<[u8]>::to_vec).collect();

        if self.cursor == 0 {
            self.state = State::AtStart;
        }
        Ok(())
    }
}

impl<R: Read + Seek> Iterator for TailScan<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.pending.pop() {
                return Some(Ok(line));
            }
            match self.state {
                State::Reading => {
                    if let Err(err) = self.step() {
                        self.state = State::Done;
                        return Some(Err(err));
                    }
                }
                State::AtStart => {
                    self.state = State::Done;
                    return Some(Ok(std::mem::take(&mut self.carry)));
                }
                State::Done => return None,
            }
        }
    }
}
