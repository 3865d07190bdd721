//! # Send Buffer
//!
//! Purpose: Accumulate encoded commands in pooled fixed-size chunks and push
//! them to the socket with as few syscalls as possible.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Chunks are borrowed from a shared `ChunkPool`
//!    and returned on reset, so steady-state pipelining allocates nothing.
//! 2. **One Flush Per Batch**: A whole pipeline leaves in a single vectored
//!    write when the transport supports it.
//! 3. **Minimal Locking**: The pool mutex is held only to move a chunk.
//!
//! ## Layout
//!
//! ```text
//! SendBuffer
//!   └── chunks: Vec<Chunk>           (in write order)
//!         └── Chunk { data: Box<[u8]> (chunk_size), filled }
//! ChunkPool
//!   └── idle: Mutex<Vec<Box<[u8]>>>  (bounded by max_idle)
//! ```

use std::io::{self, IoSlice, Write};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use wirekv_common::FrameSink;

/// Default chunk size: one Ethernet MTU worth of TCP payload.
pub const DEFAULT_CHUNK_SIZE: usize = 1450;

/// Idle chunks the pool keeps before freeing returned chunks.
pub const DEFAULT_MAX_IDLE_CHUNKS: usize = 1024;

/// Bounded pool of equally sized byte chunks.
pub struct ChunkPool {
    chunk_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Box<[u8]>>>,
}

impl ChunkPool {
    /// Creates a pool handing out `chunk_size`-byte chunks.
    pub fn new(chunk_size: usize, max_idle: usize) -> Self {
        ChunkPool {
            chunk_size: chunk_size.max(1),
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Process-wide pool for the default chunk size.
    pub fn global() -> Arc<ChunkPool> {
        static GLOBAL: OnceLock<Arc<ChunkPool>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(ChunkPool::new(DEFAULT_CHUNK_SIZE, DEFAULT_MAX_IDLE_CHUNKS)))
            .clone()
    }

    /// Pool for `chunk_size`: the global pool when the size matches it,
    /// otherwise a private one.
    pub fn for_chunk_size(chunk_size: usize) -> Arc<ChunkPool> {
        if chunk_size == DEFAULT_CHUNK_SIZE {
            ChunkPool::global()
        } else {
            Arc::new(ChunkPool::new(chunk_size, DEFAULT_MAX_IDLE_CHUNKS))
        }
    }

    /// Size of every chunk handed out.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks currently parked in the pool.
    pub fn idle_chunks(&self) -> usize {
        self.idle.lock().len()
    }

    fn take(&self) -> Box<[u8]> {
        if let Some(chunk) = self.idle.lock().pop() {
            return chunk;
        }
        vec![0u8; self.chunk_size].into_boxed_slice()
    }

    fn give(&self, chunk: Box<[u8]>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(chunk);
        }
    }
}

struct Chunk {
    data: Box<[u8]>,
    filled: usize,
}

impl Chunk {
    fn remaining(&self) -> usize {
        self.data.len() - self.filled
    }

    fn bytes(&self) -> &[u8] {
        &self.data[..self.filled]
    }
}

/// Chunked write buffer for outgoing commands.
pub struct SendBuffer {
    pool: Arc<ChunkPool>,
    chunks: Vec<Chunk>,
    len: usize,
}

impl SendBuffer {
    /// Creates an empty buffer drawing chunks from `pool`.
    pub fn new(pool: Arc<ChunkPool>) -> Self {
        SendBuffer {
            pool,
            chunks: Vec::new(),
            len: 0,
        }
    }

    /// Appends bytes, spilling into fresh pooled chunks as needed.
    pub fn write(&mut self, mut bytes: &[u8]) {
        self.len += bytes.len();
        while !bytes.is_empty() {
            let needs_chunk = self
                .chunks
                .last()
                .map(|chunk| chunk.remaining() == 0)
                .unwrap_or(true);
            if needs_chunk {
                self.chunks.push(Chunk {
                    data: self.pool.take(),
                    filled: 0,
                });
            }

            // The chunk was pushed above if there was none.
            let Some(chunk) = self.chunks.last_mut() else {
                return;
            };
            let take = chunk.remaining().min(bytes.len());
            chunk.data[chunk.filled..chunk.filled + take].copy_from_slice(&bytes[..take]);
            chunk.filled += take;
            bytes = &bytes[take..];
        }
    }

    /// Writes every buffered byte to `writer`, then resets.
    ///
    /// With `vectored` the chunks leave in one scatter write (looping only on
    /// short writes); otherwise each chunk is written in turn, which is what
    /// encrypting streams need. The buffer is reset even when writing fails.
    pub fn flush<W: Write + ?Sized>(&mut self, writer: &mut W, vectored: bool) -> io::Result<()> {
        let result = if self.len == 0 {
            Ok(())
        } else if vectored {
            let mut slices: Vec<IoSlice<'_>> =
                self.chunks.iter().map(|chunk| IoSlice::new(chunk.bytes())).collect();
            write_all_vectored(writer, &mut slices)
        } else {
            self.chunks
                .iter()
                .try_for_each(|chunk| writer.write_all(chunk.bytes()))
        };
        let result = result.and_then(|_| writer.flush());
        self.reset();
        result
    }

    /// Returns every chunk to the pool and clears the buffer.
    pub fn reset(&mut self) {
        for chunk in self.chunks.drain(..) {
            self.pool.give(chunk.data);
        }
        self.len = 0;
    }

    /// Buffered byte count.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl FrameSink for SendBuffer {
    fn put(&mut self, bytes: &[u8]) {
        self.write(bytes);
    }
}

impl Drop for SendBuffer {
    fn drop(&mut self) {
        self.reset();
    }
}

fn write_all_vectored<W: Write + ?Sized>(
    writer: &mut W,
    mut bufs: &mut [IoSlice<'_>],
) -> io::Result<()> {
    while !bufs.is_empty() {
        match writer.write_vectored(bufs) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                ))
            }
            Ok(written) => IoSlice::advance_slices(&mut bufs, written),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
