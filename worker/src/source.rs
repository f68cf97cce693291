use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;

use nebula_engine::Source;
use nebula_unsafe_collection::{BufferManager, ChunkNumber, OriginId, SequenceNumber, ShutdownError, TupleBuffer};

/// Reads a delimited-text file in fixed-size raw chunks, one `TupleBuffer`
/// per chunk, each its own sequence number with a single terminal chunk
/// (spec component E: concrete readers are out of scope for the core, but
/// a worker binary needs at least one to be runnable end to end). Chunk
/// boundaries fall wherever the buffer fills, not on line boundaries --
/// the downstream formatter stage is exactly what reassembles tuples that
/// straddle a boundary.
pub struct FileLineSource {
    path: PathBuf,
    buffer_manager: Arc<BufferManager>,
}

impl FileLineSource {
    pub fn new(path: PathBuf, buffer_manager: Arc<BufferManager>) -> Self {
        Self { path, buffer_manager }
    }
}

fn fill(reader: &mut impl Read, out: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < out.len() {
        match reader.read(&mut out[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

impl Source for FileLineSource {
    fn run(
        &mut self,
        origin: OriginId,
        emit: &mut dyn FnMut(TupleBuffer) -> Result<(), ShutdownError>,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut sequence = SequenceNumber::INITIAL;

        while !should_stop() {
            let mut buf = self.buffer_manager.get_buffer_blocking()?;
            let read = fill(&mut reader, buf.as_bytes_mut())?;
            if read == 0 {
                break;
            }

            buf.set_number_of_tuples(read);
            buf.set_origin_id(origin);
            buf.set_sequence_number(sequence);
            buf.set_chunk_number(ChunkNumber::INITIAL);
            buf.set_last_chunk(true);

            emit(buf)?;
            sequence = sequence.next();
        }

        Ok(())
    }
}
