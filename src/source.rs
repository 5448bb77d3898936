// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use ringbuf::storage::Heap;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::wrap::caching::Caching;
use ringbuf::{HeapRb, SharedRb};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::error::{Result, WaterfallError};

type RowProducer = Caching<Arc<SharedRb<Heap<f32>>>, true, false>;
type RowConsumer = Caching<Arc<SharedRb<Heap<f32>>>, false, true>;

/// Rows buffered between the reader thread and the frame loop.
pub const DEFAULT_CAPACITY_ROWS: usize = 64;

const READ_CHUNK_BYTES: usize = 64 * 1024;
const FULL_RING_BACKOFF: Duration = Duration::from_millis(1);

/// Consumer side of a stream of little-endian `f32` magnitudes, `bins` per row.
///
/// Decoding happens on a separate thread which fills a ring buffer. The frame loop
/// takes whole rows out of it and never sees a partial one.
pub struct RowReader {
    consumer: RowConsumer,
    bins: usize,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RowReader {
    /// Reads from `path`, or from stdin if there is none.
    pub fn open(path: Option<&Path>, bins: usize) -> Result<Self> {
        match path {
            Some(path) => {
                let file = File::open(path)?;
                Self::spawn(BufReader::new(file), bins, DEFAULT_CAPACITY_ROWS)
            }
            None => Self::spawn(io::stdin(), bins, DEFAULT_CAPACITY_ROWS),
        }
    }

    #[instrument(skip(reader))]
    pub fn spawn<R: Read + Send + 'static>(
        reader: R,
        bins: usize,
        capacity_rows: usize,
    ) -> Result<Self> {
        if bins == 0 || capacity_rows == 0 {
            return Err(WaterfallError::InvalidConfig(format!(
                "row stream of {bins} bins needs room for at least one row, got {capacity_rows}"
            )));
        }
        let (producer, consumer) = HeapRb::<f32>::new(bins * capacity_rows).split();
        let finished = Arc::new(AtomicBool::new(false));

        let thread = std::thread::Builder::new()
            .name("row-reader".into())
            .spawn({
                let finished = finished.clone();
                move || {
                    if let Err(e) = decode_stream(reader, producer) {
                        error!("Reading the row stream failed: {e}");
                    }
                    finished.store(true, Ordering::Release);
                }
            })?;

        Ok(Self {
            consumer,
            bins,
            finished,
            thread: Some(thread),
        })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Moves the next complete row into `row`. Returns false, leaving `row` alone,
    /// if the stream hasn't delivered a whole row yet.
    ///
    /// `row` must hold exactly one row, anything else would misalign the stream.
    pub fn pop_row(&mut self, row: &mut [f32]) -> Result<bool> {
        if row.len() != self.bins {
            return Err(WaterfallError::RowLength {
                expected: self.bins,
                actual: row.len(),
            });
        }
        if self.consumer.occupied_len() < self.bins {
            return Ok(false);
        }
        let popped = self.consumer.pop_slice(row);
        debug_assert_eq!(popped, self.bins);
        Ok(true)
    }

    /// Blocks until a complete row is available, or returns false once the stream ended.
    pub fn wait_row(&mut self, row: &mut [f32]) -> Result<bool> {
        loop {
            // Load before popping, anything pushed before EOF is then visible to the pop.
            let finished = self.is_producer_done();
            if self.pop_row(row)? {
                return Ok(true);
            }
            if finished {
                return Ok(false);
            }
            std::thread::sleep(FULL_RING_BACKOFF);
        }
    }

    /// True once the stream hit EOF and no complete row is left.
    pub fn is_finished(&self) -> bool {
        self.is_producer_done() && self.consumer.occupied_len() < self.bins
    }

    fn is_producer_done(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl Drop for RowReader {
    fn drop(&mut self) {
        // A reader blocked on stdin can't be interrupted, only join it if it is done.
        if let Some(thread) = self.thread.take() {
            if self.is_producer_done() {
                let _ = thread.join();
            }
        }
    }
}

fn decode_stream<R: Read>(mut reader: R, mut producer: RowProducer) -> io::Result<()> {
    let mut bytes = vec![0u8; READ_CHUNK_BYTES];
    let mut samples = Vec::with_capacity(READ_CHUNK_BYTES / 4);
    // Bytes of a sample split across two reads.
    let mut pending = 0usize;
    let mut total_samples = 0u64;

    loop {
        let read = match reader.read(&mut bytes[pending..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let available = pending + read;
        let whole = available - available % 4;

        samples.clear();
        samples.extend(
            bytes[..whole]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
        bytes.copy_within(whole..available, 0);
        pending = available - whole;

        let mut remaining = &samples[..];
        while !remaining.is_empty() {
            if !producer.read_is_held() {
                debug!("Row consumer dropped, stopping the reader");
                return Ok(());
            }
            let pushed = producer.push_slice(remaining);
            remaining = &remaining[pushed..];
            if pushed == 0 {
                std::thread::sleep(FULL_RING_BACKOFF);
            }
        }
        total_samples += samples.len() as u64;
    }

    if pending != 0 {
        warn!("Row stream ended with {pending} trailing bytes, ignoring them");
    }
    debug!("Row stream ended after {total_samples} samples");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Hands out the bytes a few at a time, splitting samples across reads.
    struct Trickle {
        data: Vec<u8>,
        position: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3).min(self.data.len() - self.position);
            buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
            self.position += n;
            Ok(n)
        }
    }

    #[test]
    fn rows_come_out_whole_and_in_order() {
        let samples: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();
        let mut reader = RowReader::spawn(Cursor::new(encode(&samples)), 4, 2).unwrap();

        let mut row = [0.0; 4];
        for expected in samples.chunks(4) {
            assert!(reader.wait_row(&mut row).unwrap());
            assert_eq!(&row, expected);
        }
        assert!(!reader.wait_row(&mut row).unwrap());
        assert!(reader.is_finished());
    }

    #[test]
    fn samples_split_across_reads_are_reassembled() {
        let samples = [1.0f32, -2.5, 1e-12, f32::MAX, 0.0, 7.25];
        let trickle = Trickle {
            data: encode(&samples),
            position: 0,
        };
        let mut reader = RowReader::spawn(trickle, 3, 1).unwrap();

        let mut row = [0.0; 3];
        assert!(reader.wait_row(&mut row).unwrap());
        assert_eq!(row, [1.0, -2.5, 1e-12]);
        assert!(reader.wait_row(&mut row).unwrap());
        assert_eq!(row, [f32::MAX, 0.0, 7.25]);
        assert!(!reader.wait_row(&mut row).unwrap());
    }

    #[test]
    fn incomplete_trailing_row_is_never_delivered() {
        let samples = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        let mut bytes = encode(&samples);
        bytes.push(0xff);
        let mut reader = RowReader::spawn(Cursor::new(bytes), 4, 4).unwrap();

        let mut row = [0.0; 4];
        assert!(reader.wait_row(&mut row).unwrap());
        assert_eq!(row, [1.0, 2.0, 3.0, 4.0]);

        row = [9.0; 4];
        assert!(!reader.wait_row(&mut row).unwrap());
        assert!(!reader.pop_row(&mut row).unwrap());
        assert_eq!(row, [9.0; 4]);
        assert!(reader.is_finished());
    }

    #[test]
    fn wrong_row_size_leaves_the_stream_aligned() {
        let samples: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let mut reader = RowReader::spawn(Cursor::new(encode(&samples)), 4, 2).unwrap();

        let mut row = [0.0; 4];
        assert!(reader.wait_row(&mut row).unwrap());
        assert_eq!(row, [0.0, 1.0, 2.0, 3.0]);

        let mut too_long = [0.0; 5];
        assert!(matches!(
            reader.pop_row(&mut too_long),
            Err(WaterfallError::RowLength {
                expected: 4,
                actual: 5
            })
        ));
        assert!(reader.wait_row(&mut too_long[..3]).is_err());

        assert!(reader.wait_row(&mut row).unwrap());
        assert_eq!(row, [4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn empty_rows_are_refused() {
        assert!(matches!(
            RowReader::spawn(Cursor::new(Vec::new()), 0, 4),
            Err(WaterfallError::InvalidConfig(_))
        ));
        assert!(matches!(
            RowReader::spawn(Cursor::new(Vec::new()), 4, 0),
            Err(WaterfallError::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = RowReader::open(Some(Path::new("/nonexistent/rows.f32")), 8);
        assert!(matches!(result, Err(WaterfallError::Io(_))));
    }
}
