use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 8 * 1024;

// chunks buffered per reader before the pump stalls
const LANE_DEPTH: usize = 16;

type Chunk = io::Result<Vec<u8>>;

/// Split one byte source into `n` independent readers. Every reader observes
/// the full byte sequence in order; the bounded per-reader buffers mean the
/// slowest reader throttles how fast the source is read.
///
/// The returned pump has to be driven (`run`) alongside the readers. Dropping
/// the pump, e.g. because the surrounding task got cancelled, closes all
/// lanes and the readers see end-of-stream.
pub fn tee<R>(source: R, n: usize) -> (TeePump<R>, Vec<TeeReader>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut senders = Vec::with_capacity(n);
    let mut readers = Vec::with_capacity(n);

    for _ in 0..n {
        let (tx, rx) = mpsc::channel::<Chunk>(LANE_DEPTH);
        senders.push(Some(tx));
        readers.push(TeeReader {
            rx,
            pending: Vec::new(),
            offset: 0,
        });
    }

    (TeePump { source, senders }, readers)
}

/// Reads the source and broadcasts every chunk to all readers.
pub struct TeePump<R> {
    source: R,
    senders: Vec<Option<mpsc::Sender<Chunk>>>,
}

impl<R> TeePump<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Drive the source until end-of-stream or a read error. Returns the
    /// number of bytes broadcast. A read error is delivered to every reader
    /// before it is returned here.
    pub async fn run(mut self) -> io::Result<u64> {
        let mut total = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            match self.source.read(&mut buf).await {
                // dropping the senders signals end-of-stream to all readers
                Ok(0) => return Ok(total),
                Ok(n) => {
                    total += n as u64;
                    if !self.broadcast(&buf[..n]).await {
                        // nobody is listening anymore
                        return Ok(total);
                    }
                }
                Err(err) => {
                    for sender in self.senders.iter().flatten() {
                        let copy = io::Error::new(err.kind(), err.to_string());
                        let _ = sender.send(Err(copy)).await;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Send the chunk down every open lane, waiting on full lanes. Returns
    /// false once all readers are gone.
    async fn broadcast(&mut self, chunk: &[u8]) -> bool {
        let mut alive = false;

        for slot in &mut self.senders {
            if let Some(sender) = slot {
                if sender.send(Ok(chunk.to_vec())).await.is_err() {
                    // reader was dropped, stop feeding this lane
                    *slot = None;
                } else {
                    alive = true;
                }
            }
        }

        alive
    }
}

/// One downstream leg of a tee. Behaves like an ordinary sequential reader.
pub struct TeeReader {
    rx: mpsc::Receiver<Chunk>,
    pending: Vec<u8>,
    offset: usize,
}

impl AsyncRead for TeeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;

        loop {
            if this.offset < this.pending.len() {
                let n = (this.pending.len() - this.offset).min(buf.len());
                buf[..n].copy_from_slice(&this.pending[this.offset..this.offset + n]);
                this.offset += n;
                return Poll::Ready(Ok(n));
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending = chunk;
                    this.offset = 0;
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                Poll::Ready(None) => return Poll::Ready(Ok(0)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    async fn drain(mut reader: TeeReader) -> Vec<u8> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        data
    }

    #[tokio::test]
    async fn every_reader_observes_the_full_stream() {
        // more chunks than a lane buffers, so the pacing gap matters
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let (pump, mut readers) = tee(Cursor::new(payload.clone()), 2);
        let mut slow = readers.pop().unwrap();
        let fast = readers.pop().unwrap();

        let (pumped, fast_data, slow_data) = tokio::join!(pump.run(), drain(fast), async move {
            // sip in tiny reads so the other reader runs far ahead
            let mut data = Vec::new();
            let mut buf = [0u8; 7];
            loop {
                let n = slow.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
                tokio::task::yield_now().await;
            }
            data
        });

        assert_eq!(pumped.unwrap(), payload.len() as u64);
        assert_eq!(fast_data, payload);
        assert_eq!(slow_data, payload);
    }

    #[tokio::test]
    async fn dropped_reader_does_not_stall_the_rest() {
        // well past the buffered lane depth
        let payload = b"0123456789".repeat(100_000);
        let (pump, mut readers) = tee(Cursor::new(payload.clone()), 2);
        let survivor = readers.pop().unwrap();
        drop(readers);

        let (pumped, collected) = tokio::join!(pump.run(), drain(survivor));

        assert_eq!(pumped.unwrap(), payload.len() as u64);
        assert_eq!(collected, payload);
    }

    struct FailingSource {
        data: &'static [u8],
    }

    impl AsyncRead for FailingSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            if self.data.is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "stream reset",
                )));
            }

            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Poll::Ready(Ok(n))
        }
    }

    #[tokio::test]
    async fn upstream_errors_reach_every_reader() {
        let (pump, mut readers) = tee(FailingSource { data: b"partial" }, 2);
        let mut second = readers.pop().unwrap();
        let mut first = readers.pop().unwrap();

        let (pump_result, first_result, second_result) = tokio::join!(
            pump.run(),
            async move {
                let mut sink = Vec::new();
                first.read_to_end(&mut sink).await
            },
            async move {
                let mut sink = Vec::new();
                second.read_to_end(&mut sink).await
            },
        );

        assert!(pump_result.is_err());
        assert_eq!(
            first_result.unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
        assert_eq!(
            second_result.unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
    }

    #[tokio::test]
    async fn end_of_stream_is_delivered_to_all_readers() {
        let (pump, mut readers) = tee(Cursor::new(Vec::new()), 3);
        pump.run().await.unwrap();

        for reader in readers.drain(..) {
            assert!(drain(reader).await.is_empty());
        }
    }
}
