//! In-process byte pipe coupling the stripe encoder to per-disk writer
//! tasks.
//!
//! A rendezvous channel keeps producer and consumers in lockstep: a write
//! does not complete until its consumer has taken the block, so shard files
//! advance together stripe by stripe. Dropping the writer ends the stream;
//! dropping the reader fails subsequent writes with `BrokenPipe`.

use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = sync_channel(0);
    (PipeWriter { tx }, PipeReader { rx, buf: Vec::new(), pos: 0 })
}

pub struct PipeWriter {
    tx: SyncSender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        while self.pos == self.buf.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = (self.buf.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;

        Ok(n)
    }
}
