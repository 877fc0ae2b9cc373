use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Capability invoked when the close escape sequence is recognized.
/// Returning true swallows the matched bytes; false forwards them verbatim,
/// leaving room for additional escape commands.
pub trait AbortNotifier {
    fn notify(&self) -> bool;
}

impl<F> AbortNotifier for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn notify(&self) -> bool {
        self()
    }
}

const SCAN_CHUNK: usize = 4096;

/// Wraps a byte source and intercepts the in-band close sequence: the
/// escape character at start of line followed by `.`. Unrecognized
/// sequences are forwarded verbatim, including the held-back escape byte,
/// and a match split across two reads is still detected. With no escape
/// character configured the scanner is a pass-through.
pub struct EscapeScanner<R, N> {
    inner: R,
    notifier: N,
    escape: Option<u8>,
    /// True at stream start and after a line break.
    at_line_start: bool,
    /// Escape byte seen at line start, held back until the next byte
    /// decides whether the sequence matches.
    pending_escape: bool,
    scanned: Vec<u8>,
    pos: usize,
}

impl<R, N> EscapeScanner<R, N>
where
    R: AsyncRead + Unpin,
    N: AbortNotifier,
{
    pub fn new(inner: R, escape: Option<u8>, notifier: N) -> Self {
        Self {
            inner,
            notifier,
            escape,
            at_line_start: true,
            pending_escape: false,
            scanned: Vec::new(),
            pos: 0,
        }
    }

    fn scan(&mut self, input: &[u8]) {
        let Some(esc) = self.escape else {
            self.scanned.extend_from_slice(input);
            return;
        };
        for &b in input {
            if self.pending_escape {
                self.pending_escape = false;
                if b == b'.' && self.notifier.notify() {
                    self.at_line_start = false;
                    continue;
                }
                self.scanned.push(esc);
                self.scanned.push(b);
                self.at_line_start = is_line_break(b);
            } else if self.at_line_start && b == esc {
                self.pending_escape = true;
            } else {
                self.scanned.push(b);
                self.at_line_start = is_line_break(b);
            }
        }
    }
}

fn is_line_break(b: u8) -> bool {
    // raw mode delivers Enter as \r
    b == b'\n' || b == b'\r'
}

impl<R, N> AsyncRead for EscapeScanner<R, N>
where
    R: AsyncRead + Unpin,
    N: AbortNotifier + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.escape.is_none() {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        loop {
            if this.pos < this.scanned.len() {
                let n = buf.remaining().min(this.scanned.len() - this.pos);
                buf.put_slice(&this.scanned[this.pos..this.pos + n]);
                this.pos += n;
                if this.pos == this.scanned.len() {
                    this.scanned.clear();
                    this.pos = 0;
                }
                return Poll::Ready(Ok(()));
            }

            let mut tmp = [0u8; SCAN_CHUNK];
            let mut tmp_buf = ReadBuf::new(&mut tmp);
            match Pin::new(&mut this.inner).poll_read(cx, &mut tmp_buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => {
                    let filled = tmp_buf.filled().len();
                    if filled == 0 {
                        // EOF: a held-back escape byte is flushed first
                        if this.pending_escape {
                            this.pending_escape = false;
                            if let Some(esc) = this.escape {
                                this.scanned.push(esc);
                            }
                            continue;
                        }
                        return Poll::Ready(Ok(()));
                    }
                    this.scan(&tmp[..filled]);
                    // a read may scan down to nothing (e.g. a lone escape
                    // byte); poll the source again rather than report EOF
                }
            }
        }
    }
}
