use std::iter::FusedIterator;

/// Iterates over a byte buffer, yielding chunks split by a given delimiter byte.
///
/// `SplitBytes` does not allocate and does not modify the buffer it is given: every chunk borrows directly from the
/// input. The sequence of chunks is equivalent to `buf.split(|b| *b == delim)`, which means that a buffer with no
/// delimiters yields exactly one chunk (the entire buffer), a trailing delimiter yields a trailing empty chunk, and an
/// empty buffer yields a single empty chunk.
///
/// Once the final chunk has been yielded, the iterator is exhausted and cannot be restarted.
///
/// ```
/// # use metrics_ingest::SplitBytes;
/// let chunks: Vec<&[u8]> = SplitBytes::new(b"foo:1|c\nbar:2|g\n", b'\n').collect();
/// assert_eq!(chunks, vec![&b"foo:1|c"[..], &b"bar:2|g"[..], &b""[..]]);
/// ```
pub struct SplitBytes<'a> {
    buf: &'a [u8],
    delim: u8,
    done: bool,
}

impl<'a> SplitBytes<'a> {
    /// Creates a new `SplitBytes` over the given buffer and delimiter.
    pub fn new(buf: &'a [u8], delim: u8) -> Self {
        Self { buf, delim, done: false }
    }
}

impl<'a> Iterator for SplitBytes<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        // The length is deliberately not checked here: the last chunk is always yielded, even when empty.
        if self.done {
            return None;
        }

        match self.buf.iter().position(|b| *b == self.delim) {
            Some(idx) => {
                let chunk = &self.buf[..idx];
                self.buf = &self.buf[idx + 1..];
                Some(chunk)
            }
            None => {
                self.done = true;
                Some(std::mem::take(&mut self.buf))
            }
        }
    }
}

impl FusedIterator for SplitBytes<'_> {}
