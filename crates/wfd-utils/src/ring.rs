use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("ring capacity overflow")]
    CapacityOverflow,
}

/// Byte ring buffer backing the streaming decoder input and the control
/// channel output queue.
///
/// The backing store is always a power of two so offsets wrap with a mask.
/// One byte is kept in reserve: `start == end` always means "empty", never
/// "full". The buffer grows (doubling) on demand and is owned by exactly one
/// channel; it is never shared.
#[derive(Debug, Default)]
pub struct RingBuffer {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl RingBuffer {
    pub const fn new() -> Self {
        Self { buf: Vec::new(), start: 0, end: 0 }
    }

    #[inline]
    fn mask(&self, v: usize) -> usize {
        v & (self.buf.len() - 1)
    }

    /// Number of readable bytes.
    #[inline]
    pub fn len(&self) -> usize {
        if self.end > self.start {
            self.end - self.start
        } else if self.end < self.start {
            (self.buf.len() - self.start) + self.end
        } else {
            0
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Next power of two able to hold `v`, with a 4096 floor.
    fn pow2(v: usize) -> Option<usize> {
        if v == 0 {
            return Some(4096);
        }
        v.checked_next_power_of_two().map(|p| p.max(4096))
    }

    /// Ensure room for `add` more bytes plus the reserved "empty marker"
    /// byte. Reallocates to the next power of two and linearises the
    /// readable region at offset 0.
    fn grow(&mut self, add: usize) -> Result<(), RingError> {
        let free = if self.buf.is_empty() {
            0
        } else if self.end < self.start {
            self.start - self.end
        } else {
            self.start + self.buf.len() - self.end
        };

        // ">" not ">=": the last byte stays reserved
        if free > add {
            return Ok(());
        }

        let need = self
            .buf
            .len()
            .checked_add(add)
            .and_then(|n| n.checked_sub(free))
            .and_then(|n| n.checked_add(1))
            .ok_or(RingError::CapacityOverflow)?;
        let nsize = Self::pow2(need).ok_or(RingError::CapacityOverflow)?;
        if nsize <= self.buf.len() {
            return Err(RingError::CapacityOverflow);
        }

        let mut nbuf = vec![0u8; nsize];
        let len = self.len();
        let (a, b) = self.peek();
        nbuf[..a.len()].copy_from_slice(a);
        nbuf[a.len()..a.len() + b.len()].copy_from_slice(b);
        self.buf = nbuf;
        self.start = 0;
        self.end = len;
        Ok(())
    }

    /// Append `data`, growing the backing store if needed.
    pub fn push(&mut self, data: &[u8]) -> Result<(), RingError> {
        self.grow(data.len())?;

        let mut data = data;
        if self.start <= self.end {
            let l = (self.buf.len() - self.end).min(data.len());
            self.buf[self.end..self.end + l].copy_from_slice(&data[..l]);
            self.end = self.mask(self.end + l);
            data = &data[l..];
        }
        if !data.is_empty() {
            self.buf[self.end..self.end + data.len()].copy_from_slice(data);
            self.end = self.mask(self.end + data.len());
        }
        Ok(())
    }

    /// Readable data as up to two contiguous slices. The second slice is
    /// non-empty only when the readable region wraps.
    #[inline]
    pub fn peek(&self) -> (&[u8], &[u8]) {
        if self.end > self.start {
            (&self.buf[self.start..self.end], &[])
        } else if self.end < self.start {
            (&self.buf[self.start..], &self.buf[..self.end])
        } else {
            (&[], &[])
        }
    }

    /// Drop the oldest `len` bytes; dropping more than available is safe.
    pub fn pull(&mut self, len: usize) {
        let mut len = len;
        if self.start > self.end {
            let l = (self.buf.len() - self.start).min(len);
            self.start = self.mask(self.start + l);
            len -= l;
        }
        if len == 0 {
            return;
        }
        let l = (self.end - self.start).min(len);
        self.start = self.mask(self.start + l);
    }

    /// Copy out up to `limit` readable bytes into a fresh linear buffer.
    pub fn copy_to_vec(&self, limit: usize) -> Vec<u8> {
        let (a, b) = self.peek();
        let total = (a.len() + b.len()).min(limit);
        let mut out = Vec::with_capacity(total);
        let la = a.len().min(total);
        out.extend_from_slice(&a[..la]);
        out.extend_from_slice(&b[..total - la]);
        out
    }

    /// Reset the offsets, keeping the backing memory.
    pub fn flush(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Release the backing memory.
    pub fn clear(&mut self) {
        self.buf = Vec::new();
        self.start = 0;
        self.end = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_pull_conservation() {
        let mut r = RingBuffer::new();
        for round in 0..64usize {
            let chunk = vec![round as u8; round * 7 % 97 + 1];
            r.push(&chunk).unwrap();
            r.pull(chunk.len());
        }
        assert_eq!(r.len(), 0);
        assert_eq!(r.peek(), (&[][..], &[][..]));
    }

    #[test]
    fn wrap_peek_two_slices() {
        let mut r = RingBuffer::new();
        // fill most of the initial 4096, then pull so the next push wraps
        r.push(&[b'x'; 4000]).unwrap();
        r.pull(3990);
        r.push(&[b'y'; 200]).unwrap();
        let (a, b) = r.peek();
        assert_eq!(a.len() + b.len(), 210);
        assert!(!b.is_empty());
        assert_eq!(r.copy_to_vec(usize::MAX).len(), 210);
    }

    #[test]
    fn grow_preserves_order() {
        let mut r = RingBuffer::new();
        let data: Vec<u8> = (0..20000u32).map(|i| i as u8).collect();
        for chunk in data.chunks(333) {
            r.push(chunk).unwrap();
        }
        assert_eq!(r.len(), data.len());
        assert_eq!(r.copy_to_vec(usize::MAX), data);
    }

    #[test]
    fn copy_respects_limit() {
        let mut r = RingBuffer::new();
        r.push(b"0123456789").unwrap();
        assert_eq!(r.copy_to_vec(4), b"0123");
        // copy does not consume
        assert_eq!(r.len(), 10);
    }

    #[test]
    fn pull_clamps() {
        let mut r = RingBuffer::new();
        r.push(b"abc").unwrap();
        r.pull(100);
        assert!(r.is_empty());
    }

    #[test]
    fn flush_and_clear() {
        let mut r = RingBuffer::new();
        r.push(b"abc").unwrap();
        r.flush();
        assert!(r.is_empty());
        r.push(b"def").unwrap();
        r.clear();
        assert!(r.is_empty());
        r.push(b"ghi").unwrap();
        assert_eq!(r.copy_to_vec(usize::MAX), b"ghi");
    }
}
