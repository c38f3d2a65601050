/// One complete RTSP message as produced by the decoder.
///
/// Header lines arrive sanitized (no CR/LF/TAB, no NUL bytes, collapsed
/// whitespace). The body is exactly `Content-Length` bytes, empty for
/// messages without one. Messages are handed over whole; the decoder keeps
/// no reference to them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    pub headers: Vec<Vec<u8>>,
    pub body: Vec<u8>,
}

impl Message {
    /// Header line `i` as UTF-8, for matching and logging.
    pub fn header_str(&self, i: usize) -> Option<&str> {
        self.headers.get(i).and_then(|h| std::str::from_utf8(h).ok())
    }
}
