use wfd_utils::RingBuffer;

use crate::{Message, RtspError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Header,
    HeaderNl,
    Body,
}

/// Streaming RTSP message decoder.
///
/// Bytes are appended with [`feed`](Self::feed) in arbitrary chunks; every
/// completed message is handed to the sink, whole. Framing is deliberately
/// lenient: bare CR or LF terminate lines as well as CRLF, whitespace after
/// a line break folds the next line into the previous one, and leading
/// whitespace between messages is discarded.
///
/// A quirk worth preserving: a lone `\r` terminating an empty header line
/// at the end of the stream leaves the decoder parked one byte short; the
/// pending message is not re-delivered and the next byte decides whether
/// the `\r` belonged to a `\r\n` pair or to the body.
pub struct Decoder {
    sink: Box<dyn FnMut(Message)>,
    ring: RingBuffer,
    state: State,
    last_ch: u8,
    remaining_body: usize,
    staging: Message,
}

impl Decoder {
    pub fn new(sink: impl FnMut(Message) + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            ring: RingBuffer::new(),
            state: State::New,
            last_ch: 0,
            remaining_body: 0,
            staging: Message::default(),
        }
    }

    /// Drop any partially decoded message and buffered stream data.
    pub fn flush(&mut self) {
        self.ring.flush();
        self.state = State::New;
        self.last_ch = 0;
        self.remaining_body = 0;
        self.staging = Message::default();
    }

    /// Append `buf` to the stream and decode as far as possible.
    ///
    /// On error the internal buffer may be mid-line, so the decoder flushes
    /// itself; a later, well-framed message resynchronises the stream.
    pub fn feed(&mut self, buf: &[u8]) -> Result<(), RtspError> {
        let mut pending = self.ring.len();
        if let Err(err) = self.ring.push(buf) {
            self.flush();
            return Err(err.into());
        }

        for &ch in buf {
            match self.feed_char(ch, pending) {
                Ok(p) => pending = p,
                Err(err) => {
                    self.flush();
                    return Err(err);
                }
            }
            self.last_ch = ch;
        }
        Ok(())
    }

    fn feed_char(&mut self, ch: u8, pending: usize) -> Result<usize, RtspError> {
        match self.state {
            State::New => Ok(self.feed_char_new(ch, pending)),
            State::Header => self.feed_char_header(ch, pending),
            State::HeaderNl => self.feed_char_header_nl(ch, pending),
            State::Body => Ok(self.feed_char_body(ch, pending)),
        }
    }

    fn feed_char_new(&mut self, ch: u8, pending: usize) -> usize {
        match ch {
            // between messages, linear whitespace is ignored for
            // compatibility; it accumulates here and is dropped below
            b'\r' | b'\n' | b'\t' | b' ' => pending + 1,
            _ => {
                self.state = State::Header;
                self.remaining_body = 0;
                self.ring.pull(pending);
                1
            }
        }
    }

    fn feed_char_header(&mut self, ch: u8, pending: usize) -> Result<usize, RtspError> {
        match ch {
            b'\r' => {
                if self.last_ch == b'\r' || self.last_ch == b'\n' {
                    // empty line: \r\r or \n\r, possibly completed to
                    // ..\r\n by the next byte. Finish the previous header
                    // line without this \r, deliver early if there is no
                    // body (the \n may never come), and keep the \r pending
                    // for HeaderNl.
                    self.state = State::HeaderNl;
                    self.finish_header_line(pending)?;
                    if self.remaining_body == 0 {
                        self.deliver();
                    }
                    Ok(1)
                } else {
                    // line break after content; might still be a folded
                    // continuation, so leave the line open
                    Ok(pending + 1)
                }
            }
            b'\n' => {
                if self.last_ch == b'\n' {
                    // \n\n: empty line, message complete unless a body
                    // follows
                    self.finish_header_line(pending)?;
                    self.state = State::Body;
                    if self.remaining_body == 0 {
                        self.state = State::New;
                        self.deliver();
                    }
                    // the second \n is not part of anything
                    self.ring.pull(1);
                    Ok(0)
                } else {
                    // \r\n or a bare \n; continuation still possible
                    Ok(pending + 1)
                }
            }
            // whitespace never terminates a line, and after a line break it
            // marks a continuation
            b'\t' | b' ' => Ok(pending + 1),
            _ => {
                if self.last_ch == b'\r' || self.last_ch == b'\n' {
                    // the pending break was a real line ending
                    self.finish_header_line(pending)?;
                    return Ok(1);
                }
                Ok(pending + 1)
            }
        }
    }

    fn feed_char_header_nl(&mut self, ch: u8, pending: usize) -> Result<usize, RtspError> {
        // An empty header line ended in a bare \r. A following \n completes
        // the terminator; anything else already belongs to the body.
        if ch == b'\n' {
            self.ring.pull(pending + 1);
            self.state = State::Body;
            if self.remaining_body == 0 {
                self.state = State::New;
            }
            Ok(0)
        } else {
            self.ring.pull(pending);
            self.state = State::Body;
            Ok(self.feed_char_body(ch, 0))
        }
    }

    fn feed_char_body(&mut self, ch: u8, pending: usize) -> usize {
        if self.remaining_body == 0 {
            // bodyless message was already delivered; this byte starts the
            // next message
            self.state = State::New;
            return self.feed_char_new(ch, pending);
        }

        let pending = pending + 1;
        self.remaining_body -= 1;
        if self.remaining_body == 0 {
            self.staging.body = self.ring.copy_to_vec(pending);
            self.deliver();
            self.state = State::New;
            self.ring.pull(pending);
            return 0;
        }
        pending
    }

    /// Take the completed header line (`pending` raw bytes) out of the
    /// ring, sanitize it and record any `Content-Length`.
    fn finish_header_line(&mut self, pending: usize) -> Result<(), RtspError> {
        let raw = self.ring.copy_to_vec(pending);
        self.ring.pull(pending);

        let line = sanitize_header_line(&raw);
        self.parse_content_length(&line)?;
        self.staging.headers.push(line);
        Ok(())
    }

    fn parse_content_length(&mut self, line: &[u8]) -> Result<(), RtspError> {
        const KEY: &[u8] = b"content-length:";
        if line.len() < KEY.len() || !line[..KEY.len()].eq_ignore_ascii_case(KEY) {
            return Ok(());
        }

        let value = &line[KEY.len()..];
        let value = &value[value.iter().take_while(|&&b| b == b' ').count()..];
        if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
            return Err(RtspError::InvalidContentLength);
        }
        let len = std::str::from_utf8(value)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or(RtspError::InvalidContentLength)?;

        if self.remaining_body != 0 && self.remaining_body != len {
            return Err(RtspError::ConflictingContentLength);
        }
        self.remaining_body = len;
        Ok(())
    }

    fn deliver(&mut self) {
        let msg = std::mem::take(&mut self.staging);
        (self.sink)(msg);
    }
}

/// Turn CR/LF/TAB into spaces, drop NUL bytes, collapse whitespace runs and
/// trim the trailing one. The line ends up a single logical header line no
/// matter how it was folded on the wire.
fn sanitize_header_line(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for &b in raw {
        let c = match b {
            0 => continue,
            b'\r' | b'\n' | b'\t' => b' ',
            c => c,
        };
        if c == b' ' && out.last() == Some(&b' ') {
            continue;
        }
        out.push(c);
    }
    if out.last() == Some(&b' ') {
        out.pop();
    }
    out
}
