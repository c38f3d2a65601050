/// Split one RTSP header line into protocol tokens.
///
/// Tokens separate on spaces and ASCII control bytes, with two additions
/// from the RTSP grammar: every byte of `()[]{}<>@,;:\/?=` forms its own
/// single-byte token, and double-quoted strings form one token with C-like
/// backslash escapes (`\e` is ESC, `\0` drops the preceding byte).
/// Runs of separators collapse; NUL bytes are skipped outright.
pub fn tokenize(line: &[u8]) -> Vec<Vec<u8>> {
    let mut tokens = Vec::new();
    let mut cur: Vec<u8> = Vec::new();
    // mirrors "token has pending content" across separator handling;
    // escape-substituted bytes intentionally do not set it
    let mut have = false;
    let mut quoted = false;
    let mut escaped = false;

    for &c in line {
        if quoted {
            if escaped {
                match c {
                    b'\\' => cur.push(b'\\'),
                    b'"' => cur.push(b'"'),
                    b'n' => cur.push(b'\n'),
                    b'r' => cur.push(b'\r'),
                    b't' => cur.push(b'\t'),
                    b'a' => cur.push(0x07),
                    b'f' => cur.push(0x0c),
                    b'v' => cur.push(0x0b),
                    b'b' => cur.push(0x08),
                    b'e' => cur.push(0x1b),
                    b'0' => {
                        cur.pop();
                    }
                    other => cur.push(other),
                }
                escaped = false;
            } else {
                match c {
                    b'"' => {
                        tokens.push(std::mem::take(&mut cur));
                        quoted = false;
                        have = false;
                    }
                    b'\\' => escaped = true,
                    0 => {}
                    other => {
                        cur.push(other);
                        have = true;
                    }
                }
            }
        } else {
            match c {
                b'"' => {
                    if have {
                        tokens.push(std::mem::take(&mut cur));
                    }
                    quoted = true;
                    escaped = false;
                    have = false;
                }
                0 => {}
                b' ' => {
                    if have {
                        tokens.push(std::mem::take(&mut cur));
                        have = false;
                    }
                }
                b'(' | b')' | b'[' | b']' | b'{' | b'}' | b'<' | b'>' | b'@' | b',' | b';' |
                b':' | b'\\' | b'/' | b'?' | b'=' => {
                    if have {
                        tokens.push(std::mem::take(&mut cur));
                    }
                    tokens.push(vec![c]);
                    have = false;
                }
                c if c <= 31 || c == 127 => {
                    if have {
                        tokens.push(std::mem::take(&mut cur));
                        have = false;
                    }
                }
                other => {
                    cur.push(other);
                    have = true;
                }
            }
        }
    }

    if have {
        tokens.push(cur);
    }
    tokens
}
