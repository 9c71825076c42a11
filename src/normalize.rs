//! Output normalization for raw interactive-shell streams.
//!
//! [`normalize`] linearizes a buffer the way a terminal would display it:
//! carriage returns rewind the cursor, backspaces step back so following
//! characters overwrite in place, tabs expand to 8-column stops, and escape
//! sequences disappear. [`sanitize`] is the lighter variant used for live
//! per-chunk output: it drops escape sequences and control bytes without
//! simulating the cursor.
//!
//! Network reads can split a UTF-8 character or an escape sequence across
//! chunks. [`StreamDecoder`] carries the incomplete tail over to the next
//! chunk so neither function ever sees half a sequence.

const ESC: u8 = 0x1b;
const TAB_WIDTH: usize = 8;
/// Longest incomplete escape sequence carried between chunks before it is
/// treated as garbage and discarded.
const MAX_ESCAPE_CARRY: usize = 256;

/// Linearize `raw` into one logical line per terminal line.
///
/// Pure function: no state survives between calls. An escape sequence that is
/// cut off at the end of `raw` is dropped.
pub fn normalize(raw: &str) -> String {
    let mut screen = LineBuffer::default();
    let mut i = 0;
    while let Some(ch) = raw.get(i..).and_then(|rest| rest.chars().next()) {
        if ch == '\x1b' {
            i += escape_len(&raw.as_bytes()[i..]).unwrap_or(raw.len() - i);
            continue;
        }
        match ch {
            '\r' => screen.col = 0,
            '\n' => screen.newline(),
            '\t' => screen.tab(),
            '\x08' => screen.backspace(),
            c if c.is_control() => {}
            c => screen.put(c),
        }
        i += ch.len_utf8();
    }
    screen.finish()
}

/// Strip escape sequences and control bytes, keeping `\n` and `\t`.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while let Some(ch) = raw.get(i..).and_then(|rest| rest.chars().next()) {
        if ch == '\x1b' {
            i += escape_len(&raw.as_bytes()[i..]).unwrap_or(raw.len() - i);
            continue;
        }
        if ch == '\n' || ch == '\t' || !ch.is_control() {
            out.push(ch);
        }
        i += ch.len_utf8();
    }
    out
}

/// Byte length of the escape sequence at the start of `bytes`, or `None` if
/// the sequence is incomplete. `bytes[0]` must be ESC.
fn escape_len(bytes: &[u8]) -> Option<usize> {
    debug_assert_eq!(bytes.first(), Some(&ESC));
    match *bytes.get(1)? {
        // CSI: parameter and intermediate bytes, then one final byte.
        b'[' => {
            for (j, &b) in bytes.iter().enumerate().skip(2) {
                if (0x40..=0x7e).contains(&b) {
                    return Some(j + 1);
                }
                if !(0x20..=0x3f).contains(&b) {
                    return Some(j);
                }
            }
            None
        }
        // OSC and the other string sequences end with BEL or ST.
        b']' | b'P' | b'X' | b'^' | b'_' => {
            let mut j = 2;
            while j < bytes.len() {
                match bytes[j] {
                    0x07 => return Some(j + 1),
                    ESC if bytes.get(j + 1) == Some(&b'\\') => return Some(j + 2),
                    _ => j += 1,
                }
            }
            None
        }
        // Charset designation carries one more byte.
        b'(' | b')' | b'*' | b'+' | b'#' | b'%' => match bytes.get(2) {
            None => None,
            Some(b) if b.is_ascii() => Some(3),
            Some(_) => Some(2),
        },
        b if b.is_ascii() => Some(2),
        _ => Some(1),
    }
}

#[derive(Default)]
struct LineBuffer {
    lines: Vec<String>,
    current: Vec<char>,
    col: usize,
}

impl LineBuffer {
    fn put(&mut self, ch: char) {
        if self.col < self.current.len() {
            self.current[self.col] = ch;
        } else {
            self.current.resize(self.col, ' ');
            self.current.push(ch);
        }
        self.col += 1;
    }

    fn tab(&mut self) {
        self.col = (self.col / TAB_WIDTH + 1) * TAB_WIDTH;
    }

    fn backspace(&mut self) {
        self.col = self.col.saturating_sub(1);
    }

    fn newline(&mut self) {
        self.lines.push(self.current.drain(..).collect());
        self.col = 0;
    }

    fn finish(mut self) -> String {
        self.newline();
        self.lines.join("\n")
    }
}

/// Incremental decoder for chunked shell output.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    utf8_carry: Vec<u8>,
    escape_carry: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk of bytes, holding back a trailing partial UTF-8
    /// character until the next call. Invalid bytes become U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.utf8_carry);
        data.extend_from_slice(bytes);

        let mut out = String::with_capacity(data.len());
        let mut rest = data.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        None => {
                            self.utf8_carry = tail.to_vec();
                            break;
                        }
                        Some(n) => {
                            out.push('\u{FFFD}');
                            rest = &tail[n..];
                        }
                    }
                }
            }
        }
        out
    }

    /// Sanitize decoded text for live listeners, holding back an escape
    /// sequence that is cut off at the end of the chunk.
    pub fn sanitize_chunk(&mut self, text: &str) -> String {
        let mut data = std::mem::take(&mut self.escape_carry);
        data.push_str(text);

        if let Some(pos) = data.rfind('\x1b') {
            let tail = &data.as_bytes()[pos..];
            if escape_len(tail).is_none() {
                if tail.len() <= MAX_ESCAPE_CARRY {
                    self.escape_carry = data[pos..].to_string();
                }
                data.truncate(pos);
            }
        }
        sanitize(&data)
    }
}
