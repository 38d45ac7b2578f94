//! Textual header serialization and parsing.
//!
//! A header is a sequence of `KEY = VALUE` lines. Either side may be
//! written bare or double-quoted:
//!
//! - a bare token is any run of bytes from the set (tab) ∪
//!   ({0x20..0x7E} \ {'='}), with surrounding whitespace trimmed;
//! - a quoted string carries C-style escapes: `\n`, `\r`, `\t`, `\\`,
//!   `\"`, `\NNN` three-digit octal, and a backslash-newline pair that
//!   expands to nothing.
//!
//! The header ends at EOF or at a SUB byte (0x1A); a form feed written
//! before the SUB is plain whitespace to the parser. Values are treated as
//! byte strings on disk and must form valid UTF-8 once unescaped.

use std::io::{self, BufRead, Write};

use crate::error::MriError;
use crate::types::{MAX_KEY_LENGTH, MAX_VALUE_LENGTH};

/// Result of parsing a header region.
#[derive(Debug)]
pub struct ParsedHeader {
    /// Key/value pairs in file order.
    pub pairs: Vec<(String, String)>,
    /// Bytes consumed from the stream, including the SUB terminator when
    /// present. This is the on-disk header size.
    pub consumed: u64,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

struct Scanner<R: BufRead> {
    r: R,
    pos: u64,
}

impl<R: BufRead> Scanner<R> {
    fn peek(&mut self) -> io::Result<Option<u8>> {
        let buf = self.r.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) -> io::Result<Option<u8>> {
        let b = self.peek()?;
        if b.is_some() {
            self.r.consume(1);
            self.pos += 1;
        }
        Ok(b)
    }
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn token_byte(b: u8) -> bool {
    b == b'\t' || ((0x20..=0x7e).contains(&b) && b != b'=')
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses key/value pairs from the start of `r` up to the header
/// terminator (EOF or SUB). Duplicate keys are an error.
pub fn parse_header<R: BufRead>(r: R) -> Result<ParsedHeader, MriError> {
    let mut sc = Scanner { r, pos: 0 };
    let mut pairs: Vec<(String, String)> = Vec::new();

    loop {
        skip_whitespace(&mut sc)?;

        match sc.peek().map_err(read_err)? {
            None => break,
            Some(0x1a) => {
                sc.bump().map_err(read_err)?;
                break;
            }
            Some(_) => {}
        }

        let key = read_string(&mut sc, MAX_KEY_LENGTH)?;

        skip_whitespace(&mut sc)?;
        match sc.bump().map_err(read_err)? {
            Some(b'=') => {}
            _ => {
                return Err(MriError::Parse(format!(
                    "header: '=' not found in key/value pair near byte {}",
                    sc.pos
                )))
            }
        }

        let value = read_string(&mut sc, MAX_VALUE_LENGTH)?;

        if pairs.iter().any(|(k, _)| *k == key) {
            return Err(MriError::Parse(format!(
                "header: duplicate key <{}>",
                key
            )));
        }
        pairs.push((key, value));
    }

    Ok(ParsedHeader { pairs, consumed: sc.pos })
}

fn read_err(e: io::Error) -> MriError {
    MriError::io("header read", e)
}

fn skip_whitespace<R: BufRead>(sc: &mut Scanner<R>) -> Result<(), MriError> {
    while let Some(b) = sc.peek().map_err(read_err)? {
        if !is_ws(b) {
            break;
        }
        sc.bump().map_err(read_err)?;
    }
    Ok(())
}

/// Reads one bare token or quoted string, leaving its terminator
/// unconsumed.
fn read_string<R: BufRead>(sc: &mut Scanner<R>, max_len: usize) -> Result<String, MriError> {
    // Leading whitespace is skipped, but a newline stops the scan: a value
    // must start on the same line as its '='.
    while let Some(b) = sc.peek().map_err(read_err)? {
        if !is_ws(b) || b == b'\n' {
            break;
        }
        sc.bump().map_err(read_err)?;
    }

    if sc.peek().map_err(read_err)? == Some(b'"') {
        sc.bump().map_err(read_err)?;
        return read_quoted_string(sc, max_len);
    }

    let mut bytes: Vec<u8> = Vec::new();
    while let Some(b) = sc.peek().map_err(read_err)? {
        if !token_byte(b) {
            break;
        }
        if bytes.len() >= max_len {
            return Err(MriError::Parse("header: string too long".into()));
        }
        bytes.push(b);
        sc.bump().map_err(read_err)?;
    }
    while matches!(bytes.last(), Some(&b) if is_ws(b)) {
        bytes.pop();
    }
    into_string(bytes)
}

fn read_quoted_string<R: BufRead>(
    sc: &mut Scanner<R>,
    max_len: usize,
) -> Result<String, MriError> {
    let mut bytes: Vec<u8> = Vec::new();
    loop {
        let b = match sc.bump().map_err(read_err)? {
            None => {
                return Err(MriError::Parse(
                    "header: EOF reached inside quoted string".into(),
                ))
            }
            Some(b'"') => break,
            Some(b) => b,
        };
        if bytes.len() >= max_len {
            return Err(MriError::Parse("header: string too long".into()));
        }
        let decoded = if b == b'\\' { read_escape(sc)? } else { Some(b) };
        if let Some(d) = decoded {
            bytes.push(d);
        }
    }
    into_string(bytes)
}

/// Decodes the byte(s) after a backslash. `None` means the escape expands
/// to nothing (backslash-newline, or a malformed octal sequence).
fn read_escape<R: BufRead>(sc: &mut Scanner<R>) -> Result<Option<u8>, MriError> {
    let b = match sc.bump().map_err(read_err)? {
        None => return Ok(None),
        Some(b) => b,
    };
    match b {
        b'n' => Ok(Some(b'\n')),
        b'r' => Ok(Some(b'\r')),
        b't' => Ok(Some(b'\t')),
        b'0'..=b'3' => {
            let mut v = (b - b'0') << 6;
            for shift in [3u8, 0] {
                match sc.bump().map_err(read_err)? {
                    Some(d @ b'0'..=b'7') => v |= (d - b'0') << shift,
                    _ => return Ok(None),
                }
            }
            Ok(Some(v))
        }
        b'\n' => Ok(None),
        other => Ok(Some(other)),
    }
}

fn into_string(bytes: Vec<u8>) -> Result<String, MriError> {
    String::from_utf8(bytes)
        .map_err(|_| MriError::Parse("header: string is not valid UTF-8".into()))
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Writes `pairs` as header text. When `separator` is true (chunks share
/// the header file) the FF+SUB terminator is appended.
pub fn write_header<'a, W, I>(w: &mut W, pairs: I, separator: bool) -> io::Result<()>
where
    W: Write,
    I: Iterator<Item = (&'a str, &'a str)>,
{
    for (key, value) in pairs {
        write_string(w, key)?;
        w.write_all(b" = ")?;
        write_string(w, value)?;
        w.write_all(b"\n")?;
    }
    if separator {
        w.write_all(&[0x0c, 0x1a])?;
    }
    Ok(())
}

/// True if `s` can be written without quotes: non-empty and free of
/// spaces, control bytes, bytes above 0x7E, and `=`.
fn needs_quoting(s: &str) -> bool {
    s.is_empty() || s.bytes().any(|b| !(0x21..=0x7e).contains(&b) || b == b'=')
}

fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    if !needs_quoting(s) {
        return w.write_all(s.as_bytes());
    }
    w.write_all(b"\"")?;
    for b in s.bytes() {
        match b {
            b'"' | b'\\' => w.write_all(&[b'\\', b])?,
            0x20..=0x7e => w.write_all(&[b])?,
            b'\n' => w.write_all(b"\\n")?,
            b'\r' => w.write_all(b"\\r")?,
            b'\t' => w.write_all(b"\\t")?,
            other => write!(w, "\\{:03o}", other)?,
        }
    }
    w.write_all(b"\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn render(pairs: &[(&str, &str)], separator: bool) -> Vec<u8> {
        let mut out = Vec::new();
        write_header(&mut out, pairs.iter().map(|&(k, v)| (k, v)), separator).unwrap();
        out
    }

    fn parse(bytes: &[u8]) -> ParsedHeader {
        parse_header(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn plain_pairs_round_trip() {
        let text = render(&[("!format", "pgh"), ("!version", "1.0")], false);
        assert_eq!(text, b"!format = pgh\n!version = 1.0\n");
        let parsed = parse(&text);
        assert_eq!(
            parsed.pairs,
            vec![
                ("!format".to_string(), "pgh".to_string()),
                ("!version".to_string(), "1.0".to_string())
            ]
        );
        assert_eq!(parsed.consumed, text.len() as u64);
    }

    #[test]
    fn awkward_value_round_trips() {
        let value = "hello \"world\"\nline2=ok";
        let text = render(&[("note", value)], false);
        let parsed = parse(&text);
        assert_eq!(parsed.pairs[0].1, value);
    }

    #[test]
    fn empty_value_is_quoted() {
        let text = render(&[("empty", "")], false);
        assert_eq!(text, b"empty = \"\"\n");
        assert_eq!(parse(&text).pairs[0].1, "");
    }

    #[test]
    fn control_bytes_use_octal() {
        let text = render(&[("k", "a\x01b")], false);
        assert_eq!(text, b"k = \"a\\001b\"\n");
        assert_eq!(parse(&text).pairs[0].1, "a\x01b");
    }

    #[test]
    fn tab_is_legal_inside_a_bare_token() {
        let parsed = parse(b"a\tb = v\n");
        assert_eq!(parsed.pairs[0].0, "a\tb");
        assert_eq!(parsed.pairs[0].1, "v");
    }

    #[test]
    fn sub_terminator_stops_the_parse() {
        let mut text = render(&[("a", "1")], true);
        text.extend_from_slice(b"binary chunk bytes follow");
        let parsed = parse(&text);
        assert_eq!(parsed.pairs.len(), 1);
        // FF and SUB are inside the consumed header region.
        assert_eq!(parsed.consumed, (text.len() - b"binary chunk bytes follow".len()) as u64);
    }

    #[test]
    fn backslash_newline_vanishes() {
        let parsed = parse(b"k = \"ab\\\ncd\"\n");
        assert_eq!(parsed.pairs[0].1, "abcd");
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let err = parse_header(Cursor::new(b"a = 1\na = 2\n" as &[u8])).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn missing_equals_is_rejected() {
        let err = parse_header(Cursor::new(b"just a key\n" as &[u8])).unwrap_err();
        assert!(err.to_string().contains("'='"));
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        let err = parse_header(Cursor::new(b"k = \"oops\n" as &[u8])).unwrap_err();
        assert!(err.to_string().contains("EOF"));
    }

    #[test]
    fn oversize_value_is_rejected() {
        let mut text = b"k = ".to_vec();
        text.extend(std::iter::repeat(b'x').take(MAX_VALUE_LENGTH + 1));
        text.push(b'\n');
        let err = parse_header(Cursor::new(text.as_slice())).unwrap_err();
        assert!(err.to_string().contains("too long"));
    }
}
