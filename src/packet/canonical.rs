//! Streaming canonical-text conversion for text-mode signatures.
//!
//! Canonical text uses CRLF line endings. Signers may additionally strip
//! trailing spaces and tabs from every line, which is how cleartext and
//! text-mode detached signatures are produced here.

/// Incremental converter to canonical text
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    strip_trailing: bool,
    last_was_cr: bool,
    pending: Vec<u8>,
}

impl Canonicalizer {
    /// Only normalizes line endings to CRLF
    pub fn crlf() -> Self {
        Self::default()
    }

    /// Normalizes line endings and strips trailing whitespace from each line
    pub fn stripping() -> Self {
        Self {
            strip_trailing: true,
            ..Self::default()
        }
    }

    /// Converts the next chunk, appending canonical bytes to `out`
    pub fn update(&mut self, data: &[u8], out: &mut Vec<u8>) {
        for &byte in data {
            if self.strip_trailing {
                match byte {
                    b'\n' => {
                        self.pending.clear();
                        out.extend_from_slice(b"\r\n");
                    }
                    b' ' | b'\t' | b'\r' => self.pending.push(byte),
                    _ => {
                        out.append(&mut self.pending);
                        out.push(byte);
                    }
                }
            } else {
                if byte == b'\n' && !self.last_was_cr {
                    out.push(b'\r');
                }
                out.push(byte);
                self.last_was_cr = byte == b'\r';
            }
        }
    }

    /// Ends the text; trailing whitespace on an unterminated last line is dropped
    pub fn finish(&mut self) {
        self.pending.clear();
        self.last_was_cr = false;
    }
}

/// Canonicalizes a complete buffer
pub fn canonicalize(data: &[u8], strip_trailing: bool) -> Vec<u8> {
    let mut canon = if strip_trailing {
        Canonicalizer::stripping()
    } else {
        Canonicalizer::crlf()
    };
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    canon.update(data, &mut out);
    canon.finish();
    out
}

/// Strips trailing spaces, tabs and carriage returns from one line
pub fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches([' ', '\t', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crlf_only() {
        assert_eq!(canonicalize(b"a\nb\r\nc  \n", false), b"a\r\nb\r\nc  \r\n");
    }

    #[test]
    fn test_stripping() {
        assert_eq!(canonicalize(b"a \t\nb\r\n  c  ", true), b"a\r\nb\r\n  c");
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let text = b"line one   \r\nline two\t\nlast";
        for split in 0..text.len() {
            for strip in [true, false] {
                let mut canon = if strip {
                    Canonicalizer::stripping()
                } else {
                    Canonicalizer::crlf()
                };
                let mut out = Vec::new();
                canon.update(&text[..split], &mut out);
                canon.update(&text[split..], &mut out);
                canon.finish();
                assert_eq!(out, canonicalize(text, strip), "split at {}", split);
            }
        }
    }
}
