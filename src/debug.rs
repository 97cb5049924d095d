use std::fmt::{self, Write};

use crate::dialect::Dialect;
use crate::token::Token;

/// Debug wrapper rendering a token slice as an escaped string.
pub(crate) struct Tokens<'a, T>(pub &'a [T]);

impl<T: Token> fmt::Debug for Tokens<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", printable(self.0))
    }
}

fn push_escaped(output: &mut String, c: char) {
    match c {
        '\\' => output.push_str("\\\\"),
        '\0' => output.push_str("\\0"),
        '\r' => output.push_str("\\r"),
        '\n' => output.push_str("\\n"),
        '\t' => output.push_str("\\t"),
        '\x0c' => output.push_str("\\f"),
        '\x0b' => output.push_str("\\v"),
        '\x1b' => output.push_str("\\e"),
        ' '..='~' => output.push(c),
        _ => {
            let _ = write!(output, "\\u{{{:04X}}}", c as u32);
        }
    }
}

/// Renders tokens as text with control and non-ASCII characters escaped.
pub fn printable<T: Token>(tokens: &[T]) -> String {
    let mut output = String::with_capacity(tokens.len());

    for c in T::decode(tokens).chars() {
        push_escaped(&mut output, c);
    }

    output
}

/// Renders the structure of tokens without their content: `,` for the
/// delimiter, `"` for the quote, `E` for the escape, `\n` for newline tokens,
/// `_` for whitespace and `x` for anything else.
pub fn structure<T: Token>(tokens: &[T], dialect: &Dialect<T>) -> String {
    let newline = dialect.newline();
    let mut output = String::with_capacity(tokens.len());

    for &token in tokens {
        if token == dialect.delimiter {
            output.push(',');
        } else if token == dialect.quote {
            output.push('"');
        } else if Some(token) == dialect.escape {
            output.push('E');
        } else if newline.contains(token) {
            output.push_str("\\n");
        } else if dialect.is_whitespace(token) {
            output.push('_');
        } else {
            output.push('x');
        }
    }

    output
}

/// Rendering of a record for error messages.
pub(crate) fn render<T: Token>(tokens: &[T], dialect: &Dialect<T>, expose_content: bool) -> String {
    if expose_content {
        printable(tokens)
    } else {
        structure(tokens, dialect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable() {
        assert_eq!(printable(b"a,b"), "a,b");
        assert_eq!(printable(b"\\\0\r\n\t\x0c\x0b\x1b"), "\\\\\\0\\r\\n\\t\\f\\v\\e");
        assert_eq!(printable("é".as_bytes()), "\\u{00E9}");
        assert_eq!(printable(&u16::encode("a\u{1F600}")), "a\\u{1F600}");
    }

    #[test]
    fn test_structure() {
        let dialect = Dialect {
            escape: Some(b'\\'),
            whitespace: b" ".to_vec(),
            ..Dialect::default()
        };

        assert_eq!(
            structure(b"ab, \"c\\d\"\r\n", &dialect),
            "xx,_\"xEx\"\\n\\n"
        );
    }

    #[test]
    fn test_tokens_debug() {
        assert_eq!(format!("{:?}", Tokens(b"a\nb")), "\"a\\nb\"");
    }
}
