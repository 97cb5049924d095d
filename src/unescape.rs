use crate::error::{Error, ErrorKind, Result};
use crate::token::Token;

// Both variants of each routine copy the segments found between special
// tokens. The plain ones locate those tokens with `Token::find`, which is
// vectorized for bytes; the `_scalar` ones walk the field token by token.

#[inline]
fn invalid_quotes<T: Token>(inner: &[T], quote: T) -> Error {
    Error::new(ErrorKind::InvalidQuotedField {
        quotes: T::count(quote, inner) as u32 + 2,
    })
}

/// Appends the value of a quoted field to `dst`, collapsing doubled quotes.
///
/// `inner` is the field without its wrapping quotes. A quote in `inner` that
/// is not doubled is an error.
pub fn unescape_quoted<T: Token>(inner: &[T], quote: T, dst: &mut Vec<T>) -> Result<()> {
    dst.reserve(inner.len());

    let mut rest = inner;

    while let Some(i) = T::find(quote, rest) {
        if rest.get(i + 1) != Some(&quote) {
            return Err(invalid_quotes(inner, quote));
        }

        dst.extend_from_slice(&rest[..=i]);
        rest = &rest[i + 2..];
    }

    dst.extend_from_slice(rest);

    Ok(())
}

pub fn unescape_quoted_scalar<T: Token>(inner: &[T], quote: T, dst: &mut Vec<T>) -> Result<()> {
    dst.reserve(inner.len());

    let mut i = 0;

    while i < inner.len() {
        let token = inner[i];

        if token == quote {
            if inner.get(i + 1) != Some(&quote) {
                return Err(invalid_quotes(inner, quote));
            }
            i += 1;
        }

        dst.push(token);
        i += 1;
    }

    Ok(())
}

/// Appends the value of an escaped field to `dst`, dropping every escape
/// token and keeping the token following it.
pub fn unescape_escaped<T: Token>(field: &[T], escape: T, dst: &mut Vec<T>) -> Result<()> {
    dst.reserve(field.len());

    let mut rest = field;

    while let Some(i) = T::find(escape, rest) {
        let Some(&literal) = rest.get(i + 1) else {
            return Err(Error::new(ErrorKind::DanglingEscape));
        };

        dst.extend_from_slice(&rest[..i]);
        dst.push(literal);
        rest = &rest[i + 2..];
    }

    dst.extend_from_slice(rest);

    Ok(())
}

pub fn unescape_escaped_scalar<T: Token>(field: &[T], escape: T, dst: &mut Vec<T>) -> Result<()> {
    dst.reserve(field.len());

    let mut tokens = field.iter().copied();

    while let Some(token) = tokens.next() {
        if token == escape {
            match tokens.next() {
                Some(literal) => dst.push(literal),
                None => return Err(Error::new(ErrorKind::DanglingEscape)),
            }
        } else {
            dst.push(token);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted(inner: &[u8]) -> Result<Vec<u8>> {
        let mut fast = Vec::new();
        let mut slow = Vec::new();

        let a = unescape_quoted(inner, b'"', &mut fast);
        let b = unescape_quoted_scalar(inner, b'"', &mut slow);

        assert_eq!(a.is_ok(), b.is_ok());
        a?;
        assert_eq!(fast, slow);

        Ok(fast)
    }

    fn escaped(field: &[u8]) -> Result<Vec<u8>> {
        let mut fast = Vec::new();
        let mut slow = Vec::new();

        let a = unescape_escaped(field, b'\\', &mut fast);
        let b = unescape_escaped_scalar(field, b'\\', &mut slow);

        assert_eq!(a.is_ok(), b.is_ok());
        a?;
        assert_eq!(fast, slow);

        Ok(fast)
    }

    #[test]
    fn test_unescape_quoted() -> Result<()> {
        assert_eq!(quoted(b"a\"\"b")?, b"a\"b");
        assert_eq!(quoted(b"\"\"")?, b"\"");
        assert_eq!(quoted(b"\"\"\"\"x")?, b"\"\"x");
        assert_eq!(quoted(b"plain")?, b"plain");
        assert_eq!(quoted(b"")?, b"");

        assert!(quoted(b"a\"b").is_err());
        assert!(quoted(b"a\"").is_err());

        Ok(())
    }

    #[test]
    fn test_unescape_escaped() -> Result<()> {
        assert_eq!(escaped(b"a\\,b")?, b"a,b");
        assert_eq!(escaped(b"\\\\")?, b"\\");
        assert_eq!(escaped(b"\\\"x\\\n")?, b"\"x\n");

        let err = escaped(b"ab\\").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DanglingEscape));

        Ok(())
    }

    #[test]
    fn test_appends_to_destination() -> Result<()> {
        let mut dst = b"prefix|".to_vec();
        unescape_quoted(b"x\"\"y", b'"', &mut dst)?;
        assert_eq!(dst, b"prefix|x\"y");

        let mut dst = Vec::<u16>::new();
        unescape_escaped(&u16::encode("é\\,è"), u16::from_ascii(b'\\'), &mut dst)?;
        assert_eq!(u16::decode(&dst), "é,è");

        Ok(())
    }
}
