use std::fmt::Debug;
use std::hash::Hash;

use memchr::{memchr, memchr2, memchr3, memchr_iter};

use crate::searcher::{ScalarSearcher, Search, Searcher};

mod private {
    pub trait Sealed {}

    impl Sealed for u8 {}
    impl Sealed for u16 {}
}

/// A CSV token: a byte of UTF-8 text or a UTF-16 code unit.
///
/// This trait is sealed. Only `u8` and `u16` implement it, so any other
/// token width is rejected at compile time.
pub trait Token:
    private::Sealed + Copy + Eq + Ord + Hash + Default + Debug + Send + Sync + 'static
{
    /// Line feed.
    const LF: Self;
    /// Carriage return.
    const CR: Self;
    /// Space.
    const SPACE: Self;
    /// Byte order mark, as it appears at the start of a stream of this width.
    const BOM: &'static [Self];

    /// Amortized three-needle searcher for this token width.
    type Searcher: Search<Self> + Clone + Debug;

    fn from_ascii(byte: u8) -> Self;

    fn searcher(n1: Self, n2: Self, n3: Self) -> Self::Searcher;

    fn find(n1: Self, haystack: &[Self]) -> Option<usize>;

    fn find2(n1: Self, n2: Self, haystack: &[Self]) -> Option<usize>;

    fn find3(n1: Self, n2: Self, n3: Self, haystack: &[Self]) -> Option<usize>;

    /// Position of the first token of `haystack` contained in `needles`.
    #[inline]
    fn find_any(needles: &[Self], haystack: &[Self]) -> Option<usize> {
        match *needles {
            [] => None,
            [n1] => Self::find(n1, haystack),
            [n1, n2] => Self::find2(n1, n2, haystack),
            [n1, n2, n3] => Self::find3(n1, n2, n3, haystack),
            _ => haystack.iter().position(|t| needles.contains(t)),
        }
    }

    fn count(needle: Self, haystack: &[Self]) -> usize;

    /// Lossy conversion to a Rust string.
    fn decode(tokens: &[Self]) -> String;

    fn encode(text: &str) -> Vec<Self>;

    /// Returns why this token cannot be part of a dialect, if it cannot.
    fn dialect_violation(self) -> Option<&'static str>;
}

impl Token for u8 {
    const LF: Self = b'\n';
    const CR: Self = b'\r';
    const SPACE: Self = b' ';
    const BOM: &'static [Self] = b"\xef\xbb\xbf";

    type Searcher = Searcher;

    #[inline(always)]
    fn from_ascii(byte: u8) -> Self {
        byte
    }

    #[inline]
    fn searcher(n1: Self, n2: Self, n3: Self) -> Self::Searcher {
        Searcher::new(n1, n2, n3)
    }

    #[inline(always)]
    fn find(n1: Self, haystack: &[Self]) -> Option<usize> {
        memchr(n1, haystack)
    }

    #[inline(always)]
    fn find2(n1: Self, n2: Self, haystack: &[Self]) -> Option<usize> {
        memchr2(n1, n2, haystack)
    }

    #[inline(always)]
    fn find3(n1: Self, n2: Self, n3: Self, haystack: &[Self]) -> Option<usize> {
        memchr3(n1, n2, n3, haystack)
    }

    #[inline]
    fn count(needle: Self, haystack: &[Self]) -> usize {
        memchr_iter(needle, haystack).count()
    }

    fn decode(tokens: &[Self]) -> String {
        String::from_utf8_lossy(tokens).into_owned()
    }

    fn encode(text: &str) -> Vec<Self> {
        text.as_bytes().to_vec()
    }

    fn dialect_violation(self) -> Option<&'static str> {
        if self == 0 {
            Some("must not be a null byte")
        } else if !self.is_ascii() {
            Some("must be an ASCII byte")
        } else {
            None
        }
    }
}

impl Token for u16 {
    const LF: Self = b'\n' as u16;
    const CR: Self = b'\r' as u16;
    const SPACE: Self = b' ' as u16;
    const BOM: &'static [Self] = &[0xfeff];

    type Searcher = ScalarSearcher<u16>;

    #[inline(always)]
    fn from_ascii(byte: u8) -> Self {
        byte as u16
    }

    #[inline]
    fn searcher(n1: Self, n2: Self, n3: Self) -> Self::Searcher {
        ScalarSearcher::new(n1, n2, n3)
    }

    #[inline]
    fn find(n1: Self, haystack: &[Self]) -> Option<usize> {
        haystack.iter().position(|&t| t == n1)
    }

    #[inline]
    fn find2(n1: Self, n2: Self, haystack: &[Self]) -> Option<usize> {
        haystack.iter().position(|&t| t == n1 || t == n2)
    }

    #[inline]
    fn find3(n1: Self, n2: Self, n3: Self, haystack: &[Self]) -> Option<usize> {
        haystack
            .iter()
            .position(|&t| t == n1 || t == n2 || t == n3)
    }

    #[inline]
    fn count(needle: Self, haystack: &[Self]) -> usize {
        haystack.iter().filter(|&&t| t == needle).count()
    }

    fn decode(tokens: &[Self]) -> String {
        String::from_utf16_lossy(tokens)
    }

    fn encode(text: &str) -> Vec<Self> {
        text.encode_utf16().collect()
    }

    fn dialect_violation(self) -> Option<&'static str> {
        if self == 0 {
            Some("must not be a null code unit")
        } else if (0xd800..=0xdfff).contains(&self) {
            Some("must not be a surrogate code unit")
        } else {
            None
        }
    }
}
