use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Index;

use crate::debug;
use crate::token::Token;

/// An owned, unescaped copy of a CSV record.
///
/// Fields are stored back to back in a single buffer and delimited by
/// ranges, so copying a record costs two allocations at most.
#[derive(Clone)]
pub struct OwnedRecord<T> {
    data: Vec<T>,
    bounds: Vec<(usize, usize)>,
}

impl<T> Default for OwnedRecord<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            bounds: Vec::new(),
        }
    }
}

impl<T: Token> OwnedRecord<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(data: usize, fields: usize) -> Self {
        Self {
            data: Vec::with_capacity(data),
            bounds: Vec::with_capacity(fields),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.bounds.clear();
    }

    /// Tokens of every field, concatenated.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn iter(&self) -> OwnedRecordIter<'_, T> {
        OwnedRecordIter {
            record: self,
            current_forward: 0,
            current_backward: self.len(),
        }
    }

    #[inline(always)]
    pub fn push_field(&mut self, tokens: &[T]) {
        let start = self.data.len();
        self.data.extend_from_slice(tokens);
        self.bounds.push((start, self.data.len()));
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&[T]> {
        self.bounds
            .get(index)
            .copied()
            .map(|(start, end)| &self.data[start..end])
    }

    /// Fields decoded as strings, lossily.
    pub fn decode(&self) -> Vec<String> {
        self.iter().map(T::decode).collect()
    }
}

impl<T: Token> PartialEq for OwnedRecord<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<T: Token> Eq for OwnedRecord<T> {}

impl<T: Token> Hash for OwnedRecord<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len());

        for field in self.iter() {
            field.hash(state);
        }
    }
}

impl<T: Token> Index<usize> for OwnedRecord<T> {
    type Output = [T];

    #[inline]
    fn index(&self, i: usize) -> &[T] {
        let (start, end) = self.bounds[i];
        &self.data[start..end]
    }
}

impl<T: Token, F: AsRef<[T]>> Extend<F> for OwnedRecord<T> {
    #[inline]
    fn extend<I: IntoIterator<Item = F>>(&mut self, iter: I) {
        for field in iter {
            self.push_field(field.as_ref());
        }
    }
}

impl<T: Token, F: AsRef<[T]>> FromIterator<F> for OwnedRecord<T> {
    #[inline]
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut record = Self::new();
        record.extend(iter);
        record
    }
}

impl<'r, T: Token> IntoIterator for &'r OwnedRecord<T> {
    type IntoIter = OwnedRecordIter<'r, T>;
    type Item = &'r [T];

    #[inline]
    fn into_iter(self) -> OwnedRecordIter<'r, T> {
        self.iter()
    }
}

impl<T: Token> fmt::Debug for OwnedRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OwnedRecord(")?;
        f.debug_list()
            .entries(self.iter().map(debug::Tokens))
            .finish()?;
        write!(f, ")")?;
        Ok(())
    }
}

pub struct OwnedRecordIter<'a, T> {
    record: &'a OwnedRecord<T>,
    current_forward: usize,
    current_backward: usize,
}

impl<T: Token> ExactSizeIterator for OwnedRecordIter<'_, T> {}

impl<'a, T: Token> Iterator for OwnedRecordIter<'a, T> {
    type Item = &'a [T];

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.current_forward == self.current_backward {
            None
        } else {
            let (start, end) = self.record.bounds[self.current_forward];

            self.current_forward += 1;

            Some(&self.record.data[start..end])
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let size = self.current_backward - self.current_forward;

        (size, Some(size))
    }
}

impl<T: Token> DoubleEndedIterator for OwnedRecordIter<'_, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.current_forward == self.current_backward {
            None
        } else {
            self.current_backward -= 1;

            let (start, end) = self.record.bounds[self.current_backward];

            Some(&self.record.data[start..end])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_record() {
        let mut record = OwnedRecord::<u8>::new();

        assert_eq!(record.len(), 0);
        assert!(record.is_empty());
        assert_eq!(record.get(0), None);

        record.push_field(b"name");
        record.push_field(b"");
        record.push_field(b"age");

        let expected: Vec<&[u8]> = vec![b"name", b"", b"age"];
        assert_eq!(record.iter().collect::<Vec<_>>(), expected);
        assert_eq!(record.iter().rev().next(), Some::<&[u8]>(b"age"));
        assert_eq!(&record[2], b"age");
        assert_eq!(record.get(3), None);
        assert_eq!(record, rec!["name", "", "age"]);
    }

    #[test]
    fn test_utf16_record() {
        let record: OwnedRecord<u16> = ["é", "ü"].iter().map(|s| u16::encode(s)).collect();

        assert_eq!(record.decode(), vec!["é", "ü"]);
        assert_eq!(format!("{:?}", record), "OwnedRecord([\"\\u{00E9}\", \"\\u{00FC}\"])");
    }
}
