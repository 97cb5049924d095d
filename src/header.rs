use std::collections::HashMap;

use crate::error::{Error, ErrorKind, Result};

/// How header names are compared when looking fields up by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderMatch {
    #[default]
    Exact,
    AsciiCaseInsensitive,
}

impl HeaderMatch {
    fn key(&self, name: &str) -> String {
        match self {
            Self::Exact => name.to_string(),
            Self::AsciiCaseInsensitive => name.to_ascii_lowercase(),
        }
    }
}

/// Names of the header record and their column index.
///
/// Built once from the first record and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Header {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
    matching: HeaderMatch,
}

impl Header {
    /// Builds a header, failing on duplicate names under `matching`.
    pub fn new(names: Vec<String>, matching: HeaderMatch) -> Result<Self> {
        if names.is_empty() || (names.len() == 1 && names[0].is_empty()) {
            return Err(Error::new(ErrorKind::EmptyHeader));
        }

        let mut lookup = HashMap::with_capacity(names.len());

        for (i, name) in names.iter().enumerate() {
            if let Some(&first) = lookup.get(&matching.key(name)) {
                return Err(Error::new(ErrorKind::DuplicateHeader {
                    name: name.clone(),
                    first,
                    second: i,
                }));
            }

            lookup.insert(matching.key(name), i);
        }

        Ok(Self {
            names,
            lookup,
            matching,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn matching(&self) -> HeaderMatch {
        self.matching
    }

    /// Column index of `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        match self.matching {
            HeaderMatch::Exact => self.lookup.get(name).copied(),
            HeaderMatch::AsciiCaseInsensitive => {
                self.lookup.get(&name.to_ascii_lowercase()).copied()
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
