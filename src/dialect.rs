use crate::error::{Error, ErrorKind, Result};
use crate::token::Token;

/// How records are terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Newline<T> {
    /// `\r\n`, `\n` or a lone `\r`. Writers emit `\r\n`.
    Auto,
    One(T),
    Two(T, T),
}

/// Outcome of matching a newline at a position known to hold one of the
/// newline needles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NewlineMatch {
    Found(usize),
    NotNewline,
    NeedMore,
}

impl<T: Token> Newline<T> {
    /// Tokens able to start a newline.
    #[inline]
    pub(crate) fn needles(&self) -> NewlineNeedles<T> {
        match *self {
            Self::Auto => NewlineNeedles::Two(T::CR, T::LF),
            Self::One(t) => NewlineNeedles::One(t),
            Self::Two(first, _) => NewlineNeedles::One(first),
        }
    }

    #[inline]
    pub(crate) fn is_needle(&self, token: T) -> bool {
        match *self {
            Self::Auto => token == T::CR || token == T::LF,
            Self::One(t) => token == t,
            Self::Two(first, _) => token == first,
        }
    }

    #[inline]
    pub(crate) fn match_at(&self, data: &[T], i: usize, is_final: bool) -> NewlineMatch {
        let next = data.get(i + 1).copied();

        match *self {
            Self::One(_) => NewlineMatch::Found(1),
            Self::Auto => {
                if data[i] == T::LF {
                    return NewlineMatch::Found(1);
                }

                match next {
                    Some(t) if t == T::LF => NewlineMatch::Found(2),
                    Some(_) => NewlineMatch::Found(1),
                    None if is_final => NewlineMatch::Found(1),
                    None => NewlineMatch::NeedMore,
                }
            }
            Self::Two(_, second) => match next {
                Some(t) if t == second => NewlineMatch::Found(2),
                Some(_) => NewlineMatch::NotNewline,
                None if is_final => NewlineMatch::NotNewline,
                None => NewlineMatch::NeedMore,
            },
        }
    }

    /// Tokens written after each record.
    pub fn to_tokens(&self) -> Vec<T> {
        match *self {
            Self::Auto => vec![T::CR, T::LF],
            Self::One(t) => vec![t],
            Self::Two(a, b) => vec![a, b],
        }
    }

    /// Number of newlines in `tokens`.
    pub(crate) fn count_in(&self, tokens: &[T]) -> u64 {
        let count = match *self {
            Self::One(t) => T::count(t, tokens),
            Self::Two(a, b) => tokens.windows(2).filter(|w| w[0] == a && w[1] == b).count(),
            Self::Auto => {
                let lone_cr = tokens
                    .iter()
                    .enumerate()
                    .filter(|&(i, &t)| t == T::CR && tokens.get(i + 1) != Some(&T::LF))
                    .count();

                T::count(T::LF, tokens) + lone_cr
            }
        };

        count as u64
    }

    /// Whether `token` can be part of a newline.
    pub fn contains(&self, token: T) -> bool {
        match *self {
            Self::Auto => token == T::CR || token == T::LF,
            Self::One(t) => token == t,
            Self::Two(a, b) => token == a || token == b,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum NewlineNeedles<T> {
    One(T),
    Two(T, T),
}

/// Structural tokens used to split text into records and fields.
///
/// An empty `newline` selects [`Newline::Auto`]. Setting `escape` switches the
/// tokenizer from quote mode (doubled quotes) to escape mode, where the escape
/// token makes the next token literal.
///
/// A dialect must pass [`Dialect::validate`] before being used. Every reader
/// constructor runs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect<T> {
    pub delimiter: T,
    pub quote: T,
    pub escape: Option<T>,
    pub newline: Vec<T>,
    pub whitespace: Vec<T>,
}

impl<T: Token> Default for Dialect<T> {
    fn default() -> Self {
        Self {
            delimiter: T::from_ascii(b','),
            quote: T::from_ascii(b'"'),
            escape: None,
            newline: Vec::new(),
            whitespace: Vec::new(),
        }
    }
}

impl<T: Token> Dialect<T> {
    /// The RFC 4180 dialect: comma, double quote, no escape and automatic
    /// newline detection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved newline. Only meaningful on a validated dialect.
    pub fn newline(&self) -> Newline<T> {
        match *self.newline.as_slice() {
            [t] => Newline::One(t),
            [a, b] => Newline::Two(a, b),
            _ => Newline::Auto,
        }
    }

    #[inline]
    pub fn is_escape_mode(&self) -> bool {
        self.escape.is_some()
    }

    #[inline]
    pub(crate) fn is_whitespace(&self, token: T) -> bool {
        self.whitespace.contains(&token)
    }

    /// Checks that every structural token is usable and that no two of them
    /// collide. All violations are reported at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let newline = if self.newline.is_empty() {
            vec![T::CR, T::LF]
        } else {
            self.newline.clone()
        };

        let mut check = |name: &str, token: T| {
            if let Some(violation) = token.dialect_violation() {
                errors.push(format!("{} {}.", name, violation));
            }
        };

        check("Delimiter", self.delimiter);
        check("Quote", self.quote);

        if let Some(escape) = self.escape {
            check("Escape", escape);
        }

        if let Some(&bad) = newline.iter().find(|t| t.dialect_violation().is_some()) {
            check("Newline", bad);
        }

        if self.delimiter == self.quote {
            errors.push("Delimiter and Quote must not be equal.".to_string());
        }

        if let Some(escape) = self.escape {
            if escape == self.delimiter {
                errors.push("Escape must not be equal to Delimiter.".to_string());
            }
            if escape == self.quote {
                errors.push("Escape must not be equal to Quote.".to_string());
            }
        }

        if !(1..=2).contains(&newline.len()) {
            errors.push("Newline must be empty, or 1 or 2 tokens long.".to_string());
        } else if newline.len() == 2 && newline[0] == newline[1] {
            errors.push("Newline must not contain duplicate tokens.".to_string());
        }

        if newline.contains(&self.delimiter) {
            errors.push("Newline must not contain Delimiter.".to_string());
        }
        if newline.contains(&self.quote) {
            errors.push("Newline must not contain Quote.".to_string());
        }
        if let Some(escape) = self.escape {
            if newline.contains(&escape) {
                errors.push("Newline must not contain Escape.".to_string());
            }
        }

        for &t in &self.whitespace {
            if t == self.delimiter {
                errors.push("Whitespace must not contain Delimiter.".to_string());
            }
            if t == self.quote {
                errors.push("Whitespace must not contain Quote.".to_string());
            }
            if Some(t) == self.escape {
                errors.push("Whitespace must not contain Escape.".to_string());
            }
            if newline.contains(&t) {
                errors.push("Whitespace must not contain Newline tokens.".to_string());
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        errors.push(self.summary());

        log::debug!("rejecting dialect: {}", errors.join(" "));

        Err(Error::new(ErrorKind::InvalidDialect(errors)))
    }

    fn summary(&self) -> String {
        let render = |tokens: &[T]| format!("{:?}", T::decode(tokens));

        let mut summary = format!(
            "Tokens: Delimiter: {} Quote: {}",
            render(&[self.delimiter]),
            render(&[self.quote])
        );

        if let Some(escape) = self.escape {
            summary.push_str(&format!(" Escape: {}", render(&[escape])));
        }

        if !self.newline.is_empty() {
            summary.push_str(&format!(" Newline: {}", render(&self.newline)));
        }

        if !self.whitespace.is_empty() {
            summary.push_str(&format!(" Whitespace: {}", render(&self.whitespace)));
        }

        summary
    }
}
