use crate::token::Token;

/// Length of the byte order mark at the start of `input`, if any.
#[inline]
pub fn trim_bom<T: Token>(input: &[T]) -> usize {
    if input.starts_with(T::BOM) {
        T::BOM.len()
    } else {
        0
    }
}

/// Whether `input` is too short to tell if it starts with a byte order mark.
#[inline]
pub(crate) fn may_hold_partial_bom<T: Token>(input: &[T]) -> bool {
    input.len() < T::BOM.len() && T::BOM.starts_with(input)
}

/// Bounds of `input[start..end]` once leading and trailing whitespace tokens
/// are removed.
///
/// With an `escape` token, a trailing whitespace token preceded by an odd run
/// of escapes is literal and kept.
#[inline]
pub(crate) fn trim_bounds<T: Token>(
    input: &[T],
    mut start: usize,
    mut end: usize,
    whitespace: &[T],
    escape: Option<T>,
) -> (usize, usize) {
    if whitespace.is_empty() {
        return (start, end);
    }

    while start < end && whitespace.contains(&input[start]) {
        start += 1;
    }

    while end > start && whitespace.contains(&input[end - 1]) {
        if let Some(escape) = escape {
            let escapes = input[start..end - 1]
                .iter()
                .rev()
                .take_while(|&&t| t == escape)
                .count();

            if escapes % 2 == 1 {
                break;
            }
        }

        end -= 1;
    }

    (start, end)
}
