use std::iter::FusedIterator;
use std::marker::PhantomData;

use crate::token::Token;

/// Something able to report, in order, every position of a haystack holding
/// one of its needles.
pub trait Search<T>: Send + Sync {
    type Indices<'s, 'h>: Iterator<Item = usize>
    where
        Self: 's,
        T: 'h;

    fn search<'s, 'h>(&'s self, haystack: &'h [T]) -> Self::Indices<'s, 'h>;
}

#[inline(always)]
unsafe fn distance<T>(ptr: *const T, origin: *const T) -> usize {
    ptr.offset_from(origin) as usize
}

#[cfg(target_arch = "x86_64")]
mod sse2 {
    use core::arch::x86_64::{
        __m128i, _mm_cmpeq_epi8, _mm_loadu_si128, _mm_movemask_epi8, _mm_or_si128,
        _mm_set1_epi8,
    };

    use super::distance;

    const STEP: usize = 16;

    #[derive(Debug, Clone, Copy)]
    pub struct Kernel {
        needles: [u8; 3],
        splats: [__m128i; 3],
    }

    // SAFETY: the splats are plain register values.
    unsafe impl Send for Kernel {}
    unsafe impl Sync for Kernel {}

    impl Kernel {
        #[inline]
        pub fn new(n1: u8, n2: u8, n3: u8) -> Self {
            // SAFETY: sse2 is part of the x86_64 baseline.
            unsafe {
                Self {
                    needles: [n1, n2, n3],
                    splats: [
                        _mm_set1_epi8(n1 as i8),
                        _mm_set1_epi8(n2 as i8),
                        _mm_set1_epi8(n3 as i8),
                    ],
                }
            }
        }

        #[inline(always)]
        fn is_needle(&self, byte: u8) -> bool {
            byte == self.needles[0] || byte == self.needles[1] || byte == self.needles[2]
        }
    }

    #[derive(Debug)]
    pub struct Cursor {
        start: *const u8,
        end: *const u8,
        current: *const u8,
        mask: u32,
    }

    impl Cursor {
        #[inline]
        pub fn new(haystack: &[u8]) -> Self {
            let ptr = haystack.as_ptr();

            Self {
                start: ptr,
                end: ptr.wrapping_add(haystack.len()),
                current: ptr,
                mask: 0,
            }
        }

        /// # Safety
        ///
        /// The haystack this cursor was created from must still be alive.
        pub unsafe fn next(&mut self, kernel: &Kernel) -> Option<usize> {
            if self.start >= self.end {
                return None;
            }

            let mut mask = self.mask;
            let mut current = self.current;
            let [v1, v2, v3] = kernel.splats;

            loop {
                // Draining the move mask kept from an earlier load
                if mask != 0 {
                    let offset = current.sub(STEP).add(mask.trailing_zeros() as usize);
                    self.mask = mask & (mask - 1);
                    self.current = current;

                    return Some(distance(offset, self.start));
                }

                if distance(self.end, current) < STEP {
                    break;
                }

                let chunk = _mm_loadu_si128(current as *const __m128i);
                let cmp = _mm_or_si128(
                    _mm_or_si128(_mm_cmpeq_epi8(chunk, v1), _mm_cmpeq_epi8(chunk, v2)),
                    _mm_cmpeq_epi8(chunk, v3),
                );

                mask = _mm_movemask_epi8(cmp) as u32;
                current = current.add(STEP);
            }

            while current < self.end {
                if kernel.is_needle(*current) {
                    self.current = current.add(1);
                    self.mask = 0;
                    return Some(distance(current, self.start));
                }
                current = current.add(1);
            }

            self.current = current;
            self.mask = 0;

            None
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod neon {
    use core::arch::aarch64::{
        uint8x16_t, vceqq_u8, vdupq_n_u8, vget_lane_u64, vld1q_u8, vorrq_u8, vreinterpret_u64_u8,
        vreinterpretq_u16_u8, vshrn_n_u16,
    };

    use super::distance;

    const STEP: usize = 16;

    #[inline(always)]
    unsafe fn movemask(v: uint8x16_t) -> u64 {
        let narrowed = vshrn_n_u16(vreinterpretq_u16_u8(v), 4);

        vget_lane_u64(vreinterpret_u64_u8(narrowed), 0) & 0x8888888888888888
    }

    #[derive(Debug, Clone, Copy)]
    pub struct Kernel {
        needles: [u8; 3],
        splats: [uint8x16_t; 3],
    }

    // SAFETY: the splats are plain register values.
    unsafe impl Send for Kernel {}
    unsafe impl Sync for Kernel {}

    impl Kernel {
        #[inline]
        pub fn new(n1: u8, n2: u8, n3: u8) -> Self {
            // SAFETY: neon is part of the aarch64 baseline.
            unsafe {
                Self {
                    needles: [n1, n2, n3],
                    splats: [vdupq_n_u8(n1), vdupq_n_u8(n2), vdupq_n_u8(n3)],
                }
            }
        }

        #[inline(always)]
        fn is_needle(&self, byte: u8) -> bool {
            byte == self.needles[0] || byte == self.needles[1] || byte == self.needles[2]
        }
    }

    #[derive(Debug)]
    pub struct Cursor {
        start: *const u8,
        end: *const u8,
        current: *const u8,
        mask: u64,
    }

    impl Cursor {
        #[inline]
        pub fn new(haystack: &[u8]) -> Self {
            let ptr = haystack.as_ptr();

            Self {
                start: ptr,
                end: ptr.wrapping_add(haystack.len()),
                current: ptr,
                mask: 0,
            }
        }

        /// # Safety
        ///
        /// The haystack this cursor was created from must still be alive.
        pub unsafe fn next(&mut self, kernel: &Kernel) -> Option<usize> {
            if self.start >= self.end {
                return None;
            }

            let mut mask = self.mask;
            let mut current = self.current;
            let [v1, v2, v3] = kernel.splats;

            loop {
                if mask != 0 {
                    let offset = current
                        .sub(STEP)
                        .add((mask.trailing_zeros() >> 2) as usize);
                    self.mask = mask & (mask - 1);
                    self.current = current;

                    return Some(distance(offset, self.start));
                }

                if distance(self.end, current) < STEP {
                    break;
                }

                let chunk = vld1q_u8(current);
                let cmp = vorrq_u8(
                    vorrq_u8(vceqq_u8(chunk, v1), vceqq_u8(chunk, v2)),
                    vceqq_u8(chunk, v3),
                );

                mask = movemask(cmp);
                current = current.add(STEP);
            }

            while current < self.end {
                if kernel.is_needle(*current) {
                    self.current = current.add(1);
                    self.mask = 0;
                    return Some(distance(current, self.start));
                }
                current = current.add(1);
            }

            self.current = current;
            self.mask = 0;

            None
        }
    }
}

/// Returns the SIMD instructions set used by this crate's amortized
/// `memchr`-like searcher.
///
/// Note that `memchr` routines, also used by this crate might use
/// different instruction sets.
pub fn searcher_simd_instructions() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    {
        "sse2"
    }

    #[cfg(target_arch = "aarch64")]
    {
        "neon"
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        "none"
    }
}

/// Amortized byte searcher for three needles.
///
/// Move masks holding more than a single match are kept and consumed on
/// subsequent calls instead of restarting a search right after each match.
#[derive(Debug, Clone)]
pub struct Searcher {
    #[cfg(target_arch = "x86_64")]
    kernel: sse2::Kernel,

    #[cfg(target_arch = "aarch64")]
    kernel: neon::Kernel,

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    kernel: memchr::arch::all::memchr::Three,
}

impl Searcher {
    #[inline]
    pub fn new(n1: u8, n2: u8, n3: u8) -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            Self {
                kernel: sse2::Kernel::new(n1, n2, n3),
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            Self {
                kernel: neon::Kernel::new(n1, n2, n3),
            }
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Self {
                kernel: memchr::arch::all::memchr::Three::new(n1, n2, n3),
            }
        }
    }
}

impl Search<u8> for Searcher {
    type Indices<'s, 'h> = Indices<'s, 'h> where Self: 's, u8: 'h;

    #[inline(always)]
    fn search<'s, 'h>(&'s self, haystack: &'h [u8]) -> Indices<'s, 'h> {
        #[cfg(target_arch = "x86_64")]
        {
            Indices {
                kernel: &self.kernel,
                cursor: sse2::Cursor::new(haystack),
                haystack: PhantomData,
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            Indices {
                kernel: &self.kernel,
                cursor: neon::Cursor::new(haystack),
                haystack: PhantomData,
            }
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Indices {
                inner: self.kernel.iter(haystack),
            }
        }
    }
}

#[derive(Debug)]
pub struct Indices<'s, 'h> {
    #[cfg(target_arch = "x86_64")]
    kernel: &'s sse2::Kernel,
    #[cfg(target_arch = "x86_64")]
    cursor: sse2::Cursor,

    #[cfg(target_arch = "aarch64")]
    kernel: &'s neon::Kernel,
    #[cfg(target_arch = "aarch64")]
    cursor: neon::Cursor,

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    haystack: PhantomData<&'h [u8]>,

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    inner: memchr::arch::all::memchr::ThreeIter<'s, 'h>,
}

impl FusedIterator for Indices<'_, '_> {}

impl Iterator for Indices<'_, '_> {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<Self::Item> {
        #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
        {
            // SAFETY: the haystack outlives 'h, which this iterator is bound to.
            unsafe { self.cursor.next(self.kernel) }
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            self.inner.next()
        }
    }
}

/// Token-by-token searcher, used for token widths without a vectorized kernel.
#[derive(Debug, Clone, Copy)]
pub struct ScalarSearcher<T> {
    needles: [T; 3],
}

impl<T: Token> ScalarSearcher<T> {
    pub fn new(n1: T, n2: T, n3: T) -> Self {
        Self {
            needles: [n1, n2, n3],
        }
    }
}

pub struct ScalarIndices<'s, 'h, T> {
    needles: &'s [T; 3],
    haystack: &'h [T],
    pos: usize,
}

impl<T: Token> Iterator for ScalarIndices<'_, '_, T> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        let [n1, n2, n3] = *self.needles;
        let offset = T::find3(n1, n2, n3, &self.haystack[self.pos..])?;
        let found = self.pos + offset;
        self.pos = found + 1;

        Some(found)
    }
}

impl<T: Token> FusedIterator for ScalarIndices<'_, '_, T> {}

impl<T: Token> Search<T> for ScalarSearcher<T> {
    type Indices<'s, 'h> = ScalarIndices<'s, 'h, T> where Self: 's, T: 'h;

    #[inline]
    fn search<'s, 'h>(&'s self, haystack: &'h [T]) -> ScalarIndices<'s, 'h, T> {
        ScalarIndices {
            needles: &self.needles,
            haystack,
            pos: 0,
        }
    }
}
