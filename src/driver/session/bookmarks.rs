// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::sync::Arc;

/// Container for bookmarks used to build a causal chain.
///
/// Bookmarks are opaque tokens handed out by the server.
/// Passing the bookmarks of one unit of work to the next one instructs the
/// server to wait until it has caught up with the state those bookmarks
/// describe.
/// The driver forwards them verbatim and never interprets them.
///
/// For easier joining and manipulating of multiple causal chains, bookmarks
/// implement [`Add`] and [`Sub`] on both owned and borrowed values.
#[derive(Debug, Clone, Default)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct Bookmarks {
    bookmarks: HashSet<Arc<String>>,
}

impl Bookmarks {
    /// Creates a new [`Bookmarks`] instance from the given raw bookmarks.
    pub fn from_raw(raw: impl IntoIterator<Item = String>) -> Self {
        Bookmarks {
            bookmarks: raw.into_iter().map(Arc::new).collect(),
        }
    }

    /// Creates a new [`Bookmarks`] containing no bookmarks.
    ///
    /// This is equivalent to [`Bookmarks::default()`].
    #[inline]
    pub fn empty() -> Self {
        Default::default()
    }

    /// Return the count of contained bookmarks.
    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    /// Returns `true` if this [`Bookmarks`] contains no bookmarks.
    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    /// Turn these [`Bookmarks`] into an iterator over the raw bookmarks.
    pub fn into_raw(self) -> impl Iterator<Item = String> {
        self.bookmarks
            .into_iter()
            .map(|bm| Arc::try_unwrap(bm).unwrap_or_else(|bm| String::from(&*bm)))
    }

    /// Return an iterator over the raw contained bookmarks.
    pub fn raw(&self) -> impl Iterator<Item = &str> {
        self.bookmarks.iter().map(|bm| bm.as_str())
    }
}

impl Add for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, mut rhs: Self) -> Self::Output {
        if self.bookmarks.len() < rhs.bookmarks.len() {
            std::mem::swap(&mut self.bookmarks, &mut rhs.bookmarks)
        }
        self.bookmarks.extend(rhs.bookmarks);
        self
    }
}

impl Add<&Bookmarks> for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, rhs: &Bookmarks) -> Self::Output {
        self.bookmarks.extend(rhs.bookmarks.iter().map(Arc::clone));
        self
    }
}

impl AddAssign for Bookmarks {
    fn add_assign(&mut self, rhs: Self) {
        self.bookmarks.extend(rhs.bookmarks);
    }
}

impl AddAssign<&Bookmarks> for Bookmarks {
    fn add_assign(&mut self, rhs: &Bookmarks) {
        self.bookmarks.extend(rhs.bookmarks.iter().map(Arc::clone));
    }
}

impl Sub for Bookmarks {
    type Output = Bookmarks;

    fn sub(mut self, rhs: Self) -> Self::Output {
        self.bookmarks.retain(|bm| !rhs.bookmarks.contains(bm));
        self
    }
}

impl Sub<&Bookmarks> for Bookmarks {
    type Output = Bookmarks;

    fn sub(mut self, rhs: &Bookmarks) -> Self::Output {
        self.bookmarks.retain(|bm| !rhs.bookmarks.contains(bm));
        self
    }
}

impl SubAssign for Bookmarks {
    fn sub_assign(&mut self, rhs: Self) {
        self.bookmarks.retain(|bm| !rhs.bookmarks.contains(bm));
    }
}

impl SubAssign<&Bookmarks> for Bookmarks {
    fn sub_assign(&mut self, rhs: &Bookmarks) {
        self.bookmarks.retain(|bm| !rhs.bookmarks.contains(bm));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn bookmarks<const N: usize>(raw: [&str; N]) -> Bookmarks {
        Bookmarks::from_raw(raw.into_iter().map(String::from))
    }

    fn assert_bookmarks<const N: usize>(bm: &Bookmarks, raw: [&str; N]) {
        assert_eq!(bm.raw().collect::<HashSet<_>>(), HashSet::from(raw));
    }

    #[test]
    fn test_empty() {
        assert!(Bookmarks::empty().is_empty());
        assert_eq!(Bookmarks::empty().len(), 0);
    }

    #[test]
    fn test_from_raw_deduplicates() {
        let bm = bookmarks(["a", "b", "a"]);
        assert_eq!(bm.len(), 2);
        assert_bookmarks(&bm, ["a", "b"]);
    }

    #[test]
    fn test_add() {
        let bm = bookmarks(["a", "b"]) + bookmarks(["b", "c"]);
        assert_bookmarks(&bm, ["a", "b", "c"]);
    }

    #[test]
    fn test_sub() {
        let mut bm = bookmarks(["a", "b", "c"]);
        bm -= bookmarks(["a", "c", "d"]);
        assert_bookmarks(&bm, ["b"]);
    }

    #[test]
    fn test_into_raw_roundtrip() {
        let bm = bookmarks(["a", "b"]);
        let raw = bm.clone().into_raw().collect::<HashSet<_>>();
        assert_eq!(raw, HashSet::from([String::from("a"), String::from("b")]));
    }
}
