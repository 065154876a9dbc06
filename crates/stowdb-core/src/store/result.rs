///
/// ResultSet
///
/// One page of search results. `next_page_key` present means "try the next
/// page"; absent is a definitive end.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResultSet<T> {
    pub results: Vec<T>,
    pub next_page_key: Option<String>,
}

impl<T> ResultSet<T> {
    #[must_use]
    pub const fn new(results: Vec<T>, next_page_key: Option<String>) -> Self {
        Self {
            results,
            next_page_key,
        }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.next_page_key.is_some()
    }

    /// Transform every result, keeping the page key.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ResultSet<U> {
        ResultSet {
            results: self.results.into_iter().map(f).collect(),
            next_page_key: self.next_page_key,
        }
    }

    /// Fallible [`ResultSet::map`].
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<ResultSet<U>, E> {
        Ok(ResultSet {
            results: self.results.into_iter().map(f).collect::<Result<_, _>>()?,
            next_page_key: self.next_page_key,
        })
    }
}

impl<T> Default for ResultSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> IntoIterator for ResultSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
