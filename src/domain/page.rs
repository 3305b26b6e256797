use serde::Serialize;

/// Window over a history ordered most recent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Turns caller supplied paging into a bounded window.
    ///
    /// An absent or non-positive `limit` becomes `default_limit`, anything
    /// above `max_limit` is capped. An absent or negative `offset` becomes 0.
    pub fn normalize(
        limit: Option<i64>,
        offset: Option<i64>,
        default_limit: u32,
        max_limit: u32,
    ) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => u32::try_from(l).unwrap_or(u32::MAX).min(max_limit),
            _ => default_limit.min(max_limit),
        };
        let offset = match offset {
            Some(o) if o > 0 => u32::try_from(o).unwrap_or(u32::MAX),
            _ => 0,
        };

        Self { limit, offset }
    }

    /// Applies the window to an already ordered iterator.
    pub fn slice<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        items
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Page;

    #[test]
    fn missing_or_invalid_values_fall_back_to_defaults() {
        assert_eq!(Page::normalize(None, None, 50, 200), Page::new(50, 0));
        assert_eq!(Page::normalize(Some(0), Some(-3), 50, 200), Page::new(50, 0));
        assert_eq!(Page::normalize(Some(-10), None, 50, 200), Page::new(50, 0));
    }

    #[test]
    fn limit_is_capped() {
        assert_eq!(Page::normalize(Some(10_000), Some(5), 50, 200), Page::new(200, 5));
        assert_eq!(Page::normalize(Some(i64::MAX), None, 50, 200).limit, 200);
    }

    #[test]
    fn explicit_values_are_kept() {
        assert_eq!(Page::normalize(Some(20), Some(40), 50, 200), Page::new(20, 40));
    }

    #[test]
    fn slice_skips_then_takes() {
        let page = Page::new(2, 1);
        assert_eq!(page.slice([1, 2, 3, 4].into_iter()), vec![2, 3]);
        assert!(Page::new(5, 10).slice([1, 2].into_iter()).is_empty());
    }
}
