use serde::{Deserialize, Serialize};
use sieve_query::RequestParams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationLinks {
    pub first: String,
    pub last: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// Length-aware pagination block. The same shape is produced whether the
/// page was sliced by the store or from an in-memory ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginator {
    pub current_page: usize,
    pub per_page: usize,
    pub total: usize,
    pub last_page: usize,
    /// 1-based position of the first item on the page
    pub from: Option<usize>,
    pub to: Option<usize>,
    pub links: PaginationLinks,
}

impl Paginator {
    pub fn new(
        total: usize,
        page: usize,
        per_page: usize,
        base_path: &str,
        params: &RequestParams,
    ) -> Self {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let last_page = total.div_ceil(per_page).max(1);

        let offset = (page - 1).saturating_mul(per_page);
        let (from, to) = if offset < total {
            (Some(offset + 1), Some((offset + per_page).min(total)))
        } else {
            (None, None)
        };

        let link = |n: usize| format!("{}?{}", base_path, params.to_query_string(&[("page", n.to_string())]));
        let links = PaginationLinks {
            first: link(1),
            last: link(last_page),
            prev: (page > 1).then(|| link((page - 1).min(last_page))),
            next: (page < last_page).then(|| link(page.saturating_add(1))),
        };

        Self {
            current_page: page,
            per_page,
            total,
            last_page,
            from,
            to,
            links,
        }
    }

    pub fn offset(&self) -> usize {
        (self.current_page - 1).saturating_mul(self.per_page)
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_page() {
        let params = RequestParams::new().with("status", "active").with("page", "2");
        let paginator = Paginator::new(10, 2, 3, "/users", &params);

        assert_eq!(paginator.last_page, 4);
        assert_eq!(paginator.from, Some(4));
        assert_eq!(paginator.to, Some(6));
        assert_eq!(paginator.offset(), 3);
        assert!(paginator.has_more_pages());
        assert_eq!(paginator.links.first, "/users?status=active&page=1");
        assert_eq!(paginator.links.prev.as_deref(), Some("/users?status=active&page=1"));
        assert_eq!(paginator.links.next.as_deref(), Some("/users?status=active&page=3"));
        assert_eq!(paginator.links.last, "/users?status=active&page=4");
    }

    #[test]
    fn test_empty_result_has_one_page() {
        let paginator = Paginator::new(0, 1, 15, "/", &RequestParams::new());
        assert_eq!(paginator.last_page, 1);
        assert_eq!(paginator.from, None);
        assert_eq!(paginator.links.prev, None);
        assert_eq!(paginator.links.next, None);
        assert_eq!(paginator.links.first, "/?page=1");
    }

    #[test]
    fn test_huge_page_number_saturates() {
        let paginator = Paginator::new(10, usize::MAX, 100, "/", &RequestParams::new());
        assert_eq!(paginator.current_page, usize::MAX);
        assert_eq!(paginator.offset(), usize::MAX);
        assert_eq!((paginator.from, paginator.to), (None, None));
        assert_eq!(paginator.links.prev.as_deref(), Some("/?page=1"));
        assert_eq!(paginator.links.next, None);
    }

    #[test]
    fn test_page_past_the_end() {
        let paginator = Paginator::new(5, 9, 2, "/", &RequestParams::new());
        assert_eq!(paginator.current_page, 9);
        assert_eq!((paginator.from, paginator.to), (None, None));
        assert_eq!(paginator.links.prev.as_deref(), Some("/?page=3"));
        assert!(!paginator.has_more_pages());
    }
}
