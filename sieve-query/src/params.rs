//! Raw request parameters and the reserved (non-filter) options

use sieve_core::{PaginationConfig, SortDirection, RESERVED_PARAMS};

/// Ordered key/value request parameters as delivered by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace; the last value for a key wins
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    /// Parse `a=1&b=%3E%3D2`; `+` decodes to a space
    pub fn parse_query(query: &str) -> Self {
        let mut params = Self::new();
        for part in query.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            params.insert(decode(key), decode(value));
        }
        params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parameters that name filters, in request order
    pub fn filters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| !RESERVED_PARAMS.contains(k))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Encode back into a query string, optionally overriding one key
    pub fn to_query_string(&self, overrides: &[(&str, String)]) -> String {
        let mut pairs: Vec<(String, String)> = self.pairs.clone();
        for (key, value) in overrides {
            match pairs.iter_mut().find(|(k, _)| k == key) {
                Some(pair) => pair.1 = value.clone(),
                None => pairs.push((key.to_string(), value.clone())),
            }
        }
        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// Pagination, sort, search and selection options of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub page: usize,
    pub per_page: usize,
    pub sort_by: Option<String>,
    pub sort_direction: SortDirection,
    /// `None` when the request has no `fields` parameter
    pub fields: Option<Vec<String>>,
    pub search: Option<String>,
}

impl QueryOptions {
    /// Lenient: malformed paging values fall back to defaults, `per_page` is clamped
    pub fn from_params(params: &RequestParams, pagination: &PaginationConfig) -> Self {
        let page = params
            .get("page")
            .and_then(|p| p.trim().parse::<usize>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(1);
        let per_page = params
            .get("per_page")
            .and_then(|p| p.trim().parse::<usize>().ok())
            .unwrap_or(pagination.default_per_page)
            .clamp(1, pagination.max_per_page.max(1));
        let sort_by = params
            .get("sort_by")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let sort_direction = params
            .get("sort_direction")
            .and_then(SortDirection::parse)
            .unwrap_or_default();
        let fields = params.get("fields").map(|f| {
            f.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        });
        let search = params
            .get("search")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            page,
            per_page,
            sort_by,
            sort_direction,
            fields,
            search,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_decodes() {
        let params = RequestParams::parse_query("?age=%3E%3D18&name=Jo*&city=New+York&flag");
        assert_eq!(params.get("age"), Some(">=18"));
        assert_eq!(params.get("name"), Some("Jo*"));
        assert_eq!(params.get("city"), Some("New York"));
        assert_eq!(params.get("flag"), Some(""));
    }

    #[test]
    fn test_filters_skip_reserved() {
        let params = RequestParams::parse_query("page=2&age=5&sort_by=name&fields=a,b");
        let filters: Vec<_> = params.filters().collect();
        assert_eq!(filters, vec![("age", "5")]);
    }

    #[test]
    fn test_options_defaults_and_clamping() {
        let pagination = PaginationConfig::default();
        let options = QueryOptions::from_params(&RequestParams::new(), &pagination);
        assert_eq!(options.page, 1);
        assert_eq!(options.per_page, 15);
        assert_eq!(options.fields, None);

        let params = RequestParams::parse_query("page=0&per_page=1000&sort_direction=DESC&fields=id,%20name");
        let options = QueryOptions::from_params(&params, &pagination);
        assert_eq!(options.page, 1);
        assert_eq!(options.per_page, 100);
        assert_eq!(options.sort_direction, SortDirection::Desc);
        assert_eq!(options.fields, Some(vec!["id".to_string(), "name".to_string()]));
    }

    #[test]
    fn test_zero_max_per_page_still_yields_one() {
        let pagination = PaginationConfig {
            default_per_page: 0,
            max_per_page: 0,
            ..PaginationConfig::default()
        };
        let params = RequestParams::parse_query("per_page=50");
        assert_eq!(QueryOptions::from_params(&params, &pagination).per_page, 1);
        assert_eq!(QueryOptions::from_params(&RequestParams::new(), &pagination).per_page, 1);
    }

    #[test]
    fn test_huge_page_offset_saturates() {
        let params = RequestParams::parse_query("page=1000000000000000000&per_page=100");
        let options = QueryOptions::from_params(&params, &PaginationConfig::default());
        assert_eq!(options.offset(), usize::MAX);
    }

    #[test]
    fn test_query_string_override() {
        let params = RequestParams::new().with("age", ">=18").with("page", "1");
        assert_eq!(
            params.to_query_string(&[("page", "2".to_string())]),
            "age=%3E%3D18&page=2"
        );
    }
}
