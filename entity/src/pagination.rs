use serde::{Deserialize, Serialize};

/// One page of records plus the totals needed to render pagination controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            total: 0,
            page: 1,
            limit: 10,
            total_pages: 0,
        }
    }
}

impl<T> From<&PaginatedResponse<T>> for Pagination {
    fn from(response: &PaginatedResponse<T>) -> Self {
        Self {
            total: response.total,
            page: response.page,
            limit: response.limit,
            total_pages: response.total_pages,
        }
    }
}
