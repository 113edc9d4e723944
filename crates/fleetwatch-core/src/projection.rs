// ── Presentation projections ──
//
// Pure shaping of the enriched view model for the table and map
// screens. No filtering, no re-sorting.

use std::num::NonZeroUsize;

use serde::Serialize;

use crate::model::{LatLng, MapMarker};

/// Rows per table page.
pub const DEFAULT_PAGE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(4);

/// One window of a list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<'a, T> {
    pub items: &'a [T],
    /// 1-based page number after clamping.
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl<T> Page<'_, T> {
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

/// Window `items` into pages of `page_size`.
///
/// `page` is 1-based and clamped into `[1, total_pages]`; an empty list
/// still has one (empty) page.
pub fn paginate<T>(items: &[T], page_size: NonZeroUsize, page: usize) -> Page<'_, T> {
    let size = page_size.get();
    let total_pages = items.len().div_ceil(size).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * size;
    let end = (start + size).min(items.len());

    Page {
        items: items.get(start..end).unwrap_or(&[]),
        page,
        total_pages,
        total_items: items.len(),
    }
}

/// Map center: the first marker's position, or `None` for an empty map.
pub fn map_center(markers: &[MapMarker]) -> Option<LatLng> {
    markers.first().map(|m| m.position)
}
