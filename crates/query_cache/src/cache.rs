use core_types::{Page, Record};
use tracing::debug;

/// Fetched pages for one query identity, kept in fetch order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCache<T> {
    pages: Vec<Page<T>>,
}

impl<T> Default for PageCache<T> {
    fn default() -> Self {
        Self { pages: Vec::new() }
    }
}

impl<T: Record> PageCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages must arrive in ascending offset order.
    pub fn append_page(&mut self, page: Page<T>) {
        debug_assert!(
            self.pages.last().is_none_or(|last| last.offset < page.offset),
            "page at offset {} appended out of order",
            page.offset
        );
        debug!(
            collection = %T::COLLECTION,
            offset = page.offset,
            len = page.len(),
            "page cached"
        );
        self.pages.push(page);
    }


    /// All cached records, page by page, each page in server order.
    pub fn flatten(&self) -> impl Iterator<Item = &T> + Clone + '_ {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.flatten().cloned().collect()
    }

    pub fn get(&self, id: T::Id) -> Option<&T> {
        self.flatten().find(|item| item.id() == id)
    }

    /// Swaps the record with `id` in place. Returns `false`, leaving the cache
    /// untouched, when no cached page holds it.
    pub fn replace_entry(&mut self, id: T::Id, updated: T) -> bool {
        let slot = self
            .pages
            .iter_mut()
            .flat_map(|page| page.items.iter_mut())
            .find(|item| item.id() == id);
        match slot {
            Some(slot) => {
                *slot = updated;
                true
            }
            None => {
                debug!(collection = %T::COLLECTION, %id, "replace target not cached");
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.pages.clear();
    }

    pub fn pages(&self) -> &[Page<T>] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(Page::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
