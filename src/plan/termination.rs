use crate::url::PageSlot;
use serde::{Deserialize, Serialize};

/// When a rule stops following pages of its own pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationCondition {
    /// The pattern is not paginated; each matched URL is fetched once
    SinglePage,

    /// Follow the page counter until the page stops looking like the pattern
    Pagination {
        /// Signature every page of the chain must have
        expected_signature: String,
        slot: PageSlot,
        /// Hard bound on the chain length
        max_pages: u32,
        /// First page observed outside the pattern, if analysis saw one
        stop_at_page: Option<u32>,
        stop_at_url: Option<String>,
        /// Highest page observed inside the pattern
        last_known_page: Option<u32>,
    },
}

impl TerminationCondition {
    pub fn is_paginated(&self) -> bool {
        matches!(self, Self::Pagination { .. })
    }

    /// Decides whether the crawl should stop at a page
    ///
    /// # Arguments
    ///
    /// * `page_number` - Page counter of the page just fetched (the first page is 1)
    /// * `observed_signature` - Signature the fetched page clustered into, if known
    ///
    /// # Returns
    ///
    /// True if the page must not be extracted and its chain must not be followed.
    pub fn should_stop(&self, page_number: u32, observed_signature: Option<&str>) -> bool {
        match self {
            Self::SinglePage => page_number > 1,
            Self::Pagination {
                expected_signature,
                max_pages,
                stop_at_page,
                ..
            } => {
                if page_number > *max_pages {
                    return true;
                }
                if stop_at_page.map(|stop| page_number >= stop).unwrap_or(false) {
                    return true;
                }
                observed_signature
                    .map(|observed| observed != expected_signature)
                    .unwrap_or(false)
            }
        }
    }
}
