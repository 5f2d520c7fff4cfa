//! Cosmetic selector collection
//!
//! Element-hiding selectors gathered from `##` lines, grouped into a global
//! set and per-domain sets. Serializes as
//! `{ "global": [..], "perDomain": { "<domain>": [..] } }`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosmeticCollection {
    #[serde(default)]
    pub global: BTreeSet<String>,
    #[serde(default)]
    pub per_domain: BTreeMap<String, BTreeSet<String>>,
}

impl CosmeticCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.per_domain.is_empty()
    }

    pub fn insert_global(&mut self, selector: String) {
        self.global.insert(selector);
    }

    pub fn insert_for_domain(&mut self, domain: String, selector: String) {
        self.per_domain.entry(domain).or_default().insert(selector);
    }

    pub fn selectors_for(&self, domain: &str) -> Option<&BTreeSet<String>> {
        self.per_domain.get(domain)
    }

    /// Total number of selectors, counting each domain entry separately.
    pub fn selector_count(&self) -> usize {
        self.global.len() + self.per_domain.values().map(BTreeSet::len).sum::<usize>()
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: &CosmeticCollection) {
        self.global.extend(other.global.iter().cloned());
        for (domain, selectors) in &other.per_domain {
            self.per_domain
                .entry(domain.clone())
                .or_default()
                .extend(selectors.iter().cloned());
        }
    }

    /// Owned variant of [`merge`](Self::merge) that moves the selectors.
    pub fn absorb(&mut self, other: CosmeticCollection) {
        self.global.extend(other.global);
        for (domain, selectors) in other.per_domain {
            self.per_domain.entry(domain).or_default().extend(selectors);
        }
    }
}

/// Union several collections into one.
pub fn merge_collections<I>(collections: I) -> CosmeticCollection
where
    I: IntoIterator<Item = CosmeticCollection>,
{
    collections.into_iter().fold(CosmeticCollection::new(), |mut acc, c| {
        acc.absorb(c);
        acc
    })
}
