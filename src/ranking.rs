//! Multi-criteria stable ranking.
//!
//! A [`Sorter`] is an ordered list of criteria. Each criterion extracts a key
//! from every record and compares keys; the first criterion that separates two
//! records decides their order, later criteria only break its ties. Records
//! that tie on everything keep their input order.
//!
//! Keys are extracted once per record per [`Sorter::rank`] call, never per
//! comparison, so extractors are free to do real work (compile a pattern,
//! scan a string).

use std::cmp::Ordering;
use std::sync::Arc;

use regex::Regex;

/// Compares two records by their position in the input slice
type Comparison<'a> = Box<dyn Fn(usize, usize) -> Ordering + 'a>;

type Criterion<'a, T> = Box<dyn Fn(&[T]) -> Comparison<'a> + 'a>;

pub struct Sorter<'a, T> {
    criteria: Vec<Criterion<'a, T>>,
}

impl<'a, T> Default for Sorter<'a, T> {
    fn default() -> Self {
        Self {
            criteria: Vec::new(),
        }
    }
}

impl<'a, T> Sorter<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a criterion with a custom comparator. `Ordering::Less` means the
    /// first record ranks ahead.
    pub fn by<K, E, C>(mut self, extract: E, compare: C) -> Self
    where
        K: 'a,
        E: Fn(&T) -> K + 'a,
        C: Fn(&K, &K) -> Ordering + 'a,
    {
        let compare = Arc::new(compare);
        self.criteria.push(Box::new(move |records: &[T]| {
            let keys: Vec<K> = records.iter().map(&extract).collect();
            let compare = compare.clone();
            Box::new(move |a: usize, b: usize| (*compare)(&keys[a], &keys[b])) as Comparison<'a>
        }));
        self
    }

    /// `true` ranks ahead of `false`
    pub fn is<E>(self, predicate: E) -> Self
    where
        E: Fn(&T) -> bool + 'a,
    {
        self.by(predicate, |a: &bool, b: &bool| b.cmp(a))
    }

    /// Smaller key ranks ahead
    pub fn min<K, E>(self, extract: E) -> Self
    where
        K: Ord + 'a,
        E: Fn(&T) -> K + 'a,
    {
        self.by(extract, |a: &K, b: &K| a.cmp(b))
    }

    /// Larger key ranks ahead
    pub fn max<K, E>(self, extract: E) -> Self
    where
        K: Ord + 'a,
        E: Fn(&T) -> K + 'a,
    {
        self.by(extract, |a: &K, b: &K| b.cmp(a))
    }

    /// Records whose extracted text matches `pattern` rank ahead
    pub fn matching<S, E>(self, extract: E, pattern: Regex) -> Self
    where
        S: AsRef<str>,
        E: Fn(&T) -> S + 'a,
    {
        self.is(move |record| pattern.is_match(extract(record).as_ref()))
    }

    /// Records whose extracted pattern matches the fixed `text` rank ahead.
    /// A record without a pattern never matches.
    pub fn found_in<E>(self, extract: E, text: impl Into<String>) -> Self
    where
        E: Fn(&T) -> Option<Regex> + 'a,
    {
        let text = text.into();
        self.is(move |record| extract(record).is_some_and(|re| re.is_match(&text)))
    }

    /// Order `records` best first.
    pub fn rank(&self, records: Vec<T>) -> Vec<T> {
        let comparisons: Vec<Comparison<'a>> =
            self.criteria.iter().map(|criterion| criterion(&records[..])).collect();

        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|&a, &b| {
            comparisons
                .iter()
                .map(|compare| compare(a, b))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut slots: Vec<Option<T>> = records.into_iter().map(Some).collect();
        order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Doc {
        name: &'static str,
        updated: i64,
        urls: Vec<&'static str>,
        slug: &'static str,
    }

    fn doc(name: &'static str, updated: i64, urls: &[&'static str]) -> Doc {
        Doc {
            name,
            updated,
            urls: urls.to_vec(),
            slug: "",
        }
    }

    fn names(docs: &[Doc]) -> Vec<&'static str> {
        docs.iter().map(|d| d.name).collect()
    }

    #[test]
    fn test_all_ties_keep_input_order() {
        let docs: Vec<Doc> = ["e", "b", "d", "a", "c"].iter().map(|n| doc(n, 7, &["x"])).collect();
        let ranked = Sorter::new()
            .max(|d: &Doc| d.updated)
            .min(|d: &Doc| d.urls.len())
            .rank(docs.clone());
        assert_eq!(ranked, docs);
    }

    #[test]
    fn test_earlier_criterion_dominates() {
        let a = doc("A", 2, &["x"]);
        let b = doc("B", 1, &["x", "y"]);
        let sorter = Sorter::new().max(|d: &Doc| d.updated).min(|d: &Doc| d.urls.len());
        assert_eq!(names(&sorter.rank(vec![a.clone(), b.clone()])), vec!["A", "B"]);
        assert_eq!(names(&sorter.rank(vec![b, a])), vec!["A", "B"]);

        // Second criterion pointing the other way must not override the first
        let c = doc("C", 2, &["x", "y", "z"]);
        let d = doc("D", 1, &[]);
        assert_eq!(names(&sorter.rank(vec![d, c])), vec!["C", "D"]);
    }

    #[test]
    fn test_tie_falls_through() {
        let a = doc("A", 5, &["x", "y"]);
        let b = doc("B", 5, &["x"]);
        let ranked = Sorter::new()
            .max(|d: &Doc| d.updated)
            .min(|d: &Doc| d.urls.len())
            .rank(vec![a, b]);
        assert_eq!(names(&ranked), vec!["B", "A"]);
    }

    #[test]
    fn test_boolean_true_first() {
        let docs = vec![doc("no", 0, &[]), doc("yes", 0, &["u"])];
        let ranked = Sorter::new().is(|d: &Doc| !d.urls.is_empty()).rank(docs);
        assert_eq!(names(&ranked), vec!["yes", "no"]);
    }

    #[test]
    fn test_pattern_forms() {
        let mut a = doc("a", 0, &[]);
        a.slug = "about-us";
        let mut b = doc("b", 0, &[]);
        b.slug = "contact";

        let ranked = Sorter::new()
            .matching(|d: &Doc| d.slug, Regex::new("^con").unwrap())
            .rank(vec![a.clone(), b.clone()]);
        assert_eq!(names(&ranked), vec!["b", "a"]);

        let ranked = Sorter::new()
            .found_in(|d: &Doc| Regex::new(d.slug).ok(), "/en/about-us")
            .rank(vec![b, a]);
        assert_eq!(names(&ranked), vec!["a", "b"]);
    }

    #[test]
    fn test_extracts_once_per_record() {
        use std::cell::Cell;
        let calls = Cell::new(0);
        let docs: Vec<Doc> = (0..10).map(|i| doc("d", i, &[])).collect();
        let ranked = Sorter::new()
            .max(|d: &Doc| {
                calls.set(calls.get() + 1);
                d.updated
            })
            .rank(docs);
        assert_eq!(calls.get(), 10);
        assert_eq!(ranked[0].updated, 9);
    }

    #[test]
    fn test_empty_input() {
        let ranked: Vec<Doc> = Sorter::new().max(|d: &Doc| d.updated).rank(Vec::new());
        assert!(ranked.is_empty());
    }
}
