use regex::Regex;

use crate::domain::{Category, EntryKind, ManifestEntry};
use crate::error::SyncError;

pub const FASTQ_SUFFIXES: [&str; 2] = [".fq.gz", ".fastq.gz"];

/// Predicate over manifest entries. Selection is pure: it never fails and an
/// empty match is an empty selection.
#[derive(Debug, Clone)]
pub enum Selector {
    All,
    PathPrefix(String),
    Kind(EntryKind),
    Category(Category),
    NameSuffix(Vec<String>),
    NamePattern(Regex),
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Not(Box<Selector>),
}

impl Selector {
    pub fn path_prefix(prefix: impl Into<String>) -> Self {
        Selector::PathPrefix(prefix.into())
    }

    /// Case-insensitive name suffix match against any of `suffixes`.
    pub fn name_suffix<I, S>(suffixes: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = suffixes
            .into_iter()
            .map(|suffix| suffix.as_ref().trim().to_ascii_lowercase())
            .collect::<Vec<_>>();
        if suffixes.is_empty() || suffixes.iter().any(String::is_empty) {
            return Err(SyncError::InvalidSelector(
                "name suffix list must contain non-empty suffixes".to_string(),
            ));
        }
        Ok(Selector::NameSuffix(suffixes))
    }

    pub fn name_pattern(pattern: &str) -> Result<Self, SyncError> {
        Regex::new(pattern)
            .map(Selector::NamePattern)
            .map_err(|err| SyncError::InvalidSelector(err.to_string()))
    }

    /// Gzipped FASTQ files under `path`.
    pub fn fastq_under(path: impl Into<String>) -> Self {
        Selector::path_prefix(path)
            .and(Selector::Kind(EntryKind::File))
            .and(Selector::NameSuffix(
                FASTQ_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            ))
    }

    pub fn and(self, other: Selector) -> Self {
        match self {
            Selector::All => other,
            Selector::And(mut parts) => {
                parts.push(other);
                Selector::And(parts)
            }
            first => Selector::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Selector) -> Self {
        match self {
            Selector::Or(mut parts) => {
                parts.push(other);
                Selector::Or(parts)
            }
            first => Selector::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Selector::Not(Box::new(self))
    }

    pub fn matches(&self, entry: &ManifestEntry) -> bool {
        match self {
            Selector::All => true,
            Selector::PathPrefix(prefix) => entry.remote().logical_path().starts_with(prefix),
            Selector::Kind(kind) => entry.kind() == *kind,
            Selector::Category(category) => entry.category() == *category,
            Selector::NameSuffix(suffixes) => {
                let name = entry.display_name().to_ascii_lowercase();
                suffixes.iter().any(|suffix| name.ends_with(suffix))
            }
            Selector::NamePattern(regex) => regex.is_match(entry.display_name()),
            Selector::And(parts) => parts.iter().all(|part| part.matches(entry)),
            Selector::Or(parts) => parts.iter().any(|part| part.matches(entry)),
            Selector::Not(inner) => !inner.matches(entry),
        }
    }
}

/// Ordered subsequence of `entries` matching `selector`.
pub fn select(entries: Vec<ManifestEntry>, selector: &Selector) -> Vec<ManifestEntry> {
    entries
        .into_iter()
        .filter(|entry| selector.matches(entry))
        .collect()
}

pub fn select_ref<'a>(entries: &'a [ManifestEntry], selector: &Selector) -> Vec<&'a ManifestEntry> {
    entries
        .iter()
        .filter(|entry| selector.matches(entry))
        .collect()
}
