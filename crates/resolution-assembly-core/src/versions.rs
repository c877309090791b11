//! Which slice of a resolution's history to assemble, and which versions exist.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::model::{iso_date, ChangeRecord, Resolution, ResolutionKey};
use crate::AssemblyError;

/// Cut applied to the sorted candidate changes before evaluation.
///
/// `caused_by` wins over `date` when some candidate was issued by it; otherwise the date cut
/// applies. With neither set every candidate is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct VersionSpec {
    #[serde(default, with = "iso_date::option")]
    pub date: Option<Date>,
    #[serde(default)]
    pub caused_by: Option<ResolutionKey>,
    #[serde(default)]
    pub exclusive: bool,
}

impl VersionSpec {
    #[must_use]
    pub fn latest() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn as_of(date: Date) -> Self {
        Self { date: Some(date), ..Self::default() }
    }

    #[must_use]
    pub fn caused_by(key: ResolutionKey) -> Self {
        Self { caused_by: Some(key), ..Self::default() }
    }

    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResolutionVersion {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub caused_by: ResolutionKey,
}

/// Prefix of `sorted` selected by `spec`.
///
/// A `caused_by` resolution that issued none of the candidates is ignored and the date cut (or
/// every candidate) applies instead.
///
/// # Errors
/// Currently infallible; the `Result` keeps the cut composable with evaluation errors.
pub fn select_changes<'c>(sorted: &'c [ChangeRecord], spec: &VersionSpec) -> Result<&'c [ChangeRecord], AssemblyError> {
    let by_issuer = spec.caused_by.as_ref().and_then(|issuer| {
        let issued = |change: &ChangeRecord| &change.context.issuer == issuer;
        let cut = if spec.exclusive {
            sorted.iter().position(issued)
        } else {
            sorted.iter().rposition(issued).map(|last| last + 1)
        };
        if cut.is_none() {
            tracing::debug!(%issuer, "no candidate change was issued by the selected resolution; using the date cut");
        }
        cut
    });
    let end = match (by_issuer, spec.date) {
        (Some(end), _) => end,
        (None, Some(date)) if spec.exclusive => sorted.partition_point(|change| change.context.date < date),
        (None, Some(date)) => sorted.partition_point(|change| change.context.date <= date),
        (None, None) => sorted.len(),
    };
    Ok(&sorted[..end])
}

/// One version per distinct issuer in change order, after the original text.
#[must_use]
pub fn version_list(resolution: &Resolution, sorted: &[ChangeRecord]) -> Vec<ResolutionVersion> {
    let mut seen = BTreeSet::from([resolution.key.clone()]);
    let mut versions = vec![ResolutionVersion { date: resolution.date, caused_by: resolution.key.clone() }];
    for change in sorted {
        if seen.insert(change.context.issuer.clone()) {
            versions.push(ResolutionVersion { date: change.context.date, caused_by: change.context.issuer.clone() });
        }
    }
    versions
}
