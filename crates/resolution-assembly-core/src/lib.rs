//! Validity-and-assembly engine for amended resolutions.
//!
//! [`evaluator`] decides which changes across a batch are in legal effect; [`materializer`]
//! replays the valid ones relevant to a single resolution onto its authored text.

pub mod content;
pub mod coords;
pub mod document;
pub mod effects;
pub mod evaluator;
pub mod graph;
pub mod hydrator;
pub mod ingest;
pub mod locate;
pub mod materializer;
pub mod model;
pub mod ordering;
pub mod versions;

use serde::{Deserialize, Serialize};

pub use content::{modify_blocks, plain_text, ContentBlock, ModificationError, ReferenceMarker, Table, TextBlock};
pub use coords::{AnnexCoordinate, ArticleContainer, ArticleCoordinate, ChapterCoordinate, Coordinate};
pub use document::{AnnexView, AnnexViewBody, ArticleView, ChapterView, ItemIndex, Lifecycle, ResolutionView};
pub use evaluator::{valid_change_ids, ValidityEvaluator, ValidityReport, VoidedChange};
pub use graph::{NodeKey, ValidityGraph};
pub use ingest::{RawAnnexAncestry, RawArticleAncestry, RawChange, RawChapterAncestry, RawReference};
pub use materializer::{DocumentMaterializer, InapplicableChange, InapplicableReason, MaterializedResolution};
pub use model::{
    format_date, parse_date, Annex, AnnexAncestry, AnnexBody, AnnexParent, AnnexReplacement, AnnexTarget, Article,
    ArticleAncestry, ArticleParent, ArticleTarget, ChangeContext, ChangeId, ChangeKind, ChangeRecord, ChangeType,
    Chapter, ChapterAncestry, ChapterTarget, EntityAncestry, EntityId, Paragraph, Reference, Resolution,
    ResolutionKey, ResolutionRef, ResolutionTarget,
};
pub use ordering::{compare_changes, ordering_rules, sort_changes, sorted_changes};
pub use versions::{select_changes, version_list, ResolutionVersion, VersionSpec};

/// Fatal errors: input the engine cannot reason about. The whole batch is aborted.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AssemblyError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("inconsistent ancestry for {entity}: {detail}")]
    InconsistentAncestry { entity: String, detail: String },
    #[error("{owner} is missing its `{field}` payload")]
    MissingPayload { owner: String, field: &'static str },
    #[error("{owner} carries an extraneous `{field}` payload")]
    ExtraneousPayload { owner: String, field: &'static str },
    #[error("unknown change type `{0}`")]
    UnknownChangeType(String),
    #[error("unknown target type `{0}`")]
    UnknownTargetType(String),
    #[error("{kind} {entity} sits on a numbered path but has no number")]
    MissingNumber { kind: &'static str, entity: EntityId },
    #[error("change {0} adds content to a container without a coordinate")]
    MissingParentCoordinate(ChangeId),
    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),
}

/// Result of assembling one resolution.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Assembly {
    pub resolution: ResolutionView,
    pub versions: Vec<ResolutionVersion>,
    pub inapplicable: Vec<InapplicableChange>,
    pub validity: ValidityReport,
    pub ordering_rules: Vec<String>,
}

/// Assembles `resolution` from its candidate changes, cut by `spec`.
///
/// `candidates` may span the corpus; only changes whose target lies in `resolution` edit the
/// document, but every candidate takes part in deciding validity.
///
/// # Errors
/// Returns the fatal errors of validity evaluation.
pub fn assemble_resolution(
    resolution: &Resolution,
    candidates: &[ChangeRecord],
    spec: &VersionSpec,
) -> Result<Assembly, AssemblyError> {
    let sorted = sorted_changes(candidates);
    let versions = version_list(resolution, &sorted);
    let selected = select_changes(&sorted, spec)?;

    let validity = ValidityEvaluator::new().evaluate(selected)?;
    let valid = validity.valid_set();
    let unresolved: std::collections::BTreeSet<ChangeId> = validity.unresolved.iter().copied().collect();

    let mut materializer = DocumentMaterializer::new(resolution);
    for change in selected {
        if valid.contains(&change.id) {
            materializer.apply(change);
        } else if unresolved.contains(&change.id) {
            materializer.record_unresolved(change);
        }
    }
    let MaterializedResolution { document, inapplicable } = materializer.finish();
    tracing::info!(
        resolution = %resolution.key,
        candidates = candidates.len(),
        selected = selected.len(),
        applied = valid.len(),
        inapplicable = inapplicable.len(),
        "resolution assembled"
    );

    Ok(Assembly { resolution: document, versions, inapplicable, validity, ordering_rules: ordering_rules() })
}
