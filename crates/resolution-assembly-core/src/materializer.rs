//! Replays valid changes onto a mutable copy of one resolution.
//!
//! Every change is dispatched to a [`Slot`], the place in the tree it addresses. Slots for
//! other resolutions are [`Slot::Irrelevant`] and ignore every operation, so the same replay
//! loop can be fed a batch that spans the whole corpus.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::content::{modify_blocks, ContentBlock};
use crate::coords::{AnnexCoordinate, ArticleContainer, ChapterCoordinate};
use crate::document::{
    AnnexView, AnnexViewBody, ArticleView, ChapterView, IndexAllocator, ItemIndex, Lifecycle, ResolutionView,
};
use crate::model::{
    AnnexAncestry, AnnexTarget, Article, ArticleTarget, ChangeContext, ChangeId, ChangeKind, ChangeRecord,
    ChangeType, ChapterAncestry, ChapterTarget, EntityId, Reference, Resolution, ResolutionKey,
};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InapplicableReason {
    /// The container or target addressed by the change is not in the document.
    TargetNotFound,
    SlotMissing,
    SlotOccupied,
    ModificationFailed { message: String },
    NotTextAnnex,
    NestedAnnex,
    ManualReview { description: String },
}

impl Display for InapplicableReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetNotFound => f.write_str("target not found"),
            Self::SlotMissing => f.write_str("slot is empty"),
            Self::SlotOccupied => f.write_str("slot is already occupied"),
            Self::ModificationFailed { message } => write!(f, "modification failed: {message}"),
            Self::NotTextAnnex => f.write_str("annex has no plain text body"),
            Self::NestedAnnex => f.write_str("annexes nested in annexes are not supported"),
            Self::ManualReview { .. } => f.write_str("requires manual review"),
        }
    }
}

/// A change that was valid but could not be replayed onto the document.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct InapplicableChange {
    pub change_id: ChangeId,
    pub change_type: ChangeType,
    pub context: ChangeContext,
    pub reason: InapplicableReason,
}

pub trait SlotItem {
    fn id(&self) -> EntityId;
    fn index(&self) -> ItemIndex;
    fn lifecycle(&self) -> &Lifecycle;
    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Plain content that literal modifications apply to, when the item has any.
    fn content_mut(&mut self) -> Option<&mut Vec<ContentBlock>> {
        None
    }
}

impl SlotItem for ArticleView {
    fn id(&self) -> EntityId {
        self.id
    }

    fn index(&self) -> ItemIndex {
        self.index
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn content_mut(&mut self) -> Option<&mut Vec<ContentBlock>> {
        Some(&mut self.content)
    }
}

impl SlotItem for AnnexView {
    fn id(&self) -> EntityId {
        self.id
    }

    fn index(&self) -> ItemIndex {
        self.index
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn content_mut(&mut self) -> Option<&mut Vec<ContentBlock>> {
        match &mut self.body {
            AnnexViewBody::Text { content } => Some(content),
            AnnexViewBody::WithArticles { .. } => None,
        }
    }
}

impl SlotItem for ChapterView {
    fn id(&self) -> EntityId {
        self.id
    }

    fn index(&self) -> ItemIndex {
        ItemIndex::Defined { number: self.number, suffix: 0 }
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SlotKey {
    Index(ItemIndex),
    Identity(EntityId),
}

impl SlotKey {
    fn matches<T: SlotItem>(self, item: &T) -> bool {
        match self {
            Self::Index(index) => item.index() == index,
            Self::Identity(id) => item.id() == id,
        }
    }
}

#[derive(Debug)]
pub enum Slot<'d, T> {
    /// Addresses another resolution; every operation is a no-op.
    Irrelevant,
    /// Addresses this resolution, but the place cannot hold the item.
    Unavailable(InapplicableReason),
    Collection { items: &'d mut Vec<T>, key: SlotKey },
}

impl<T: SlotItem> Slot<'_, T> {
    fn position(&self) -> Option<usize> {
        match self {
            Self::Collection { items, key } => items.iter().position(|item| key.matches(item)),
            Self::Irrelevant | Self::Unavailable(_) => None,
        }
    }

    #[must_use]
    pub fn is_irrelevant(&self) -> bool {
        matches!(self, Self::Irrelevant)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.position().is_some()
    }

    #[must_use]
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Collection { items, key } => items.iter().find(|item| key.matches(*item)),
            Self::Irrelevant | Self::Unavailable(_) => None,
        }
    }

    fn get_mut(&mut self) -> Result<Option<&mut T>, InapplicableReason> {
        match self {
            Self::Irrelevant => Ok(None),
            Self::Unavailable(reason) => Err(reason.clone()),
            Self::Collection { items, key } => {
                let key = *key;
                items.iter_mut().find(|item| key.matches(&**item)).map(Some).ok_or(InapplicableReason::SlotMissing)
            }
        }
    }

    /// Stores `value`. An existing occupant hands over its `added_by` and `modified_by`, and
    /// `by` is appended as a modification; an empty slot records `by` as the adder.
    ///
    /// # Errors
    /// Returns the reason the slot is unavailable.
    pub fn set(&mut self, mut value: T, by: &ResolutionKey) -> Result<(), InapplicableReason> {
        let position = self.position();
        match self {
            Self::Irrelevant => Ok(()),
            Self::Unavailable(reason) => Err(reason.clone()),
            Self::Collection { items, .. } => {
                match position {
                    Some(position) => {
                        let previous = items[position].lifecycle().clone();
                        let lifecycle = value.lifecycle_mut();
                        lifecycle.added_by = previous.added_by;
                        lifecycle.modified_by = previous.modified_by;
                        lifecycle.record_modification(by);
                        items[position] = value;
                    }
                    None => {
                        value.lifecycle_mut().added_by = Some(by.clone());
                        items.push(value);
                    }
                }
                Ok(())
            }
        }
    }

    /// Fills an empty slot with the item built for the slot's index.
    ///
    /// # Errors
    /// `SlotOccupied` when something already sits there.
    pub fn insert_with(
        &mut self,
        build: impl FnOnce(ItemIndex) -> T,
        by: &ResolutionKey,
    ) -> Result<(), InapplicableReason> {
        if self.exists() {
            return Err(InapplicableReason::SlotOccupied);
        }
        match self {
            Self::Irrelevant => Ok(()),
            Self::Unavailable(reason) => Err(reason.clone()),
            Self::Collection { key: SlotKey::Index(index), .. } => {
                let index = *index;
                self.set(build(index), by)
            }
            Self::Collection { key: SlotKey::Identity(_), .. } => Err(InapplicableReason::TargetNotFound),
        }
    }

    /// Swaps the occupant for the item built at the occupant's index.
    ///
    /// # Errors
    /// `SlotMissing` when the slot is empty.
    pub fn replace_with(
        &mut self,
        build: impl FnOnce(ItemIndex) -> T,
        by: &ResolutionKey,
    ) -> Result<(), InapplicableReason> {
        let Some(index) = self.get_mut()?.map(|current| current.index()) else {
            return Ok(());
        };
        self.set(build(index), by)
    }

    /// # Errors
    /// `SlotMissing` when the slot is empty.
    pub fn repeal(&mut self, by: &ResolutionKey) -> Result<(), InapplicableReason> {
        if let Some(item) = self.get_mut()? {
            item.lifecycle_mut().repealed_by = Some(by.clone());
        }
        Ok(())
    }

    /// Literal before/after substitution on the occupant's content.
    ///
    /// # Errors
    /// `SlotMissing`, `NotTextAnnex` for items without plain content, or `ModificationFailed`.
    pub fn modify(
        &mut self,
        before: &[ContentBlock],
        after: &[ContentBlock],
        by: &ResolutionKey,
    ) -> Result<(), InapplicableReason> {
        let Some(item) = self.get_mut()? else {
            return Ok(());
        };
        let content = item.content_mut().ok_or(InapplicableReason::NotTextAnnex)?;
        let modified = modify_blocks(content, before, after)
            .map_err(|err| InapplicableReason::ModificationFailed { message: err.to_string() })?;
        *content = modified;
        item.lifecycle_mut().record_modification(by);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ArticleHome {
    Resolution,
    Annex(usize),
    Chapter(usize, usize),
}

fn find_annex(document: &ResolutionView, coordinate: &AnnexCoordinate, entity: Option<&AnnexAncestry>) -> Option<usize> {
    match entity.filter(|entity| entity.is_virtual()) {
        Some(entity) => document.annexes.iter().position(|annex| annex.id == entity.id),
        None => document.annexes.iter().position(|annex| annex.index.matches(coordinate.number, 0)),
    }
}

fn find_chapter(
    document: &ResolutionView,
    coordinate: &ChapterCoordinate,
    entity: Option<&ChapterAncestry>,
) -> Option<(usize, usize)> {
    if let Some(entity) = entity.filter(|entity| entity.is_virtual()) {
        return document.annexes.iter().enumerate().find_map(|(annex, view)| {
            view.chapters().iter().position(|chapter| chapter.id == entity.id).map(|chapter| (annex, chapter))
        });
    }
    let annex = find_annex(document, &coordinate.annex, None)?;
    let chapter = document.annexes[annex].chapters().iter().position(|chapter| chapter.number == coordinate.number)?;
    Some((annex, chapter))
}

fn container_home(document: &ResolutionView, container: &ArticleContainer) -> Option<ArticleHome> {
    match container {
        ArticleContainer::Resolution(_) => Some(ArticleHome::Resolution),
        ArticleContainer::Annex(annex) => find_annex(document, annex, None).map(ArticleHome::Annex),
        ArticleContainer::Chapter(chapter) => {
            find_chapter(document, chapter, None).map(|(annex, chapter)| ArticleHome::Chapter(annex, chapter))
        }
    }
}

/// Where a positional article reference lands. Annex-level references fall through to the
/// chapter holding the article when the annex has no direct article at that position.
fn positional_home(document: &ResolutionView, target: &ArticleTarget) -> Option<ArticleHome> {
    let home = container_home(document, &target.coordinate.container)?;
    let ArticleHome::Annex(annex) = home else {
        return Some(home);
    };
    let (number, suffix) = (target.coordinate.number, target.coordinate.suffix);
    let view = &document.annexes[annex];
    if view.articles().iter().any(|article| article.index.matches(number, suffix)) {
        return Some(home);
    }
    view.chapters()
        .iter()
        .position(|chapter| chapter.articles.iter().any(|article| article.index.matches(number, suffix)))
        .map(|chapter| ArticleHome::Chapter(annex, chapter))
        .or(Some(home))
}

fn identity_home(document: &ResolutionView, id: EntityId) -> Option<ArticleHome> {
    if document.articles.iter().any(|article| article.id == id) {
        return Some(ArticleHome::Resolution);
    }
    for (annex, view) in document.annexes.iter().enumerate() {
        if view.articles().iter().any(|article| article.id == id) {
            return Some(ArticleHome::Annex(annex));
        }
        if let Some(chapter) =
            view.chapters().iter().position(|chapter| chapter.articles.iter().any(|article| article.id == id))
        {
            return Some(ArticleHome::Chapter(annex, chapter));
        }
    }
    None
}

fn article_slot_at(document: &mut ResolutionView, home: ArticleHome, key: SlotKey) -> Slot<'_, ArticleView> {
    let items = match home {
        ArticleHome::Resolution => Some(&mut document.articles),
        ArticleHome::Annex(annex) => match &mut document.annexes[annex].body {
            AnnexViewBody::WithArticles { articles, .. } => Some(articles),
            AnnexViewBody::Text { .. } => None,
        },
        ArticleHome::Chapter(annex, chapter) => match &mut document.annexes[annex].body {
            AnnexViewBody::WithArticles { chapters, .. } => Some(&mut chapters[chapter].articles),
            AnnexViewBody::Text { .. } => None,
        },
    };
    match items {
        Some(items) => Slot::Collection { items, key },
        None => Slot::Unavailable(InapplicableReason::NotTextAnnex),
    }
}

fn article_slot<'d>(document: &'d mut ResolutionView, target: &ArticleTarget) -> Slot<'d, ArticleView> {
    if target.coordinate.container.resolution() != &document.key {
        return Slot::Irrelevant;
    }
    if let Some(entity) = target.entity.as_ref().filter(|entity| entity.is_virtual()) {
        return match identity_home(document, entity.id) {
            Some(home) => article_slot_at(document, home, SlotKey::Identity(entity.id)),
            None => Slot::Unavailable(InapplicableReason::TargetNotFound),
        };
    }
    let key = SlotKey::Index(ItemIndex::Defined { number: target.coordinate.number, suffix: target.coordinate.suffix });
    match positional_home(document, target) {
        Some(home) => article_slot_at(document, home, key),
        None => Slot::Unavailable(InapplicableReason::TargetNotFound),
    }
}

fn new_article_slot<'d>(
    document: &'d mut ResolutionView,
    container: &ArticleContainer,
    index: ItemIndex,
) -> Slot<'d, ArticleView> {
    if container.resolution() != &document.key {
        return Slot::Irrelevant;
    }
    match container_home(document, container) {
        Some(home) => article_slot_at(document, home, SlotKey::Index(index)),
        None => Slot::Unavailable(InapplicableReason::TargetNotFound),
    }
}

fn annex_slot<'d>(document: &'d mut ResolutionView, target: &AnnexTarget) -> Slot<'d, AnnexView> {
    if target.coordinate.resolution != document.key {
        return Slot::Irrelevant;
    }
    match find_annex(document, &target.coordinate, target.entity.as_ref()) {
        Some(annex) => {
            let key = SlotKey::Identity(document.annexes[annex].id);
            Slot::Collection { items: &mut document.annexes, key }
        }
        None => Slot::Unavailable(InapplicableReason::TargetNotFound),
    }
}

fn chapter_slot<'d>(document: &'d mut ResolutionView, target: &ChapterTarget) -> Slot<'d, ChapterView> {
    if target.coordinate.annex.resolution != document.key {
        return Slot::Irrelevant;
    }
    let Some((annex, chapter)) = find_chapter(document, &target.coordinate, target.entity.as_ref()) else {
        return Slot::Unavailable(InapplicableReason::TargetNotFound);
    };
    match &mut document.annexes[annex].body {
        AnnexViewBody::WithArticles { chapters, .. } => {
            let key = SlotKey::Identity(chapters[chapter].id);
            Slot::Collection { items: chapters, key }
        }
        AnnexViewBody::Text { .. } => Slot::Unavailable(InapplicableReason::NotTextAnnex),
    }
}

/// Document plus the changes that could not be replayed onto it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MaterializedResolution {
    pub document: ResolutionView,
    pub inapplicable: Vec<InapplicableChange>,
}

#[derive(Debug)]
pub struct DocumentMaterializer {
    document: ResolutionView,
    allocator: IndexAllocator,
    inapplicable: Vec<InapplicableChange>,
}

impl DocumentMaterializer {
    #[must_use]
    pub fn new(resolution: &Resolution) -> Self {
        let mut allocator = IndexAllocator::new();
        let document = ResolutionView::from_resolution(resolution, &mut allocator);
        Self { document, allocator, inapplicable: Vec::new() }
    }

    #[must_use]
    pub fn document(&self) -> &ResolutionView {
        &self.document
    }

    #[must_use]
    pub fn is_relevant(&self, change: &ChangeRecord) -> bool {
        change.kind.affected_resolution() == self.document.key
    }

    /// Replays one valid change. Failures are recorded, never returned.
    pub fn apply(&mut self, change: &ChangeRecord) {
        if let Err(reason) = self.try_apply(change) {
            self.record(change, reason);
        }
    }

    /// Records a change whose target the evaluator could not resolve, when it concerns this document.
    pub fn record_unresolved(&mut self, change: &ChangeRecord) {
        if self.is_relevant(change) {
            self.record(change, InapplicableReason::TargetNotFound);
        }
    }

    #[must_use]
    pub fn finish(mut self) -> MaterializedResolution {
        self.document.sort();
        MaterializedResolution { document: self.document, inapplicable: self.inapplicable }
    }

    fn record(&mut self, change: &ChangeRecord, reason: InapplicableReason) {
        tracing::warn!(
            change = %change.id,
            change_type = %change.change_type(),
            resolution = %self.document.key,
            %reason,
            "change could not be applied"
        );
        self.inapplicable.push(InapplicableChange {
            change_id: change.id,
            change_type: change.change_type(),
            context: change.context.clone(),
            reason,
        });
    }

    fn try_apply(&mut self, change: &ChangeRecord) -> Result<(), InapplicableReason> {
        let by = &change.context.issuer;
        let relevant = self.is_relevant(change);
        let Self { document, allocator, .. } = self;
        match &change.kind {
            ChangeKind::ModifyArticle { target, before, after } => article_slot(document, target).modify(before, after, by),
            ChangeKind::ReplaceArticle { target, new_content } => {
                article_slot(document, target).replace_with(|index| ArticleView::from_article(new_content, index), by)
            }
            ChangeKind::Repeal { target } => match target {
                Reference::Resolution(target) => {
                    if target.key == document.key {
                        document.repealed_by = Some(by.clone());
                    }
                    Ok(())
                }
                Reference::Annex(target) => annex_slot(document, target).repeal(by),
                Reference::Chapter(target) => chapter_slot(document, target).repeal(by),
                Reference::Article(target) => article_slot(document, target).repeal(by),
            },
            ChangeKind::RatifyAdReferendum { target } => {
                if target.key == document.key {
                    document.ratified_by = Some(by.clone());
                }
                Ok(())
            }
            ChangeKind::ReplaceAnnex { target, new_content } => annex_slot(document, target)
                .replace_with(|index| AnnexView::from_annex(new_content.annex(), index, allocator), by),
            ChangeKind::AddAnnexToResolution { target, annex, new_number } => {
                if target.key != document.key {
                    return Ok(());
                }
                let index = allocator.index(*new_number, 0);
                let mut slot = Slot::Collection { items: &mut document.annexes, key: SlotKey::Index(index) };
                slot.insert_with(|index| AnnexView::from_annex(annex, index, allocator), by)
            }
            ChangeKind::AddAnnexToAnnex { .. } => {
                if relevant {
                    Err(InapplicableReason::NestedAnnex)
                } else {
                    Ok(())
                }
            }
            ChangeKind::ModifyTextAnnex { target, before, after } => annex_slot(document, target).modify(before, after, by),
            ChangeKind::AddArticleToResolution { target, article, new_number, new_suffix } => {
                let container = ArticleContainer::Resolution(target.key.clone());
                add_article(document, allocator, &container, article, *new_number, *new_suffix, by)
            }
            ChangeKind::AddArticleToAnnex { target, article, new_number, new_suffix } => {
                let container = ArticleContainer::Annex(target.coordinate.clone());
                add_article(document, allocator, &container, article, *new_number, *new_suffix, by)
            }
            ChangeKind::AddArticleToChapter { target, article, new_number, new_suffix } => {
                let container = ArticleContainer::Chapter(target.coordinate.clone());
                add_article(document, allocator, &container, article, *new_number, *new_suffix, by)
            }
            // Bundled changes carry their own effects; activation has nothing to replay.
            ChangeKind::ApplyModificationsAnnex { .. } => Ok(()),
            ChangeKind::Advanced { description, .. } => {
                if relevant {
                    Err(InapplicableReason::ManualReview { description: description.clone() })
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn add_article(
    document: &mut ResolutionView,
    allocator: &mut IndexAllocator,
    container: &ArticleContainer,
    article: &Article,
    number: Option<u32>,
    suffix: Option<u32>,
    by: &ResolutionKey,
) -> Result<(), InapplicableReason> {
    if container.resolution() != &document.key {
        return Ok(());
    }
    let index = allocator.index(number, suffix.unwrap_or(0));
    new_article_slot(document, container, index).insert_with(|index| ArticleView::from_article(article, index), by)
}
