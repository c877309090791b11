use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Month};
use ulid::Ulid;

use crate::content::ContentBlock;
use crate::coords::{AnnexCoordinate, ArticleCoordinate, ChapterCoordinate, Coordinate};
use crate::AssemblyError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntityId(pub Ulid);

impl EntityId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChangeId(pub Ulid);

impl ChangeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ChangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Natural identity of a resolution: issuing body code, number and year.
///
/// Ordered by `(year, number, initial)`, which is the issuer tie-break of the change ordering.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct ResolutionKey {
    pub initial: String,
    pub number: u32,
    pub year: i32,
}

impl ResolutionKey {
    #[must_use]
    pub fn new(initial: impl Into<String>, number: u32, year: i32) -> Self {
        Self { initial: initial.into(), number, year }
    }
}

impl Ord for ResolutionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.year
            .cmp(&other.year)
            .then_with(|| self.number.cmp(&other.number))
            .then_with(|| self.initial.cmp(&other.initial))
    }
}

impl PartialOrd for ResolutionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for ResolutionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}/{}", self.initial, self.number, self.year)
    }
}

impl FromStr for ResolutionKey {
    type Err = AssemblyError;

    /// Parses the `INITIAL-NUMBER/YEAR` form, e.g. `CSU-1/2012`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || AssemblyError::Validation(format!("invalid resolution key `{value}`"));
        let (head, year) = value.trim().rsplit_once('/').ok_or_else(invalid)?;
        let (initial, number) = head.rsplit_once('-').ok_or_else(invalid)?;
        if initial.is_empty() {
            return Err(invalid());
        }
        let number = number.parse::<u32>().map_err(|_| invalid())?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        Ok(Self::new(initial, number, year))
    }
}

/// Parses a calendar date in `YYYY-MM-DD` form.
///
/// # Errors
/// Returns `AssemblyError::Validation` when the text is not a valid calendar date.
pub fn parse_date(value: &str) -> Result<Date, AssemblyError> {
    let invalid = || AssemblyError::Validation(format!("invalid date `{value}`, expected YYYY-MM-DD"));
    let mut parts = value.trim().splitn(3, '-');
    let year = parts.next().and_then(|part| part.parse::<i32>().ok()).ok_or_else(invalid)?;
    let month = parts.next().and_then(|part| part.parse::<u8>().ok()).ok_or_else(invalid)?;
    let day = parts.next().and_then(|part| part.parse::<u8>().ok()).ok_or_else(invalid)?;
    let month = Month::try_from(month).map_err(|_| invalid())?;
    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

#[must_use]
pub fn format_date(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_date(&text).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;

        pub fn serialize<S: Serializer>(date: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => serializer.serialize_some(&super::super::format_date(*date)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Date>, D::Error> {
            let text = Option::<String>::deserialize(deserializer)?;
            text.map(|text| super::super::parse_date(&text).map_err(serde::de::Error::custom)).transpose()
        }
    }
}

/// Causal key of a change: when it takes effect and which resolution issued it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChangeContext {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub issuer: ResolutionKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Paragraph {
    pub number: u32,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Article {
    pub id: EntityId,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub suffix: u32,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Chapter {
    pub id: EntityId,
    pub number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnexBody {
    Text {
        #[serde(default)]
        content: Vec<ContentBlock>,
    },
    WithArticles {
        #[serde(default)]
        initial_text: Vec<ContentBlock>,
        #[serde(default)]
        final_text: Vec<ContentBlock>,
        #[serde(default)]
        articles: Vec<Article>,
        #[serde(default)]
        chapters: Vec<Chapter>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Annex {
    pub id: EntityId,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    pub body: AnnexBody,
}

/// An authored resolution as stored, before any change is replayed onto it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Resolution {
    pub id: EntityId,
    pub key: ResolutionKey,
    #[serde(with = "iso_date")]
    pub date: Date,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub recitals: Vec<Paragraph>,
    #[serde(default)]
    pub considerations: Vec<Paragraph>,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub annexes: Vec<Annex>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResolutionRef {
    pub id: EntityId,
    pub key: ResolutionKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AnnexParent {
    Resolution(ResolutionRef),
    /// Inline content of a `ReplaceAnnex` change.
    ReplacementFor(ChangeId),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AnnexAncestry {
    pub id: EntityId,
    pub number: Option<u32>,
    pub parent: AnnexParent,
}

impl AnnexAncestry {
    /// True when the annex only exists as the output of a change.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(self.parent, AnnexParent::ReplacementFor(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChapterAncestry {
    pub id: EntityId,
    pub number: u32,
    pub annex: AnnexAncestry,
}

impl ChapterAncestry {
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.annex.is_virtual()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ArticleParent {
    Resolution(ResolutionRef),
    Annex(AnnexAncestry),
    Chapter(ChapterAncestry),
    /// Replacement content of a `ReplaceArticle` change.
    NewContentOf(ChangeId),
    /// Article introduced by an `AddArticle*` change.
    AddedBy(ChangeId),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ArticleAncestry {
    pub id: EntityId,
    pub number: Option<u32>,
    #[serde(default)]
    pub suffix: u32,
    pub parent: ArticleParent,
}

impl ArticleAncestry {
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        match &self.parent {
            ArticleParent::Resolution(_) => false,
            ArticleParent::Annex(annex) => annex.is_virtual(),
            ArticleParent::Chapter(chapter) => chapter.is_virtual(),
            ArticleParent::NewContentOf(_) | ArticleParent::AddedBy(_) => true,
        }
    }
}

/// Persisted ancestry of any entity, walked bottom-up by the hydrator.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EntityAncestry {
    Resolution(ResolutionRef),
    Annex(AnnexAncestry),
    Chapter(ChapterAncestry),
    Article(ArticleAncestry),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResolutionTarget {
    pub key: ResolutionKey,
    #[serde(default)]
    pub entity: Option<ResolutionRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AnnexTarget {
    pub coordinate: AnnexCoordinate,
    #[serde(default)]
    pub entity: Option<AnnexAncestry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChapterTarget {
    pub coordinate: ChapterCoordinate,
    #[serde(default)]
    pub entity: Option<ChapterAncestry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ArticleTarget {
    pub coordinate: ArticleCoordinate,
    #[serde(default)]
    pub entity: Option<ArticleAncestry>,
}

/// Target of a change. Every kind carries its natural coordinate; `entity` is set when the
/// persisted entity (native or virtual) is known.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "target_type", rename_all = "snake_case")]
pub enum Reference {
    Resolution(ResolutionTarget),
    Annex(AnnexTarget),
    Chapter(ChapterTarget),
    Article(ArticleTarget),
}

impl Reference {
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        match self {
            Self::Resolution(target) => Coordinate::Resolution(target.key.clone()),
            Self::Annex(target) => Coordinate::Annex(target.coordinate.clone()),
            Self::Chapter(target) => Coordinate::Chapter(target.coordinate.clone()),
            Self::Article(target) => Coordinate::Article(target.coordinate.clone()),
        }
    }

    #[must_use]
    pub fn entity(&self) -> Option<EntityAncestry> {
        match self {
            Self::Resolution(target) => target.entity.clone().map(EntityAncestry::Resolution),
            Self::Annex(target) => target.entity.clone().map(EntityAncestry::Annex),
            Self::Chapter(target) => target.entity.clone().map(EntityAncestry::Chapter),
            Self::Article(target) => target.entity.clone().map(EntityAncestry::Article),
        }
    }

    #[must_use]
    pub fn resolution(&self) -> &ResolutionKey {
        match self {
            Self::Resolution(target) => &target.key,
            Self::Annex(target) => &target.coordinate.resolution,
            Self::Chapter(target) => &target.coordinate.annex.resolution,
            Self::Article(target) => target.coordinate.container.resolution(),
        }
    }
}

impl ResolutionTarget {
    #[must_use]
    pub fn reference(&self) -> Reference {
        Reference::Resolution(self.clone())
    }
}

impl AnnexTarget {
    #[must_use]
    pub fn reference(&self) -> Reference {
        Reference::Annex(self.clone())
    }
}

impl ChapterTarget {
    #[must_use]
    pub fn reference(&self) -> Reference {
        Reference::Chapter(self.clone())
    }
}

impl ArticleTarget {
    #[must_use]
    pub fn reference(&self) -> Reference {
        Reference::Article(self.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "source", content = "annex", rename_all = "snake_case")]
pub enum AnnexReplacement {
    /// Content written inside the change itself.
    Inline(Annex),
    /// An annex of the issuing resolution that replaces the target.
    Reference(Annex),
}

impl AnnexReplacement {
    #[must_use]
    pub fn annex(&self) -> &Annex {
        match self {
            Self::Inline(annex) | Self::Reference(annex) => annex,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    ModifyArticle,
    ReplaceArticle,
    Repeal,
    RatifyAdReferendum,
    ReplaceAnnex,
    AddAnnexToResolution,
    AddAnnexToAnnex,
    ModifyTextAnnex,
    AddArticleToResolution,
    AddArticleToAnnex,
    AddArticleToChapter,
    ApplyModificationsAnnex,
    Advanced,
}

impl ChangeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModifyArticle => "MODIFY_ARTICLE",
            Self::ReplaceArticle => "REPLACE_ARTICLE",
            Self::Repeal => "REPEAL",
            Self::RatifyAdReferendum => "RATIFY_AD_REFERENDUM",
            Self::ReplaceAnnex => "REPLACE_ANNEX",
            Self::AddAnnexToResolution => "ADD_ANNEX_TO_RESOLUTION",
            Self::AddAnnexToAnnex => "ADD_ANNEX_TO_ANNEX",
            Self::ModifyTextAnnex => "MODIFY_TEXT_ANNEX",
            Self::AddArticleToResolution => "ADD_ARTICLE_TO_RESOLUTION",
            Self::AddArticleToAnnex => "ADD_ARTICLE_TO_ANNEX",
            Self::AddArticleToChapter => "ADD_ARTICLE_TO_CHAPTER",
            Self::ApplyModificationsAnnex => "APPLY_MODIFICATIONS_ANNEX",
            Self::Advanced => "ADVANCED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MODIFY_ARTICLE" => Some(Self::ModifyArticle),
            "REPLACE_ARTICLE" => Some(Self::ReplaceArticle),
            "REPEAL" => Some(Self::Repeal),
            "RATIFY_AD_REFERENDUM" => Some(Self::RatifyAdReferendum),
            "REPLACE_ANNEX" => Some(Self::ReplaceAnnex),
            "ADD_ANNEX_TO_RESOLUTION" => Some(Self::AddAnnexToResolution),
            "ADD_ANNEX_TO_ANNEX" => Some(Self::AddAnnexToAnnex),
            "MODIFY_TEXT_ANNEX" => Some(Self::ModifyTextAnnex),
            "ADD_ARTICLE_TO_RESOLUTION" => Some(Self::AddArticleToResolution),
            "ADD_ARTICLE_TO_ANNEX" => Some(Self::AddArticleToAnnex),
            "ADD_ARTICLE_TO_CHAPTER" => Some(Self::AddArticleToChapter),
            "APPLY_MODIFICATIONS_ANNEX" => Some(Self::ApplyModificationsAnnex),
            "ADVANCED" => Some(Self::Advanced),
            _ => None,
        }
    }
}

impl Display for ChangeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    ModifyArticle {
        target: ArticleTarget,
        before: Vec<ContentBlock>,
        after: Vec<ContentBlock>,
    },
    ReplaceArticle {
        target: ArticleTarget,
        new_content: Article,
    },
    Repeal {
        target: Reference,
    },
    RatifyAdReferendum {
        target: ResolutionTarget,
    },
    ReplaceAnnex {
        target: AnnexTarget,
        new_content: AnnexReplacement,
    },
    AddAnnexToResolution {
        target: ResolutionTarget,
        annex: Annex,
        new_number: Option<u32>,
    },
    AddAnnexToAnnex {
        target: AnnexTarget,
        annex: Annex,
        new_number: Option<u32>,
    },
    ModifyTextAnnex {
        target: AnnexTarget,
        before: Vec<ContentBlock>,
        after: Vec<ContentBlock>,
    },
    AddArticleToResolution {
        target: ResolutionTarget,
        article: Article,
        new_number: Option<u32>,
        new_suffix: Option<u32>,
    },
    AddArticleToAnnex {
        target: AnnexTarget,
        article: Article,
        new_number: Option<u32>,
        new_suffix: Option<u32>,
    },
    AddArticleToChapter {
        target: ChapterTarget,
        article: Article,
        new_number: Option<u32>,
        new_suffix: Option<u32>,
    },
    ApplyModificationsAnnex {
        target: AnnexTarget,
    },
    Advanced {
        target: ResolutionTarget,
        description: String,
    },
}

impl ChangeKind {
    #[must_use]
    pub fn change_type(&self) -> ChangeType {
        match self {
            Self::ModifyArticle { .. } => ChangeType::ModifyArticle,
            Self::ReplaceArticle { .. } => ChangeType::ReplaceArticle,
            Self::Repeal { .. } => ChangeType::Repeal,
            Self::RatifyAdReferendum { .. } => ChangeType::RatifyAdReferendum,
            Self::ReplaceAnnex { .. } => ChangeType::ReplaceAnnex,
            Self::AddAnnexToResolution { .. } => ChangeType::AddAnnexToResolution,
            Self::AddAnnexToAnnex { .. } => ChangeType::AddAnnexToAnnex,
            Self::ModifyTextAnnex { .. } => ChangeType::ModifyTextAnnex,
            Self::AddArticleToResolution { .. } => ChangeType::AddArticleToResolution,
            Self::AddArticleToAnnex { .. } => ChangeType::AddArticleToAnnex,
            Self::AddArticleToChapter { .. } => ChangeType::AddArticleToChapter,
            Self::ApplyModificationsAnnex { .. } => ChangeType::ApplyModificationsAnnex,
            Self::Advanced { .. } => ChangeType::Advanced,
        }
    }

    /// The structural target of the change as a reference.
    #[must_use]
    pub fn target(&self) -> Reference {
        match self {
            Self::ModifyArticle { target, .. } | Self::ReplaceArticle { target, .. } => target.reference(),
            Self::Repeal { target } => target.clone(),
            Self::RatifyAdReferendum { target }
            | Self::AddAnnexToResolution { target, .. }
            | Self::AddArticleToResolution { target, .. }
            | Self::Advanced { target, .. } => target.reference(),
            Self::ReplaceAnnex { target, .. }
            | Self::AddAnnexToAnnex { target, .. }
            | Self::ModifyTextAnnex { target, .. }
            | Self::AddArticleToAnnex { target, .. }
            | Self::ApplyModificationsAnnex { target } => target.reference(),
            Self::AddArticleToChapter { target, .. } => target.reference(),
        }
    }

    /// Resolution whose text this change directly affects.
    #[must_use]
    pub fn affected_resolution(&self) -> ResolutionKey {
        self.target().resolution().clone()
    }
}

/// A typed edit one resolution makes to another (or to itself).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChangeRecord {
    pub id: ChangeId,
    pub context: ChangeContext,
    /// Article of the issuing resolution that carries this change.
    pub origin: ArticleAncestry,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl ChangeRecord {
    #[must_use]
    pub fn change_type(&self) -> ChangeType {
        self.kind.change_type()
    }
}
