//! Row-shaped change records and their conversion into the closed model enums.
//!
//! Stored rows keep one nullable column per variant payload. Conversion requires exactly the
//! payloads the change type needs and rejects any other populated column.

use serde::{Deserialize, Serialize};

use crate::content::ContentBlock;
use crate::model::{
    Annex, AnnexAncestry, AnnexParent, AnnexReplacement, AnnexTarget, Article, ArticleAncestry, ArticleParent,
    ArticleTarget, ChangeContext, ChangeId, ChangeKind, ChangeRecord, ChangeType, ChapterAncestry, ChapterTarget,
    EntityId, Reference, ResolutionRef, ResolutionTarget,
};
use crate::AssemblyError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RawReference {
    pub target_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annex: Option<AnnexTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<ChapterTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<ArticleTarget>,
}

impl RawReference {
    fn populated(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.resolution.is_some() {
            fields.push("resolution");
        }
        if self.annex.is_some() {
            fields.push("annex");
        }
        if self.chapter.is_some() {
            fields.push("chapter");
        }
        if self.article.is_some() {
            fields.push("article");
        }
        fields
    }
}

impl From<&Reference> for RawReference {
    fn from(reference: &Reference) -> Self {
        match reference {
            Reference::Resolution(target) => {
                Self { target_type: "RESOLUTION".to_string(), resolution: Some(target.clone()), ..Self::default() }
            }
            Reference::Annex(target) => {
                Self { target_type: "ANNEX".to_string(), annex: Some(target.clone()), ..Self::default() }
            }
            Reference::Chapter(target) => {
                Self { target_type: "CHAPTER".to_string(), chapter: Some(target.clone()), ..Self::default() }
            }
            Reference::Article(target) => {
                Self { target_type: "ARTICLE".to_string(), article: Some(target.clone()), ..Self::default() }
            }
        }
    }
}

impl TryFrom<RawReference> for Reference {
    type Error = AssemblyError;

    fn try_from(raw: RawReference) -> Result<Self, Self::Error> {
        let owner = format!("{} reference", raw.target_type);
        let expected = match raw.target_type.as_str() {
            "RESOLUTION" => "resolution",
            "ANNEX" => "annex",
            "CHAPTER" => "chapter",
            "ARTICLE" => "article",
            other => return Err(AssemblyError::UnknownTargetType(other.to_string())),
        };
        if let Some(field) = raw.populated().into_iter().find(|field| *field != expected) {
            return Err(AssemblyError::ExtraneousPayload { owner, field });
        }
        let missing = || AssemblyError::MissingPayload { owner: owner.clone(), field: expected };
        Ok(match expected {
            "resolution" => Self::Resolution(raw.resolution.ok_or_else(missing)?),
            "annex" => Self::Annex(raw.annex.ok_or_else(missing)?),
            "chapter" => Self::Chapter(raw.chapter.ok_or_else(missing)?),
            _ => Self::Article(raw.article.ok_or_else(missing)?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RawAnnexAncestry {
    pub id: EntityId,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub resolution: Option<ResolutionRef>,
    #[serde(default)]
    pub replacement_for: Option<ChangeId>,
}

impl TryFrom<RawAnnexAncestry> for AnnexAncestry {
    type Error = AssemblyError;

    fn try_from(raw: RawAnnexAncestry) -> Result<Self, Self::Error> {
        let parent = match (raw.resolution, raw.replacement_for) {
            (Some(resolution), None) => AnnexParent::Resolution(resolution),
            (None, Some(change)) => AnnexParent::ReplacementFor(change),
            (None, None) => return Err(inconsistent(raw.id, "annex has no known parent kind")),
            (Some(_), Some(_)) => return Err(inconsistent(raw.id, "annex has more than one parent")),
        };
        Ok(Self { id: raw.id, number: raw.number, parent })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RawChapterAncestry {
    pub id: EntityId,
    pub number: u32,
    pub annex: RawAnnexAncestry,
}

impl TryFrom<RawChapterAncestry> for ChapterAncestry {
    type Error = AssemblyError;

    fn try_from(raw: RawChapterAncestry) -> Result<Self, Self::Error> {
        Ok(Self { id: raw.id, number: raw.number, annex: raw.annex.try_into()? })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RawArticleAncestry {
    pub id: EntityId,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub suffix: u32,
    #[serde(default)]
    pub resolution: Option<ResolutionRef>,
    #[serde(default)]
    pub annex: Option<RawAnnexAncestry>,
    #[serde(default)]
    pub chapter: Option<RawChapterAncestry>,
    #[serde(default)]
    pub new_content_of: Option<ChangeId>,
    #[serde(default)]
    pub added_by: Option<ChangeId>,
}

impl TryFrom<RawArticleAncestry> for ArticleAncestry {
    type Error = AssemblyError;

    fn try_from(raw: RawArticleAncestry) -> Result<Self, Self::Error> {
        let mut parents = Vec::new();
        if let Some(resolution) = raw.resolution {
            parents.push(ArticleParent::Resolution(resolution));
        }
        if let Some(annex) = raw.annex {
            parents.push(ArticleParent::Annex(annex.try_into()?));
        }
        if let Some(chapter) = raw.chapter {
            parents.push(ArticleParent::Chapter(chapter.try_into()?));
        }
        if let Some(change) = raw.new_content_of {
            parents.push(ArticleParent::NewContentOf(change));
        }
        if let Some(change) = raw.added_by {
            parents.push(ArticleParent::AddedBy(change));
        }
        let parent = match parents.len() {
            0 => return Err(inconsistent(raw.id, "article has no known parent kind")),
            1 => parents.remove(0),
            _ => return Err(inconsistent(raw.id, "article has more than one parent")),
        };
        Ok(Self { id: raw.id, number: raw.number, suffix: raw.suffix, parent })
    }
}

impl From<&AnnexAncestry> for RawAnnexAncestry {
    fn from(annex: &AnnexAncestry) -> Self {
        let (resolution, replacement_for) = match &annex.parent {
            AnnexParent::Resolution(resolution) => (Some(resolution.clone()), None),
            AnnexParent::ReplacementFor(change) => (None, Some(*change)),
        };
        Self { id: annex.id, number: annex.number, resolution, replacement_for }
    }
}

impl From<&ArticleAncestry> for RawArticleAncestry {
    fn from(article: &ArticleAncestry) -> Self {
        let mut raw = Self {
            id: article.id,
            number: article.number,
            suffix: article.suffix,
            resolution: None,
            annex: None,
            chapter: None,
            new_content_of: None,
            added_by: None,
        };
        match &article.parent {
            ArticleParent::Resolution(resolution) => raw.resolution = Some(resolution.clone()),
            ArticleParent::Annex(annex) => raw.annex = Some(annex.into()),
            ArticleParent::Chapter(chapter) => {
                raw.chapter = Some(RawChapterAncestry {
                    id: chapter.id,
                    number: chapter.number,
                    annex: (&chapter.annex).into(),
                });
            }
            ArticleParent::NewContentOf(change) => raw.new_content_of = Some(*change),
            ArticleParent::AddedBy(change) => raw.added_by = Some(*change),
        }
        raw
    }
}

fn inconsistent(entity: EntityId, detail: &str) -> AssemblyError {
    AssemblyError::InconsistentAncestry { entity: entity.to_string(), detail: detail.to_string() }
}

/// A stored change row. `origin` is filled from `origin_article` by the store before conversion.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RawChange {
    pub id: ChangeId,
    pub change_type: String,
    pub context: ChangeContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_article: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<RawArticleAncestry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RawReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Vec<ContentBlock>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Vec<ContentBlock>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_article: Option<Article>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_annex: Option<Annex>,
    /// `INLINE` or `REFERENCE` for annex replacements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annex_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_suffix: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RawChange {
    fn populated(&self) -> Vec<&'static str> {
        [
            ("before", self.before.is_some()),
            ("after", self.after.is_some()),
            ("new_article", self.new_article.is_some()),
            ("new_annex", self.new_annex.is_some()),
            ("annex_source", self.annex_source.is_some()),
            ("new_number", self.new_number.is_some()),
            ("new_suffix", self.new_suffix.is_some()),
            ("description", self.description.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, present)| present.then_some(field))
        .collect()
    }

    fn owner(&self) -> String {
        format!("{} change {}", self.change_type, self.id)
    }

    fn missing(&self, field: &'static str) -> AssemblyError {
        AssemblyError::MissingPayload { owner: self.owner(), field }
    }

    fn wrong_target(&self, reference: &Reference) -> AssemblyError {
        AssemblyError::UnsupportedTarget(format!("{} cannot target {}", self.owner(), reference.coordinate()))
    }
}

fn payload_fields(change_type: ChangeType) -> &'static [&'static str] {
    match change_type {
        ChangeType::ModifyArticle | ChangeType::ModifyTextAnnex => &["before", "after"],
        ChangeType::ReplaceArticle => &["new_article"],
        ChangeType::ReplaceAnnex => &["new_annex", "annex_source"],
        ChangeType::AddAnnexToResolution | ChangeType::AddAnnexToAnnex => &["new_annex", "new_number"],
        ChangeType::AddArticleToResolution | ChangeType::AddArticleToAnnex | ChangeType::AddArticleToChapter => {
            &["new_article", "new_number", "new_suffix"]
        }
        ChangeType::Advanced => &["description"],
        ChangeType::Repeal | ChangeType::RatifyAdReferendum | ChangeType::ApplyModificationsAnnex => &[],
    }
}

impl TryFrom<RawChange> for ChangeRecord {
    type Error = AssemblyError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        let change_type =
            ChangeType::parse(&raw.change_type).ok_or_else(|| AssemblyError::UnknownChangeType(raw.change_type.clone()))?;
        let allowed = payload_fields(change_type);
        if let Some(field) = raw.populated().into_iter().find(|field| !allowed.contains(field)) {
            return Err(AssemblyError::ExtraneousPayload { owner: raw.owner(), field });
        }
        let origin: ArticleAncestry = raw.origin.clone().ok_or_else(|| raw.missing("origin"))?.try_into()?;
        let target: Reference = raw.target.clone().ok_or_else(|| raw.missing("target"))?.try_into()?;

        let kind = match change_type {
            ChangeType::Repeal => ChangeKind::Repeal { target },
            ChangeType::ModifyArticle => ChangeKind::ModifyArticle {
                target: article_target(&raw, target)?,
                before: raw.before.clone().ok_or_else(|| raw.missing("before"))?,
                after: raw.after.clone().ok_or_else(|| raw.missing("after"))?,
            },
            ChangeType::ReplaceArticle => ChangeKind::ReplaceArticle {
                target: article_target(&raw, target)?,
                new_content: raw.new_article.clone().ok_or_else(|| raw.missing("new_article"))?,
            },
            ChangeType::RatifyAdReferendum => ChangeKind::RatifyAdReferendum { target: resolution_target(&raw, target)? },
            ChangeType::ReplaceAnnex => {
                let annex = raw.new_annex.clone().ok_or_else(|| raw.missing("new_annex"))?;
                let new_content = match raw.annex_source.as_deref() {
                    Some("INLINE") => AnnexReplacement::Inline(annex),
                    Some("REFERENCE") => AnnexReplacement::Reference(annex),
                    Some(other) => {
                        return Err(AssemblyError::Validation(format!(
                            "{}: unknown annex source `{other}`",
                            raw.owner()
                        )))
                    }
                    None => return Err(raw.missing("annex_source")),
                };
                ChangeKind::ReplaceAnnex { target: annex_target(&raw, target)?, new_content }
            }
            ChangeType::AddAnnexToResolution => ChangeKind::AddAnnexToResolution {
                target: resolution_target(&raw, target)?,
                annex: raw.new_annex.clone().ok_or_else(|| raw.missing("new_annex"))?,
                new_number: raw.new_number,
            },
            ChangeType::AddAnnexToAnnex => ChangeKind::AddAnnexToAnnex {
                target: annex_target(&raw, target)?,
                annex: raw.new_annex.clone().ok_or_else(|| raw.missing("new_annex"))?,
                new_number: raw.new_number,
            },
            ChangeType::ModifyTextAnnex => ChangeKind::ModifyTextAnnex {
                target: annex_target(&raw, target)?,
                before: raw.before.clone().ok_or_else(|| raw.missing("before"))?,
                after: raw.after.clone().ok_or_else(|| raw.missing("after"))?,
            },
            ChangeType::AddArticleToResolution => ChangeKind::AddArticleToResolution {
                target: resolution_target(&raw, target)?,
                article: raw.new_article.clone().ok_or_else(|| raw.missing("new_article"))?,
                new_number: raw.new_number,
                new_suffix: raw.new_suffix,
            },
            ChangeType::AddArticleToAnnex => ChangeKind::AddArticleToAnnex {
                target: annex_target(&raw, target)?,
                article: raw.new_article.clone().ok_or_else(|| raw.missing("new_article"))?,
                new_number: raw.new_number,
                new_suffix: raw.new_suffix,
            },
            ChangeType::AddArticleToChapter => ChangeKind::AddArticleToChapter {
                target: match target {
                    Reference::Chapter(target) => target,
                    other => return Err(raw.wrong_target(&other)),
                },
                article: raw.new_article.clone().ok_or_else(|| raw.missing("new_article"))?,
                new_number: raw.new_number,
                new_suffix: raw.new_suffix,
            },
            ChangeType::ApplyModificationsAnnex => {
                ChangeKind::ApplyModificationsAnnex { target: annex_target(&raw, target)? }
            }
            ChangeType::Advanced => ChangeKind::Advanced {
                target: resolution_target(&raw, target)?,
                description: raw.description.clone().ok_or_else(|| raw.missing("description"))?,
            },
        };

        Ok(Self { id: raw.id, context: raw.context, origin, kind })
    }
}

fn resolution_target(raw: &RawChange, target: Reference) -> Result<ResolutionTarget, AssemblyError> {
    match target {
        Reference::Resolution(target) => Ok(target),
        other => Err(raw.wrong_target(&other)),
    }
}

fn annex_target(raw: &RawChange, target: Reference) -> Result<AnnexTarget, AssemblyError> {
    match target {
        Reference::Annex(target) => Ok(target),
        other => Err(raw.wrong_target(&other)),
    }
}

fn article_target(raw: &RawChange, target: Reference) -> Result<ArticleTarget, AssemblyError> {
    match target {
        Reference::Article(target) => Ok(target),
        other => Err(raw.wrong_target(&other)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(change_type: &str, target: serde_json::Value) -> serde_json::Value {
        json!({
            "id": "01HZ0000000000000000000001",
            "change_type": change_type,
            "context": { "date": "2013-01-01", "issuer": { "initial": "CSU", "number": 5, "year": 2013 } },
            "origin": {
                "id": "01HZ0000000000000000000002",
                "number": 1,
                "resolution": {
                    "id": "01HZ0000000000000000000003",
                    "key": { "initial": "CSU", "number": 5, "year": 2013 }
                }
            },
            "target": target,
        })
    }

    fn article_reference() -> serde_json::Value {
        json!({
            "target_type": "ARTICLE",
            "article": {
                "coordinate": {
                    "container": { "kind": "resolution", "at": { "initial": "CSU", "number": 1, "year": 2012 } },
                    "number": 1
                }
            }
        })
    }

    fn convert(value: serde_json::Value) -> Result<ChangeRecord, AssemblyError> {
        let raw: RawChange = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(err) => panic!("raw change should deserialize: {err}"),
        };
        ChangeRecord::try_from(raw)
    }

    // Test IDs: TING-001
    #[test]
    fn well_formed_modification_converts() -> Result<(), AssemblyError> {
        let mut value = raw("MODIFY_ARTICLE", article_reference());
        value["before"] = json!([{ "type": "text", "text": "X" }]);
        value["after"] = json!([{ "type": "text", "text": "Y" }]);
        let record = convert(value)?;
        assert_eq!(record.change_type(), ChangeType::ModifyArticle);
        assert_eq!(record.kind.target().coordinate().to_string(), "CSU-1/2012#art:1");
        Ok(())
    }

    // Test IDs: TING-002
    #[test]
    fn missing_and_extraneous_payloads_are_fatal() {
        let mut value = raw("MODIFY_ARTICLE", article_reference());
        value["before"] = json!([]);
        assert!(matches!(convert(value), Err(AssemblyError::MissingPayload { field: "after", .. })));

        let mut value = raw("REPEAL", article_reference());
        value["description"] = json!("stray");
        assert!(matches!(convert(value), Err(AssemblyError::ExtraneousPayload { field: "description", .. })));

        let mut target = article_reference();
        target["resolution"] = json!({ "key": { "initial": "CSU", "number": 1, "year": 2012 } });
        assert!(matches!(
            convert(raw("REPEAL", target)),
            Err(AssemblyError::ExtraneousPayload { field: "resolution", .. })
        ));

        assert!(matches!(
            convert(raw("REPEAL", json!({ "target_type": "ARTICLE" }))),
            Err(AssemblyError::MissingPayload { field: "article", .. })
        ));
    }

    // Test IDs: TING-003
    #[test]
    fn changes_cannot_be_targeted_and_unknown_types_are_rejected() {
        let value = raw("REPEAL", json!({ "target_type": "CHANGE" }));
        assert!(matches!(convert(value), Err(AssemblyError::UnknownTargetType(kind)) if kind == "CHANGE"));

        let value = raw("RENUMBER", article_reference());
        assert!(matches!(convert(value), Err(AssemblyError::UnknownChangeType(kind)) if kind == "RENUMBER"));

        let value = raw("RATIFY_AD_REFERENDUM", article_reference());
        assert!(matches!(convert(value), Err(AssemblyError::UnsupportedTarget(_))));
    }

    // Test IDs: TING-004
    #[test]
    fn ancestry_needs_exactly_one_parent() {
        let mut value = raw("REPEAL", article_reference());
        value["origin"]["added_by"] = json!("01HZ0000000000000000000009");
        assert!(matches!(convert(value), Err(AssemblyError::InconsistentAncestry { .. })));

        let mut value = raw("REPEAL", article_reference());
        value["origin"] = json!({ "id": "01HZ0000000000000000000002", "number": 1 });
        assert!(matches!(convert(value), Err(AssemblyError::InconsistentAncestry { .. })));
    }

    // Test IDs: TING-005
    #[test]
    fn typed_ancestry_converts_back_to_rows() -> Result<(), AssemblyError> {
        let value = raw("REPEAL", article_reference());
        let origin: RawArticleAncestry = match serde_json::from_value(value["origin"].clone()) {
            Ok(origin) => origin,
            Err(err) => panic!("origin should deserialize: {err}"),
        };
        let typed = ArticleAncestry::try_from(origin.clone())?;
        assert_eq!(RawArticleAncestry::from(&typed), origin);
        Ok(())
    }

    // Test IDs: TING-006
    #[test]
    fn typed_references_convert_back_to_rows() -> Result<(), AssemblyError> {
        let reference = Reference::try_from(match serde_json::from_value::<RawReference>(article_reference()) {
            Ok(raw) => raw,
            Err(err) => panic!("reference should deserialize: {err}"),
        })?;
        let row = RawReference::from(&reference);
        assert_eq!(row.target_type, "ARTICLE");
        assert_eq!(Reference::try_from(row)?, reference);
        Ok(())
    }
}
