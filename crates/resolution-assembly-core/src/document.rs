//! Materialized document tree: the authored resolution plus lifecycle annotations.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::content::ContentBlock;
use crate::model::{iso_date, Annex, AnnexBody, Article, Chapter, EntityId, Paragraph, Resolution, ResolutionKey};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Lifecycle {
    #[serde(default)]
    pub added_by: Option<ResolutionKey>,
    #[serde(default)]
    pub modified_by: Vec<ResolutionKey>,
    #[serde(default)]
    pub repealed_by: Option<ResolutionKey>,
}

impl Lifecycle {
    pub fn record_modification(&mut self, by: &ResolutionKey) {
        if !self.modified_by.contains(by) {
            self.modified_by.push(by.clone());
        }
    }
}

/// Position of an item among its siblings.
///
/// `Defined` indices sort before `Generated` ones. Generated indices come from a
/// per-materialization counter and never match a positional lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemIndex {
    Defined { number: u32, suffix: u32 },
    Generated { value: u32 },
}

impl ItemIndex {
    #[must_use]
    pub fn matches(&self, number: u32, suffix: u32) -> bool {
        matches!(self, Self::Defined { number: n, suffix: s } if *n == number && *s == suffix)
    }
}

#[derive(Debug, Default)]
pub struct IndexAllocator {
    next: u32,
}

impl IndexAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&mut self, number: Option<u32>, suffix: u32) -> ItemIndex {
        match number {
            Some(number) => ItemIndex::Defined { number, suffix },
            None => {
                self.next += 1;
                ItemIndex::Generated { value: self.next }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ArticleView {
    pub id: EntityId,
    pub index: ItemIndex,
    pub content: Vec<ContentBlock>,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

impl ArticleView {
    #[must_use]
    pub fn from_article(article: &Article, index: ItemIndex) -> Self {
        Self { id: article.id, index, content: article.content.clone(), lifecycle: Lifecycle::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChapterView {
    pub id: EntityId,
    pub number: u32,
    pub title: String,
    pub articles: Vec<ArticleView>,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

impl ChapterView {
    fn from_chapter(chapter: &Chapter, allocator: &mut IndexAllocator) -> Self {
        Self {
            id: chapter.id,
            number: chapter.number,
            title: chapter.title.clone(),
            articles: article_views(&chapter.articles, allocator),
            lifecycle: Lifecycle::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnexViewBody {
    Text {
        content: Vec<ContentBlock>,
    },
    WithArticles {
        initial_text: Vec<ContentBlock>,
        final_text: Vec<ContentBlock>,
        articles: Vec<ArticleView>,
        chapters: Vec<ChapterView>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AnnexView {
    pub id: EntityId,
    pub index: ItemIndex,
    pub name: Option<String>,
    pub body: AnnexViewBody,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

impl AnnexView {
    pub fn from_annex(annex: &Annex, index: ItemIndex, allocator: &mut IndexAllocator) -> Self {
        let body = match &annex.body {
            AnnexBody::Text { content } => AnnexViewBody::Text { content: content.clone() },
            AnnexBody::WithArticles { initial_text, final_text, articles, chapters } => AnnexViewBody::WithArticles {
                initial_text: initial_text.clone(),
                final_text: final_text.clone(),
                articles: article_views(articles, allocator),
                chapters: chapters.iter().map(|chapter| ChapterView::from_chapter(chapter, allocator)).collect(),
            },
        };
        Self { id: annex.id, index, name: annex.name.clone(), body, lifecycle: Lifecycle::default() }
    }

    #[must_use]
    pub fn articles(&self) -> &[ArticleView] {
        match &self.body {
            AnnexViewBody::WithArticles { articles, .. } => articles,
            AnnexViewBody::Text { .. } => &[],
        }
    }

    #[must_use]
    pub fn chapters(&self) -> &[ChapterView] {
        match &self.body {
            AnnexViewBody::WithArticles { chapters, .. } => chapters,
            AnnexViewBody::Text { .. } => &[],
        }
    }

    fn sort(&mut self) {
        if let AnnexViewBody::WithArticles { articles, chapters, .. } = &mut self.body {
            articles.sort_by_key(|article| article.index);
            chapters.sort_by_key(|chapter| chapter.number);
            for chapter in chapters {
                chapter.articles.sort_by_key(|article| article.index);
            }
        }
    }
}

fn article_views(articles: &[Article], allocator: &mut IndexAllocator) -> Vec<ArticleView> {
    articles
        .iter()
        .map(|article| ArticleView::from_article(article, allocator.index(article.number, article.suffix)))
        .collect()
}

/// A resolution's text as of some point in its history.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResolutionView {
    pub id: EntityId,
    pub key: ResolutionKey,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub summary: String,
    pub recitals: Vec<Paragraph>,
    pub considerations: Vec<Paragraph>,
    pub articles: Vec<ArticleView>,
    pub annexes: Vec<AnnexView>,
    pub repealed_by: Option<ResolutionKey>,
    pub ratified_by: Option<ResolutionKey>,
}

impl ResolutionView {
    pub fn from_resolution(resolution: &Resolution, allocator: &mut IndexAllocator) -> Self {
        Self {
            id: resolution.id,
            key: resolution.key.clone(),
            date: resolution.date,
            summary: resolution.summary.clone(),
            recitals: resolution.recitals.clone(),
            considerations: resolution.considerations.clone(),
            articles: article_views(&resolution.articles, allocator),
            annexes: resolution
                .annexes
                .iter()
                .map(|annex| {
                    let index = allocator.index(annex.number, 0);
                    AnnexView::from_annex(annex, index, allocator)
                })
                .collect(),
            repealed_by: None,
            ratified_by: None,
        }
    }

    /// Orders articles and annexes by index and chapters by number, recursively.
    pub fn sort(&mut self) {
        self.articles.sort_by_key(|article| article.index);
        self.annexes.sort_by_key(|annex| annex.index);
        for annex in &mut self.annexes {
            annex.sort();
        }
    }

    #[must_use]
    pub fn article(&self, number: u32, suffix: u32) -> Option<&ArticleView> {
        self.articles.iter().find(|article| article.index.matches(number, suffix))
    }

    #[must_use]
    pub fn annex(&self, number: u32) -> Option<&AnnexView> {
        self.annexes.iter().find(|annex| annex.index.matches(number, 0))
    }
}
