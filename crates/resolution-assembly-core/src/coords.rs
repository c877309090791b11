//! Structural addresses of slots in the resolution tree.
//!
//! A coordinate only exists for entities whose whole ancestry is natively numbered. Entities
//! produced by changes without an explicit destination number never get one.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::model::ResolutionKey;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AnnexCoordinate {
    pub resolution: ResolutionKey,
    pub number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChapterCoordinate {
    pub annex: AnnexCoordinate,
    pub number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum ArticleContainer {
    Resolution(ResolutionKey),
    Annex(AnnexCoordinate),
    Chapter(ChapterCoordinate),
}

impl ArticleContainer {
    #[must_use]
    pub fn resolution(&self) -> &ResolutionKey {
        match self {
            Self::Resolution(key) => key,
            Self::Annex(annex) => &annex.resolution,
            Self::Chapter(chapter) => &chapter.annex.resolution,
        }
    }

    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        match self {
            Self::Resolution(key) => Coordinate::Resolution(key.clone()),
            Self::Annex(annex) => Coordinate::Annex(annex.clone()),
            Self::Chapter(chapter) => Coordinate::Chapter(chapter.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ArticleCoordinate {
    pub container: ArticleContainer,
    pub number: u32,
    #[serde(default)]
    pub suffix: u32,
}

impl ArticleCoordinate {
    /// Annex-level address of an article that lives inside a chapter.
    ///
    /// Lets references that omit the chapter number still find the article.
    #[must_use]
    pub fn annex_alias(&self) -> Option<ArticleCoordinate> {
        match &self.container {
            ArticleContainer::Chapter(chapter) => Some(ArticleCoordinate {
                container: ArticleContainer::Annex(chapter.annex.clone()),
                number: self.number,
                suffix: self.suffix,
            }),
            ArticleContainer::Resolution(_) | ArticleContainer::Annex(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Coordinate {
    Resolution(ResolutionKey),
    Annex(AnnexCoordinate),
    Chapter(ChapterCoordinate),
    Article(ArticleCoordinate),
}

impl Coordinate {
    #[must_use]
    pub fn resolution(&self) -> &ResolutionKey {
        match self {
            Self::Resolution(key) => key,
            Self::Annex(annex) => &annex.resolution,
            Self::Chapter(chapter) => &chapter.annex.resolution,
            Self::Article(article) => article.container.resolution(),
        }
    }

    /// Coordinate of the structural parent; `None` for the resolution root.
    #[must_use]
    pub fn parent(&self) -> Option<Coordinate> {
        match self {
            Self::Resolution(_) => None,
            Self::Annex(annex) => Some(Self::Resolution(annex.resolution.clone())),
            Self::Chapter(chapter) => Some(Self::Annex(chapter.annex.clone())),
            Self::Article(article) => Some(article.container.coordinate()),
        }
    }

    /// Address of an article placed directly under this coordinate.
    #[must_use]
    pub fn child_article(&self, number: u32, suffix: u32) -> Option<ArticleCoordinate> {
        let container = match self {
            Self::Resolution(key) => ArticleContainer::Resolution(key.clone()),
            Self::Annex(annex) => ArticleContainer::Annex(annex.clone()),
            Self::Chapter(chapter) => ArticleContainer::Chapter(chapter.clone()),
            Self::Article(_) => return None,
        };
        Some(ArticleCoordinate { container, number, suffix })
    }

    /// Annexes hang only off resolutions; nested annexes have no address.
    #[must_use]
    pub fn child_annex(&self, number: u32) -> Option<AnnexCoordinate> {
        match self {
            Self::Resolution(key) => Some(AnnexCoordinate { resolution: key.clone(), number }),
            Self::Annex(_) | Self::Chapter(_) | Self::Article(_) => None,
        }
    }

    #[must_use]
    pub fn child_chapter(&self, number: u32) -> Option<ChapterCoordinate> {
        match self {
            Self::Annex(annex) => Some(ChapterCoordinate { annex: annex.clone(), number }),
            Self::Resolution(_) | Self::Chapter(_) | Self::Article(_) => None,
        }
    }
}

impl From<AnnexCoordinate> for Coordinate {
    fn from(value: AnnexCoordinate) -> Self {
        Self::Annex(value)
    }
}

impl From<ChapterCoordinate> for Coordinate {
    fn from(value: ChapterCoordinate) -> Self {
        Self::Chapter(value)
    }
}

impl From<ArticleCoordinate> for Coordinate {
    fn from(value: ArticleCoordinate) -> Self {
        Self::Article(value)
    }
}

impl Display for AnnexCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#annex:{}", self.resolution, self.number)
    }
}

impl Display for ChapterCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/chapter:{}", self.annex, self.number)
    }
}

impl Display for ArticleCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.container {
            ArticleContainer::Resolution(key) => write!(f, "{key}#")?,
            ArticleContainer::Annex(annex) => write!(f, "{annex}/")?,
            ArticleContainer::Chapter(chapter) => write!(f, "{chapter}/")?,
        }
        write!(f, "art:{}", self.number)?;
        if self.suffix > 0 {
            write!(f, ".{}", self.suffix)?;
        }
        Ok(())
    }
}

impl Display for Coordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolution(key) => write!(f, "{key}"),
            Self::Annex(annex) => write!(f, "{annex}"),
            Self::Chapter(chapter) => write!(f, "{chapter}"),
            Self::Article(article) => write!(f, "{article}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csu_1_2012() -> ResolutionKey {
        ResolutionKey::new("CSU", 1, 2012)
    }

    #[test]
    fn children_and_parents_mirror_each_other() {
        let root = Coordinate::Resolution(csu_1_2012());
        let annex = match root.child_annex(2) {
            Some(annex) => annex,
            None => panic!("resolutions accept annexes"),
        };
        let chapter = match Coordinate::from(annex.clone()).child_chapter(1) {
            Some(chapter) => chapter,
            None => panic!("annexes accept chapters"),
        };
        let article = match Coordinate::from(chapter.clone()).child_article(3, 1) {
            Some(article) => article,
            None => panic!("chapters accept articles"),
        };

        assert_eq!(Coordinate::from(article.clone()).parent(), Some(Coordinate::Chapter(chapter.clone())));
        assert_eq!(Coordinate::Chapter(chapter).parent(), Some(Coordinate::Annex(annex.clone())));
        assert_eq!(Coordinate::Annex(annex).parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);
        assert_eq!(article.to_string(), "CSU-1/2012#annex:2/chapter:1/art:3.1");
    }

    #[test]
    fn nested_annexes_and_article_children_have_no_address() {
        let annex = Coordinate::Annex(AnnexCoordinate { resolution: csu_1_2012(), number: 1 });
        assert_eq!(annex.child_annex(1), None);
        let article = match Coordinate::Resolution(csu_1_2012()).child_article(1, 0) {
            Some(article) => Coordinate::Article(article),
            None => panic!("resolutions accept articles"),
        };
        assert_eq!(article.child_article(1, 0), None);
        assert_eq!(Coordinate::Resolution(csu_1_2012()).child_chapter(1), None);
    }

    #[test]
    fn chapter_articles_expose_an_annex_level_alias() {
        let chapter = ChapterCoordinate {
            annex: AnnexCoordinate { resolution: csu_1_2012(), number: 1 },
            number: 2,
        };
        let article = ArticleCoordinate {
            container: ArticleContainer::Chapter(chapter.clone()),
            number: 4,
            suffix: 0,
        };
        let alias = match article.annex_alias() {
            Some(alias) => alias,
            None => panic!("chapter articles have an alias"),
        };
        assert_eq!(alias.container, ArticleContainer::Annex(chapter.annex));
        assert_eq!(alias.annex_alias(), None);
    }
}
