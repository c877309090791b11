//! Ancestry lookup inside an authored resolution tree.

use crate::coords::{AnnexCoordinate, ArticleContainer, ArticleCoordinate, ChapterCoordinate, Coordinate};
use crate::model::{
    Annex, AnnexAncestry, AnnexBody, AnnexParent, Article, ArticleAncestry, ArticleParent, Chapter, ChapterAncestry,
    EntityAncestry, EntityId, Reference, Resolution, ResolutionRef,
};

fn resolution_ref(resolution: &Resolution) -> ResolutionRef {
    ResolutionRef { id: resolution.id, key: resolution.key.clone() }
}

fn annex_ancestry(resolution: &Resolution, annex: &Annex) -> AnnexAncestry {
    AnnexAncestry { id: annex.id, number: annex.number, parent: AnnexParent::Resolution(resolution_ref(resolution)) }
}

fn chapter_ancestry(annex: AnnexAncestry, chapter: &Chapter) -> ChapterAncestry {
    ChapterAncestry { id: chapter.id, number: chapter.number, annex }
}

fn article_ancestry(article: &Article, parent: ArticleParent) -> ArticleAncestry {
    ArticleAncestry { id: article.id, number: article.number, suffix: article.suffix, parent }
}

fn annex_parts(annex: &Annex) -> (&[Article], &[Chapter]) {
    match &annex.body {
        AnnexBody::WithArticles { articles, chapters, .. } => (articles, chapters),
        AnnexBody::Text { .. } => (&[], &[]),
    }
}

/// Native ancestry of the article with `id`, wherever it sits in the tree.
#[must_use]
pub fn find_article(resolution: &Resolution, id: EntityId) -> Option<ArticleAncestry> {
    if let Some(article) = resolution.articles.iter().find(|article| article.id == id) {
        return Some(article_ancestry(article, ArticleParent::Resolution(resolution_ref(resolution))));
    }
    for annex in &resolution.annexes {
        let (articles, chapters) = annex_parts(annex);
        if let Some(article) = articles.iter().find(|article| article.id == id) {
            return Some(article_ancestry(article, ArticleParent::Annex(annex_ancestry(resolution, annex))));
        }
        for chapter in chapters {
            if let Some(article) = chapter.articles.iter().find(|article| article.id == id) {
                let parent = ArticleParent::Chapter(chapter_ancestry(annex_ancestry(resolution, annex), chapter));
                return Some(article_ancestry(article, parent));
            }
        }
    }
    None
}

fn find_annex<'r>(resolution: &'r Resolution, coordinate: &AnnexCoordinate) -> Option<&'r Annex> {
    resolution.annexes.iter().find(|annex| annex.number == Some(coordinate.number))
}

fn find_chapter<'r>(resolution: &'r Resolution, coordinate: &ChapterCoordinate) -> Option<(&'r Annex, &'r Chapter)> {
    let annex = find_annex(resolution, &coordinate.annex)?;
    let chapter = annex_parts(annex).1.iter().find(|chapter| chapter.number == coordinate.number)?;
    Some((annex, chapter))
}

fn at_position<'a>(articles: &'a [Article], coordinate: &ArticleCoordinate) -> Option<&'a Article> {
    articles
        .iter()
        .find(|article| article.number == Some(coordinate.number) && article.suffix == coordinate.suffix)
}

fn locate_article(resolution: &Resolution, coordinate: &ArticleCoordinate) -> Option<ArticleAncestry> {
    match &coordinate.container {
        ArticleContainer::Resolution(_) => at_position(&resolution.articles, coordinate)
            .map(|article| article_ancestry(article, ArticleParent::Resolution(resolution_ref(resolution)))),
        ArticleContainer::Annex(annex_coordinate) => {
            let annex = find_annex(resolution, annex_coordinate)?;
            let (articles, chapters) = annex_parts(annex);
            if let Some(article) = at_position(articles, coordinate) {
                return Some(article_ancestry(article, ArticleParent::Annex(annex_ancestry(resolution, annex))));
            }
            chapters.iter().find_map(|chapter| {
                at_position(&chapter.articles, coordinate).map(|article| {
                    let parent = ArticleParent::Chapter(chapter_ancestry(annex_ancestry(resolution, annex), chapter));
                    article_ancestry(article, parent)
                })
            })
        }
        ArticleContainer::Chapter(chapter_coordinate) => {
            let (annex, chapter) = find_chapter(resolution, chapter_coordinate)?;
            at_position(&chapter.articles, coordinate).map(|article| {
                article_ancestry(
                    article,
                    ArticleParent::Chapter(chapter_ancestry(annex_ancestry(resolution, annex), chapter)),
                )
            })
        }
    }
}

/// Native ancestry of the authored entity at `coordinate`, if the tree has one there.
#[must_use]
pub fn locate(resolution: &Resolution, coordinate: &Coordinate) -> Option<EntityAncestry> {
    if coordinate.resolution() != &resolution.key {
        return None;
    }
    match coordinate {
        Coordinate::Resolution(_) => Some(EntityAncestry::Resolution(resolution_ref(resolution))),
        Coordinate::Annex(annex) => {
            find_annex(resolution, annex).map(|annex| EntityAncestry::Annex(annex_ancestry(resolution, annex)))
        }
        Coordinate::Chapter(chapter) => find_chapter(resolution, chapter).map(|(annex, chapter)| {
            EntityAncestry::Chapter(chapter_ancestry(annex_ancestry(resolution, annex), chapter))
        }),
        Coordinate::Article(article) => locate_article(resolution, article).map(EntityAncestry::Article),
    }
}

/// Attaches native ancestry to a reference that only carries a coordinate.
///
/// References that already name an entity are left untouched. Returns whether anything was filled.
pub fn fill_reference(reference: &mut Reference, resolution: &Resolution) -> bool {
    if reference.entity().is_some() {
        return false;
    }
    let Some(located) = locate(resolution, &reference.coordinate()) else {
        return false;
    };
    match (reference, located) {
        (Reference::Resolution(target), EntityAncestry::Resolution(entity)) => target.entity = Some(entity),
        (Reference::Annex(target), EntityAncestry::Annex(entity)) => target.entity = Some(entity),
        (Reference::Chapter(target), EntityAncestry::Chapter(entity)) => target.entity = Some(entity),
        (Reference::Article(target), EntityAncestry::Article(entity)) => target.entity = Some(entity),
        _ => return false,
    }
    true
}
