//! Nodes introduced by changes: added and replacement content, wired into the version stacks.

use crate::coords::{AnnexCoordinate, ArticleContainer, ArticleCoordinate, ChapterCoordinate, Coordinate};
use crate::graph::{NodeIndex, NodeKey, ValidityGraph};
use crate::model::{Annex, AnnexBody, Article, ChangeKind, ChangeRecord, EntityId};
use crate::AssemblyError;

pub struct EffectBuilder<'g> {
    graph: &'g mut ValidityGraph,
}

impl<'g> EffectBuilder<'g> {
    pub fn new(graph: &'g mut ValidityGraph) -> Self {
        Self { graph }
    }

    /// Builds the nodes `change` introduces.
    ///
    /// `context` is the victim coordinate for replacements and the container coordinate for
    /// additions; `structural_parent` is the node new content hangs under.
    ///
    /// # Errors
    /// Returns `AssemblyError::MissingParentCoordinate` when an addition has no container
    /// coordinate, and `AssemblyError::UnsupportedTarget` when a coordinate has the wrong kind.
    pub fn build(
        &mut self,
        change: &ChangeRecord,
        change_node: NodeIndex,
        structural_parent: Option<NodeIndex>,
        context: Option<&Coordinate>,
    ) -> Result<(), AssemblyError> {
        match &change.kind {
            ChangeKind::AddArticleToResolution { article, new_number, new_suffix, .. }
            | ChangeKind::AddArticleToAnnex { article, new_number, new_suffix, .. }
            | ChangeKind::AddArticleToChapter { article, new_number, new_suffix, .. } => {
                let container = context.ok_or(AssemblyError::MissingParentCoordinate(change.id))?;
                let coordinate = match new_number {
                    Some(number) => Some(
                        container
                            .child_article(*number, new_suffix.unwrap_or(0))
                            .map(Coordinate::Article)
                            .ok_or_else(|| unsupported(change, container, "articles cannot contain articles"))?,
                    ),
                    None => None,
                };
                self.build_and_register(article.id, coordinate, change_node, structural_parent);
            }
            ChangeKind::AddAnnexToResolution { annex, new_number, .. } => {
                let container = context.ok_or(AssemblyError::MissingParentCoordinate(change.id))?;
                let coordinate = match new_number {
                    Some(number) => Some(
                        container
                            .child_annex(*number)
                            .ok_or_else(|| unsupported(change, container, "annexes hang only off resolutions"))?,
                    ),
                    None => None,
                };
                self.build_annex_hierarchy(annex, coordinate, change_node, structural_parent);
            }
            ChangeKind::AddAnnexToAnnex { annex, .. } => {
                context.ok_or(AssemblyError::MissingParentCoordinate(change.id))?;
                tracing::debug!(change = %change.id, "annex added inside an annex has no coordinate");
                self.build_annex_hierarchy(annex, None, change_node, structural_parent);
            }
            ChangeKind::ReplaceArticle { new_content, .. } => {
                let Some(victim) = context else {
                    return Ok(());
                };
                self.build_and_register(new_content.id, Some(victim.clone()), change_node, structural_parent);
            }
            ChangeKind::ReplaceAnnex { new_content, .. } => {
                let Some(victim) = context else {
                    return Ok(());
                };
                let Coordinate::Annex(victim) = victim else {
                    return Err(unsupported(change, victim, "replaced annex must be addressed as an annex"));
                };
                self.build_annex_hierarchy(new_content.annex(), Some(victim.clone()), change_node, structural_parent);
            }
            ChangeKind::ApplyModificationsAnnex { target } => {
                let annex_node = match &target.entity {
                    Some(entity) => Some(self.graph.acquire_node(NodeKey::Entity(entity.id))),
                    None => self.graph.resolve_current_node(&Coordinate::Annex(target.coordinate.clone())),
                };
                if let Some(annex_node) = annex_node {
                    self.graph.add_dependency(annex_node, change_node);
                }
            }
            ChangeKind::ModifyArticle { .. }
            | ChangeKind::ModifyTextAnnex { .. }
            | ChangeKind::Repeal { .. }
            | ChangeKind::RatifyAdReferendum { .. }
            | ChangeKind::Advanced { .. } => {}
        }
        Ok(())
    }

    fn build_annex_hierarchy(
        &mut self,
        annex: &Annex,
        coordinate: Option<AnnexCoordinate>,
        change_node: NodeIndex,
        structural_parent: Option<NodeIndex>,
    ) {
        let annex_node =
            self.build_and_register(annex.id, coordinate.clone().map(Coordinate::Annex), change_node, structural_parent);
        let AnnexBody::WithArticles { articles, chapters, .. } = &annex.body else {
            return;
        };

        let annex_container = coordinate.clone().map(ArticleContainer::Annex);
        self.build_articles(articles, annex_container.as_ref(), change_node, annex_node);

        for chapter in chapters {
            let chapter_coordinate =
                coordinate.clone().map(|annex| ChapterCoordinate { annex, number: chapter.number });
            let chapter_node = self.build_and_register(
                chapter.id,
                chapter_coordinate.clone().map(Coordinate::Chapter),
                change_node,
                Some(annex_node),
            );
            let chapter_container = chapter_coordinate.map(ArticleContainer::Chapter);
            self.build_articles(&chapter.articles, chapter_container.as_ref(), change_node, chapter_node);
        }
    }

    fn build_articles(
        &mut self,
        articles: &[Article],
        container: Option<&ArticleContainer>,
        change_node: NodeIndex,
        parent: NodeIndex,
    ) {
        for article in articles {
            let coordinate = container.zip(article.number).map(|(container, number)| {
                Coordinate::Article(ArticleCoordinate { container: container.clone(), number, suffix: article.suffix })
            });
            self.build_and_register(article.id, coordinate, change_node, Some(parent));
        }
    }

    fn build_and_register(
        &mut self,
        id: EntityId,
        coordinate: Option<Coordinate>,
        change_node: NodeIndex,
        structural_parent: Option<NodeIndex>,
    ) -> NodeIndex {
        let node = self.graph.acquire_node(NodeKey::Entity(id));
        self.graph.add_dependency(node, change_node);
        if let Some(parent) = structural_parent {
            self.graph.add_dependency(node, parent);
        }
        match coordinate {
            Some(coordinate) => self.graph.register_version(coordinate, node),
            None => tracing::debug!(entity = %id, "content built without a destination number is not addressable"),
        }
        node
    }
}

fn unsupported(change: &ChangeRecord, coordinate: &Coordinate, detail: &str) -> AssemblyError {
    AssemblyError::UnsupportedTarget(format!("{} change {} at {coordinate}: {detail}", change.change_type(), change.id))
}
