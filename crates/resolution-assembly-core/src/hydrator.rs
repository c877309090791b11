//! Builds graph nodes for persisted entities by walking their ancestry bottom-up.

use std::collections::HashMap;

use crate::coords::{AnnexCoordinate, ArticleContainer, ArticleCoordinate, ChapterCoordinate, Coordinate};
use crate::graph::{NodeIndex, NodeKey, ValidityGraph};
use crate::model::{
    AnnexAncestry, AnnexParent, ArticleAncestry, ArticleParent, ChangeId, ChapterAncestry, EntityAncestry,
    EntityId, ResolutionRef,
};
use crate::AssemblyError;

/// Outcome of hydrating one entity.
///
/// `Native` entities sit on a fully numbered authored path and carry a coordinate. `Virtual`
/// entities descend from the output of a change and can only be addressed by identity.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Hydrated {
    Native { node: NodeIndex, coordinate: Coordinate },
    Virtual { node: NodeIndex },
}

impl Hydrated {
    #[must_use]
    pub fn node(&self) -> NodeIndex {
        match self {
            Self::Native { node, .. } | Self::Virtual { node } => *node,
        }
    }

    #[must_use]
    pub fn coordinate(&self) -> Option<&Coordinate> {
        match self {
            Self::Native { coordinate, .. } => Some(coordinate),
            Self::Virtual { .. } => None,
        }
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual { .. })
    }
}

#[derive(Debug, Default)]
pub struct Hydrator {
    memo: HashMap<EntityId, Hydrated>,
}

impl Hydrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `AssemblyError::MissingNumber` when a native annex or article has no number.
    pub fn hydrate(&mut self, graph: &mut ValidityGraph, entity: &EntityAncestry) -> Result<Hydrated, AssemblyError> {
        match entity {
            EntityAncestry::Resolution(resolution) => Ok(self.hydrate_resolution(graph, resolution)),
            EntityAncestry::Annex(annex) => self.hydrate_annex(graph, annex),
            EntityAncestry::Chapter(chapter) => self.hydrate_chapter(graph, chapter),
            EntityAncestry::Article(article) => self.hydrate_article(graph, article),
        }
    }

    pub fn hydrate_resolution(&mut self, graph: &mut ValidityGraph, resolution: &ResolutionRef) -> Hydrated {
        if let Some(hydrated) = self.memo.get(&resolution.id) {
            return hydrated.clone();
        }
        let node = graph.acquire_node(NodeKey::Entity(resolution.id));
        let coordinate = Coordinate::Resolution(resolution.key.clone());
        graph.register_base_version(coordinate.clone(), node);
        let hydrated = Hydrated::Native { node, coordinate };
        self.memo.insert(resolution.id, hydrated.clone());
        hydrated
    }

    /// # Errors
    /// Returns `AssemblyError::MissingNumber` when the annex hangs off a resolution without a number.
    pub fn hydrate_annex(&mut self, graph: &mut ValidityGraph, annex: &AnnexAncestry) -> Result<Hydrated, AssemblyError> {
        if let Some(hydrated) = self.memo.get(&annex.id) {
            return Ok(hydrated.clone());
        }
        let node = graph.acquire_node(NodeKey::Entity(annex.id));
        let hydrated = match &annex.parent {
            AnnexParent::Resolution(resolution) => {
                let parent = self.hydrate_resolution(graph, resolution);
                graph.add_dependency(node, parent.node());
                let number = annex.number.ok_or(AssemblyError::MissingNumber { kind: "annex", entity: annex.id })?;
                let coordinate = Coordinate::Annex(AnnexCoordinate { resolution: resolution.key.clone(), number });
                graph.register_base_version(coordinate.clone(), node);
                Hydrated::Native { node, coordinate }
            }
            AnnexParent::ReplacementFor(change) => Self::link_to_change(graph, node, *change),
        };
        self.memo.insert(annex.id, hydrated.clone());
        Ok(hydrated)
    }

    /// # Errors
    /// Propagates errors from hydrating the enclosing annex.
    pub fn hydrate_chapter(
        &mut self,
        graph: &mut ValidityGraph,
        chapter: &ChapterAncestry,
    ) -> Result<Hydrated, AssemblyError> {
        if let Some(hydrated) = self.memo.get(&chapter.id) {
            return Ok(hydrated.clone());
        }
        let node = graph.acquire_node(NodeKey::Entity(chapter.id));
        let annex = self.hydrate_annex(graph, &chapter.annex)?;
        graph.add_dependency(node, annex.node());
        let hydrated = match annex {
            Hydrated::Native { coordinate: Coordinate::Annex(annex), .. } => {
                let coordinate = Coordinate::Chapter(ChapterCoordinate { annex, number: chapter.number });
                graph.register_base_version(coordinate.clone(), node);
                Hydrated::Native { node, coordinate }
            }
            Hydrated::Native { .. } | Hydrated::Virtual { .. } => Hydrated::Virtual { node },
        };
        self.memo.insert(chapter.id, hydrated.clone());
        Ok(hydrated)
    }

    /// # Errors
    /// Returns `AssemblyError::MissingNumber` when the article sits on a native path without a number.
    pub fn hydrate_article(
        &mut self,
        graph: &mut ValidityGraph,
        article: &ArticleAncestry,
    ) -> Result<Hydrated, AssemblyError> {
        if let Some(hydrated) = self.memo.get(&article.id) {
            return Ok(hydrated.clone());
        }
        let node = graph.acquire_node(NodeKey::Entity(article.id));
        let parent = match &article.parent {
            ArticleParent::Resolution(resolution) => self.hydrate_resolution(graph, resolution),
            ArticleParent::Annex(annex) => self.hydrate_annex(graph, annex)?,
            ArticleParent::Chapter(chapter) => self.hydrate_chapter(graph, chapter)?,
            ArticleParent::NewContentOf(change) | ArticleParent::AddedBy(change) => {
                let hydrated = Self::link_to_change(graph, node, *change);
                self.memo.insert(article.id, hydrated.clone());
                return Ok(hydrated);
            }
        };
        graph.add_dependency(node, parent.node());

        let hydrated = match parent {
            Hydrated::Native { coordinate, .. } => {
                let container = match coordinate {
                    Coordinate::Resolution(key) => ArticleContainer::Resolution(key),
                    Coordinate::Annex(annex) => ArticleContainer::Annex(annex),
                    Coordinate::Chapter(chapter) => ArticleContainer::Chapter(chapter),
                    Coordinate::Article(_) => {
                        return Err(AssemblyError::InconsistentAncestry {
                            entity: article.id.to_string(),
                            detail: "article nested inside another article".to_string(),
                        })
                    }
                };
                let number =
                    article.number.ok_or(AssemblyError::MissingNumber { kind: "article", entity: article.id })?;
                let coordinate =
                    Coordinate::Article(ArticleCoordinate { container, number, suffix: article.suffix });
                graph.register_base_version(coordinate.clone(), node);
                Hydrated::Native { node, coordinate }
            }
            Hydrated::Virtual { .. } => Hydrated::Virtual { node },
        };
        self.memo.insert(article.id, hydrated.clone());
        Ok(hydrated)
    }

    fn link_to_change(graph: &mut ValidityGraph, node: NodeIndex, change: ChangeId) -> Hydrated {
        let change_node = graph.acquire_node(NodeKey::Change(change));
        graph.add_dependency(node, change_node);
        Hydrated::Virtual { node }
    }
}
