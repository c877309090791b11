//! Decides which changes of a batch are currently in legal effect.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::coords::Coordinate;
use crate::effects::EffectBuilder;
use crate::graph::{NodeIndex, NodeKey, ValidityGraph};
use crate::hydrator::{Hydrated, Hydrator};
use crate::model::{ChangeId, ChangeKind, ChangeRecord, Reference};
use crate::ordering::sorted_changes;
use crate::AssemblyError;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct VoidedChange {
    pub change: ChangeId,
    /// Valid node that ultimately voids the change, when one exists.
    pub voided_by: Option<NodeKey>,
}

/// Validity of every change in a batch, each list in change order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ValidityReport {
    pub valid: Vec<ChangeId>,
    pub voided: Vec<VoidedChange>,
    /// Changes whose target could not be resolved to any known node.
    pub unresolved: Vec<ChangeId>,
}

impl ValidityReport {
    #[must_use]
    pub fn valid_set(&self) -> BTreeSet<ChangeId> {
        self.valid.iter().copied().collect()
    }
}

#[derive(Debug, Clone)]
struct ResolvedTarget {
    coordinate: Coordinate,
    node: Option<NodeIndex>,
}

/// Per-batch orchestrator. Owns a disposable graph; build a new one for every request.
#[derive(Debug, Default)]
pub struct ValidityEvaluator {
    graph: ValidityGraph,
    hydrator: Hydrator,
    unresolved: BTreeSet<ChangeId>,
}

impl ValidityEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn graph(&self) -> &ValidityGraph {
        &self.graph
    }

    /// Wires every change of the batch in change order and reports which ones are valid.
    ///
    /// # Errors
    /// Returns the fatal errors raised while hydrating ancestry or building effects.
    pub fn evaluate(&mut self, changes: &[ChangeRecord]) -> Result<ValidityReport, AssemblyError> {
        let sorted = sorted_changes(changes);
        for change in &sorted {
            self.wire_change(change)?;
        }

        let valid_keys = self.graph.valid_node_keys();
        let mut report = ValidityReport::default();
        for change in &sorted {
            let key = NodeKey::Change(change.id);
            if self.unresolved.contains(&change.id) {
                report.unresolved.push(change.id);
            } else if valid_keys.contains(&key) {
                report.valid.push(change.id);
            } else {
                let voided_by = self.graph.find_node(key).and_then(|node| self.graph.repealer_of(node));
                report.voided.push(VoidedChange { change: change.id, voided_by });
            }
        }
        tracing::info!(
            changes = sorted.len(),
            valid = report.valid.len(),
            voided = report.voided.len(),
            unresolved = report.unresolved.len(),
            nodes = self.graph.node_count(),
            "validity evaluation finished"
        );
        Ok(report)
    }

    fn wire_change(&mut self, change: &ChangeRecord) -> Result<(), AssemblyError> {
        let change_node = self.graph.acquire_node(NodeKey::Change(change.id));
        let origin = self.hydrator.hydrate_article(&mut self.graph, &change.origin)?;
        self.graph.add_dependency(change_node, origin.node());
        tracing::debug!(change = %change.id, change_type = %change.change_type(), "wiring change");

        match &change.kind {
            ChangeKind::Repeal { target } => {
                let target = self.resolve_reference(target)?;
                match target.node {
                    Some(victim) => self.graph.add_repealer(victim, change_node),
                    None => self.mark_unresolved(change, &target.coordinate),
                }
            }
            ChangeKind::ReplaceArticle { target: reference, .. } => {
                let target = self.resolve_reference(&reference.reference())?;
                self.build_replacement(change, change_node, &target)?;
            }
            ChangeKind::ReplaceAnnex { target: reference, .. } => {
                let target = self.resolve_reference(&reference.reference())?;
                self.build_replacement(change, change_node, &target)?;
            }
            ChangeKind::ModifyArticle { target: reference, .. } => {
                let target = self.resolve_reference(&reference.reference())?;
                if target.node.is_none() {
                    self.mark_unresolved(change, &target.coordinate);
                }
            }
            ChangeKind::ModifyTextAnnex { target: reference, .. } => {
                let target = self.resolve_reference(&reference.reference())?;
                if target.node.is_none() {
                    self.mark_unresolved(change, &target.coordinate);
                }
            }
            ChangeKind::ApplyModificationsAnnex { target: reference } => {
                let target = self.resolve_reference(&reference.reference())?;
                if target.node.is_none() {
                    self.mark_unresolved(change, &target.coordinate);
                    return Ok(());
                }
                EffectBuilder::new(&mut self.graph).build(change, change_node, None, Some(&target.coordinate))?;
            }
            ChangeKind::AddArticleToResolution { .. }
            | ChangeKind::AddArticleToAnnex { .. }
            | ChangeKind::AddArticleToChapter { .. }
            | ChangeKind::AddAnnexToResolution { .. }
            | ChangeKind::AddAnnexToAnnex { .. } => {
                let container = self.resolve_reference(&change.kind.target())?;
                EffectBuilder::new(&mut self.graph).build(
                    change,
                    change_node,
                    container.node,
                    Some(&container.coordinate),
                )?;
            }
            ChangeKind::RatifyAdReferendum { .. } | ChangeKind::Advanced { .. } => {}
        }
        Ok(())
    }

    fn build_replacement(
        &mut self,
        change: &ChangeRecord,
        change_node: NodeIndex,
        target: &ResolvedTarget,
    ) -> Result<(), AssemblyError> {
        let Some(victim) = target.node else {
            self.mark_unresolved(change, &target.coordinate);
            return Ok(());
        };
        // The replaced content lives on only while the replacement is void.
        self.graph.add_repealer(victim, change_node);
        let structural_parent =
            target.coordinate.parent().and_then(|parent| self.graph.resolve_current_node(&parent));
        EffectBuilder::new(&mut self.graph).build(change, change_node, structural_parent, Some(&target.coordinate))
    }

    /// Hydrates the persisted target (if known) and resolves the node currently at its coordinate.
    /// Virtual targets resolve to their own node.
    fn resolve_reference(&mut self, reference: &Reference) -> Result<ResolvedTarget, AssemblyError> {
        let coordinate = reference.coordinate();
        if let Some(entity) = reference.entity() {
            if let Hydrated::Virtual { node } = self.hydrator.hydrate(&mut self.graph, &entity)? {
                return Ok(ResolvedTarget { coordinate, node: Some(node) });
            }
        }
        let node = self.graph.resolve_current_node(&coordinate);
        Ok(ResolvedTarget { coordinate, node })
    }

    fn mark_unresolved(&mut self, change: &ChangeRecord, coordinate: &Coordinate) {
        tracing::debug!(change = %change.id, target = %coordinate, "change target could not be resolved");
        self.unresolved.insert(change.id);
    }
}

/// Convenience wrapper: the valid subset of `changes`.
///
/// # Errors
/// Returns the fatal errors raised while evaluating the batch.
pub fn valid_change_ids(changes: &[ChangeRecord]) -> Result<BTreeSet<ChangeId>, AssemblyError> {
    Ok(ValidityEvaluator::new().evaluate(changes)?.valid_set())
}

#[cfg(test)]
mod tests {
    use time::{Date, Month};
    use ulid::Ulid;

    use super::*;
    use crate::content::ContentBlock;
    use crate::coords::{AnnexCoordinate, ArticleContainer, ArticleCoordinate};
    use crate::model::{
        AnnexAncestry, AnnexParent, AnnexTarget, Article, ArticleAncestry, ArticleParent, ArticleTarget,
        ChangeContext, EntityId, ResolutionKey, ResolutionRef, ResolutionTarget,
    };

    struct Fixture {
        next: u128,
        carriers: u32,
    }

    impl Fixture {
        fn new() -> Self {
            Self { next: 100, carriers: 0 }
        }

        fn id(&mut self) -> Ulid {
            self.next += 1;
            Ulid(self.next)
        }

        fn resolution(&self, number: u32, year: i32) -> ResolutionRef {
            ResolutionRef {
                id: EntityId(Ulid(u128::from(number) * 10_000 + u128::from(year.unsigned_abs()))),
                key: ResolutionKey::new("CSU", number, year),
            }
        }

        fn article_in(&mut self, resolution: &ResolutionRef, number: u32) -> ArticleAncestry {
            ArticleAncestry {
                id: EntityId(self.id()),
                number: Some(number),
                suffix: 0,
                parent: ArticleParent::Resolution(resolution.clone()),
            }
        }

        /// Every change travels in its own numbered article of the issuing resolution.
        fn change(&mut self, issuer: &ResolutionRef, month: Month, kind: ChangeKind) -> ChangeRecord {
            self.carriers += 1;
            let origin = self.article_in(issuer, self.carriers);
            ChangeRecord {
                id: ChangeId(self.id()),
                context: ChangeContext {
                    date: Date::from_calendar_date(issuer.key.year, month, 1)
                        .unwrap_or_else(|err| panic!("valid date: {err}")),
                    issuer: issuer.key.clone(),
                },
                origin,
                kind,
            }
        }
    }

    fn article_target(article: &ArticleAncestry, resolution: &ResolutionRef) -> ArticleTarget {
        ArticleTarget {
            coordinate: ArticleCoordinate {
                container: ArticleContainer::Resolution(resolution.key.clone()),
                number: article.number.unwrap_or(0),
                suffix: article.suffix,
            },
            entity: Some(article.clone()),
        }
    }

    fn replacement(fixture: &mut Fixture, change_hint: &str) -> Article {
        Article { id: EntityId(fixture.id()), number: Some(1), suffix: 0, content: vec![ContentBlock::text(change_hint)] }
    }

    // Test IDs: TEVAL-001
    #[test]
    fn repeal_of_the_article_carrying_a_repeal_reinstates_the_target() -> Result<(), AssemblyError> {
        let mut fx = Fixture::new();
        let base = fx.resolution(1, 2012);
        let first = fx.resolution(5, 2013);
        let second = fx.resolution(9, 2014);
        let target = fx.article_in(&base, 1);

        let repeal = fx.change(&first, Month::January, ChangeKind::Repeal { target: article_target(&target, &base).reference() });
        let carrier = repeal.origin.clone();
        let repeal_of_repeal = fx.change(
            &second,
            Month::January,
            ChangeKind::Repeal { target: article_target(&carrier, &first).reference() },
        );

        let mut evaluator = ValidityEvaluator::new();
        let report = evaluator.evaluate(&[repeal.clone()])?;
        assert_eq!(report.valid, vec![repeal.id]);
        let target_node = evaluator.graph().find_node(NodeKey::Entity(target.id));
        assert_eq!(target_node.map(|node| evaluator.graph().is_node_valid(node)), Some(false));

        let mut evaluator = ValidityEvaluator::new();
        let report = evaluator.evaluate(&[repeal_of_repeal.clone(), repeal.clone()])?;
        assert_eq!(report.valid, vec![repeal_of_repeal.id]);
        assert_eq!(report.voided.len(), 1);
        assert_eq!(report.voided[0].change, repeal.id);
        assert_eq!(report.voided[0].voided_by, Some(NodeKey::Change(repeal_of_repeal.id)));
        let target_node = evaluator.graph().find_node(NodeKey::Entity(target.id));
        assert_eq!(target_node.map(|node| evaluator.graph().is_node_valid(node)), Some(true));
        Ok(())
    }

    // Test IDs: TEVAL-002
    #[test]
    fn repealing_the_latest_replacement_falls_back_to_the_previous_one() -> Result<(), AssemblyError> {
        let mut fx = Fixture::new();
        let base = fx.resolution(1, 2012);
        let issuer = fx.resolution(5, 2013);
        let repealer = fx.resolution(9, 2014);
        let target = fx.article_in(&base, 1);
        let target_ref = article_target(&target, &base);

        let e1_content = replacement(&mut fx, "E1");
        let e2_content = replacement(&mut fx, "E2");
        let e3_content = replacement(&mut fx, "E3");
        let e1 = fx.change(&issuer, Month::January, ChangeKind::ReplaceArticle { target: target_ref.clone(), new_content: e1_content });
        let e2 = fx.change(&issuer, Month::February, ChangeKind::ReplaceArticle { target: target_ref.clone(), new_content: e2_content.clone() });
        let e3 = fx.change(&issuer, Month::March, ChangeKind::ReplaceArticle { target: target_ref.clone(), new_content: e3_content.clone() });
        let e3_carrier = e3.origin.clone();
        let repeal_e3 = fx.change(
            &repealer,
            Month::January,
            ChangeKind::Repeal { target: article_target(&e3_carrier, &issuer).reference() },
        );

        let mut evaluator = ValidityEvaluator::new();
        let report = evaluator.evaluate(&[e3.clone(), repeal_e3, e1.clone(), e2.clone()])?;
        assert!(report.valid.contains(&e1.id));
        assert!(report.valid.contains(&e2.id));
        assert!(!report.valid.contains(&e3.id));

        let coordinate = Coordinate::Article(target_ref.coordinate);
        let active = evaluator.graph().active_version(&coordinate);
        assert_eq!(active, evaluator.graph().find_node(NodeKey::Entity(e2_content.id)));
        assert_eq!(evaluator.graph().versions(&coordinate).len(), 4);
        Ok(())
    }

    // Test IDs: TEVAL-003
    #[test]
    fn repealing_an_annex_voids_changes_carried_by_its_articles() -> Result<(), AssemblyError> {
        let mut fx = Fixture::new();
        let base = fx.resolution(1, 2012);
        let issuer = fx.resolution(5, 2013);
        let repealer = fx.resolution(9, 2014);
        let annex = AnnexAncestry { id: EntityId(fx.id()), number: Some(1), parent: AnnexParent::Resolution(issuer.clone()) };
        let carrier = ArticleAncestry {
            id: EntityId(fx.id()),
            number: Some(1),
            suffix: 0,
            parent: ArticleParent::Annex(annex.clone()),
        };
        let target = fx.article_in(&base, 2);
        let mut bundled = fx.change(&issuer, Month::January, ChangeKind::Repeal { target: article_target(&target, &base).reference() });
        bundled.origin = carrier;
        let annex_target = AnnexTarget {
            coordinate: AnnexCoordinate { resolution: issuer.key.clone(), number: 1 },
            entity: Some(annex),
        };
        let repeal_annex = fx.change(&repealer, Month::January, ChangeKind::Repeal { target: annex_target.reference() });

        let report = ValidityEvaluator::new().evaluate(&[bundled.clone(), repeal_annex.clone()])?;
        assert_eq!(report.valid, vec![repeal_annex.id]);
        assert_eq!(report.voided[0].change, bundled.id);
        Ok(())
    }

    // Test IDs: TEVAL-004
    #[test]
    fn bundled_changes_follow_the_activation_change() -> Result<(), AssemblyError> {
        let mut fx = Fixture::new();
        let base = fx.resolution(1, 2012);
        let issuer = fx.resolution(5, 2013);
        let repealer = fx.resolution(9, 2014);
        let annex = AnnexAncestry { id: EntityId(fx.id()), number: Some(1), parent: AnnexParent::Resolution(issuer.clone()) };
        let annex_target = AnnexTarget {
            coordinate: AnnexCoordinate { resolution: issuer.key.clone(), number: 1 },
            entity: Some(annex.clone()),
        };
        let activation = fx.change(&issuer, Month::January, ChangeKind::ApplyModificationsAnnex { target: annex_target });
        let target = fx.article_in(&base, 2);
        let mut bundled = fx.change(&issuer, Month::January, ChangeKind::Repeal { target: article_target(&target, &base).reference() });
        bundled.origin = ArticleAncestry { id: EntityId(fx.id()), number: Some(1), suffix: 0, parent: ArticleParent::Annex(annex) };

        let report = ValidityEvaluator::new().evaluate(&[bundled.clone(), activation.clone()])?;
        assert!(report.valid.contains(&bundled.id));

        let activation_carrier = activation.origin.clone();
        let repeal_activation = fx.change(
            &repealer,
            Month::January,
            ChangeKind::Repeal { target: article_target(&activation_carrier, &issuer).reference() },
        );
        let report = ValidityEvaluator::new().evaluate(&[bundled.clone(), activation.clone(), repeal_activation])?;
        assert!(!report.valid.contains(&activation.id));
        assert!(!report.valid.contains(&bundled.id));
        Ok(())
    }

    // Test IDs: TEVAL-005
    #[test]
    fn unresolvable_targets_are_reported_not_thrown() -> Result<(), AssemblyError> {
        let mut fx = Fixture::new();
        let issuer = fx.resolution(5, 2013);
        let dangling = ArticleTarget {
            coordinate: ArticleCoordinate {
                container: ArticleContainer::Resolution(ResolutionKey::new("CSU", 77, 1999)),
                number: 3,
                suffix: 0,
            },
            entity: None,
        };
        let repeal = fx.change(&issuer, Month::January, ChangeKind::Repeal { target: dangling.reference() });
        let modify = fx.change(
            &issuer,
            Month::February,
            ChangeKind::ModifyArticle { target: dangling, before: vec![ContentBlock::text("a")], after: vec![ContentBlock::text("b")] },
        );

        let report = ValidityEvaluator::new().evaluate(&[modify.clone(), repeal.clone()])?;
        assert!(report.valid.is_empty());
        assert_eq!(report.unresolved, vec![repeal.id, modify.id]);
        Ok(())
    }

    // Test IDs: TEVAL-006
    #[test]
    fn ratification_never_gates_validity() -> Result<(), AssemblyError> {
        let mut fx = Fixture::new();
        let base = fx.resolution(1, 2012);
        let issuer = fx.resolution(5, 2013);
        let ratify = fx.change(
            &issuer,
            Month::January,
            ChangeKind::RatifyAdReferendum { target: ResolutionTarget { key: base.key.clone(), entity: Some(base.clone()) } },
        );
        let mut evaluator = ValidityEvaluator::new();
        let report = evaluator.evaluate(&[ratify.clone()])?;
        assert_eq!(report.valid, vec![ratify.id]);
        assert_eq!(evaluator.graph().find_node(NodeKey::Entity(base.id)), None);
        Ok(())
    }

    // Test IDs: TEVAL-007
    #[test]
    fn changes_on_repealed_resolutions_are_voided_with_an_explanation() -> Result<(), AssemblyError> {
        let mut fx = Fixture::new();
        let base = fx.resolution(1, 2012);
        let issuer = fx.resolution(5, 2013);
        let repealer = fx.resolution(9, 2014);
        let target = fx.article_in(&base, 1);
        let modify = fx.change(
            &issuer,
            Month::January,
            ChangeKind::ModifyArticle {
                target: article_target(&target, &base),
                before: vec![ContentBlock::text("X")],
                after: vec![ContentBlock::text("Y")],
            },
        );
        let repeal_issuer = fx.change(
            &repealer,
            Month::January,
            ChangeKind::Repeal { target: ResolutionTarget { key: issuer.key.clone(), entity: Some(issuer.clone()) }.reference() },
        );

        let report = ValidityEvaluator::new().evaluate(&[modify.clone(), repeal_issuer.clone()])?;
        assert_eq!(report.valid, vec![repeal_issuer.id]);
        assert_eq!(
            report.voided,
            vec![VoidedChange { change: modify.id, voided_by: Some(NodeKey::Change(repeal_issuer.id)) }]
        );
        Ok(())
    }

    // Test IDs: TEVAL-008
    #[test]
    fn replacing_the_article_carrying_a_modification_voids_the_modification() -> Result<(), AssemblyError> {
        let mut fx = Fixture::new();
        let base = fx.resolution(1, 2012);
        let first = fx.resolution(5, 2013);
        let second = fx.resolution(9, 2014);
        let target = fx.article_in(&base, 1);
        let modify = fx.change(
            &first,
            Month::January,
            ChangeKind::ModifyArticle {
                target: article_target(&target, &base),
                before: vec![ContentBlock::text("X")],
                after: vec![ContentBlock::text("Y")],
            },
        );
        let new_content = replacement(&mut fx, "unrelated");
        let replace = fx.change(
            &second,
            Month::January,
            ChangeKind::ReplaceArticle { target: article_target(&modify.origin, &first), new_content },
        );

        let mut evaluator = ValidityEvaluator::new();
        let report = evaluator.evaluate(&[replace.clone(), modify.clone()])?;
        assert_eq!(report.valid, vec![replace.id]);
        assert_eq!(report.voided, vec![VoidedChange { change: modify.id, voided_by: Some(NodeKey::Change(replace.id)) }]);
        let carrier = evaluator.graph().find_node(NodeKey::Entity(modify.origin.id));
        assert_eq!(carrier.map(|node| evaluator.graph().is_node_valid(node)), Some(false));
        Ok(())
    }
}
