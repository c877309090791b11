use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use resolution_assembly_core::{
    assemble_resolution, select_changes, sorted_changes, Assembly, ChangeId, ChangeRecord, RawChange, Resolution,
    ResolutionKey, ValidityEvaluator, ValidityReport, VersionSpec,
};
use resolution_assembly_store_sqlite::{ExportManifest, ImportSummary, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssembleRequest {
    pub resolution: ResolutionKey,
    #[serde(default)]
    pub version: VersionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssembleResponse {
    /// Digest of the request and the candidate change ids it saw.
    pub assembly_id: String,
    #[serde(flatten)]
    pub assembly: Assembly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidChangesResponse {
    pub resolution: ResolutionKey,
    pub candidates: usize,
    pub selected: usize,
    #[serde(flatten)]
    pub report: ValidityReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AffectedResolutions {
    pub change_id: ChangeId,
    pub resolutions: Vec<ResolutionKey>,
}

#[derive(Debug, Clone)]
pub struct ResolutionAssemblyApi {
    db_path: PathBuf,
}

impl ResolutionAssemblyApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Store one authored resolution.
    ///
    /// # Errors
    /// Returns an error when the resolution is already stored or persistence fails.
    pub fn add_resolution(&self, resolution: &Resolution) -> Result<ResolutionKey> {
        let mut store = self.open_migrated_store()?;
        store.insert_resolution(resolution)?;
        Ok(resolution.key.clone())
    }

    /// Store one change row after ingestion validation.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_change(&self, change: &RawChange) -> Result<AffectedResolutions> {
        let mut store = self.open_migrated_store()?;
        store.insert_change(change)?;
        Ok(AffectedResolutions { change_id: change.id, resolutions: store.affected_resolutions(change.id)? })
    }

    /// Assemble one resolution at the version selected by the request.
    ///
    /// # Errors
    /// Returns an error when the resolution is unknown, a stored change no longer converts, or
    /// evaluation fails.
    pub fn assemble(&self, input: &AssembleRequest) -> Result<AssembleResponse> {
        let store = self.open_migrated_store()?;
        let resolution = store
            .get_resolution(&input.resolution)?
            .ok_or_else(|| anyhow!("resolution not found: {}", input.resolution))?;
        let candidates = store.candidate_changes(&input.resolution)?;

        let assembly = assemble_resolution(&resolution, &candidates, &input.version)?;
        let assembly_id = compute_assembly_id(input, &candidates)?;
        tracing::debug!(%assembly_id, resolution = %input.resolution, "assembly built");
        Ok(AssembleResponse { assembly_id, assembly })
    }

    /// Report which candidate changes of a resolution are valid at the selected version.
    ///
    /// # Errors
    /// Returns an error when loading candidates or evaluating validity fails.
    pub fn valid_changes(&self, input: &AssembleRequest) -> Result<ValidChangesResponse> {
        let store = self.open_migrated_store()?;
        let candidates = store.candidate_changes(&input.resolution)?;
        let sorted = sorted_changes(&candidates);
        let selected = select_changes(&sorted, &input.version)?;
        let report = ValidityEvaluator::new().evaluate(selected)?;

        Ok(ValidChangesResponse {
            resolution: input.resolution.clone(),
            candidates: candidates.len(),
            selected: selected.len(),
            report,
        })
    }

    /// Every change that can influence a resolution, in change order.
    ///
    /// # Errors
    /// Returns an error when the candidate query fails.
    pub fn candidate_changes(&self, resolution: &ResolutionKey) -> Result<Vec<ChangeRecord>> {
        let store = self.open_migrated_store()?;
        Ok(sorted_changes(&store.candidate_changes(resolution)?))
    }

    /// Resolutions a stored change directly edits.
    ///
    /// # Errors
    /// Returns an error when the change is unknown.
    pub fn affected_resolutions(&self, change_id: ChangeId) -> Result<AffectedResolutions> {
        let store = self.open_migrated_store()?;
        Ok(AffectedResolutions { change_id, resolutions: store.affected_resolutions(change_id)? })
    }

    /// Import a corpus snapshot directory.
    ///
    /// # Errors
    /// Returns an error when manifest verification, validation, or writes fail.
    pub fn import_corpus(&self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        let mut store = self.open_store()?;
        store.import_snapshot(in_dir, skip_existing)
    }

    /// Export the corpus as an NDJSON snapshot directory.
    ///
    /// # Errors
    /// Returns an error when files cannot be written.
    pub fn export_corpus(&self, out_dir: &Path) -> Result<ExportManifest> {
        let store = self.open_migrated_store()?;
        store.export_snapshot(out_dir)
    }
}

fn compute_assembly_id(input: &AssembleRequest, candidates: &[ChangeRecord]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(input.resolution.to_string().as_bytes());
    hasher.update(serde_json::to_vec(&input.version)?);

    let mut sorted_ids = candidates.iter().map(|change| change.id.to_string()).collect::<Vec<_>>();
    sorted_ids.sort_unstable();
    for value in sorted_ids {
        hasher.update(value.as_bytes());
    }

    let digest_hex = format!("{:x}", hasher.finalize());
    Ok(format!("asm_{}", &digest_hex[..16]))
}

#[cfg(test)]
mod tests {
    use resolution_assembly_core::{
        parse_date, plain_text, Article, ArticleContainer, ArticleCoordinate, ArticleTarget, ChangeContext,
        ContentBlock, EntityId, RawReference,
    };
    use ulid::Ulid;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("resolution-api-{}.sqlite3", Ulid::new()))
    }

    fn resolution(id: u128, key: ResolutionKey, date: &str, article: u128) -> Result<Resolution> {
        Ok(Resolution {
            id: EntityId(Ulid(id)),
            key,
            date: parse_date(date)?,
            summary: String::new(),
            recitals: Vec::new(),
            considerations: Vec::new(),
            articles: vec![Article {
                id: EntityId(Ulid(article)),
                number: Some(1),
                suffix: 0,
                content: vec![ContentBlock::text("Article 1 original text")],
            }],
            annexes: Vec::new(),
        })
    }

    fn repeal_article(id: u128, date: &str, issuer: ResolutionKey, origin: u128, target: ResolutionKey) -> Result<RawChange> {
        let target = ArticleTarget {
            coordinate: ArticleCoordinate { container: ArticleContainer::Resolution(target), number: 1, suffix: 0 },
            entity: None,
        };
        Ok(RawChange {
            id: ChangeId(Ulid(id)),
            change_type: "REPEAL".to_string(),
            context: ChangeContext { date: parse_date(date)?, issuer },
            origin_article: Some(EntityId(Ulid(origin))),
            origin: None,
            target: Some(RawReference::from(&target.reference())),
            before: None,
            after: None,
            new_article: None,
            new_annex: None,
            annex_source: None,
            new_number: None,
            new_suffix: None,
            description: None,
        })
    }

    /// CSU-5/2013 amends CSU-1/2012 article 1; CSU-9/2014 repeals the amending article.
    fn seeded_api() -> Result<(ResolutionAssemblyApi, PathBuf)> {
        let db_path = unique_temp_db_path();
        let api = ResolutionAssemblyApi::new(db_path.clone());
        let statute = ResolutionKey::new("CSU", 1, 2012);
        let amending = ResolutionKey::new("CSU", 5, 2013);
        let repealing = ResolutionKey::new("CSU", 9, 2014);

        api.add_resolution(&resolution(1, statute.clone(), "2012-03-01", 11)?)?;
        api.add_resolution(&resolution(2, amending.clone(), "2013-01-01", 21)?)?;
        api.add_resolution(&resolution(3, repealing.clone(), "2014-01-01", 31)?)?;

        let mut amendment = repeal_article(101, "2013-01-01", amending.clone(), 21, statute)?;
        amendment.change_type = "MODIFY_ARTICLE".to_string();
        amendment.before = Some(vec![ContentBlock::text("original")]);
        amendment.after = Some(vec![ContentBlock::text("amended")]);
        api.add_change(&amendment)?;
        api.add_change(&repeal_article(102, "2014-01-01", repealing, 31, amending)?)?;

        Ok((api, db_path))
    }

    fn article_text(response: &AssembleResponse) -> Result<String> {
        let article = response
            .assembly
            .resolution
            .article(1, 0)
            .ok_or_else(|| anyhow!("article 1 should be present"))?;
        Ok(plain_text(&article.content))
    }

    // Test IDs: TAPI-001
    #[test]
    fn assemble_replays_only_changes_valid_at_the_requested_version() -> Result<()> {
        let (api, db_path) = seeded_api()?;
        let statute = ResolutionKey::new("CSU", 1, 2012);

        let before_repeal = api.assemble(&AssembleRequest {
            resolution: statute.clone(),
            version: VersionSpec::as_of(parse_date("2013-06-01")?),
        })?;
        assert_eq!(article_text(&before_repeal)?, "Article 1 amended text");

        let latest = api.assemble(&AssembleRequest { resolution: statute, version: VersionSpec::latest() })?;
        assert_eq!(article_text(&latest)?, "Article 1 original text");
        assert_eq!(latest.assembly.versions.len(), 3);
        assert!(latest.assembly_id.starts_with("asm_"));
        assert_ne!(latest.assembly_id, before_repeal.assembly_id);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-002
    #[test]
    fn valid_changes_explain_voided_amendments() -> Result<()> {
        let (api, db_path) = seeded_api()?;
        let response = api.valid_changes(&AssembleRequest {
            resolution: ResolutionKey::new("CSU", 1, 2012),
            version: VersionSpec::latest(),
        })?;

        assert_eq!(response.candidates, 2);
        assert_eq!(response.report.valid, vec![ChangeId(Ulid(102))]);
        assert_eq!(response.report.voided.len(), 1);
        assert_eq!(response.report.voided[0].change, ChangeId(Ulid(101)));
        assert!(response.report.voided[0].voided_by.is_some());

        let affected = api.affected_resolutions(ChangeId(Ulid(102)))?;
        assert_eq!(affected.resolutions, vec![ResolutionKey::new("CSU", 5, 2013)]);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-003
    #[test]
    fn assembly_ids_are_deterministic_and_unknown_resolutions_fail() -> Result<()> {
        let (api, db_path) = seeded_api()?;
        let request = AssembleRequest { resolution: ResolutionKey::new("CSU", 1, 2012), version: VersionSpec::latest() };
        let first = api.assemble(&request)?;
        let second = api.assemble(&request)?;
        assert_eq!(first, second);

        let Err(err) = api.assemble(&AssembleRequest {
            resolution: ResolutionKey::new("CSU", 40, 2020),
            version: VersionSpec::latest(),
        }) else {
            return Err(anyhow!("expected an unknown resolution to fail"));
        };
        assert!(err.to_string().contains("resolution not found: CSU-40/2020"));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-004
    #[test]
    fn migrate_dry_run_plans_without_applying() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ResolutionAssemblyApi::new(db_path.clone());

        let planned = api.migrate(true)?;
        assert_eq!(planned.would_apply_versions, vec![1]);
        assert_eq!(api.schema_status()?.current_version, 0);

        let applied = api.migrate(false)?;
        assert_eq!(applied.after_version, Some(1));
        assert_eq!(applied.up_to_date, Some(true));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }
}
