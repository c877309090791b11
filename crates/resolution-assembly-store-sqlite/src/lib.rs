use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use resolution_assembly_core::locate::{fill_reference, find_article};
use resolution_assembly_core::{
    format_date, ChangeId, ChangeRecord, RawArticleAncestry, RawChange, RawReference, Reference,
    Resolution, ResolutionKey,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const RESOLUTIONS_FILE: &str = "resolutions.ndjson";
const CHANGES_FILE: &str = "changes.ndjson";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS resolutions (
  resolution_id TEXT PRIMARY KEY,
  initial TEXT NOT NULL CHECK (length(initial) > 0),
  number INTEGER NOT NULL CHECK (number >= 0),
  year INTEGER NOT NULL,
  issued_on TEXT NOT NULL,
  resolution_json TEXT NOT NULL,
  UNIQUE(initial, number, year)
);

CREATE TABLE IF NOT EXISTS changes (
  change_id TEXT PRIMARY KEY,
  change_type TEXT NOT NULL CHECK (change_type IN (
    'MODIFY_ARTICLE','REPLACE_ARTICLE','REPEAL','RATIFY_AD_REFERENDUM','REPLACE_ANNEX',
    'ADD_ANNEX_TO_RESOLUTION','ADD_ANNEX_TO_ANNEX','MODIFY_TEXT_ANNEX','ADD_ARTICLE_TO_RESOLUTION',
    'ADD_ARTICLE_TO_ANNEX','ADD_ARTICLE_TO_CHAPTER','APPLY_MODIFICATIONS_ANNEX','ADVANCED'
  )),
  effective_on TEXT NOT NULL,
  issuer_initial TEXT NOT NULL,
  issuer_number INTEGER NOT NULL,
  issuer_year INTEGER NOT NULL,
  target_initial TEXT NOT NULL,
  target_number INTEGER NOT NULL,
  target_year INTEGER NOT NULL,
  change_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_changes_target ON changes(target_initial, target_number, target_year);
CREATE INDEX IF NOT EXISTS idx_changes_issuer ON changes(issuer_initial, issuer_number, issuer_year);
";

/// Changes targeting the resolution, plus changes targeting any resolution that issues one of
/// them, to a fixpoint. `UNION` deduplicates the frontier so issuing cycles terminate.
const CANDIDATE_CHANGES_SQL: &str = r"
WITH RECURSIVE affected(initial, number, year) AS (
  SELECT ?1, ?2, ?3
  UNION
  SELECT c.issuer_initial, c.issuer_number, c.issuer_year
  FROM changes c
  JOIN affected a
    ON c.target_initial = a.initial AND c.target_number = a.number AND c.target_year = a.year
)
SELECT c.change_json
FROM changes c
JOIN affected a
  ON c.target_initial = a.initial AND c.target_number = a.number AND c.target_year = a.year
ORDER BY c.change_id ASC
";

type ResolutionCache = BTreeMap<ResolutionKey, Option<Resolution>>;

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported_resolutions: usize,
    pub skipped_existing_resolutions: usize,
    pub imported_changes: usize,
    pub skipped_existing_changes: usize,
}

impl SqliteStore {
    /// Open a SQLite-backed resolution corpus and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        if current_schema_version(&self.conn)? < 1 {
            self.apply_migration_1()?;
        }

        let version = current_schema_version(&self.conn)?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!("unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![1_i64, now_rfc3339()?],
        )
        .context("failed to record migration version 1")?;
        tx.commit().context("failed to commit migration v1")?;
        Ok(())
    }

    /// Persist one authored resolution.
    ///
    /// # Errors
    /// Returns an error when serialization fails or the id or key is already stored.
    pub fn insert_resolution(&mut self, resolution: &Resolution) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO resolutions(resolution_id, initial, number, year, issued_on, resolution_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    resolution.id.to_string(),
                    resolution.key.initial,
                    resolution.key.number,
                    resolution.key.year,
                    format_date(resolution.date),
                    serde_json::to_string(resolution).context("failed to serialize resolution")?,
                ],
            )
            .with_context(|| format!("failed to insert resolution {}", resolution.key))?;
        Ok(())
    }

    /// Persist one change row after checking it converts into a well-formed change.
    ///
    /// The row is stored as given; ancestry is filled again on every load.
    ///
    /// # Errors
    /// Returns an error when ingestion validation fails or the row cannot be written.
    pub fn insert_change(&mut self, raw: &RawChange) -> Result<()> {
        let mut cache = ResolutionCache::new();
        let record = self
            .hydrate_change(raw.clone(), &mut cache)
            .with_context(|| format!("change {} failed ingestion validation", raw.id))?;
        let target = record.kind.affected_resolution();
        let issuer = &record.context.issuer;

        self.conn
            .execute(
                "INSERT INTO changes(
                    change_id, change_type, effective_on,
                    issuer_initial, issuer_number, issuer_year,
                    target_initial, target_number, target_year,
                    change_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.to_string(),
                    record.change_type().as_str(),
                    format_date(record.context.date),
                    issuer.initial,
                    issuer.number,
                    issuer.year,
                    target.initial,
                    target.number,
                    target.year,
                    serde_json::to_string(raw).context("failed to serialize change row")?,
                ],
            )
            .with_context(|| format!("failed to insert change {}", raw.id))?;
        Ok(())
    }

    /// Load the authored resolution with `key`.
    ///
    /// # Errors
    /// Returns an error when lookup or JSON deserialization fails.
    pub fn get_resolution(&self, key: &ResolutionKey) -> Result<Option<Resolution>> {
        let json = self
            .conn
            .query_row(
                "SELECT resolution_json FROM resolutions WHERE initial = ?1 AND number = ?2 AND year = ?3",
                params![key.initial, key.number, key.year],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to look up resolution {key}"))?;

        match json {
            Some(json) => {
                let resolution = serde_json::from_str(&json)
                    .with_context(|| format!("failed to deserialize stored resolution {key}"))?;
                Ok(Some(resolution))
            }
            None => Ok(None),
        }
    }

    /// All stored resolutions ordered by year, number and issuing body.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_resolutions(&self) -> Result<Vec<Resolution>> {
        let mut stmt = self
            .conn
            .prepare("SELECT resolution_json FROM resolutions ORDER BY year ASC, number ASC, initial ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut resolutions = Vec::new();
        for row in rows {
            let json = row?;
            resolutions.push(serde_json::from_str(&json).context("failed to deserialize stored resolution")?);
        }
        Ok(resolutions)
    }

    /// Stored change rows exactly as they were inserted, ordered by change id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_raw_changes(&self) -> Result<Vec<RawChange>> {
        let mut stmt = self.conn.prepare("SELECT change_json FROM changes ORDER BY change_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        decode_changes(rows)
    }

    /// Every change that can influence the assembled text of `key`, with ancestry filled.
    ///
    /// # Errors
    /// Returns an error when the closure query fails or a stored row no longer converts.
    pub fn candidate_changes(&self, key: &ResolutionKey) -> Result<Vec<ChangeRecord>> {
        let raws = {
            let mut stmt = self.conn.prepare(CANDIDATE_CHANGES_SQL).context("failed to prepare candidate query")?;
            let rows = stmt.query_map(params![key.initial, key.number, key.year], |row| row.get::<_, String>(0))?;
            decode_changes(rows)?
        };

        let mut cache = ResolutionCache::new();
        let mut records = Vec::with_capacity(raws.len());
        for raw in raws {
            let id = raw.id;
            records.push(
                self.hydrate_change(raw, &mut cache)
                    .with_context(|| format!("stored change {id} no longer converts"))?,
            );
        }
        tracing::debug!(resolution = %key, candidates = records.len(), "candidate changes loaded");
        Ok(records)
    }

    /// Resolutions whose text `change_id` directly edits.
    ///
    /// # Errors
    /// Returns an error when the change is unknown or the lookup fails.
    pub fn affected_resolutions(&self, change_id: ChangeId) -> Result<Vec<ResolutionKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_initial, target_number, target_year FROM changes WHERE change_id = ?1",
        )?;
        let rows = stmt.query_map(params![change_id.to_string()], |row| {
            Ok(ResolutionKey::new(row.get::<_, String>(0)?, row.get::<_, u32>(1)?, row.get::<_, i32>(2)?))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        if keys.is_empty() {
            return Err(anyhow!("unknown change {change_id}"));
        }
        Ok(keys)
    }

    /// Export resolutions and change rows as deterministic NDJSON plus manifest.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let resolutions = self.list_resolutions()?;
        let changes = self.list_raw_changes()?;

        let resolution_digest = write_ndjson_file(&out_dir.join(RESOLUTIONS_FILE), &resolutions)?;
        let change_digest = write_ndjson_file(&out_dir.join(CHANGES_FILE), &changes)?;

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files: vec![
                ExportFileDigest {
                    path: RESOLUTIONS_FILE.to_string(),
                    sha256: resolution_digest.0,
                    records: resolution_digest.1,
                },
                ExportFileDigest { path: CHANGES_FILE.to_string(), sha256: change_digest.0, records: change_digest.1 },
            ],
        };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json = serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json)
            .with_context(|| format!("failed to write export manifest {}", manifest_path.display()))?;

        Ok(manifest)
    }

    /// Import a snapshot directory into this database.
    ///
    /// Resolutions are written first so change rows can be validated against them.
    ///
    /// # Errors
    /// Returns an error when the manifest does not match the files, a change fails ingestion
    /// validation, or a duplicate is found with `skip_existing` unset.
    pub fn import_snapshot(&mut self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        self.migrate()?;
        let manifest = read_export_manifest(&in_dir.join("manifest.json"))?;
        validate_import_manifest(in_dir, &manifest)?;

        let mut summary = ImportSummary::default();

        for resolution in read_ndjson_file::<Resolution>(&in_dir.join(RESOLUTIONS_FILE))? {
            if self.resolution_exists(&resolution)? {
                if skip_existing {
                    summary.skipped_existing_resolutions += 1;
                    continue;
                }
                return Err(anyhow!("resolution already exists: {}", resolution.key));
            }
            self.insert_resolution(&resolution)?;
            summary.imported_resolutions += 1;
        }

        for change in read_ndjson_file::<RawChange>(&in_dir.join(CHANGES_FILE))? {
            if self.change_exists(change.id)? {
                if skip_existing {
                    summary.skipped_existing_changes += 1;
                    continue;
                }
                return Err(anyhow!("change already exists: {}", change.id));
            }
            self.insert_change(&change)?;
            summary.imported_changes += 1;
        }

        tracing::info!(
            resolutions = summary.imported_resolutions,
            changes = summary.imported_changes,
            skipped = summary.skipped_existing_resolutions + summary.skipped_existing_changes,
            "snapshot imported"
        );
        Ok(summary)
    }

    /// Fills origin and target ancestry from the stored trees, then converts the row.
    fn hydrate_change(&self, mut raw: RawChange, cache: &mut ResolutionCache) -> Result<ChangeRecord> {
        if raw.origin.is_none() {
            if let Some(article) = raw.origin_article {
                let issuer = self.cached_resolution(&raw.context.issuer, cache)?.ok_or_else(|| {
                    anyhow!("change {} is issued by {}, which is not stored", raw.id, raw.context.issuer)
                })?;
                let origin = find_article(issuer, article).ok_or_else(|| {
                    anyhow!("origin article {article} of change {} is not part of {}", raw.id, raw.context.issuer)
                })?;
                raw.origin = Some(RawArticleAncestry::from(&origin));
            }
        }

        if let Some(target) = raw.target.take() {
            let mut reference = Reference::try_from(target)?;
            if reference.entity().is_none() {
                let key = reference.resolution().clone();
                if let Some(resolution) = self.cached_resolution(&key, cache)? {
                    fill_reference(&mut reference, resolution);
                }
            }
            raw.target = Some(RawReference::from(&reference));
        }

        Ok(ChangeRecord::try_from(raw)?)
    }

    fn cached_resolution<'c>(
        &self,
        key: &ResolutionKey,
        cache: &'c mut ResolutionCache,
    ) -> Result<Option<&'c Resolution>> {
        if !cache.contains_key(key) {
            let loaded = self.get_resolution(key)?;
            cache.insert(key.clone(), loaded);
        }
        Ok(cache.get(key).and_then(Option::as_ref))
    }

    fn resolution_exists(&self, resolution: &Resolution) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM resolutions
                    WHERE resolution_id = ?1 OR (initial = ?2 AND number = ?3 AND year = ?4)
                )",
                params![
                    resolution.id.to_string(),
                    resolution.key.initial,
                    resolution.key.number,
                    resolution.key.year
                ],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to check resolution {}", resolution.key))?;
        Ok(exists == 1)
    }

    fn change_exists(&self, change_id: ChangeId) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM changes WHERE change_id = ?1)",
                params![change_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to check change {change_id}"))?;
        Ok(exists == 1)
    }
}

fn decode_changes<I>(rows: I) -> Result<Vec<RawChange>>
where
    I: Iterator<Item = rusqlite::Result<String>>,
{
    let mut changes = Vec::new();
    for row in rows {
        let json = row?;
        changes.push(serde_json::from_str(&json).context("failed to deserialize stored change row")?);
    }
    Ok(changes)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get::<_, i64>(0))
        .context("failed to read current schema version")?;
    Ok(version)
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn write_ndjson_file<T: Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path).with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        writer.write_all(b"\n").with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((format!("{:x}", hasher.finalize()), values.len()))
}

fn read_ndjson_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {} from {}", index + 1, path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = serde_json::from_str(trimmed)
            .with_context(|| format!("failed to parse NDJSON row {} from {}", index + 1, path.display()))?;
        values.push(value);
    }

    Ok(values)
}

fn read_export_manifest(path: &Path) -> Result<ExportManifest> {
    let bytes = fs::read(path).with_context(|| format!("failed to read manifest file {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse manifest JSON {}", path.display()))
}

fn ndjson_digest_and_records(path: &Path) -> Result<(String, usize)> {
    let file = File::open(path).with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut records = 0_usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {} from {}", index + 1, path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
        if !line.trim().is_empty() {
            records += 1;
        }
    }

    Ok((format!("{:x}", hasher.finalize()), records))
}

fn validate_import_manifest(in_dir: &Path, manifest: &ExportManifest) -> Result<()> {
    if manifest.schema_version <= 0 || manifest.schema_version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported export schema version {}; supported range is 1..={}",
            manifest.schema_version,
            LATEST_SCHEMA_VERSION
        ));
    }

    let mut by_path: BTreeMap<&str, &ExportFileDigest> = BTreeMap::new();
    for file in &manifest.files {
        if by_path.insert(file.path.as_str(), file).is_some() {
            return Err(anyhow!("manifest contains duplicate file entry: {}", file.path));
        }
    }

    for required in [RESOLUTIONS_FILE, CHANGES_FILE] {
        let Some(expected) = by_path.get(required) else {
            return Err(anyhow!("manifest is missing required file entry: {required}"));
        };
        let file_path = in_dir.join(required);
        if !file_path.exists() {
            return Err(anyhow!("manifest references missing file {}", file_path.display()));
        }

        let (actual_sha256, actual_records) = ndjson_digest_and_records(&file_path)?;
        if actual_sha256 != expected.sha256 {
            return Err(anyhow!(
                "manifest digest mismatch for {required}: expected {}, got {}",
                expected.sha256,
                actual_sha256
            ));
        }
        if actual_records != expected.records {
            return Err(anyhow!(
                "manifest record count mismatch for {required}: expected {}, got {}",
                expected.records,
                actual_records
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::thread;

    use super::*;
    use resolution_assembly_core::{
        parse_date, Article, ArticleAncestry, ArticleContainer, ArticleCoordinate, ArticleParent, ArticleTarget,
        ChangeContext, ChangeKind, ChangeType, ContentBlock, EntityAncestry, EntityId, ResolutionTarget,
    };
    use ulid::Ulid;

    fn key(initial: &str, number: u32, year: i32) -> ResolutionKey {
        ResolutionKey::new(initial, number, year)
    }

    fn resolution(id: u128, key: ResolutionKey, date: &str, articles: &[(u128, u32)]) -> Result<Resolution> {
        Ok(Resolution {
            id: EntityId(Ulid(id)),
            key,
            date: parse_date(date)?,
            summary: String::new(),
            recitals: Vec::new(),
            considerations: Vec::new(),
            articles: articles
                .iter()
                .map(|(id, number)| Article {
                    id: EntityId(Ulid(*id)),
                    number: Some(*number),
                    suffix: 0,
                    content: vec![ContentBlock::text(format!("Article {number} original text"))],
                })
                .collect(),
            annexes: Vec::new(),
        })
    }

    fn article_reference(resolution: &ResolutionKey, number: u32) -> RawReference {
        let target = ArticleTarget {
            coordinate: ArticleCoordinate {
                container: ArticleContainer::Resolution(resolution.clone()),
                number,
                suffix: 0,
            },
            entity: None,
        };
        RawReference::from(&target.reference())
    }

    fn repeal(id: u128, date: &str, issuer: &ResolutionKey, origin: u128, target: RawReference) -> Result<RawChange> {
        Ok(RawChange {
            id: ChangeId(Ulid(id)),
            change_type: "REPEAL".to_string(),
            context: ChangeContext { date: parse_date(date)?, issuer: issuer.clone() },
            origin_article: Some(EntityId(Ulid(origin))),
            origin: None,
            target: Some(target),
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

    fn modify(id: u128, date: &str, issuer: &ResolutionKey, origin: u128, target: RawReference) -> Result<RawChange> {
        let mut raw = repeal(id, date, issuer, origin, target)?;
        raw.change_type = "MODIFY_ARTICLE".to_string();
        raw.before = Some(vec![ContentBlock::text("original")]);
        raw.after = Some(vec![ContentBlock::text("amended")]);
        Ok(raw)
    }

    /// CSU-5/2013 amends CSU-1/2012, CSU-9/2014 repeals the amending article, and CD-2/2015
    /// repeals a resolution outside the corpus.
    fn seeded_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        store.insert_resolution(&resolution(1, key("CSU", 1, 2012), "2012-03-01", &[(11, 1), (12, 2)])?)?;
        store.insert_resolution(&resolution(2, key("CSU", 5, 2013), "2013-01-01", &[(21, 1)])?)?;
        store.insert_resolution(&resolution(3, key("CSU", 9, 2014), "2014-01-01", &[(31, 1)])?)?;
        store.insert_resolution(&resolution(4, key("CD", 2, 2015), "2015-01-01", &[(41, 1)])?)?;

        store.insert_change(&modify(
            101,
            "2013-01-01",
            &key("CSU", 5, 2013),
            21,
            article_reference(&key("CSU", 1, 2012), 1),
        )?)?;
        store.insert_change(&repeal(
            102,
            "2014-01-01",
            &key("CSU", 9, 2014),
            31,
            article_reference(&key("CSU", 5, 2013), 1),
        )?)?;
        let elsewhere = ResolutionTarget { key: key("CD", 7, 2015), entity: None };
        store.insert_change(&repeal(
            103,
            "2015-01-01",
            &key("CD", 2, 2015),
            41,
            RawReference::from(&elsewhere.reference()),
        )?)?;

        Ok(store)
    }

    fn ids(records: &[ChangeRecord]) -> BTreeSet<u128> {
        records.iter().map(|record| record.id.0 .0).collect()
    }

    // Test IDs: TDB-001
    #[test]
    fn migrate_brings_a_fresh_database_to_the_latest_schema() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        let before = store.schema_status()?;
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1]);

        store.migrate()?;
        store.migrate()?;
        let after = store.schema_status()?;
        assert_eq!(after.current_version, LATEST_SCHEMA_VERSION);
        assert!(after.pending_versions.is_empty());
        Ok(())
    }

    // Test IDs: TDB-002
    #[test]
    fn schema_checks_and_ingestion_reject_malformed_changes() -> Result<()> {
        let mut store = seeded_store()?;

        let check_result = store.conn.execute(
            "INSERT INTO changes(
                change_id, change_type, effective_on, issuer_initial, issuer_number, issuer_year,
                target_initial, target_number, target_year, change_json
            ) VALUES ('x', 'RENUMBER', '2014-01-01', 'CSU', 1, 2014, 'CSU', 1, 2012, '{}')",
            [],
        );
        assert!(check_result.is_err());

        let mut stray = repeal(201, "2014-06-01", &key("CSU", 9, 2014), 31, article_reference(&key("CSU", 1, 2012), 2))?;
        stray.description = Some("stray payload".to_string());
        let Err(err) = store.insert_change(&stray) else {
            return Err(anyhow!("expected ingestion failure for an extraneous payload"));
        };
        assert!(format!("{err:#}").contains("extraneous `description` payload"));

        let orphan = repeal(202, "2014-06-01", &key("CSU", 77, 2014), 1, article_reference(&key("CSU", 1, 2012), 2))?;
        let Err(err) = store.insert_change(&orphan) else {
            return Err(anyhow!("expected failure for an unknown issuing resolution"));
        };
        assert!(format!("{err:#}").contains("which is not stored"));

        assert_eq!(store.list_raw_changes()?.len(), 3);
        Ok(())
    }

    // Test IDs: TDB-003
    #[test]
    fn loaded_changes_carry_native_ancestry_for_origin_and_target() -> Result<()> {
        let store = seeded_store()?;
        let candidates = store.candidate_changes(&key("CSU", 1, 2012))?;
        let Some(amendment) = candidates.iter().find(|record| record.id == ChangeId(Ulid(101))) else {
            return Err(anyhow!("amendment should be a candidate"));
        };

        assert_eq!(amendment.origin.id, EntityId(Ulid(21)));
        assert!(
            matches!(&amendment.origin.parent, ArticleParent::Resolution(parent) if parent.key == key("CSU", 5, 2013))
        );
        let ChangeKind::ModifyArticle { target, .. } = &amendment.kind else {
            return Err(anyhow!("expected a modification, got {:?}", amendment.kind));
        };
        assert_eq!(target.entity.as_ref().map(|entity| entity.id), Some(EntityId(Ulid(11))));
        Ok(())
    }

    // Test IDs: TDB-004
    #[test]
    fn explicit_virtual_targets_are_kept_and_missing_targets_stay_bare() -> Result<()> {
        let mut store = seeded_store()?;
        let virtual_article = ArticleAncestry {
            id: EntityId(Ulid(900)),
            number: Some(3),
            suffix: 0,
            parent: ArticleParent::AddedBy(ChangeId(Ulid(555))),
        };
        let target = ArticleTarget {
            coordinate: ArticleCoordinate {
                container: ArticleContainer::Resolution(key("CSU", 1, 2012)),
                number: 3,
                suffix: 0,
            },
            entity: Some(virtual_article.clone()),
        };
        store.insert_change(&repeal(301, "2014-06-01", &key("CSU", 9, 2014), 31, RawReference::from(&target.reference()))?)?;

        let candidates = store.candidate_changes(&key("CSU", 1, 2012))?;
        let Some(record) = candidates.iter().find(|record| record.id == ChangeId(Ulid(301))) else {
            return Err(anyhow!("repeal should be a candidate"));
        };
        assert_eq!(record.kind.target().entity(), Some(EntityAncestry::Article(virtual_article)));

        let outside = store.candidate_changes(&key("CD", 7, 2015))?;
        assert_eq!(outside.len(), 1);
        assert_eq!(outside[0].kind.target().entity(), None);
        Ok(())
    }

    // Test IDs: TDB-005
    #[test]
    fn candidate_closure_follows_issuers_transitively_and_terminates_on_cycles() -> Result<()> {
        let mut store = seeded_store()?;
        assert_eq!(ids(&store.candidate_changes(&key("CSU", 1, 2012))?), BTreeSet::from([101, 102]));
        assert_eq!(ids(&store.candidate_changes(&key("CSU", 5, 2013))?), BTreeSet::from([102]));
        assert!(store.candidate_changes(&key("CSU", 9, 2014))?.is_empty());

        store.insert_change(&repeal(
            104,
            "2016-01-01",
            &key("CSU", 1, 2012),
            12,
            article_reference(&key("CSU", 9, 2014), 1),
        )?)?;
        assert_eq!(ids(&store.candidate_changes(&key("CSU", 1, 2012))?), BTreeSet::from([101, 102, 104]));
        assert_eq!(ids(&store.candidate_changes(&key("CSU", 9, 2014))?), BTreeSet::from([101, 102, 104]));
        Ok(())
    }

    // Test IDs: TDB-006
    #[test]
    fn affected_resolutions_name_the_direct_target_only() -> Result<()> {
        let store = seeded_store()?;
        assert_eq!(store.affected_resolutions(ChangeId(Ulid(102)))?, vec![key("CSU", 5, 2013)]);
        assert_eq!(store.affected_resolutions(ChangeId(Ulid(103)))?, vec![key("CD", 7, 2015)]);
        assert!(store.affected_resolutions(ChangeId(Ulid(999))).is_err());
        Ok(())
    }

    // Test IDs: TDB-007
    #[test]
    fn export_and_import_snapshot_round_trip() -> Result<()> {
        let source = seeded_store()?;
        let export_dir = std::env::temp_dir().join(format!("resolution-export-{}", Ulid::new()));
        let manifest = source.export_snapshot(&export_dir)?;
        assert_eq!(manifest.files.len(), 2);
        assert!(export_dir.join(RESOLUTIONS_FILE).exists());
        assert!(export_dir.join(CHANGES_FILE).exists());
        assert!(export_dir.join("manifest.json").exists());

        let mut target = SqliteStore::open(Path::new(":memory:"))?;
        let summary = target.import_snapshot(&export_dir, true)?;
        assert_eq!(summary.imported_resolutions, 4);
        assert_eq!(summary.imported_changes, 3);
        assert_eq!(target.list_raw_changes()?, source.list_raw_changes()?);
        assert_eq!(
            target.candidate_changes(&key("CSU", 1, 2012))?,
            source.candidate_changes(&key("CSU", 1, 2012))?
        );

        let again = target.import_snapshot(&export_dir, true)?;
        assert_eq!(again.skipped_existing_resolutions, 4);
        assert_eq!(again.skipped_existing_changes, 3);
        assert!(target.import_snapshot(&export_dir, false).is_err());

        fs::remove_dir_all(&export_dir)
            .with_context(|| format!("failed to cleanup temp export dir {}", export_dir.display()))?;
        Ok(())
    }

    // Test IDs: TDB-008
    #[test]
    fn import_rejects_manifest_digest_mismatch() -> Result<()> {
        use std::io::Write as _;

        let source = seeded_store()?;
        let export_dir = std::env::temp_dir().join(format!("resolution-export-{}", Ulid::new()));
        source.export_snapshot(&export_dir)?;

        let changes_path = export_dir.join(CHANGES_FILE);
        let mut tampered = std::fs::OpenOptions::new().append(true).open(&changes_path)?;
        writeln!(tampered, "{{\"tampered\":true}}")?;

        let mut target = SqliteStore::open(Path::new(":memory:"))?;
        let Err(err) = target.import_snapshot(&export_dir, true) else {
            return Err(anyhow!("expected import failure for mismatched manifest digest"));
        };
        assert!(err.to_string().contains("manifest digest mismatch for changes.ndjson"));
        assert!(target.list_resolutions()?.is_empty());

        fs::remove_dir_all(&export_dir)
            .with_context(|| format!("failed to cleanup temp export dir {}", export_dir.display()))?;
        Ok(())
    }

    // Test IDs: TCONC-001
    #[test]
    fn concurrent_readers_see_the_same_candidates() -> Result<()> {
        let db_path = std::env::temp_dir().join(format!("resolution-concurrency-{}.sqlite3", Ulid::new()));
        {
            let source = seeded_store()?;
            let export_dir = std::env::temp_dir().join(format!("resolution-export-{}", Ulid::new()));
            source.export_snapshot(&export_dir)?;
            let mut init = SqliteStore::open(&db_path)?;
            init.import_snapshot(&export_dir, false)?;
            fs::remove_dir_all(&export_dir)
                .with_context(|| format!("failed to cleanup temp export dir {}", export_dir.display()))?;
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let reader_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<BTreeSet<u128>> {
                let store = SqliteStore::open(&reader_path)?;
                let mut seen = BTreeSet::new();
                for _ in 0..20 {
                    seen = ids(&store.candidate_changes(&key("CSU", 1, 2012))?);
                }
                Ok(seen)
            }));
        }

        for handle in handles {
            let Ok(thread_result) = handle.join() else {
                return Err(anyhow!("reader thread panicked"));
            };
            assert_eq!(thread_result?, BTreeSet::from([101, 102]));
        }

        for suffix in ["", "-wal", "-shm"] {
            let path = if suffix.is_empty() {
                db_path.clone()
            } else {
                std::path::PathBuf::from(format!("{}{}", db_path.display(), suffix))
            };
            if path.exists() {
                fs::remove_file(&path).with_context(|| format!("failed to cleanup sqlite file {}", path.display()))?;
            }
        }
        Ok(())
    }

    #[test]
    fn schema_accepts_every_change_type() {
        let all = [
            ChangeType::ModifyArticle,
            ChangeType::ReplaceArticle,
            ChangeType::Repeal,
            ChangeType::RatifyAdReferendum,
            ChangeType::ReplaceAnnex,
            ChangeType::AddAnnexToResolution,
            ChangeType::AddAnnexToAnnex,
            ChangeType::ModifyTextAnnex,
            ChangeType::AddArticleToResolution,
            ChangeType::AddArticleToAnnex,
            ChangeType::AddArticleToChapter,
            ChangeType::ApplyModificationsAnnex,
            ChangeType::Advanced,
        ];
        for change_type in all {
            assert!(MIGRATION_001_SQL.contains(&format!("'{}'", change_type.as_str())));
        }
    }
}
