//! Migration engine: load, backup, four record passes, slim rewrite.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::document::StateDocument;
use crate::error::{MigrateError, Result};
use crate::record;
use crate::slim::SlimDocument;
use crate::stats::MigrationStats;
use crate::store::StateStore;

/// Options for one migration run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Execute every classification step but write nothing durable.
    pub dry_run: bool,
    /// Copy the snapshot aside before mutating anything.
    pub backup: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup: true,
        }
    }
}

/// Drives a full migration of one project's snapshot into a store.
pub struct Migrator {
    config: Config,
    store: Box<dyn StateStore>,
}

impl Migrator {
    /// Create an engine writing through the given store adapter.
    pub fn new(config: Config, store: Box<dyn StateStore>) -> Self {
        Self { config, store }
    }

    /// Run the migration and return its statistics.
    ///
    /// An absent snapshot is a no-op, not an error: the project simply has
    /// nothing to migrate yet. Backup or rewrite failures abort the run;
    /// individual bad records never do.
    pub fn run(&mut self, opts: &RunOptions) -> Result<MigrationStats> {
        let state_file = self.config.state_file.clone();

        if !state_file.exists() {
            warn!("State document not found: {}", state_file.display());
            return Ok(MigrationStats::default());
        }

        let doc = StateDocument::load(&state_file)?;
        if let Ok(meta) = fs::metadata(&state_file) {
            info!(
                "Loaded {} ({:.1} KB)",
                state_file.display(),
                meta.len() as f64 / 1024.0
            );
        }

        if opts.backup && !opts.dry_run {
            let backup_path = self.write_backup(&state_file)?;
            info!("Backed up snapshot to {}", backup_path.display());
        }

        let mut stats = MigrationStats::default();
        stats.merge(self.migrate_entities(&doc, opts.dry_run));
        stats.merge(self.migrate_aliases(&doc, opts.dry_run));
        stats.merge(self.migrate_state_changes(&doc, opts.dry_run));
        stats.merge(self.migrate_relationships(&doc, opts.dry_run));

        if !opts.dry_run {
            self.rewrite_slim(&doc, &state_file)?;
        }

        info!(
            "Migration finished: {} entities, {} aliases, {} state changes, \
             {} relationships, {} skipped, {} errors",
            stats.entities,
            stats.aliases,
            stats.state_changes,
            stats.relationships,
            stats.skipped,
            stats.errors
        );
        if opts.dry_run {
            info!("Dry run: no data was written");
        }

        Ok(stats)
    }

    /// Pass 1: entity collections keyed by type.
    fn migrate_entities(&mut self, doc: &StateDocument, dry_run: bool) -> MigrationStats {
        let mut stats = MigrationStats::default();
        info!("Migrating entities...");

        if let Some(collections) = doc.entities() {
            for (entity_type, collection) in collections {
                let records = match collection.as_object() {
                    Some(records) => records,
                    // A collection that is not a mapping carries no records.
                    None => continue,
                };
                for (id, raw) in records {
                    match record::parse_entity(entity_type, id, raw) {
                        Ok(entity) => {
                            if !dry_run {
                                if let Err(e) = self.store.upsert_entity(&entity) {
                                    stats.errors += 1;
                                    warn!("Entity {}/{} failed: {}", entity_type, id, e);
                                    continue;
                                }
                            }
                            stats.entities += 1;
                            if stats.entities % 50 == 0 {
                                info!("  migrated {} entities...", stats.entities);
                            }
                        }
                        Err(rejection) => {
                            stats.skipped += 1;
                            debug!("Entity {}/{} skipped: {:?}", entity_type, id, rejection);
                        }
                    }
                }
            }
        }

        info!("  entities: {}", stats.entities);
        stats
    }

    /// Pass 2: the alias index.
    fn migrate_aliases(&mut self, doc: &StateDocument, dry_run: bool) -> MigrationStats {
        let mut stats = MigrationStats::default();
        info!("Migrating aliases...");

        if let Some(index) = doc.alias_index() {
            for (alias, referents) in index {
                let referents = match referents.as_array() {
                    Some(referents) => referents,
                    None => continue,
                };
                for raw in referents {
                    match record::parse_alias(alias, raw) {
                        Ok(entry) => {
                            if !dry_run {
                                if let Err(e) = self.store.register_alias(&entry) {
                                    stats.errors += 1;
                                    warn!("Alias {:?} failed: {}", alias, e);
                                    continue;
                                }
                            }
                            stats.aliases += 1;
                        }
                        Err(rejection) => {
                            stats.skipped += 1;
                            debug!("Alias {:?} skipped: {:?}", alias, rejection);
                        }
                    }
                }
            }
        }

        info!("  aliases: {}", stats.aliases);
        stats
    }

    /// Pass 3: the audited state-change list.
    fn migrate_state_changes(&mut self, doc: &StateDocument, dry_run: bool) -> MigrationStats {
        let mut stats = MigrationStats::default();
        info!("Migrating state changes...");

        if let Some(changes) = doc.state_changes() {
            for raw in changes {
                match record::parse_state_change(raw) {
                    Ok(change) => {
                        if !dry_run {
                            if let Err(e) = self.store.record_state_change(&change) {
                                stats.errors += 1;
                                warn!("State change for {:?} failed: {}", change.entity_id, e);
                                continue;
                            }
                        }
                        stats.state_changes += 1;
                    }
                    Err(rejection) => {
                        stats.skipped += 1;
                        debug!("State change skipped: {:?}", rejection);
                    }
                }
            }
        }

        info!("  state changes: {}", stats.state_changes);
        stats
    }

    /// Pass 4: the structured relationship list.
    fn migrate_relationships(&mut self, doc: &StateDocument, dry_run: bool) -> MigrationStats {
        let mut stats = MigrationStats::default();
        info!("Migrating relationships...");

        if let Some(relationships) = doc.relationships() {
            for raw in relationships {
                match record::parse_relationship(raw) {
                    Ok(rel) => {
                        if !dry_run {
                            if let Err(e) = self.store.upsert_relationship(&rel) {
                                stats.errors += 1;
                                warn!(
                                    "Relationship {} -> {} failed: {}",
                                    rel.from_entity, rel.to_entity, e
                                );
                                continue;
                            }
                        }
                        stats.relationships += 1;
                    }
                    Err(rejection) => {
                        stats.skipped += 1;
                        debug!("Relationship skipped: {:?}", rejection);
                    }
                }
            }
        }

        info!("  relationships: {}", stats.relationships);
        stats
    }

    /// Copy the snapshot to a timestamp-suffixed sibling path.
    fn write_backup(&self, state_file: &Path) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let backup_path = state_file.with_extension(format!("json.backup-{}", stamp));
        fs::copy(state_file, &backup_path).map_err(|source| MigrateError::Backup {
            path: backup_path.clone(),
            source,
        })?;
        Ok(backup_path)
    }

    /// Replace the snapshot with its slim residual document.
    fn rewrite_slim(&self, doc: &StateDocument, state_file: &Path) -> Result<()> {
        let slim = SlimDocument::from_state(doc, Utc::now().to_rfc3339());
        let content = serde_json::to_string_pretty(&slim)?;

        // Write a sibling temp file, then rename over the original, so a
        // crash mid-write never leaves a truncated snapshot.
        let temp_path = state_file.with_extension("json.tmp");
        fs::write(&temp_path, &content).map_err(|source| MigrateError::Rewrite {
            path: state_file.to_path_buf(),
            source,
        })?;
        fs::rename(&temp_path, state_file).map_err(|source| MigrateError::Rewrite {
            path: state_file.to_path_buf(),
            source,
        })?;

        info!(
            "Slimmed {} to {:.1} KB",
            state_file.display(),
            content.len() as f64 / 1024.0
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AliasEntry, EntityRecord, RelationshipRecord, StateChangeRecord};
    use crate::store::{NoopStore, SqliteStore};
    use serde_json::{json, Value};

    fn fixture() -> Value {
        json!({
            "project_info": {"title": "Battle Through the Heavens"},
            "entities_v3": {
                "character": {
                    "xiao_yan": {
                        "canonical_name": "Xiao Yan",
                        "tier": "protagonist",
                        "current": {"realm": "Dou Zhe"},
                        "first_appearance": 1,
                        "last_appearance": 120,
                        "is_protagonist": true,
                    }
                }
            },
            "alias_index": {
                "Yan Er": [{"id": "xiao_yan", "type": "character"}]
            },
            "state_changes": [],
            "structured_relationships": [],
        })
    }

    fn write_snapshot(dir: &Path, doc: &Value) {
        fs::write(
            dir.join("state.json"),
            serde_json::to_string_pretty(doc).unwrap(),
        )
        .unwrap();
    }

    fn run_sqlite(dir: &Path, doc: &Value, opts: &RunOptions) -> MigrationStats {
        write_snapshot(dir, doc);
        let config = Config::from_project_root(dir);
        let store = SqliteStore::open(&config.index_db).unwrap();
        let mut migrator = Migrator::new(config, Box::new(store));
        migrator.run(opts).unwrap()
    }

    fn no_backup() -> RunOptions {
        RunOptions {
            dry_run: false,
            backup: false,
        }
    }

    fn read_snapshot(dir: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(dir.join("state.json")).unwrap()).unwrap()
    }

    #[test]
    fn test_worked_example_counts_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let stats = run_sqlite(dir.path(), &fixture(), &RunOptions::default());

        assert_eq!(
            stats,
            MigrationStats {
                entities: 1,
                aliases: 1,
                ..Default::default()
            }
        );

        let store = SqliteStore::open(dir.path().join("index.db")).unwrap();
        let xiao_yan = store.get_entity("xiao_yan", "character").unwrap().unwrap();
        assert_eq!(xiao_yan.name, "Xiao Yan");
        assert_eq!(xiao_yan.tier, "protagonist");
        assert!(xiao_yan.is_protagonist);
        assert_eq!(xiao_yan.current["realm"], json!("Dou Zhe"));

        let aliases = store.aliases_for("xiao_yan", "character").unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].alias, "Yan Er");
    }

    #[test]
    fn test_missing_snapshot_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_project_root(dir.path());
        let mut migrator = Migrator::new(config, Box::new(NoopStore::new()));

        let stats = migrator.run(&RunOptions::default()).unwrap();
        assert_eq!(stats, MigrationStats::default());
        assert!(!dir.path().join("state.json").exists());
    }

    #[test]
    fn test_non_object_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("state.json"), "[1, 2, 3]").unwrap();
        let config = Config::from_project_root(dir.path());
        let mut migrator = Migrator::new(config, Box::new(NoopStore::new()));

        let err = migrator.run(&RunOptions::default()).unwrap_err();
        assert!(matches!(err, MigrateError::Document { .. }));
    }

    #[test]
    fn test_malformed_records_skip_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({
            "entities_v3": {
                "character": {
                    "xiao_yan": {"canonical_name": "Xiao Yan"},
                    "broken": "not a mapping",
                }
            },
            "alias_index": {
                "Yan Er": [
                    {"id": "xiao_yan", "type": "character"},
                    "dangling",
                ]
            },
            "state_changes": [{"field": "realm"}],
            "structured_relationships": [{"from": "xiao_yan"}],
        });

        let stats = run_sqlite(dir.path(), &doc, &no_backup());
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.aliases, 1);
        assert_eq!(stats.state_changes, 0);
        assert_eq!(stats.relationships, 0);
        assert_eq!(stats.skipped, 4);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn test_sections_of_wrong_shape_migrate_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({
            "entities_v3": "broken",
            "alias_index": ["broken"],
            "state_changes": {"broken": true},
            "structured_relationships": 42,
        });

        let stats = run_sqlite(dir.path(), &doc, &no_backup());
        assert_eq!(stats, MigrationStats::default());

        // The rewrite still happens; the run is not aborted.
        let rewritten = read_snapshot(dir.path());
        assert_eq!(rewritten["_migrated_to_sqlite"], json!(true));
    }

    #[test]
    fn test_dry_run_counts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), &fixture());
        let before = fs::read_to_string(dir.path().join("state.json")).unwrap();

        let config = Config::from_project_root(dir.path());
        let mut migrator = Migrator::new(config, Box::new(NoopStore::new()));
        let stats = migrator
            .run(&RunOptions {
                dry_run: true,
                backup: true,
            })
            .unwrap();

        assert_eq!(stats.entities, 1);
        assert_eq!(stats.aliases, 1);

        // Snapshot untouched, no database, no backup.
        assert_eq!(
            fs::read_to_string(dir.path().join("state.json")).unwrap(),
            before
        );
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json"]);
    }

    #[test]
    fn test_dry_run_stats_match_real_run() {
        let dry_dir = tempfile::tempdir().unwrap();
        write_snapshot(dry_dir.path(), &fixture());
        let config = Config::from_project_root(dry_dir.path());
        let mut migrator = Migrator::new(config, Box::new(NoopStore::new()));
        let dry_stats = migrator
            .run(&RunOptions {
                dry_run: true,
                backup: false,
            })
            .unwrap();

        let real_dir = tempfile::tempdir().unwrap();
        let real_stats = run_sqlite(real_dir.path(), &fixture(), &no_backup());

        assert_eq!(dry_stats, real_stats);
    }

    #[test]
    fn test_rerun_updates_rather_than_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let first = run_sqlite(dir.path(), &fixture(), &no_backup());

        let mut updated = fixture();
        updated["entities_v3"]["character"]["xiao_yan"]["current"]["realm"] =
            json!("Dou Huang");
        updated["entities_v3"]["character"]["xiao_yan"]["last_appearance"] = json!(300);
        let second = run_sqlite(dir.path(), &updated, &no_backup());

        assert_eq!(first, second);

        let store = SqliteStore::open(dir.path().join("index.db")).unwrap();
        assert_eq!(store.entity_count().unwrap(), 1);
        assert_eq!(store.alias_count().unwrap(), 1);
        let xiao_yan = store.get_entity("xiao_yan", "character").unwrap().unwrap();
        assert_eq!(xiao_yan.current["realm"], json!("Dou Huang"));
        assert_eq!(xiao_yan.last_appearance, 300);
    }

    #[test]
    fn test_legacy_key_snapshots_migrate_identically() {
        let modern = json!({
            "state_changes": [{
                "entity_id": "xiao_yan",
                "field": "realm",
                "old": "Dou Zhe",
                "new": "Dou Shi",
                "reason": "breakthrough",
                "chapter": 42,
            }],
            "structured_relationships": [{
                "from": "xiao_yan",
                "to": "yao_lao",
                "type": "master_disciple",
            }],
        });
        let legacy = json!({
            "state_changes": [{
                "entity_id": "xiao_yan",
                "field": "realm",
                "old_value": "Dou Zhe",
                "new_value": "Dou Shi",
                "reason": "breakthrough",
                "chapter": 42,
            }],
            "structured_relationships": [{
                "from_entity": "xiao_yan",
                "to_entity": "yao_lao",
                "type": "master_disciple",
            }],
        });

        let modern_dir = tempfile::tempdir().unwrap();
        let legacy_dir = tempfile::tempdir().unwrap();
        let modern_stats = run_sqlite(modern_dir.path(), &modern, &no_backup());
        let legacy_stats = run_sqlite(legacy_dir.path(), &legacy, &no_backup());
        assert_eq!(modern_stats, legacy_stats);

        let modern_store = SqliteStore::open(modern_dir.path().join("index.db")).unwrap();
        let legacy_store = SqliteStore::open(legacy_dir.path().join("index.db")).unwrap();
        assert_eq!(
            modern_store.changes_for("xiao_yan").unwrap(),
            legacy_store.changes_for("xiao_yan").unwrap()
        );
        assert_eq!(
            modern_store.get_relationship("xiao_yan", "yao_lao").unwrap(),
            legacy_store.get_relationship("xiao_yan", "yao_lao").unwrap()
        );
    }

    #[test]
    fn test_slim_rewrite_bounds_residual_document() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({
            "project_info": {"title": "Battle Through the Heavens"},
            "entities_v3": {"character": {"xiao_yan": {}}},
            "world_settings": {
                "power_system": (0..25).map(|i| json!({"name": format!("tier_{i}")})).collect::<Vec<_>>(),
                "factions": (0..35).map(|i| json!({"name": format!("faction_{i}"), "type": "sect", "members": 99})).collect::<Vec<_>>(),
                "locations": (0..60).map(|i| json!(format!("loc_{i}"))).collect::<Vec<_>>(),
            },
            "review_checkpoints": (0..12).map(|i| json!(i)).collect::<Vec<_>>(),
            "disambiguation_warnings": (0..25).map(|i| json!(i)).collect::<Vec<_>>(),
            "disambiguation_pending": (0..12).map(|i| json!(i)).collect::<Vec<_>>(),
        });

        run_sqlite(dir.path(), &doc, &no_backup());

        let rewritten = read_snapshot(dir.path());
        assert_eq!(rewritten["_migrated_to_sqlite"], json!(true));
        assert!(rewritten["_migration_timestamp"]
            .as_str()
            .unwrap()
            .contains('T'));

        assert!(rewritten.get("entities_v3").is_none());
        assert_eq!(rewritten["project_info"]["title"], "Battle Through the Heavens");

        let ws = &rewritten["world_settings"];
        assert_eq!(ws["power_system"].as_array().unwrap().len(), 20);
        assert_eq!(ws["power_system"][0], json!("tier_0"));
        assert_eq!(ws["factions"].as_array().unwrap().len(), 30);
        assert_eq!(ws["factions"][0], json!({"name": "faction_0", "type": "sect"}));
        assert_eq!(ws["locations"].as_array().unwrap().len(), 50);

        assert_eq!(rewritten["review_checkpoints"].as_array().unwrap().len(), 10);
        assert_eq!(rewritten["review_checkpoints"][0], json!(2));
        assert_eq!(
            rewritten["disambiguation_warnings"].as_array().unwrap().len(),
            20
        );
        assert_eq!(rewritten["disambiguation_warnings"][0], json!(5));
        assert_eq!(
            rewritten["disambiguation_pending"].as_array().unwrap().len(),
            10
        );
    }

    #[test]
    fn test_backup_preserves_original_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        run_sqlite(dir.path(), &fixture(), &RunOptions::default());

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with("state.json.backup-"))
                    .unwrap_or(false)
            })
            .collect();
        assert_eq!(backups.len(), 1);

        // The backup holds the pre-migration document, not the slim rewrite.
        let backed_up: Value =
            serde_json::from_str(&fs::read_to_string(&backups[0]).unwrap()).unwrap();
        assert_eq!(backed_up, fixture());

        let rewritten = read_snapshot(dir.path());
        assert_eq!(rewritten["_migrated_to_sqlite"], json!(true));
    }

    #[test]
    fn test_backup_failure_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        // A snapshot name short enough to create, but long enough that the
        // backup suffix pushes the copy past the filesystem's name limit,
        // so the copy itself fails while the snapshot stays readable.
        let name = format!("{}.json", "a".repeat(240));
        let state_file = dir.path().join(&name);
        fs::write(
            &state_file,
            serde_json::to_string_pretty(&fixture()).unwrap(),
        )
        .unwrap();

        let mut config = Config::from_project_root(dir.path());
        config.state_file = state_file.clone();
        let mut migrator = Migrator::new(config, Box::new(NoopStore::new()));

        let err = migrator.run(&RunOptions::default()).unwrap_err();
        assert!(matches!(err, MigrateError::Backup { .. }));
        assert_eq!(err.exit_code(), 3);

        // The run aborted before any write: no backup, no rewrite.
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![name]);
        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(&state_file).unwrap()).unwrap();
        assert_eq!(on_disk, fixture());
    }

    #[test]
    fn test_no_backup_skips_the_copy() {
        let dir = tempfile::tempdir().unwrap();
        run_sqlite(dir.path(), &fixture(), &no_backup());

        let has_backup = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .any(|name| name.starts_with("state.json.backup-"));
        assert!(!has_backup);
    }

    /// Store double that rejects one specific entity id.
    struct FailingStore {
        deny: &'static str,
    }

    impl StateStore for FailingStore {
        fn upsert_entity(&mut self, entity: &EntityRecord) -> crate::error::Result<()> {
            if entity.id == self.deny {
                return Err(MigrateError::Config("injected store failure".to_string()));
            }
            Ok(())
        }

        fn register_alias(&mut self, _entry: &AliasEntry) -> crate::error::Result<()> {
            Ok(())
        }

        fn record_state_change(
            &mut self,
            _change: &StateChangeRecord,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        fn upsert_relationship(
            &mut self,
            _rel: &RelationshipRecord,
        ) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_store_failures_count_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({
            "entities_v3": {
                "character": {
                    "xiao_yan": {"canonical_name": "Xiao Yan"},
                    "yao_lao": {"canonical_name": "Yao Lao"},
                }
            },
            "alias_index": {
                "Yan Er": [{"id": "xiao_yan", "type": "character"}]
            },
        });
        write_snapshot(dir.path(), &doc);

        let config = Config::from_project_root(dir.path());
        let mut migrator = Migrator::new(config, Box::new(FailingStore { deny: "yao_lao" }));
        let stats = migrator.run(&no_backup()).unwrap();

        assert_eq!(stats.entities, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.aliases, 1);
        assert_eq!(stats.skipped, 0);

        // The run carried on through the failure, including the rewrite.
        let rewritten = read_snapshot(dir.path());
        assert_eq!(rewritten["_migrated_to_sqlite"], json!(true));
    }
}
