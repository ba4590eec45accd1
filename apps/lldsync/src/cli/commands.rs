//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::{Backend, Settings};
use crate::rows::parse_rows;
use lldsync_core::formats::persistence::MAX_SNAPSHOT_SIZE;
use lldsync_core::{
    Catalog, CycleRequest, CycleStats, DiscoveryConfig, ErrorReport, HostId, Lifetime, LldError,
    LldMacros, MemoryStore, Reconciler, RedbStore, Row, RuleId, catalog_from_bytes,
    catalog_to_bytes,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a row file (100 MB).
const MAX_ROWS_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum size of a discovery configuration file (50 MB).
const MAX_SEED_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), LldError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| LldError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(LldError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve symlinks and `..`, and require an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, LldError> {
    let canonical = path.canonicalize().map_err(|e| {
        LldError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(LldError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Read an input file after path and size validation.
pub fn read_input(path: &Path, max_size: u64) -> Result<Vec<u8>, LldError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read(&validated).map_err(|e| LldError::IoError(format!("Read file: {}", e)))
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// STORE HANDLE
// =============================================================================

/// An opened store of either backend.
pub enum StoreHandle {
    /// Snapshot file loaded into memory; written back by `save`.
    File { path: PathBuf, store: MemoryStore },
    Redb(RedbStore),
}

impl StoreHandle {
    /// Open the configured store, creating an empty one if absent.
    pub fn open(settings: &Settings) -> Result<Self, LldError> {
        match settings.backend {
            Backend::Redb => Ok(Self::Redb(RedbStore::open(&settings.database)?)),
            Backend::File => {
                let catalog = if settings.database.exists() {
                    let data = read_input(&settings.database, MAX_SNAPSHOT_SIZE as u64)?;
                    catalog_from_bytes(&data)?
                } else {
                    Catalog::new()
                };
                Ok(Self::File {
                    path: settings.database.clone(),
                    store: MemoryStore::from_catalog(catalog),
                })
            }
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        match self {
            Self::File { store, .. } => store.catalog(),
            Self::Redb(store) => store.catalog(),
        }
    }

    pub fn apply_config(&mut self, config: &DiscoveryConfig) -> Result<(), LldError> {
        match self {
            Self::File { store, .. } => store.apply_config(config),
            Self::Redb(store) => store.apply_config(config),
        }
    }

    pub fn set_rule_error(&mut self, rule: RuleId, error: &str) -> Result<(), LldError> {
        match self {
            Self::File { store, .. } => store.set_rule_error(rule, error),
            Self::Redb(store) => store.set_rule_error(rule, error),
        }
    }

    pub fn run_cycle(
        &mut self,
        request: &CycleRequest,
        rows: &mut [Row],
        report: &mut ErrorReport,
    ) -> Result<CycleStats, LldError> {
        match self {
            Self::File { store, .. } => Reconciler::run(store, &LldMacros, request, rows, report),
            Self::Redb(store) => Reconciler::run(store, &LldMacros, request, rows, report),
        }
    }

    /// Write the snapshot back. Redb commits per write and needs nothing.
    pub fn save(&self) -> Result<(), LldError> {
        match self {
            Self::File { path, store } => {
                let data = catalog_to_bytes(store.catalog())?;
                std::fs::write(path, &data)
                    .map_err(|e| LldError::IoError(format!("Write store: {}", e)))
            }
            Self::Redb(_) => Ok(()),
        }
    }
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create an empty store.
pub fn cmd_init(settings: &Settings, force: bool) -> Result<(), LldError> {
    let path = &settings.database;
    if path.exists() {
        if !force {
            return Err(LldError::IoError(
                "Store already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path)
            .map_err(|e| LldError::IoError(format!("Remove store: {}", e)))?;
    }

    StoreHandle::open(settings)?.save()?;
    tracing::info!(path = %path.display(), backend = settings.backend.name(), "store initialized");
    println!(
        "Initialized new {} store at {:?}",
        settings.backend.name(),
        path
    );
    Ok(())
}

// =============================================================================
// SEED COMMAND
// =============================================================================

/// Apply a declarative discovery configuration.
pub fn cmd_seed(settings: &Settings, json_mode: bool, file: &Path) -> Result<(), LldError> {
    let data = read_input(file, MAX_SEED_FILE_SIZE)?;
    let config: DiscoveryConfig =
        serde_json::from_slice(&data).map_err(|e| LldError::InvalidConfig(e.to_string()))?;

    let mut store = StoreHandle::open(settings)?;
    store.apply_config(&config)?;
    store.save()?;

    let stats = store.catalog().stats();
    tracing::info!(
        hosts = config.hosts.len(),
        rules = config.rules.len(),
        item_prototypes = config.item_prototypes.len(),
        "configuration applied"
    );

    if json_mode {
        print_json(&serde_json::json!({ "applied": true, "stats": stats }));
    } else {
        println!(
            "Applied configuration: {} hosts, {} rules, {} item prototypes, {} application prototypes",
            stats.hosts, stats.rules, stats.item_prototypes, stats.application_prototypes
        );
    }
    Ok(())
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Parameters of `lldsync run`.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub host: u64,
    pub rule: u64,
    pub file: PathBuf,
    pub lifetime_days: Option<u16>,
    pub now: Option<i64>,
}

fn unix_now() -> Result<i64, LldError> {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| LldError::IoError(format!("System clock: {}", e)))?;
    Ok(elapsed.as_secs() as i64)
}

/// Run one discovery cycle.
pub fn cmd_run(settings: &Settings, json_mode: bool, args: &RunArgs) -> Result<(), LldError> {
    let data = read_input(&args.file, MAX_ROWS_FILE_SIZE)?;
    let mut rows = parse_rows(&data)?;

    let mut store = StoreHandle::open(settings)?;
    let rule_id = RuleId(args.rule);
    let rule = store
        .catalog()
        .rule(rule_id)
        .ok_or(LldError::RuleNotFound(rule_id))?;
    if rule.host_id != HostId(args.host) {
        return Err(LldError::InvalidConfig(format!(
            "Rule {} belongs to host {}, not host {}",
            args.rule, rule.host_id.0, args.host
        )));
    }

    // Flag, then the rule's own lifetime, then the configured default.
    let lifetime = match args.lifetime_days.or(rule.lifetime_days) {
        Some(days) => Lifetime::try_days(days)?,
        None => settings.lifetime,
    };
    let request = CycleRequest {
        host_id: HostId(args.host),
        rule_id,
        lifetime,
        now: args.now.map_or_else(unix_now, Ok)?,
    };

    let mut report = ErrorReport::new();
    let stats = match store.run_cycle(&request, &mut rows, &mut report) {
        Ok(stats) => stats,
        Err(e) => {
            // Nothing was written, so the report only reaches the caller here.
            for line in report.lines() {
                tracing::warn!(rule = args.rule, "{}", line);
            }
            if json_mode {
                print_json(&serde_json::json!({
                    "aborted": e.to_string(),
                    "errors": report.lines().collect::<Vec<_>>(),
                }));
            }
            return Err(e);
        }
    };
    store.set_rule_error(rule_id, &report.to_string())?;
    store.save()?;

    tracing::info!(
        host = args.host,
        rule = args.rule,
        rows = stats.rows,
        created = stats.items_created,
        updated = stats.items_updated,
        expired = stats.items_expired,
        rejections = stats.rejections,
        "discovery cycle completed"
    );
    if !report.is_empty() {
        tracing::warn!(lines = report.len(), "discovery produced errors");
    }

    if json_mode {
        let links: Vec<_> = rows
            .iter()
            .enumerate()
            .map(|(index, row)| serde_json::json!({ "row": index, "items": row.item_links() }))
            .collect();
        print_json(&serde_json::json!({
            "stats": stats,
            "rows": links,
            "errors": report.lines().collect::<Vec<_>>(),
        }));
        return Ok(());
    }

    println!("Discovery cycle: host {} rule {}", args.host, args.rule);
    println!("=================================");
    println!("Rows:         {}", stats.rows);
    println!(
        "Items:        {} discovered, {} created, {} updated, {} scheduled, {} deleted",
        stats.items_discovered,
        stats.items_created,
        stats.items_updated,
        stats.items_scheduled,
        stats.items_expired
    );
    println!(
        "Applications: {} discovered, {} created, {} renamed, {} deleted",
        stats.applications_discovered,
        stats.applications_created,
        stats.applications_renamed,
        stats.applications_expired
    );
    println!(
        "Links:        {} created, {} deleted",
        stats.links_created, stats.links_deleted
    );
    for (index, row) in rows.iter().enumerate() {
        let items: Vec<String> = row
            .item_links()
            .iter()
            .map(|link| format!("{}:{}", link.prototype_id.0, link.item_id.0))
            .collect();
        println!("  row {:>4} -> [{}]", index, items.join(", "));
    }
    if !report.is_empty() {
        println!();
        println!("Errors:");
        for line in report.lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show entity counts.
pub fn cmd_status(settings: &Settings, json_mode: bool) -> Result<(), LldError> {
    let store = StoreHandle::open(settings)?;
    let stats = store.catalog().stats();

    if json_mode {
        print_json(&serde_json::json!({
            "database": settings.database.to_string_lossy(),
            "backend": settings.backend.name(),
            "stats": stats,
        }));
        return Ok(());
    }

    println!("lldsync Store Status");
    println!("====================");
    println!("Database: {:?}", settings.database);
    println!("Backend:  {}", settings.backend.name());
    println!();
    println!("Hosts:                  {}", stats.hosts);
    println!("Rules:                  {}", stats.rules);
    println!("Item prototypes:        {}", stats.item_prototypes);
    println!("Application prototypes: {}", stats.application_prototypes);
    println!(
        "Items:                  {} ({} discovered)",
        stats.items, stats.discovered_items
    );
    println!(
        "Applications:           {} ({} discovered)",
        stats.applications, stats.discovered_applications
    );
    println!("Links:                  {}", stats.links);
    Ok(())
}

// =============================================================================
// ITEMS COMMAND
// =============================================================================

/// List a rule's discovered items.
pub fn cmd_items(settings: &Settings, json_mode: bool, rule: u64) -> Result<(), LldError> {
    let store = StoreHandle::open(settings)?;
    let rule_id = RuleId(rule);
    let record = store
        .catalog()
        .rule(rule_id)
        .ok_or(LldError::RuleNotFound(rule_id))?;
    let items = store.catalog().discovered_items(rule_id);

    if json_mode {
        let entries: Vec<_> = items
            .iter()
            .map(|(item, discovery)| {
                serde_json::json!({
                    "id": item.id.0,
                    "prototype_id": discovery.prototype_id.0,
                    "key": item.text.key,
                    "name": item.text.name,
                    "last_seen": discovery.last_seen,
                    "delete_at": discovery.delete_at,
                })
            })
            .collect();
        print_json(&serde_json::json!({
            "rule": rule,
            "name": record.name,
            "error": record.last_error,
            "items": entries,
        }));
        return Ok(());
    }

    println!("Rule {} ({}): {} discovered items", rule, record.name, items.len());
    for (item, discovery) in &items {
        let lost = if discovery.delete_at != 0 {
            format!(" (deleted at {})", discovery.delete_at)
        } else {
            String::new()
        };
        println!(
            "  {:>8}  {}  last seen {}{}",
            item.id.0, item.text.key, discovery.last_seen, lost
        );
    }
    if !record.last_error.is_empty() {
        println!();
        println!("Last errors:");
        for line in record.last_error.lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}
