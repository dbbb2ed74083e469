//! Sync orchestration: dump, preview, three-way sync, two-way reset.
//!
//! One engine per run, holding the process's single driver. Apply is
//! all-or-nothing: `BEGIN`, every statement in order, `COMMIT`; any driver
//! error rolls back and propagates. The base snapshot is rewritten only
//! after a successful commit, so a crashed sync leaves the previous base
//! intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::config::DEFAULT_NAMESPACE;
use crate::dataset::{camel_case, FlatDataset};
use crate::diff::{diff, Change, ChangeSet};
use crate::driver::Driver;
use crate::emit::{emit, quote_ident};
use crate::error::{Result, SyncError};
use crate::fetch::{fetch_dataset, FetchOptions};
use crate::file::{
    companion_paths, render_base, render_flat, render_nested, resolve_ref, write_atomic, Document,
    Layout,
};
use crate::flatten::flatten;
use crate::nest::{nest, NestOptions};
use crate::order::order_changes;
use crate::schema::{extract_schema, Schema};
use crate::tree::OwnershipTree;

/// Options for a dump run.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Destination of the user-facing document.
    pub path: PathBuf,

    /// Per-table row limit for the user-facing document. The base snapshot
    /// is always fetched in full.
    pub limit: Option<u64>,

    /// Per-sequence row limit inside nested documents.
    pub nested_limit: Option<usize>,

    /// Write the flat layout instead of the nested one.
    pub flat: bool,

    /// Skip the base snapshot and JSON-schema companions.
    pub no_base: bool,
}

impl DumpOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: None,
            nested_limit: None,
            flat: false,
            no_base: false,
        }
    }
}

/// What a dump produced.
#[derive(Debug, Clone)]
pub struct DumpReport {
    pub path: PathBuf,
    pub tables: usize,
    pub rows: u64,
    pub truncated: IndexMap<String, u64>,
    pub base_path: Option<PathBuf>,
    pub schema_path: Option<PathBuf>,
}

/// What an apply executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// How to choose the diff baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffMode {
    /// Base snapshot when referenced (user intent only); live otherwise.
    ThreeWay,
    /// Always the live database; rows absent from the file get deleted.
    TwoWay,
}

struct Plan {
    edited: FlatDataset,
    changes: ChangeSet,
    base_path: Option<PathBuf>,
}

/// The per-run orchestrator.
pub struct SyncEngine {
    driver: Arc<dyn Driver>,
    namespace: String,
}

impl SyncEngine {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Extract the schema and build the ownership tree, pinning the
    /// connection's search path to the namespace so emitted statements
    /// resolve unqualified identifiers there.
    async fn context(&self) -> Result<(Schema, OwnershipTree)> {
        self.driver
            .batch(&format!("SET search_path TO {}", quote_ident(&self.namespace)?))
            .await?;
        let schema = extract_schema(self.driver.as_ref(), &self.namespace).await?;
        let tree = OwnershipTree::build(&schema)?;
        Ok((schema, tree))
    }

    /// Dump the database to a document, plus base snapshot and JSON-schema
    /// companions unless suppressed.
    pub async fn dump(&self, options: &DumpOptions) -> Result<DumpReport> {
        let (schema, tree) = self.context().await?;

        let fetch_options = FetchOptions {
            limit: options.limit,
        };
        let (mut data, truncated) = fetch_dataset(self.driver.as_ref(), &schema, &fetch_options).await?;
        let rows = data.row_count();

        let layout = if options.flat { Layout::Flat } else { Layout::Nested };
        let companions = (!options.no_base).then(|| companion_paths(&options.path));
        let (schema_ref, base_ref) = match &companions {
            Some(c) => (Some(c.schema_ref.as_str()), Some(c.base_ref.as_str())),
            None => (None, None),
        };

        let text = match layout {
            Layout::Nested => {
                let nest_options = NestOptions {
                    limit: None, // the fetch already applied the row limit
                    nested_limit: options.nested_limit,
                };
                let mut nested = nest(&data, &schema, &tree, &nest_options);
                for (table, skipped) in &truncated {
                    nested.mark_truncated(&camel_case(table), table, *skipped);
                }
                render_nested(&nested, schema_ref, base_ref)
            }
            Layout::Flat => {
                for (table, skipped) in &truncated {
                    let mut marker = crate::dataset::FlatRow::new();
                    if let Some(obj) = crate::dataset::partial_marker(*skipped).as_object() {
                        for (k, v) in obj {
                            marker.insert(k.clone(), v.clone());
                        }
                    }
                    data.push_row(table, marker);
                }
                render_flat(&data, schema_ref, base_ref)
            }
        };

        let mut report = DumpReport {
            path: options.path.clone(),
            tables: schema.len(),
            rows,
            truncated,
            base_path: None,
            schema_path: None,
        };

        if let Some(companions) = &companions {
            // The base must never be truncated; a limited dump re-fetches in
            // full just for it.
            let base_data = if options.limit.is_some() {
                fetch_dataset(self.driver.as_ref(), &schema, &FetchOptions::default())
                    .await?
                    .0
            } else {
                data.clone()
            };
            write_atomic(&companions.base_path, &render_base(&base_data)).await?;

            let companion_schema = crate::jsonschema::generate(&schema, &tree, layout);
            let schema_text = serde_json::to_string_pretty(&companion_schema)? + "\n";
            write_atomic(&companions.schema_path, &schema_text).await?;

            report.base_path = Some(companions.base_path.clone());
            report.schema_path = Some(companions.schema_path.clone());
        }

        write_atomic(&options.path, &text).await?;
        info!(
            "dumped {} rows across {} tables to {}",
            rows,
            report.tables,
            options.path.display()
        );
        Ok(report)
    }

    /// Compute the ordered change set a sync would apply, without touching
    /// the database.
    pub async fn preview(&self, path: &Path) -> Result<ChangeSet> {
        let (schema, tree) = self.context().await?;
        let plan = self.plan(&schema, &tree, path, DiffMode::ThreeWay).await?;
        Ok(plan.changes)
    }

    /// Three-way sync: apply the user's edits inside a transaction, then
    /// refresh the base snapshot.
    pub async fn sync(&self, path: &Path) -> Result<ApplyReport> {
        let (schema, tree) = self.context().await?;
        let plan = self.plan(&schema, &tree, path, DiffMode::ThreeWay).await?;
        let report = self.apply(&plan.changes).await?;
        self.rewrite_base(&plan).await?;
        Ok(report)
    }

    /// Two-way reset: make the database match the file, deleting rows the
    /// file no longer mentions.
    pub async fn reset(&self, path: &Path) -> Result<ApplyReport> {
        let (schema, tree) = self.context().await?;
        let plan = self.plan(&schema, &tree, path, DiffMode::TwoWay).await?;
        let report = self.apply(&plan.changes).await?;
        self.rewrite_base(&plan).await?;
        Ok(report)
    }

    async fn plan(
        &self,
        schema: &Schema,
        tree: &OwnershipTree,
        path: &Path,
        mode: DiffMode,
    ) -> Result<Plan> {
        let origin = path.display().to_string();
        let text = tokio::fs::read_to_string(path).await?;
        let document = Document::parse(&text, &origin)?;

        let layout = document.detect_layout(schema, tree);
        debug!("detected {:?} layout for {}", layout, origin);
        let edited = match layout {
            Layout::Flat => document.to_flat(schema)?,
            Layout::Nested => flatten(&document.to_nested(), schema, tree)?,
        };

        let base_path = document.base_ref.as_deref().map(|r| resolve_ref(path, r));

        let baseline = match (mode, &base_path) {
            (DiffMode::ThreeWay, Some(base_path)) => {
                if !base_path.exists() {
                    return Err(SyncError::MissingBase(base_path.clone()));
                }
                let base_origin = base_path.display().to_string();
                let base_text = tokio::fs::read_to_string(base_path).await?;
                Document::parse(&base_text, &base_origin)?.to_flat(schema)?
            }
            _ => {
                // Two-way, or a document that never had a base: diff the
                // live database.
                fetch_dataset(self.driver.as_ref(), schema, &FetchOptions::default())
                    .await?
                    .0
            }
        };

        let changes = order_changes(schema, diff(schema, &baseline, &edited));
        Ok(Plan {
            edited,
            changes,
            base_path,
        })
    }

    /// Execute the ordered change set inside one transaction.
    async fn apply(&self, changes: &[Change]) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        if changes.is_empty() {
            info!("nothing to apply");
            return Ok(report);
        }
        for change in changes {
            match change {
                Change::Insert { .. } => report.inserts += 1,
                Change::Update { .. } => report.updates += 1,
                Change::Delete { .. } => report.deletes += 1,
            }
        }

        let statements = emit(changes)?;
        self.driver.batch("BEGIN").await?;
        for statement in &statements {
            if let Err(e) = self.driver.execute(&statement.sql, &statement.params).await {
                let _ = self.driver.batch("ROLLBACK").await;
                return Err(e);
            }
        }
        self.driver.batch("COMMIT").await?;

        info!(
            "applied {} changes ({} inserts, {} updates, {} deletes)",
            report.total(),
            report.inserts,
            report.updates,
            report.deletes
        );
        Ok(report)
    }

    /// After a successful commit, the base snapshot becomes the edited
    /// state, so the next sync diffs against what was actually applied.
    async fn rewrite_base(&self, plan: &Plan) -> Result<()> {
        if let Some(base_path) = &plan.base_path {
            write_atomic(base_path, &render_base(&plan.edited)).await?;
            debug!("rewrote base snapshot at {}", base_path.display());
        }
        Ok(())
    }
}
