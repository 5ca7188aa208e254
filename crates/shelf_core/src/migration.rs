//! Declarative versioned migrations and the open driver.
//!
//! A database's schema lifecycle is an ordered list of version deltas:
//! delta `N` (1-based) migrates the database from version `N - 1` to `N`.
//! Opening always requests the version equal to the number of deltas and
//! replays exactly the deltas between the persisted version and the
//! requested one, in order, inside one atomic upgrade scope.

use crate::connection::Connection;
use crate::error::{CoreError, CoreResult, OpenError};
use crate::outcome::OutcomeNotifier;
use serde_json::Value;
use shelf_engine::{
    DatabaseHandle, Engine, EngineError, IndexSpec, IntoIndexSpecs, KeyOptions, OpenOutcome,
    UpgradeScope,
};
use std::ops::Deref;
use std::sync::Arc;

/// One schema migration step.
///
/// Runs exactly once per database lifetime, when the persisted version is
/// below the step's position in the delta list.
pub type VersionDelta = Box<dyn Fn(&mut MigrationContext) -> CoreResult<()>>;

/// Opens (or creates) the named database, driving any pending migrations.
///
/// The requested version is `deltas.len()`. The returned notifier settles
/// exactly once with either a ready [`Connection`] or an [`OpenError`];
/// subscribers attached after settlement observe the same outcome.
///
/// # Errors
///
/// Returns [`CoreError::NoVersions`] when `deltas` is empty. All other
/// failures, including a blocked open, surface through the notifier.
pub fn open(
    engine: Arc<dyn Engine>,
    name: &str,
    deltas: Vec<VersionDelta>,
) -> CoreResult<OutcomeNotifier<Connection, OpenError>> {
    if deltas.is_empty() {
        return Err(CoreError::NoVersions);
    }
    let requested = u32::try_from(deltas.len())
        .map_err(|_| CoreError::invalid_operation("too many version deltas"))?;
    tracing::debug!(database = name, requested, "opening database");

    let notifier = OutcomeNotifier::new();
    match engine.open(name, requested) {
        OpenOutcome::Failed(err) => {
            tracing::warn!(database = name, %err, "open failed");
            notifier.reject(OpenError::from_engine(err));
        }
        OpenOutcome::Blocked(err) => {
            tracing::warn!(database = name, "open blocked by another session");
            notifier.reject(OpenError::Blocked(err));
        }
        OpenOutcome::UpgradeNeeded {
            old_version,
            new_version,
            db,
            scope,
        } => run_upgrade(
            Arc::clone(&engine),
            db,
            scope,
            old_version,
            new_version,
            &deltas,
            &notifier,
        ),
        OpenOutcome::Open(db) => {
            let on_disk = db.version();
            if on_disk == requested {
                materialize(Connection::new(engine, Arc::from(db)), &notifier);
            } else {
                // Obsolete engine generation: the open handed back a stale
                // handle, so upgrades go through the version-set probe.
                match db.set_version(requested) {
                    Some(Ok(handoff)) => run_upgrade(
                        Arc::clone(&engine),
                        db,
                        handoff.scope,
                        handoff.old_version,
                        handoff.new_version,
                        &deltas,
                        &notifier,
                    ),
                    Some(Err(err)) => {
                        tracing::warn!(database = name, %err, "version-set failed");
                        db.close();
                        notifier.reject(OpenError::from_engine(err));
                    }
                    None => {
                        db.close();
                        notifier.reject(OpenError::from_engine(EngineError::internal(format!(
                            "database is at version {on_disk}, {requested} was requested, \
                             and the engine offered no upgrade path"
                        ))));
                    }
                }
            }
        }
    }
    Ok(notifier)
}

/// [`open`] with an outcome callback attached up front.
pub fn open_with(
    engine: Arc<dyn Engine>,
    name: &str,
    deltas: Vec<VersionDelta>,
    on_ready: impl FnOnce(Connection) + Send + 'static,
) -> CoreResult<OutcomeNotifier<Connection, OpenError>> {
    let notifier = open(engine, name, deltas)?;
    notifier.on_success(on_ready);
    Ok(notifier)
}

/// Runs the pending slice of deltas inside one upgrade scope, then
/// reflects and resolves. Both engine generations funnel through here.
fn run_upgrade(
    engine: Arc<dyn Engine>,
    db: Box<dyn DatabaseHandle>,
    scope: Box<dyn UpgradeScope>,
    old_version: u32,
    new_version: u32,
    deltas: &[VersionDelta],
    notifier: &OutcomeNotifier<Connection, OpenError>,
) {
    let name = db.name();
    tracing::info!(database = %name, old_version, new_version, "upgrading database");

    let conn = Connection::new(engine, Arc::from(db));
    let mut ctx = MigrationContext {
        conn: conn.clone(),
        scope: Some(scope),
        old_version,
        new_version,
        current_version: old_version,
    };

    let pending = &deltas[old_version as usize..new_version as usize];
    for (offset, delta) in pending.iter().enumerate() {
        let target = old_version + offset as u32 + 1;
        tracing::debug!(database = %name, target, "running version delta");
        if let Err(err) = delta(&mut ctx) {
            tracing::error!(database = %name, target, %err, "version delta failed");
            if let Some(scope) = ctx.scope.take() {
                scope.abort();
            }
            drop(ctx);
            let _ = conn.close();
            notifier.reject(OpenError::Migration {
                version: target,
                message: err.to_string(),
            });
            return;
        }
        ctx.current_version = target;
    }

    if let Some(scope) = ctx.scope.take() {
        if let Err(err) = scope.commit() {
            let _ = conn.close();
            notifier.reject(OpenError::from_engine(err));
            return;
        }
    }
    materialize(conn, notifier);
}

/// Reflects every collection and settles the notifier.
///
/// A failed reflection releases the handle before rejecting, like every
/// other failure path, so the engine's open-handle count stays balanced.
fn materialize(conn: Connection, notifier: &OutcomeNotifier<Connection, OpenError>) {
    match conn.reflect_all() {
        Ok(()) => {
            tracing::debug!(database = %conn.name(), version = conn.version(), "database ready");
            notifier.resolve(conn);
        }
        Err(CoreError::Engine(err)) => {
            let _ = conn.close();
            notifier.reject(OpenError::from_engine(err));
        }
        Err(other) => {
            let _ = conn.close();
            notifier.reject(OpenError::from_engine(EngineError::internal(other.to_string())));
        }
    }
}

/// What a version delta sees: schema mutations scoped to the running
/// upgrade, plus full data access through the dereferenced connection,
/// so deltas can reshape existing records.
pub struct MigrationContext {
    conn: Connection,
    scope: Option<Box<dyn UpgradeScope>>,
    old_version: u32,
    new_version: u32,
    current_version: u32,
}

impl MigrationContext {
    /// Version persisted before this upgrade started.
    #[must_use]
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    /// Version the upgrade is heading to.
    #[must_use]
    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    /// Version reached by the deltas completed so far.
    #[must_use]
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Creates a collection with the given key options and indexes.
    ///
    /// # Errors
    ///
    /// Fails if a collection with that name already exists; the whole
    /// upgrade aborts.
    pub fn create_collection(
        &mut self,
        name: &str,
        options: KeyOptions,
        indexes: impl IntoIndexSpecs,
    ) -> CoreResult<()> {
        let scope = self.scope_mut()?;
        scope.create_collection(name, &options)?;
        for spec in indexes.into_index_specs() {
            scope.create_index(name, &spec)?;
        }
        Ok(())
    }

    /// Deletes a collection and everything in it.
    pub fn delete_collection(&mut self, name: &str) -> CoreResult<()> {
        Ok(self.scope_mut()?.delete_collection(name)?)
    }

    /// Deletes every collection currently in the database.
    pub fn delete_all_collections(&mut self) -> CoreResult<()> {
        let scope = self.scope_mut()?;
        for name in scope.collection_names() {
            scope.delete_collection(&name)?;
        }
        Ok(())
    }

    /// Adds an index to an existing collection.
    pub fn add_index(&mut self, collection: &str, spec: IndexSpec) -> CoreResult<()> {
        Ok(self.scope_mut()?.create_index(collection, &spec)?)
    }

    /// Names of collections as visible at this point of the upgrade.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.scope
            .as_ref()
            .map(|s| s.collection_names())
            .unwrap_or_default()
    }

    /// Rewrites every record of a collection in place.
    ///
    /// Convenience for data-shape deltas: reads all records, maps each
    /// through `rewrite`, and writes the results back in one batch.
    pub fn rewrite_all(
        &self,
        collection: &str,
        rewrite: impl Fn(Value) -> Value,
    ) -> CoreResult<()> {
        let records = self.conn.get_all(collection)?;
        let rewritten = records.into_iter().map(rewrite).collect();
        self.conn.put_all(collection, rewritten)?;
        Ok(())
    }

    fn scope_mut(&mut self) -> CoreResult<&mut Box<dyn UpgradeScope>> {
        self.scope
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("upgrade scope already finished"))
    }
}

impl Deref for MigrationContext {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("old_version", &self.old_version)
            .field("new_version", &self.new_version)
            .field("current_version", &self.current_version)
            .finish_non_exhaustive()
    }
}
