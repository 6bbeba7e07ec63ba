//! Schema catalog and version manager.
//!
//! Holds every declared schema by name, keeps a strictly increasing
//! sequence of versions per name, and applies forward migrations on
//! demand. `applied` means the DDL for that version reached the store;
//! `inactive` means a later applied version has superseded it for new
//! readers. Migrations serialize per name: `migrate_fn` runs at most once
//! per `(name, version)` across the process lifetime.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::RegistryError;
use crate::schema::Schema;

/// One declared version of a schema.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    pub schema: Arc<Schema>,
    /// DDL for this version was applied to the store at some point.
    pub applied: bool,
    /// Not the most recent applied version; new readers should not get it.
    pub inactive: bool,
    /// Reserved for leasing old versions to in-flight readers.
    pub in_use: i32,
}

/// All declared versions of one schema name.
#[derive(Debug, Default)]
pub struct SchemaItem {
    /// Versions keyed ascending by number.
    pub versions: BTreeMap<i32, SchemaVersion>,
    pub newest_version: i32,
    pub last_applied: Option<i32>,
    /// The schema served to new readers.
    pub active: Option<Arc<Schema>>,
}

struct SchemaEntry {
    /// Serializes migrations for this name.
    migration: Mutex<()>,
    state: RwLock<SchemaItem>,
}

/// Hook invoked after a version is added (persists a catalog/version row).
pub type OnAddHook = Box<dyn Fn(&Schema) + Send + Sync>;
/// Hook invoked after a version is applied, with the superseded version
/// number (`None` on first application).
pub type OnApplyHook = Box<dyn Fn(&Schema, Option<i32>) + Send + Sync>;

/// Per-name ordered map of schema versions, driving migrations.
#[derive(Default)]
pub struct SchemaRegistry {
    catalog: RwLock<HashMap<String, Arc<SchemaEntry>>>,
    on_add: RwLock<Option<OnAddHook>>,
    on_apply: RwLock<Option<OnApplyHook>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the persistence hook fired on `add`.
    pub fn set_on_add(&self, hook: OnAddHook) {
        *self.on_add.write() = Some(hook);
    }

    /// Install the persistence hook fired when a version is applied.
    pub fn set_on_apply(&self, hook: OnApplyHook) {
        *self.on_apply.write() = Some(hook);
    }

    /// Register a new version for a schema name.
    ///
    /// Versions never replace each other: an existing `(name, version)`
    /// pair fails, and a new version must be strictly greater than the
    /// newest declared one.
    pub fn add(&self, schema: Schema) -> Result<(), RegistryError> {
        if schema.name.is_empty() {
            return Err(RegistryError::InvalidName);
        }

        let entry = {
            let mut catalog = self.catalog.write();
            Arc::clone(catalog.entry(schema.name.clone()).or_insert_with(|| {
                Arc::new(SchemaEntry {
                    migration: Mutex::new(()),
                    state: RwLock::new(SchemaItem::default()),
                })
            }))
        };

        let mut state = entry.state.write();
        if state.versions.contains_key(&schema.version) {
            return Err(RegistryError::DuplicateVersion {
                name: schema.name.clone(),
                version: schema.version,
            });
        }
        if let Some((&newest, _)) = state.versions.last_key_value() {
            if schema.version <= newest {
                return Err(RegistryError::VersionNotIncreasing {
                    name: schema.name.clone(),
                    version: schema.version,
                    newest,
                });
            }
        }

        let version = schema.version;
        let schema = Arc::new(schema);
        state.versions.insert(
            version,
            SchemaVersion {
                schema: Arc::clone(&schema),
                applied: false,
                inactive: false,
                in_use: 0,
            },
        );
        state.newest_version = version;
        drop(state);

        tracing::debug!(schema = %schema.name, version, "registered schema version");
        if let Some(hook) = self.on_add.read().as_ref() {
            hook(&schema);
        }
        Ok(())
    }

    /// True when the name has at least one declared version.
    pub fn has(&self, name: &str) -> bool {
        self.catalog.read().contains_key(name)
    }

    /// Resolve the latest applied schema for `name`, migrating forward as
    /// needed.
    ///
    /// `migrate` is called once per version that needs applying, in
    /// ascending order, with the previously applied schema (or `None` on
    /// first application, which jumps straight to the newest declared
    /// version). A failing step leaves that step unapplied and propagates;
    /// earlier steps of the same call stay applied. `Ok(None)` means the
    /// name is unknown.
    pub fn get<F, E>(&self, name: &str, mut migrate: F) -> Result<Option<Arc<Schema>>, E>
    where
        F: FnMut(Option<&Schema>, &Schema) -> Result<(), E>,
    {
        let Some(entry) = self.catalog.read().get(name).map(Arc::clone) else {
            return Ok(None);
        };

        // Fast path: newest version already applied, nothing to migrate.
        {
            let state = entry.state.read();
            if state.last_applied == Some(state.newest_version) {
                if let Some(active) = &state.active {
                    return Ok(Some(Arc::clone(active)));
                }
            }
        }

        // Serialize migrations for this name; re-check under the lock.
        let _migrating = entry.migration.lock();

        let (last_applied, newest) = {
            let state = entry.state.read();
            (state.last_applied, state.newest_version)
        };

        if last_applied == Some(newest) {
            let mut state = entry.state.write();
            return Ok(Some(Self::materialize_active(&mut state)));
        }

        match last_applied {
            // First declaration shortcut: nothing applied yet, jump to the
            // newest declared version; older ones are recorded, never applied.
            None => {
                let target = {
                    let state = entry.state.read();
                    match state.versions.get(&newest) {
                        Some(v) => Arc::clone(&v.schema),
                        None => return Ok(None),
                    }
                };
                migrate(None, &target)?;

                let mut state = entry.state.write();
                let applied = Self::mark_applied(&mut state, newest, None);
                tracing::info!(schema = %name, version = newest, "applied schema");
                drop(state);
                if let Some(hook) = self.on_apply.read().as_ref() {
                    hook(&applied, None);
                }
                Ok(Some(applied))
            }
            Some(mut current) => {
                // Advance through every declared version above the last
                // applied one, in ascending order.
                loop {
                    let next = {
                        let state = entry.state.read();
                        state
                            .versions
                            .range((current + 1)..)
                            .next()
                            .map(|(v, ver)| (*v, ver.applied, Arc::clone(&ver.schema)))
                    };
                    let Some((version, already_applied, target)) = next else {
                        break;
                    };
                    if already_applied {
                        current = version;
                        let mut state = entry.state.write();
                        state.last_applied = Some(version);
                        continue;
                    }

                    let from = {
                        let state = entry.state.read();
                        state.versions.get(&current).map(|v| Arc::clone(&v.schema))
                    };
                    migrate(from.as_deref(), &target)?;

                    let mut state = entry.state.write();
                    let applied = Self::mark_applied(&mut state, version, Some(current));
                    tracing::info!(
                        schema = %name,
                        from = current,
                        to = version,
                        "migrated schema"
                    );
                    drop(state);
                    if let Some(hook) = self.on_apply.read().as_ref() {
                        hook(&applied, Some(current));
                    }
                    current = version;
                }

                let mut state = entry.state.write();
                Ok(Some(Self::materialize_active(&mut state)))
            }
        }
    }

    /// Mark `version` applied, the superseded one inactive, and refresh
    /// the active schema. On first application every older declared
    /// version is marked inactive (it will never be applied).
    fn mark_applied(state: &mut SchemaItem, version: i32, superseded: Option<i32>) -> Arc<Schema> {
        let parent = superseded
            .and_then(|v| state.versions.get(&v))
            .map(|v| Arc::clone(&v.schema));

        if let Some(ver) = state.versions.get_mut(&version) {
            let mut schema = (*ver.schema).clone();
            schema.applied = true;
            schema.parent = parent;
            ver.schema = Arc::new(schema);
            ver.applied = true;
            ver.inactive = false;
        }
        match superseded {
            Some(old) => {
                if let Some(prev) = state.versions.get_mut(&old) {
                    prev.inactive = true;
                }
            }
            None => {
                for (v, ver) in state.versions.iter_mut() {
                    if *v < version {
                        ver.inactive = true;
                    }
                }
            }
        }
        state.last_applied = Some(version);
        Self::materialize_active(state)
    }

    fn materialize_active(state: &mut SchemaItem) -> Arc<Schema> {
        let applied = state
            .last_applied
            .and_then(|v| state.versions.get(&v))
            .map(|v| Arc::clone(&v.schema));
        // last_applied always points at a stored version
        let schema = applied.unwrap_or_else(|| {
            Arc::new(Schema::new(String::new(), 1))
        });
        state.active = Some(Arc::clone(&schema));
        schema
    }

    /// Ascending list of declared-but-unapplied versions for `name`.
    pub fn unapplied_versions(&self, name: &str) -> Vec<i32> {
        let Some(entry) = self.catalog.read().get(name).map(Arc::clone) else {
            return Vec::new();
        };
        let state = entry.state.read();
        state
            .versions
            .iter()
            .filter(|(_, v)| !v.applied)
            .map(|(n, _)| *n)
            .collect()
    }

    /// The newest declared version entry, optionally restricted to
    /// applied ones.
    pub fn newest(&self, name: &str, only_applied: bool) -> Option<SchemaVersion> {
        let entry = self.catalog.read().get(name).map(Arc::clone)?;
        let state = entry.state.read();
        state
            .versions
            .values()
            .rev()
            .find(|v| !only_applied || v.applied)
            .cloned()
    }
}
