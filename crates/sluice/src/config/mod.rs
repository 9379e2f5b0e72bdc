//! Tenant configuration resolution.
//!
//! The resolver merges the layered configuration files into one tree,
//! loads the tenant's `.env` secrets, and freezes everything into a
//! `TenantContext`. Merge order (later overrides earlier):
//!
//! 1. `shared/default_config.yaml`
//! 2. `starrocks/connection_pool.yaml` (under `connection_pool`)
//!    and `starrocks/stream_load_defaults.yaml` (under `stream_load`)
//! 3. `shared/common_business_rules.yaml` (under `business_rules`)
//! 4. `tenants/<slug>/config.yaml`
//! 5. `tenants/<slug>/.env`: flat key-value, exposed as the `env`
//!    attribute, never merged into the YAML tree.

pub mod registry;
pub mod settings;

pub use registry::{ConstantsBackendKind, GlobalSettings, ProviderKind, Registry, RegistryEntry};
pub use settings::{
    BusinessRules, DatabaseSettings, DataPathSettings, FetchSettings, JobSettings, PoolSettings,
    RowFilter, StorageSettings, StreamLoadSettings, TableJob, TenantSettings,
};

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::context::TenantContext;
use crate::error::ConfigError;
use crate::schema::{load_computed_columns, load_mapping_dir, load_schema_dir};
use sluice_core::{
    deep_merge, interpolate_slug, load_yaml, reject_secrets, AzureAuth, AzureSettings,
    BackendSettings, GcsSettings, LocalSettings, S3Settings,
};

/// Resolves tenant contexts from an on-disk configuration root.
pub struct ConfigResolver {
    root: PathBuf,
    registry: Registry,
}

impl ConfigResolver {
    /// Load the registry and prepare a resolver for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let registry = Registry::load(&root)?;
        Ok(Self { root, registry })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn global(&self) -> &GlobalSettings {
        &self.registry.global
    }

    /// Tenants ordered by `schedule_priority`; disabled excluded unless
    /// requested.
    pub fn list_tenants(&self, include_disabled: bool) -> Vec<&RegistryEntry> {
        self.registry.ordered_tenants(include_disabled)
    }

    /// Resolve one tenant by slug or UUID into a frozen context.
    pub fn resolve(&self, slug_or_uuid: &str) -> Result<TenantContext, ConfigError> {
        let entry =
            self.registry
                .find(slug_or_uuid)
                .ok_or_else(|| ConfigError::InvalidTenant {
                    tenant: slug_or_uuid.to_string(),
                    reason: "not present in tenant_registry.yaml".to_string(),
                })?;
        self.resolve_entry(entry)
    }

    /// Resolve a registry entry into a frozen context.
    pub fn resolve_entry(&self, entry: &RegistryEntry) -> Result<TenantContext, ConfigError> {
        let tenant_id = entry.tenant_id.ok_or_else(|| ConfigError::InvalidTenant {
            tenant: entry.display_slug().to_string(),
            reason: "missing tenant_id".to_string(),
        })?;
        let slug = entry
            .tenant_slug
            .clone()
            .ok_or_else(|| ConfigError::InvalidTenant {
                tenant: tenant_id.to_string(),
                reason: "missing tenant_slug".to_string(),
            })?;
        let database_name =
            entry
                .database_name
                .clone()
                .ok_or_else(|| ConfigError::InvalidTenant {
                    tenant: slug.clone(),
                    reason: "missing database.name".to_string(),
                })?;
        let provider = ProviderKind::parse(&entry.provider)?;

        let tenant_dir = self.root.join("tenants").join(&slug);
        let tenant_config = tenant_dir.join("config.yaml");
        if !tenant_config.is_file() {
            return Err(ConfigError::InvalidTenant {
                tenant: slug.clone(),
                reason: format!("missing {}", tenant_config.display()),
            });
        }

        let mut merged = Value::Mapping(Default::default());
        self.merge_layer(&mut merged, &self.root.join("shared/default_config.yaml"), None)?;
        self.merge_layer(
            &mut merged,
            &self.root.join("starrocks/connection_pool.yaml"),
            Some("connection_pool"),
        )?;
        self.merge_layer(
            &mut merged,
            &self.root.join("starrocks/stream_load_defaults.yaml"),
            Some("stream_load"),
        )?;
        self.merge_layer(
            &mut merged,
            &self.root.join("shared/common_business_rules.yaml"),
            Some("business_rules"),
        )?;
        self.merge_layer(&mut merged, &tenant_config, None)?;

        interpolate_slug(&mut merged, &slug);

        let settings: TenantSettings =
            serde_yaml::from_value(merged).map_err(|source| ConfigError::Parse {
                path: tenant_config.clone(),
                source,
            })?;

        let env = load_env_file(&tenant_dir.join(".env"))?;
        let storage = build_backend(provider, &settings.storage, &env, &slug)?;
        let db_password = env.get("DB_PASSWORD").cloned().unwrap_or_default();

        let schemas_dir = tenant_dir.join("schemas");
        let mut schemas = load_schema_dir(&schemas_dir.join("tables"))?;
        schemas.extend(load_schema_dir(&schemas_dir.join("views"))?);
        schemas.extend(load_schema_dir(&schemas_dir.join("matviews"))?);

        let mappings = load_mapping_dir(&tenant_dir.join("column_mappings"))?;
        let computed = load_computed_columns(&tenant_dir.join("computed_columns.yaml"), &slug)?;

        let data_root = settings.data_paths.base.join(&slug);
        debug!(tenant = %slug, root = %data_root.display(), "Resolved tenant context");

        Ok(TenantContext {
            tenant_id,
            name: entry.tenant_name.clone().unwrap_or_else(|| slug.clone()),
            slug,
            schedule_priority: entry.schedule_priority,
            database: settings.database,
            database_name,
            db_password,
            pool: settings.connection_pool,
            stream_load: settings.stream_load,
            fetch: settings.fetch,
            storage,
            constants_backend: entry.constants_backend,
            data_root,
            config_dir: tenant_dir,
            jobs: settings.jobs,
            business_rules: settings.business_rules,
            schemas,
            mappings,
            computed,
            env,
        })
    }

    /// Merge one YAML file into the tree, optionally nesting it under a
    /// conventional component key. Missing files are skipped; secret keys
    /// are rejected before the layer is admitted.
    fn merge_layer(
        &self,
        merged: &mut Value,
        path: &Path,
        under_key: Option<&str>,
    ) -> Result<(), ConfigError> {
        if !path.is_file() {
            return Ok(());
        }
        let value = load_yaml(path)?;
        reject_secrets(&value, path)?;

        let layer = match under_key {
            Some(key) => {
                let mut map = serde_yaml::Mapping::new();
                map.insert(Value::String(key.to_string()), value);
                Value::Mapping(map)
            }
            None => value,
        };
        deep_merge(merged, layer);
        Ok(())
    }
}

/// Load a `.env` secrets file into an ordered map.
///
/// A missing file is an empty environment, not an error.
fn load_env_file(path: &Path) -> Result<IndexMap<String, String>, ConfigError> {
    if !path.is_file() {
        warn!(path = %path.display(), "No .env file for tenant, using empty environment");
        return Ok(IndexMap::new());
    }

    let mut env = IndexMap::new();
    for item in dotenvy::from_path_iter(path).map_err(|e| ConfigError::EnvFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })? {
        let (key, value) = item.map_err(|e| ConfigError::EnvFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        env.insert(key, value);
    }
    Ok(env)
}

/// Assemble provider-specific backend settings from the storage block and
/// the tenant env map. Credentials never leave this function except inside
/// the returned settings.
fn build_backend(
    provider: ProviderKind,
    storage: &StorageSettings,
    env: &IndexMap<String, String>,
    slug: &str,
) -> Result<BackendSettings, ConfigError> {
    let missing = |field: &str| ConfigError::InvalidTenant {
        tenant: slug.to_string(),
        reason: format!("storage.{field} is required for this provider"),
    };

    match provider {
        ProviderKind::Azure => {
            let container = storage.container.clone().ok_or_else(|| missing("container"))?;
            let account = storage
                .account
                .clone()
                .or_else(|| env.get("AZURE_ACCOUNT_NAME").cloned())
                .ok_or_else(|| missing("account"))?;
            let auth = if let Some(cs) = env.get("AZURE_STORAGE_CONNECTION_STRING") {
                AzureAuth::ConnectionString(cs.clone())
            } else if let Some(sas) = env.get("AZURE_SAS_TOKEN") {
                AzureAuth::SasToken(sas.clone())
            } else if let Some(key) = env.get("AZURE_ACCOUNT_KEY") {
                AzureAuth::AccessKey(key.clone())
            } else {
                AzureAuth::Anonymous
            };
            Ok(BackendSettings::Azure(AzureSettings {
                account,
                container,
                prefix: storage.prefix.clone(),
                auth,
            }))
        }
        ProviderKind::S3 | ProviderKind::Minio => {
            let bucket = storage.bucket.clone().ok_or_else(|| missing("bucket"))?;
            let endpoint = storage.endpoint.clone();
            if provider == ProviderKind::Minio && endpoint.is_none() {
                return Err(missing("endpoint"));
            }
            Ok(BackendSettings::S3(S3Settings {
                bucket,
                region: storage.region.clone(),
                endpoint,
                prefix: storage.prefix.clone(),
                access_key_id: env.get("AWS_ACCESS_KEY_ID").cloned(),
                secret_access_key: env.get("AWS_SECRET_ACCESS_KEY").cloned(),
                allow_http: storage.allow_http,
            }))
        }
        ProviderKind::Gcs => {
            let bucket = storage.bucket.clone().ok_or_else(|| missing("bucket"))?;
            Ok(BackendSettings::Gcs(GcsSettings {
                bucket,
                prefix: storage.prefix.clone(),
                service_account_key: env.get("GOOGLE_SERVICE_ACCOUNT_KEY").cloned(),
            }))
        }
        ProviderKind::Local => {
            let root = storage.root.clone().ok_or_else(|| missing("root"))?;
            Ok(BackendSettings::Local(LocalSettings {
                root,
                prefix: storage.prefix.clone(),
            }))
        }
    }
}
