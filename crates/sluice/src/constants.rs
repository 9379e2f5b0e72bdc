//! Business-constants backend.
//!
//! Mutable filter dimensions (e.g. which material types a tenant loads)
//! live outside the pipeline in a small key-value store. The engine only
//! reads them: the runner pulls the keys declared for a table and folds
//! them into the row filters the transformer applies. Three variants: the
//! tenant's own OLAP database, a separate relational store, or a document
//! store holding `{key, value}` documents. Credentials are keyed by a
//! prefix derived from the tenant UUID so two tenants sharing one OS
//! environment cannot collide.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::registry::ConstantsBackendKind;
use crate::config::RowFilter;
use crate::context::TenantContext;
use crate::error::ControlError;
use crate::load::{ControlPlane, MySqlControlPlane};

/// Conventional table/collection holding constants.
pub const CONSTANTS_TABLE: &str = "business_constants";

/// Key prefix under which row-filter dimensions live.
pub const FILTER_KEY_PREFIX: &str = "filter";

/// Stable env-var prefix for a tenant's constants credentials, e.g.
/// `BC_3607d64c` for tenant `3607d64c-…`. A derivation, not a secret.
pub fn env_prefix(tenant_id: &Uuid) -> String {
    let simple = tenant_id.simple().to_string();
    format!("BC_{}", &simple[..8])
}

/// Env key carrying the relational backend's connection URI.
pub fn uri_env_key(tenant_id: &Uuid) -> String {
    format!("{}_DB_URI", env_prefix(tenant_id))
}

/// Env key carrying the document backend's connection URI.
pub fn mongo_uri_env_key(tenant_id: &Uuid) -> String {
    format!("{}_MONGODB_URI", env_prefix(tenant_id))
}

/// Env key naming the document backend's database.
pub fn mongo_database_env_key(tenant_id: &Uuid) -> String {
    format!("{}_MONGODB_DATABASE", env_prefix(tenant_id))
}

/// Read-only key-value capability over business constants.
#[async_trait]
pub trait ConstantsBackend: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, ControlError>;
    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, ControlError>;
}

/// Constants stored in a SQL table reachable through a control plane.
///
/// Covers both the same-database variant (the tenant's own OLAP database)
/// and the separate-relational variant (a dedicated pool built from the
/// prefixed env URI).
pub struct SqlConstants {
    control: Arc<dyn ControlPlane>,
    table: String,
}

impl std::fmt::Debug for SqlConstants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlConstants")
            .field("table", &self.table)
            .finish()
    }
}

impl SqlConstants {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self {
            control,
            table: CONSTANTS_TABLE.to_string(),
        }
    }

    pub fn with_table(control: Arc<dyn ControlPlane>, table: impl Into<String>) -> Self {
        Self {
            control,
            table: table.into(),
        }
    }
}

#[async_trait]
impl ConstantsBackend for SqlConstants {
    async fn get(&self, key: &str) -> Result<Option<String>, ControlError> {
        let rows = self.control.query_constants(&self.table, key).await?;
        Ok(rows
            .into_iter()
            .find(|(found, _)| found == key)
            .map(|(_, value)| value))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, ControlError> {
        self.control.query_constants(&self.table, prefix).await
    }
}

/// One constants document as stored in the collection.
#[derive(Debug, Deserialize)]
struct ConstantDocument {
    key: String,
    value: String,
}

fn doc_err(err: mongodb::error::Error) -> ControlError {
    ControlError::Document {
        message: err.to_string(),
    }
}

/// Constants stored as `{key, value}` documents in MongoDB.
#[derive(Debug)]
pub struct DocumentConstants {
    collection: mongodb::Collection<ConstantDocument>,
}

impl DocumentConstants {
    /// Connect to one collection.
    pub async fn connect(
        uri: &str,
        database: &str,
        collection: &str,
    ) -> Result<Self, ControlError> {
        let client = mongodb::Client::with_uri_str(uri).await.map_err(doc_err)?;
        Ok(Self {
            collection: client.database(database).collection(collection),
        })
    }

    /// Wire up from the tenant env using the prefixed keys. The database
    /// defaults to the tenant slug and the collection to
    /// `business_constants`.
    pub async fn from_context(ctx: &TenantContext) -> Result<Self, ControlError> {
        let uri_key = mongo_uri_env_key(&ctx.tenant_id);
        let uri = ctx
            .env
            .get(&uri_key)
            .ok_or_else(|| ControlError::Document {
                message: format!("missing env key '{uri_key}'"),
            })?;
        let database = ctx
            .env
            .get(&mongo_database_env_key(&ctx.tenant_id))
            .cloned()
            .unwrap_or_else(|| ctx.slug.clone());
        Self::connect(uri, &database, CONSTANTS_TABLE).await
    }
}

#[async_trait]
impl ConstantsBackend for DocumentConstants {
    async fn get(&self, key: &str) -> Result<Option<String>, ControlError> {
        let found = self
            .collection
            .find_one(doc! { "key": key })
            .await
            .map_err(doc_err)?;
        Ok(found.map(|document| document.value))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, ControlError> {
        // Range scan instead of a regex: every key starting with the
        // prefix sorts between `prefix` and `prefix + char::MAX`.
        let mut upper = prefix.to_string();
        upper.push(char::MAX);

        let mut cursor = self
            .collection
            .find(doc! { "key": { "$gte": prefix, "$lt": upper } })
            .sort(doc! { "key": 1 })
            .await
            .map_err(doc_err)?;

        let mut pairs = Vec::new();
        while let Some(document) = cursor.try_next().await.map_err(doc_err)? {
            pairs.push((document.key, document.value));
        }
        Ok(pairs)
    }
}

/// Build the backend the registry selects for this tenant.
///
/// `same_db_control` is the tenant's existing OLAP control plane, reused
/// for the same-database variant.
pub async fn backend_for(
    ctx: &TenantContext,
    same_db_control: Arc<dyn ControlPlane>,
) -> Result<Arc<dyn ConstantsBackend>, ControlError> {
    match ctx.constants_backend {
        ConstantsBackendKind::SameDatabase => Ok(Arc::new(SqlConstants::new(same_db_control))),
        ConstantsBackendKind::Relational => {
            let uri_key = uri_env_key(&ctx.tenant_id);
            let uri = ctx
                .env
                .get(&uri_key)
                .ok_or_else(|| ControlError::Unexpected {
                    message: format!("missing env key '{uri_key}'"),
                })?;
            let control = MySqlControlPlane::from_uri(uri)?;
            Ok(Arc::new(SqlConstants::new(Arc::new(control))))
        }
        ConstantsBackendKind::Document => {
            Ok(Arc::new(DocumentConstants::from_context(ctx).await?))
        }
    }
}

/// Read the mutable filter dimensions declared for one table.
///
/// Keys follow `filter.<table>.<column>.<predicate>`; the value is the
/// predicate payload (`in_set` comma-separated, `min_int` an integer,
/// `min_date` an ISO date). A malformed key or payload is an error, not
/// a silently skipped row.
pub async fn filters_for_table(
    backend: &dyn ConstantsBackend,
    table: &str,
) -> Result<Vec<RowFilter>, ControlError> {
    let prefix = format!("{FILTER_KEY_PREFIX}.{table}.");
    let mut filters = Vec::new();

    for (key, value) in backend.list(&prefix).await? {
        let rest = &key[prefix.len()..];
        let Some((column, predicate)) = rest.rsplit_once('.') else {
            return Err(ControlError::Unexpected {
                message: format!("malformed filter constant key '{key}'"),
            });
        };

        let mut filter = RowFilter {
            column: column.to_string(),
            ..Default::default()
        };
        match predicate {
            "in_set" => {
                filter.in_set = Some(
                    value
                        .split(',')
                        .map(|item| item.trim().to_string())
                        .filter(|item| !item.is_empty())
                        .collect(),
                );
            }
            "min_int" => {
                filter.min_int =
                    Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| ControlError::Unexpected {
                                message: format!(
                                    "filter constant '{key}' is not an integer: '{value}'"
                                ),
                            })?,
                    );
            }
            "min_date" => filter.min_date = Some(value.trim().to_string()),
            other => {
                return Err(ControlError::Unexpected {
                    message: format!("unknown filter predicate '{other}' in constant '{key}'"),
                });
            }
        }
        filters.push(filter);
    }

    Ok(filters)
}

/// Fold constant-backed filters into the statically declared set.
///
/// A constant supersedes any static filter on the same column, so
/// operators can tighten or relax a dimension without touching YAML.
pub fn merge_filters(static_filters: &[RowFilter], dynamic: Vec<RowFilter>) -> Vec<RowFilter> {
    let mut merged: Vec<RowFilter> = static_filters
        .iter()
        .filter(|filter| !dynamic.iter().any(|d| d.column == filter.column))
        .cloned()
        .collect();
    merged.extend(dynamic);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::sync::Mutex;

    use crate::load::LiveColumn;

    #[test]
    fn test_env_prefix_uses_first_eight_hex_chars() {
        let id: Uuid = "3607d64c-61f4-4e1f-8e2a-91b3a1f0c9d7".parse().unwrap();
        assert_eq!(env_prefix(&id), "BC_3607d64c");
        assert_eq!(uri_env_key(&id), "BC_3607d64c_DB_URI");
        assert_eq!(mongo_uri_env_key(&id), "BC_3607d64c_MONGODB_URI");
        assert_eq!(
            mongo_database_env_key(&id),
            "BC_3607d64c_MONGODB_DATABASE"
        );
    }

    #[test]
    fn test_env_prefix_is_stable_and_distinct() {
        let a: Uuid = "3607d64c-61f4-4e1f-8e2a-91b3a1f0c9d7".parse().unwrap();
        let b: Uuid = "9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d".parse().unwrap();
        assert_eq!(env_prefix(&a), env_prefix(&a));
        assert_ne!(env_prefix(&a), env_prefix(&b));
    }

    /// Serves a fixed key-value set through the control-plane seam.
    struct FixedConstants {
        rows: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ControlPlane for FixedConstants {
        async fn describe_table(&self, _table: &str) -> Result<Vec<LiveColumn>, ControlError> {
            Ok(vec![])
        }

        async fn truncate_table(&self, _table: &str) -> Result<(), ControlError> {
            Ok(())
        }

        async fn widen_varchar(
            &self,
            _table: &str,
            _column: &str,
            _new_len: u32,
        ) -> Result<(), ControlError> {
            Ok(())
        }

        async fn execute_ddl(&self, _sql: &str) -> Result<(), ControlError> {
            Ok(())
        }

        async fn row_count(&self, _table: &str) -> Result<u64, ControlError> {
            Ok(0)
        }

        async fn query_constants(
            &self,
            _table: &str,
            prefix: &str,
        ) -> Result<Vec<(String, String)>, ControlError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_filters_for_table_parses_predicates() {
        let control = Arc::new(FixedConstants {
            rows: Mutex::new(vec![
                (
                    "filter.fact_invoice_secondary.invoice_date.min_int".to_string(),
                    "20230401".to_string(),
                ),
                (
                    "filter.fact_invoice_secondary.material_type.in_set".to_string(),
                    "ADH, EPX".to_string(),
                ),
                // Another table's keys must not bleed in.
                (
                    "filter.fact_sales.material_type.in_set".to_string(),
                    "ZZZ".to_string(),
                ),
            ]),
        });
        let backend = SqlConstants::new(control);

        let filters = filters_for_table(&backend, "fact_invoice_secondary")
            .await
            .unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].column, "invoice_date");
        assert_eq!(filters[0].min_int, Some(20230401));
        assert_eq!(filters[1].column, "material_type");
        assert_eq!(
            filters[1].in_set.as_deref(),
            Some(["ADH".to_string(), "EPX".to_string()].as_slice())
        );
    }

    #[tokio::test]
    async fn test_filters_for_table_rejects_unknown_predicate() {
        let control = Arc::new(FixedConstants {
            rows: Mutex::new(vec![(
                "filter.fact_invoice_secondary.invoice_date.between".to_string(),
                "x".to_string(),
            )]),
        });
        let backend = SqlConstants::new(control);

        let err = filters_for_table(&backend, "fact_invoice_secondary")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Unexpected { message }
            if message.contains("between")));
    }

    #[test]
    fn test_merge_filters_constant_supersedes_static_column() {
        let static_filters = vec![
            RowFilter {
                column: "invoice_date".to_string(),
                min_int: Some(20230101),
                ..Default::default()
            },
            RowFilter {
                column: "material_type".to_string(),
                in_set: Some(vec!["ADH".to_string()]),
                ..Default::default()
            },
        ];
        let dynamic = vec![RowFilter {
            column: "invoice_date".to_string(),
            min_int: Some(20230401),
            ..Default::default()
        }];

        let merged = merge_filters(&static_filters, dynamic);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].column, "material_type");
        assert_eq!(merged[1].column, "invoice_date");
        assert_eq!(merged[1].min_int, Some(20230401));
    }

    #[tokio::test]
    async fn test_sql_constants_get_and_list() {
        let control = Arc::new(FixedConstants {
            rows: Mutex::new(vec![
                ("material_type.1".to_string(), "ADH".to_string()),
                ("material_type.2".to_string(), "EPX".to_string()),
                ("date_filter_start".to_string(), "20230401".to_string()),
            ]),
        });
        let constants = SqlConstants::new(control);

        let value = constants.get("date_filter_start").await.unwrap();
        assert_eq!(value.as_deref(), Some("20230401"));
        assert!(constants.get("missing").await.unwrap().is_none());

        let listed = constants.list("material_type.").await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    fn context_with_env(env: IndexMap<String, String>) -> TenantContext {
        use crate::config::settings::{
            BusinessRules, DatabaseSettings, FetchSettings, JobSettings, PoolSettings,
            StreamLoadSettings,
        };
        use sluice_core::{BackendSettings, LocalSettings};

        TenantContext {
            tenant_id: "3607d64c-61f4-4e1f-8e2a-91b3a1f0c9d7".parse().unwrap(),
            slug: "t-demo".to_string(),
            name: "t-demo".to_string(),
            schedule_priority: 1,
            database: DatabaseSettings::default(),
            database_name: "demo_dw".to_string(),
            db_password: String::new(),
            pool: PoolSettings::default(),
            stream_load: StreamLoadSettings::default(),
            fetch: FetchSettings::default(),
            storage: BackendSettings::Local(LocalSettings {
                root: std::path::PathBuf::from("/tmp"),
                prefix: None,
            }),
            constants_backend: ConstantsBackendKind::Document,
            data_root: std::path::PathBuf::from("data/t-demo"),
            config_dir: std::path::PathBuf::from("configs/tenants/t-demo"),
            jobs: JobSettings::default(),
            business_rules: BusinessRules::default(),
            schemas: vec![],
            mappings: IndexMap::new(),
            computed: IndexMap::new(),
            env,
        }
    }

    #[tokio::test]
    async fn test_document_backend_requires_prefixed_uri() {
        let ctx = context_with_env(IndexMap::new());
        let err = DocumentConstants::from_context(&ctx).await.unwrap_err();
        assert!(matches!(err, ControlError::Document { message }
            if message.contains("BC_3607d64c_MONGODB_URI")));
    }

    #[tokio::test]
    async fn test_backend_for_relational_requires_prefixed_uri() {
        let mut ctx = context_with_env(IndexMap::new());
        ctx.constants_backend = ConstantsBackendKind::Relational;
        let control: Arc<dyn ControlPlane> = Arc::new(FixedConstants {
            rows: Mutex::new(vec![]),
        });
        let err = backend_for(&ctx, control).await.unwrap_err();
        assert!(matches!(err, ControlError::Unexpected { message }
            if message.contains("BC_3607d64c_DB_URI")));
    }

    #[tokio::test]
    async fn test_backend_for_same_database_uses_control_plane() {
        let mut ctx = context_with_env(IndexMap::new());
        ctx.constants_backend = ConstantsBackendKind::SameDatabase;
        let control: Arc<dyn ControlPlane> = Arc::new(FixedConstants {
            rows: Mutex::new(vec![("k".to_string(), "v".to_string())]),
        });
        let backend = backend_for(&ctx, control).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
