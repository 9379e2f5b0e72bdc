//! End-to-end pipeline tests over the local filesystem provider, a mock
//! control plane, and a recording stream-load transport.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sluice::config::settings::{
    BusinessRules, DatabaseSettings, FetchSettings, JobSettings, PoolSettings, RowFilter,
    StreamLoadSettings, TableJob,
};
use sluice::config::ConstantsBackendKind;
use sluice::constants::SqlConstants;
use sluice::context::{LoadMode, TenantContext};
use sluice::error::ControlError;
use sluice::fetch::BlobFetcher;
use sluice::load::{
    ChunkRequest, ChunkTransport, ControlPlane, LiveColumn, StreamLoadResponse, StreamLoader,
    TransportFailure,
};
use sluice::pipeline::{PipelineRunner, TableStatus};
use sluice::schema::{CastErrorPolicy, ColumnMapping, ColumnType, ComputedColumn, ComputedRule, MappingEntry};
use sluice_core::{BackendSettings, BlobStore, LocalSettings};

// ---------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------

/// Control plane over a fixed column list, recording truncates and
/// alters and serving business constants from a fixed key-value set.
struct MockControl {
    columns: Mutex<Vec<LiveColumn>>,
    truncates: Mutex<Vec<String>>,
    alters: Mutex<Vec<(String, String, u32)>>,
    constants: Mutex<Vec<(String, String)>>,
    fail_truncate: bool,
}

impl MockControl {
    fn new(columns: Vec<LiveColumn>) -> Self {
        Self {
            columns: Mutex::new(columns),
            truncates: Mutex::new(Vec::new()),
            alters: Mutex::new(Vec::new()),
            constants: Mutex::new(Vec::new()),
            fail_truncate: false,
        }
    }
}

fn live(ordinal: u32, name: &str, data_type: &str, nullable: bool) -> LiveColumn {
    let char_max_len = data_type
        .strip_prefix("varchar(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|width| width.parse().ok());
    LiveColumn {
        ordinal,
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable,
        char_max_len,
    }
}

#[async_trait]
impl ControlPlane for MockControl {
    async fn describe_table(&self, _table: &str) -> Result<Vec<LiveColumn>, ControlError> {
        Ok(self.columns.lock().unwrap().clone())
    }

    async fn truncate_table(&self, table: &str) -> Result<(), ControlError> {
        if self.fail_truncate {
            return Err(ControlError::Unexpected {
                message: "truncate rejected".to_string(),
            });
        }
        self.truncates.lock().unwrap().push(table.to_string());
        Ok(())
    }

    async fn widen_varchar(
        &self,
        table: &str,
        column: &str,
        new_len: u32,
    ) -> Result<(), ControlError> {
        self.alters
            .lock()
            .unwrap()
            .push((table.to_string(), column.to_string(), new_len));
        for live_column in self.columns.lock().unwrap().iter_mut() {
            if live_column.name == column {
                live_column.data_type = format!("varchar({new_len})");
                live_column.char_max_len = Some(new_len);
            }
        }
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
            .constants
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Transport that acknowledges every chunk and records what it saw.
struct CountingTransport {
    requests: Mutex<Vec<(ChunkRequest, Vec<u8>)>>,
}

impl CountingTransport {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    fn bodies(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| String::from_utf8(body.clone()).unwrap())
            .collect()
    }
}

#[async_trait]
impl ChunkTransport for CountingTransport {
    async fn put_chunk(
        &self,
        request: &ChunkRequest,
        body: Vec<u8>,
    ) -> Result<StreamLoadResponse, TransportFailure> {
        let rows = body.iter().filter(|b| **b == b'\n').count() as u64;
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), body));
        Ok(StreamLoadResponse {
            status: "Success".to_string(),
            message: "OK".to_string(),
            loaded_rows: rows,
            filtered_rows: 0,
            unselected_rows: 0,
            error_url: None,
            load_time_ms: 1,
        })
    }
}

// ---------------------------------------------------------------------
// Fixture assembly
// ---------------------------------------------------------------------

fn entry(source: &str, target: &str, spec: &str) -> MappingEntry {
    MappingEntry {
        source: source.to_string(),
        target: target.to_string(),
        target_type: spec.parse().unwrap(),
        nullable: true,
        default: None,
        clean: vec![],
        on_cast_error: CastErrorPolicy::Null,
    }
}

fn dealer_mapping() -> ColumnMapping {
    ColumnMapping {
        table: "dim_dealer_master".to_string(),
        // Mapping order differs from the live order on purpose; the
        // loader must re-project before serialization.
        columns: vec![
            entry("dealername", "dealer_name", "VARCHAR(255)"),
            entry("activeflag", "active_flag", "INT"),
            entry("dealercode", "dealer_code", "VARCHAR(32)"),
        ],
    }
}

fn dealer_live_columns() -> Vec<LiveColumn> {
    vec![
        live(1, "active_flag", "int", true),
        live(2, "dealer_code", "varchar(32)", false),
        live(3, "dealer_name", "varchar(255)", true),
    ]
}

struct Fixture {
    ctx: TenantContext,
    control: Arc<MockControl>,
    transport: Arc<CountingTransport>,
}

fn build_context(
    data_root: &Path,
    store_root: &Path,
    jobs: JobSettings,
    mappings: IndexMap<String, ColumnMapping>,
    computed: IndexMap<String, Vec<ComputedColumn>>,
    filters: IndexMap<String, Vec<RowFilter>>,
) -> TenantContext {
    TenantContext {
        tenant_id: "3607d64c-61f4-4e1f-8e2a-91b3a1f0c9d7".parse::<Uuid>().unwrap(),
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
            root: store_root.to_path_buf(),
            prefix: None,
        }),
        constants_backend: ConstantsBackendKind::SameDatabase,
        data_root: data_root.to_path_buf(),
        config_dir: data_root.join("config"),
        jobs,
        business_rules: BusinessRules { filters },
        schemas: vec![],
        mappings,
        computed,
        env: IndexMap::new(),
    }
}

async fn runner_for<'a>(
    fixture: &'a Fixture,
) -> PipelineRunner<'a> {
    let store = BlobStore::connect(fixture.ctx.storage.clone()).await.unwrap();
    let fetcher = BlobFetcher::new(Arc::new(store), fixture.ctx.fetch.clone());
    // Same-database constants: the mock control plane serves them.
    let constants = Arc::new(SqlConstants::new(fixture.control.clone()));
    let loader = StreamLoader::new(
        fixture.transport.clone(),
        fixture.ctx.stream_load.clone(),
    );
    PipelineRunner::new(
        &fixture.ctx,
        fetcher,
        fixture.control.clone(),
        constants,
        loader,
        CancellationToken::new(),
        None,
    )
}

fn dealer_job() -> TableJob {
    TableJob {
        table: "dim_dealer_master".to_string(),
        blob_prefix: "Incremental/DimDealer_MS/LatestData".to_string(),
        suffix: None,
    }
}

fn write_dealer_csv(store_root: &Path, name: &str, rows: usize, start: usize) {
    let dir = store_root.join("Incremental/DimDealer_MS/LatestData");
    std::fs::create_dir_all(&dir).unwrap();
    let mut csv = String::from("dealercode,dealername,activeflag\n");
    for i in 0..rows {
        let n = start + i;
        csv.push_str(&format!("D{n:04},Dealer {n},{}\n", n % 2));
    }
    std::fs::write(dir.join(name), csv).unwrap();
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

#[tokio::test]
async fn dimension_full_refresh_happy_path() {
    let store = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();
    write_dealer_csv(store.path(), "part_1.csv", 100, 0);
    write_dealer_csv(store.path(), "part_2.csv", 50, 100);

    let mut mappings = IndexMap::new();
    mappings.insert("dim_dealer_master".to_string(), dealer_mapping());

    let fixture = Fixture {
        ctx: build_context(
            data.path(),
            store.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            IndexMap::new(),
        ),
        control: Arc::new(MockControl::new(dealer_live_columns())),
        transport: Arc::new(CountingTransport::new()),
    };

    let runner = runner_for(&fixture).await;
    let outcome = runner
        .run_table(&dealer_job(), LoadMode::Incremental, true)
        .await;

    assert_eq!(outcome.status, TableStatus::Success);
    assert_eq!(outcome.rows_loaded, 150);
    // Truncate ran exactly once, before any chunk.
    assert_eq!(
        fixture.control.truncates.lock().unwrap().as_slice(),
        ["dim_dealer_master"]
    );

    // Even though the mapping emits
    // [dealer_name, active_flag, dealer_code], every serialized row must
    // lead with the integer flag.
    for body in fixture.transport.bodies() {
        for row in body.lines() {
            let first = row.split('\u{1}').next().unwrap();
            assert!(
                first == "0" || first == "1",
                "first field should be the active_flag integer, got '{first}'"
            );
        }
    }
    let requests = fixture.transport.requests.lock().unwrap();
    assert!(requests
        .iter()
        .all(|(req, _)| req.columns == "active_flag,dealer_code,dealer_name"));
}

#[tokio::test]
async fn auto_widening_issues_exactly_one_alter() {
    let store = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();

    let dir = store.path().join("Incremental/DimDealer_MS/LatestData");
    std::fs::create_dir_all(&dir).unwrap();
    let long_name = "A".repeat(73);
    std::fs::write(
        dir.join("part_1.csv"),
        format!("dealercode,dealername,activeflag\nD0001,{long_name},1\n"),
    )
    .unwrap();

    let mut columns = dealer_live_columns();
    columns[2] = live(3, "dealer_name", "varchar(50)", true);

    let mut mappings = IndexMap::new();
    mappings.insert("dim_dealer_master".to_string(), dealer_mapping());

    let fixture = Fixture {
        ctx: build_context(
            data.path(),
            store.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            IndexMap::new(),
        ),
        control: Arc::new(MockControl::new(columns)),
        transport: Arc::new(CountingTransport::new()),
    };

    let runner = runner_for(&fixture).await;
    let outcome = runner
        .run_table(&dealer_job(), LoadMode::Incremental, false)
        .await;

    assert_eq!(outcome.status, TableStatus::Success);
    assert_eq!(outcome.rows_loaded, 1);

    let alters = fixture.control.alters.lock().unwrap();
    assert_eq!(alters.len(), 1);
    assert_eq!(
        alters[0],
        (
            "dim_dealer_master".to_string(),
            "dealer_name".to_string(),
            128
        )
    );
}

#[tokio::test]
async fn truncate_failure_aborts_before_any_load() {
    let store = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();
    write_dealer_csv(store.path(), "part_1.csv", 10, 0);

    let mut mappings = IndexMap::new();
    mappings.insert("dim_dealer_master".to_string(), dealer_mapping());

    let mut control = MockControl::new(dealer_live_columns());
    control.fail_truncate = true;

    let fixture = Fixture {
        ctx: build_context(
            data.path(),
            store.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            IndexMap::new(),
        ),
        control: Arc::new(control),
        transport: Arc::new(CountingTransport::new()),
    };

    let runner = runner_for(&fixture).await;
    let outcome = runner
        .run_table(&dealer_job(), LoadMode::Incremental, true)
        .await;

    assert_eq!(outcome.status, TableStatus::Failed);
    assert_eq!(outcome.failed_stage, Some("load"));
    // No chunk ever reached the endpoint.
    assert!(fixture.transport.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fact_incremental_composite_keys_are_stable_across_runs() {
    let store = tempfile::TempDir::new().unwrap();

    let dir = store.path().join("Incremental/FactInvoiceSecondary/LatestData");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("fis_1.csv"),
        "invoicedate,customercode,invoiceno\n20230401,C1,N1\n20230402,C2,N2\n",
    )
    .unwrap();

    let mapping = ColumnMapping {
        table: "fact_invoice_secondary".to_string(),
        columns: vec![
            entry("invoicedate", "invoice_date", "VARCHAR(16)"),
            entry("customercode", "customer_code", "VARCHAR(16)"),
            entry("invoiceno", "invoice_no", "VARCHAR(16)"),
        ],
    };
    let computed = vec![ComputedColumn {
        name: "fis_sg_id_cc_in".to_string(),
        rule: ComputedRule::Concat {
            columns: vec![
                "invoice_date".to_string(),
                "customer_code".to_string(),
                "invoice_no".to_string(),
            ],
            separator: "_".to_string(),
            output_type: ColumnType::Varchar(255),
        },
    }];
    let columns = vec![
        live(1, "invoice_date", "varchar(16)", true),
        live(2, "customer_code", "varchar(16)", true),
        live(3, "invoice_no", "varchar(16)", true),
        live(4, "fis_sg_id_cc_in", "varchar(255)", false),
    ];

    let job = TableJob {
        table: "fact_invoice_secondary".to_string(),
        blob_prefix: "Incremental/FactInvoiceSecondary/LatestData".to_string(),
        suffix: None,
    };

    let mut bodies_per_run = Vec::new();
    for _ in 0..2 {
        let data = tempfile::TempDir::new().unwrap();
        let mut mappings = IndexMap::new();
        mappings.insert("fact_invoice_secondary".to_string(), mapping.clone());
        let mut computed_map = IndexMap::new();
        computed_map.insert("fact_invoice_secondary".to_string(), computed.clone());

        let fixture = Fixture {
            ctx: build_context(
                data.path(),
                store.path(),
                JobSettings::default(),
                mappings,
                computed_map,
                IndexMap::new(),
            ),
            control: Arc::new(MockControl::new(columns.clone())),
            transport: Arc::new(CountingTransport::new()),
        };

        let runner = runner_for(&fixture).await;
        let outcome = runner.run_table(&job, LoadMode::Incremental, false).await;
        assert_eq!(outcome.status, TableStatus::Success);
        assert_eq!(outcome.rows_loaded, 2);
        bodies_per_run.push(fixture.transport.bodies());
    }

    // Two successive runs over the same blobs submit identical logical
    // rows; the database's primary-key merge absorbs the second load.
    assert_eq!(bodies_per_run[0], bodies_per_run[1]);
    assert!(bodies_per_run[0][0].contains("20230401_C1_N1"));
}

#[tokio::test]
async fn provider_swap_produces_identical_loads() {
    // Two tenants identical except for the store shape: one reads a plain
    // root, the other a container-style base prefix. Same files, same
    // mapping, same computed key.
    let plain = tempfile::TempDir::new().unwrap();
    let prefixed = tempfile::TempDir::new().unwrap();
    write_dealer_csv(plain.path(), "part_1.csv", 20, 0);
    write_dealer_csv(&prefixed.path().join("containers/prod"), "part_1.csv", 20, 0);

    let stores = [
        BackendSettings::Local(LocalSettings {
            root: plain.path().to_path_buf(),
            prefix: None,
        }),
        BackendSettings::Local(LocalSettings {
            root: prefixed.path().to_path_buf(),
            prefix: Some("containers/prod".to_string()),
        }),
    ];

    let mut bodies_per_store = Vec::new();
    for storage in stores {
        let data = tempfile::TempDir::new().unwrap();
        let mut mappings = IndexMap::new();
        mappings.insert("dim_dealer_master".to_string(), dealer_mapping());

        let mut ctx = build_context(
            data.path(),
            plain.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            IndexMap::new(),
        );
        ctx.storage = storage;

        let fixture = Fixture {
            ctx,
            control: Arc::new(MockControl::new(dealer_live_columns())),
            transport: Arc::new(CountingTransport::new()),
        };

        let runner = runner_for(&fixture).await;
        let outcome = runner
            .run_table(&dealer_job(), LoadMode::Incremental, false)
            .await;
        assert_eq!(outcome.status, TableStatus::Success);
        assert_eq!(outcome.rows_loaded, 20);
        bodies_per_store.push(fixture.transport.bodies());
    }

    assert_eq!(bodies_per_store[0], bodies_per_store[1]);
}

#[tokio::test]
async fn partial_failure_isolates_the_malformed_table() {
    let store = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();

    // Three tables; the middle one has a ragged CSV.
    for (prefix, content) in [
        ("Incremental/TableA/LatestData", "code\nA1\nA2\n"),
        ("Incremental/TableB/LatestData", "code\nbad,extra,fields\n"),
        ("Incremental/TableC/LatestData", "code\nC1\n"),
    ] {
        let dir = store.path().join(prefix);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("data.csv"), content).unwrap();
    }

    let mut mappings = IndexMap::new();
    for table in ["table_a", "table_b", "table_c"] {
        mappings.insert(
            table.to_string(),
            ColumnMapping {
                table: table.to_string(),
                columns: vec![entry("code", "code", "VARCHAR(16)")],
            },
        );
    }

    let jobs = vec![
        TableJob {
            table: "table_a".to_string(),
            blob_prefix: "Incremental/TableA/LatestData".to_string(),
            suffix: None,
        },
        TableJob {
            table: "table_b".to_string(),
            blob_prefix: "Incremental/TableB/LatestData".to_string(),
            suffix: None,
        },
        TableJob {
            table: "table_c".to_string(),
            blob_prefix: "Incremental/TableC/LatestData".to_string(),
            suffix: None,
        },
    ];

    let fixture = Fixture {
        ctx: build_context(
            data.path(),
            store.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            IndexMap::new(),
        ),
        control: Arc::new(MockControl::new(vec![live(1, "code", "varchar(16)", true)])),
        transport: Arc::new(CountingTransport::new()),
    };

    let runner = runner_for(&fixture).await;
    let outcome = runner.run_job(&jobs, LoadMode::Incremental, false).await;

    assert_eq!(outcome.per_table.len(), 3);
    assert_eq!(outcome.per_table["table_a"].status, TableStatus::Success);
    assert_eq!(outcome.per_table["table_b"].status, TableStatus::Failed);
    assert_eq!(
        outcome.per_table["table_b"].failed_stage,
        Some("convert")
    );
    assert_eq!(outcome.per_table["table_c"].status, TableStatus::Success);
    assert!(!outcome.is_success());
    assert!(outcome.is_partial());
}

#[tokio::test]
async fn empty_blob_set_reports_success_with_zero_rows() {
    let store = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();
    // Prefix exists but holds nothing loadable.
    std::fs::create_dir_all(store.path().join("Incremental/DimDealer_MS/LatestData")).unwrap();

    let mut mappings = IndexMap::new();
    mappings.insert("dim_dealer_master".to_string(), dealer_mapping());

    let fixture = Fixture {
        ctx: build_context(
            data.path(),
            store.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            IndexMap::new(),
        ),
        control: Arc::new(MockControl::new(dealer_live_columns())),
        transport: Arc::new(CountingTransport::new()),
    };

    let runner = runner_for(&fixture).await;
    let outcome = runner
        .run_table(&dealer_job(), LoadMode::Incremental, false)
        .await;

    assert_eq!(outcome.status, TableStatus::Success);
    assert_eq!(outcome.rows_loaded, 0);
    assert!(fixture.transport.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn row_filters_drop_old_fact_rows() {
    let store = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();

    let dir = store.path().join("Incremental/FactInvoiceSecondary/LatestData");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("fis_1.csv"),
        "invoicedate,customercode\n20230301,C1\n20230401,C2\n20240101,C3\n",
    )
    .unwrap();

    let mut mappings = IndexMap::new();
    mappings.insert(
        "fact_invoice_secondary".to_string(),
        ColumnMapping {
            table: "fact_invoice_secondary".to_string(),
            columns: vec![
                entry("invoicedate", "invoice_date", "INT"),
                entry("customercode", "customer_code", "VARCHAR(16)"),
            ],
        },
    );
    let mut filters = IndexMap::new();
    filters.insert(
        "fact_invoice_secondary".to_string(),
        vec![RowFilter {
            column: "invoice_date".to_string(),
            min_int: Some(20230401),
            ..Default::default()
        }],
    );

    let fixture = Fixture {
        ctx: build_context(
            data.path(),
            store.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            filters,
        ),
        control: Arc::new(MockControl::new(vec![
            live(1, "invoice_date", "int", true),
            live(2, "customer_code", "varchar(16)", true),
        ])),
        transport: Arc::new(CountingTransport::new()),
    };

    let job = TableJob {
        table: "fact_invoice_secondary".to_string(),
        blob_prefix: "Incremental/FactInvoiceSecondary/LatestData".to_string(),
        suffix: None,
    };
    let runner = runner_for(&fixture).await;
    let outcome = runner.run_table(&job, LoadMode::Incremental, false).await;

    assert_eq!(outcome.status, TableStatus::Success);
    assert_eq!(outcome.rows_loaded, 2);
    assert_eq!(outcome.rows_filtered, 1);
}

#[tokio::test]
async fn constant_backed_filters_supersede_static_rules() {
    let store = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();

    let dir = store.path().join("Incremental/FactInvoiceSecondary/LatestData");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("fis_1.csv"),
        "invoicedate,customercode\n20230301,C1\n20230401,C2\n20240101,C3\n",
    )
    .unwrap();

    let mut mappings = IndexMap::new();
    mappings.insert(
        "fact_invoice_secondary".to_string(),
        ColumnMapping {
            table: "fact_invoice_secondary".to_string(),
            columns: vec![
                entry("invoicedate", "invoice_date", "INT"),
                entry("customercode", "customer_code", "VARCHAR(16)"),
            ],
        },
    );
    // The static rule would keep all three rows; the constants backend
    // tightens the threshold and must win for the same column.
    let mut filters = IndexMap::new();
    filters.insert(
        "fact_invoice_secondary".to_string(),
        vec![RowFilter {
            column: "invoice_date".to_string(),
            min_int: Some(20230101),
            ..Default::default()
        }],
    );

    let control = MockControl::new(vec![
        live(1, "invoice_date", "int", true),
        live(2, "customer_code", "varchar(16)", true),
    ]);
    control.constants.lock().unwrap().push((
        "filter.fact_invoice_secondary.invoice_date.min_int".to_string(),
        "20230401".to_string(),
    ));

    let fixture = Fixture {
        ctx: build_context(
            data.path(),
            store.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            filters,
        ),
        control: Arc::new(control),
        transport: Arc::new(CountingTransport::new()),
    };

    let job = TableJob {
        table: "fact_invoice_secondary".to_string(),
        blob_prefix: "Incremental/FactInvoiceSecondary/LatestData".to_string(),
        suffix: None,
    };
    let runner = runner_for(&fixture).await;
    let outcome = runner.run_table(&job, LoadMode::Incremental, false).await;

    assert_eq!(outcome.status, TableStatus::Success);
    assert_eq!(outcome.rows_loaded, 2);
    assert_eq!(outcome.rows_filtered, 1);
}

#[tokio::test]
async fn all_writes_stay_under_the_tenant_root() {
    let store = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();
    write_dealer_csv(store.path(), "part_1.csv", 5, 0);

    let mut mappings = IndexMap::new();
    mappings.insert("dim_dealer_master".to_string(), dealer_mapping());

    let fixture = Fixture {
        ctx: build_context(
            data.path(),
            store.path(),
            JobSettings::default(),
            mappings,
            IndexMap::new(),
            IndexMap::new(),
        ),
        control: Arc::new(MockControl::new(dealer_live_columns())),
        transport: Arc::new(CountingTransport::new()),
    };

    let runner = runner_for(&fixture).await;
    let outcome = runner
        .run_table(&dealer_job(), LoadMode::Incremental, false)
        .await;
    assert_eq!(outcome.status, TableStatus::Success);

    // The run's working tree lives entirely under the tenant root.
    let dirs = fixture.ctx.stage_dirs(LoadMode::Incremental).unwrap();
    for dir in [&dirs.source_files, &dirs.raw_parquet, &dirs.cleaned_parquet] {
        assert!(fixture.ctx.owns_path(dir));
    }
}
