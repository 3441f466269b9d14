//! Maintenance commands for the warehouse core.
//!
//! The binary wires config, tracing and the selected backend; everything
//! below runs against any `WarehouseStore`.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use wms_core::ProductId;
use wms_infra::{
    InMemoryProductCatalog, InMemoryWarehouseStore, PostgresWarehouseStore, Warehouse, WarehouseStore, WmsConfig,
};
use wms_ledger::RecomputeScope;

#[derive(Debug, Parser)]
#[command(name = "wms-admin")]
#[command(about = "Maintenance tool for the warehouse stock ledger")]
pub struct Cli {
    /// Pretty-print the JSON result
    #[arg(long)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Rebuild projection rows from the ledger
    Recalculate {
        /// Only rows of this product
        #[arg(long)]
        product: Option<String>,

        /// Only keys touched on or after this date (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<NaiveDate>,
    },

    /// Snapshot available stock (default: today, UTC)
    Snapshot {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Compare the projection with the ledger
    Validate {
        /// Exit with an error when any divergence is found
        #[arg(long)]
        strict: bool,
    },

    /// Recompute the per-product aggregate
    Refresh,

    /// Create missing tables and views (Postgres only)
    Migrate,
}

impl Command {
    fn scope(product: Option<&str>, from_date: Option<NaiveDate>) -> anyhow::Result<RecomputeScope> {
        let mut scope = match product {
            Some(raw) => RecomputeScope::product(ProductId::new(raw).context("invalid --product")?),
            None => RecomputeScope::all(),
        };
        if let Some(date) = from_date {
            scope = scope.since(start_of_day(date)?);
        }
        Ok(scope)
    }
}

fn start_of_day(date: NaiveDate) -> anyhow::Result<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .with_context(|| format!("no midnight on {date}"))
}

/// Storage backend selected by configuration.
pub enum Backend {
    InMemory(Arc<InMemoryWarehouseStore>),
    Postgres(Arc<PostgresWarehouseStore>),
}

impl Backend {
    /// Connect according to `config`. Postgres schema objects are ensured on open.
    pub async fn open(config: &WmsConfig) -> anyhow::Result<Self> {
        match &config.database {
            Some(db) => {
                let store = PostgresWarehouseStore::connect(db)
                    .await
                    .context("connecting to Postgres")?;
                store.ensure_schema().await.context("ensuring schema")?;
                info!(max_connections = db.max_connections, "using Postgres backend");
                Ok(Backend::Postgres(Arc::new(store)))
            }
            None => {
                info!("using in-memory backend");
                Ok(Backend::InMemory(Arc::new(InMemoryWarehouseStore::new())))
            }
        }
    }

    pub fn store(&self) -> Arc<dyn WarehouseStore> {
        match self {
            Backend::InMemory(store) => store.clone(),
            Backend::Postgres(store) => store.clone(),
        }
    }

    pub async fn close(&self) {
        if let Backend::Postgres(store) = self {
            store.close().await;
        }
    }
}

pub type AdminWarehouse = Warehouse<Arc<dyn WarehouseStore>>;

pub fn warehouse(backend: &Backend) -> AdminWarehouse {
    Warehouse::new(backend.store(), Arc::new(InMemoryProductCatalog::new()))
}

fn to_json(value: &impl Serialize) -> anyhow::Result<serde_json::Value> {
    serde_json::to_value(value).context("serializing result")
}

/// Execute one maintenance command and return its JSON report.
pub async fn run(command: &Command, backend: &Backend, warehouse: &AdminWarehouse) -> anyhow::Result<serde_json::Value> {
    match command {
        Command::Recalculate { product, from_date } => {
            let scope = Command::scope(product.as_deref(), *from_date)?;
            to_json(&warehouse.recalculate_inventory(scope).await?)
        }
        Command::Snapshot { date } => to_json(&warehouse.create_snapshot(*date).await?),
        Command::Validate { strict } => {
            let report = warehouse.validate_integrity().await?;
            if *strict && !report.is_consistent() {
                bail!("{} projection rows diverge from the ledger", report.issues.len());
            }
            to_json(&report)
        }
        Command::Refresh => to_json(&warehouse.refresh_aggregate().await?),
        Command::Migrate => match backend {
            Backend::Postgres(store) => {
                store.ensure_schema().await?;
                Ok(serde_json::json!({ "schema": "up to date" }))
            }
            Backend::InMemory(_) => bail!("migrate needs USE_PERSISTENT_STORES=true and DATABASE_URL"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wms_ledger::NewMovement;
    use wms_core::LocationId;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["wms-admin", "recalculate", "--product", "SKU1", "--from-date", "2024-03-01"])
            .unwrap();
        assert_eq!(
            cli.command,
            Command::Recalculate {
                product: Some("SKU1".to_string()),
                from_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            }
        );

        let cli = Cli::try_parse_from(["wms-admin", "--pretty", "validate", "--strict"]).unwrap();
        assert!(cli.pretty);
        assert_eq!(cli.command, Command::Validate { strict: true });

        assert!(Cli::try_parse_from(["wms-admin", "snapshot", "--date", "yesterday"]).is_err());
    }

    #[test]
    fn dated_scope_starts_at_midnight_utc() {
        let scope = Command::scope(Some("SKU1"), NaiveDate::from_ymd_opt(2024, 3, 1)).unwrap();
        assert_eq!(scope.product_id, Some(ProductId::new("SKU1").unwrap()));
        assert_eq!(scope.from_date.unwrap().to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert!(Command::scope(Some("  "), None).is_err());
    }

    #[tokio::test]
    async fn commands_run_against_the_in_memory_backend() {
        let backend = Backend::open(&WmsConfig::in_memory()).await.unwrap();
        let warehouse = warehouse(&backend);

        let report = run(&Command::Validate { strict: true }, &backend, &warehouse).await.unwrap();
        assert_eq!(report["issues"], serde_json::json!([]));

        let stats = run(
            &Command::Recalculate {
                product: None,
                from_date: None,
            },
            &backend,
            &warehouse,
        )
        .await
        .unwrap();
        assert_eq!(stats["row_count"], 0);

        let refresh = run(&Command::Refresh, &backend, &warehouse).await.unwrap();
        assert_eq!(refresh["records_count"], 0);

        assert!(run(&Command::Migrate, &backend, &warehouse).await.is_err());
    }

    #[tokio::test]
    async fn unknown_location_surfaces_as_error() {
        let backend = Backend::open(&WmsConfig::in_memory()).await.unwrap();
        let warehouse = warehouse(&backend);
        let err = warehouse
            .create_movement(NewMovement::receive(ProductId::new("SKU1").unwrap(), LocationId::new(9), 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), wms_core::ErrorKind::NotFound);
    }
}
