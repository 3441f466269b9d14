//! Integration tests for the warehouse pipeline.
//!
//! Tests: Warehouse → InMemoryWarehouseStore → ledger + projection
//!
//! Verifies:
//! - Container commands write state and ledger entries together
//! - The projection always agrees with the ledger
//! - Stale container writes are rejected

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};

    use wms_containers::{
        ContainerCommand, ContainerError, ContainerStatus, ContainerType, NewContentLine, UnpackContainer,
    };
    use wms_core::{Aggregate, AggregateRoot, ContainerId, ErrorKind, ExpectedVersion, ProductId, QrCode};
    use wms_ledger::{
        LedgerError, MovementFilter, MovementType, NewMovement, Pagination, ProjectionKey, RecomputeScope,
    };
    use wms_locations::{Footprint, Location, NewLocation, PlacementRequest, ZoneType};

    use crate::catalog::{CatalogEntry, InMemoryProductCatalog};
    use crate::error::WmsError;
    use crate::service::{RegisterRequest, UnpackRequest, Warehouse};
    use crate::store::{InMemoryWarehouseStore, StockQuery, StoreError, WarehouseStore};

    type TestWarehouse = Warehouse<Arc<InMemoryWarehouseStore>>;

    struct Site {
        warehouse: TestWarehouse,
        store: Arc<InMemoryWarehouseStore>,
        main: Location,
        bin_a: Location,
        bin_b: Location,
    }

    fn sku(s: &str) -> ProductId {
        ProductId::new(s).unwrap()
    }

    /// WH (storage) -> Z1 -> {WH-A, WH-B}
    async fn site() -> Site {
        let store = Arc::new(InMemoryWarehouseStore::new());
        let catalog = Arc::new(InMemoryProductCatalog::new());
        catalog.insert(
            sku("SKU1"),
            CatalogEntry {
                name: "Blue widget".to_string(),
                category: Some("widgets".to_string()),
                footprint: Footprint {
                    weight: 2.0,
                    volume: 0.0,
                },
            },
        );
        let warehouse = Warehouse::new(Arc::clone(&store), catalog);

        let main = warehouse
            .create_location(&NewLocation::new("Main", ZoneType::Storage).with_code("WH"))
            .await
            .unwrap();
        let zone = warehouse
            .create_location(&NewLocation::new("Zone 1", ZoneType::Storage).under(main.id).with_code("WH-Z1"))
            .await
            .unwrap();
        let bin_a = warehouse
            .create_location(
                &NewLocation::new("Bin A", ZoneType::Storage)
                    .under(zone.id)
                    .with_code("WH-A")
                    .with_capacity(Some(100.0), None),
            )
            .await
            .unwrap();
        let bin_b = warehouse
            .create_location(
                &NewLocation::new("Bin B", ZoneType::Storage)
                    .under(zone.id)
                    .with_code("WH-B")
                    .with_capacity(Some(100.0), None),
            )
            .await
            .unwrap();

        Site {
            warehouse,
            store,
            main,
            bin_a,
            bin_b,
        }
    }

    async fn register_pallet(site: &Site, qr: &str, quantity: i64) -> ContainerId {
        site.warehouse
            .register_container(RegisterRequest {
                qr_code: qr.to_string(),
                container_type: ContainerType::Pallet,
                location_code: site.bin_a.code.clone(),
                contents: vec![NewContentLine::new(sku("SKU1"), quantity)],
                parent_container_id: None,
                metadata: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn movement_count(site: &Site) -> u64 {
        site.warehouse
            .movements(&MovementFilter::default(), Pagination::default())
            .await
            .unwrap()
            .total
    }

    #[tokio::test]
    async fn hierarchy_levels_and_descendants() {
        let site = site().await;
        assert_eq!(site.main.level, 1);
        assert_eq!(site.bin_a.level, 3);
        assert!(site.bin_a.is_descendant_of(&site.main));

        let direct = site.warehouse.descendants(site.main.id, false).await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].code, "WH-Z1");

        let all = site.warehouse.descendants(site.main.id, true).await.unwrap();
        let codes: Vec<&str> = all.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["WH-Z1", "WH-A", "WH-B"]);
        assert_eq!(all[1].depth, 2);

        let tree = site.warehouse.location_tree(2).await.unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[tokio::test]
    async fn register_then_unpack_moves_stock_out_of_the_container() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 30).await;

        let outcome = site
            .warehouse
            .unpack_container(
                id,
                UnpackRequest {
                    qr_code: "QR-100".to_string(),
                    product_id: sku("SKU1"),
                    quantity: 20,
                    batch_number: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.remaining_in_container, 10);
        assert_eq!(outcome.loose_quantity, 20);

        let container = site.warehouse.container(id).await.unwrap();
        assert_eq!(container.status(), ContainerStatus::Open);
        assert_eq!(container.total_units(), 10);

        let in_container = site.warehouse.stock_in_container("QR-100").await.unwrap();
        assert_eq!(in_container.len(), 1);
        assert_eq!(in_container[0].row.quantity, 10);
        assert_eq!(in_container[0].location_code.as_deref(), Some("WH-A"));
        assert_eq!(in_container[0].product_name.as_deref(), Some("Blue widget"));

        let loose = site.warehouse.loose_stock(Some(site.bin_a.id)).await.unwrap();
        assert_eq!(loose.len(), 1);
        assert_eq!(loose[0].row.quantity, 20);

        // receive + unpack out + unpack in
        let history = site.warehouse.container_history("QR-100").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| m.container_code.is_some()));
        assert_eq!(movement_count(&site).await, 3);

        let report = site.warehouse.validate_integrity().await.unwrap();
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn pallet_of_fifty_unpacked_twenty_then_thirty_one() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 50).await;

        let receives = site
            .warehouse
            .movements(
                &MovementFilter {
                    movement_type: Some(MovementType::Receive),
                    ..MovementFilter::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(receives.total, 1);
        let rows = site.store.stock(&StockQuery::All).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].key,
            ProjectionKey {
                product_id: sku("SKU1"),
                location_id: site.bin_a.id,
                batch_number: None,
                container_code: Some(QrCode::new("QR-100").unwrap()),
            }
        );
        assert_eq!(rows[0].quantity, 50);

        let unpack = |quantity| UnpackRequest {
            qr_code: "QR-100".to_string(),
            product_id: sku("SKU1"),
            quantity,
            batch_number: None,
        };
        let outcome = site.warehouse.unpack_container(id, unpack(20)).await.unwrap();
        assert_eq!(outcome.remaining_in_container, 30);
        assert_eq!(outcome.loose_quantity, 20);
        assert_eq!(movement_count(&site).await, 3);

        let err = site.warehouse.unpack_container(id, unpack(31)).await.unwrap_err();
        assert!(matches!(
            err,
            WmsError::Container(ContainerError::InsufficientQuantity {
                available: 30,
                requested: 31,
                ..
            })
        ));
        assert_eq!(movement_count(&site).await, 3);
        let container = site.warehouse.container(id).await.unwrap();
        assert_eq!(container.contents()[0].quantity, 30);
        assert!(site.warehouse.validate_integrity().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn unpack_reports_loose_stock_as_committed() {
        let site = site().await;
        site.warehouse
            .create_movement(NewMovement::receive(sku("SKU1"), site.bin_a.id, 5))
            .await
            .unwrap();
        let id = register_pallet(&site, "QR-100", 30).await;

        let outcome = site
            .warehouse
            .unpack_container(
                id,
                UnpackRequest {
                    qr_code: "QR-100".to_string(),
                    product_id: sku("SKU1"),
                    quantity: 12,
                    batch_number: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.remaining_in_container, 18);
        assert_eq!(outcome.loose_quantity, 17);
    }

    #[tokio::test]
    async fn container_save_returns_balances_of_touched_keys() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 30).await;
        let qr = QrCode::new("QR-100").unwrap();
        let mut container = site.store.container(id).await.unwrap().unwrap();
        let expected = ExpectedVersion::Exact(container.version());

        let events = container
            .handle(&ContainerCommand::Unpack(UnpackContainer {
                qr_code: qr.clone(),
                product_id: sku("SKU1"),
                quantity: 10,
                batch_number: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        let mut movements = Vec::new();
        for event in &events {
            container.apply(event);
            movements.extend(event.movements());
        }

        let commit = site.store.save_container(&container, expected, movements).await.unwrap();
        assert_eq!(commit.movements.len(), 2);
        assert_eq!(commit.balances.len(), 2);
        let packed = ProjectionKey {
            container_code: Some(qr),
            ..ProjectionKey::loose(sku("SKU1"), site.bin_a.id, None)
        };
        assert_eq!(commit.balance(&packed), 20);
        assert_eq!(commit.balance(&ProjectionKey::loose(sku("SKU1"), site.bin_a.id, None)), 10);
    }

    #[tokio::test]
    async fn unpacking_more_than_held_changes_nothing() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 30).await;
        let before = movement_count(&site).await;

        let err = site
            .warehouse
            .unpack_container(
                id,
                UnpackRequest {
                    qr_code: "QR-100".to_string(),
                    product_id: sku("SKU1"),
                    quantity: 31,
                    batch_number: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WmsError::Container(ContainerError::InsufficientQuantity {
                available: 30,
                requested: 31,
                ..
            })
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert_eq!(movement_count(&site).await, before);
        let container = site.warehouse.container(id).await.unwrap();
        assert_eq!(container.contents()[0].quantity, 30);
        assert_eq!(container.status(), ContainerStatus::Sealed);
    }

    #[tokio::test]
    async fn unpack_with_wrong_qr_is_rejected() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 30).await;

        let err = site
            .warehouse
            .unpack_container(
                id,
                UnpackRequest {
                    qr_code: "QR-999".to_string(),
                    product_id: sku("SKU1"),
                    quantity: 1,
                    batch_number: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WmsError::Container(ContainerError::QrMismatch { .. })));
    }

    #[tokio::test]
    async fn failed_second_unpack_entry_rolls_back_the_whole_command() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 30).await;
        let before = movement_count(&site).await;

        site.store.fail_next_append_at(1);
        let err = site
            .warehouse
            .unpack_container(
                id,
                UnpackRequest {
                    qr_code: "QR-100".to_string(),
                    product_id: sku("SKU1"),
                    quantity: 5,
                    batch_number: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operational);

        assert_eq!(movement_count(&site).await, before);
        let container = site.warehouse.container(id).await.unwrap();
        assert_eq!(container.total_units(), 30);
        assert_eq!(container.version(), 1);
        assert!(site.warehouse.loose_stock(None).await.unwrap().is_empty());
        assert!(site.warehouse.validate_integrity().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn duplicate_qr_code_is_a_conflict() {
        let site = site().await;
        register_pallet(&site, "QR-100", 5).await;

        let err = site
            .warehouse
            .register_container(RegisterRequest {
                qr_code: "QR-100".to_string(),
                container_type: ContainerType::Box,
                location_code: site.bin_b.code.clone(),
                contents: Vec::new(),
                parent_container_id: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn direct_movement_cannot_draw_from_a_container() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 50).await;
        let before = movement_count(&site).await;

        let err = site
            .warehouse
            .create_movement(
                NewMovement::ship(sku("SKU1"), site.bin_a.id, 40).in_container(QrCode::new("QR-100").unwrap()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WmsError::Ledger(LedgerError::InvalidMovement(_))));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(movement_count(&site).await, before);

        let container = site.warehouse.container(id).await.unwrap();
        assert_eq!(container.total_units(), 50);
        let in_container = site.warehouse.stock_in_container("QR-100").await.unwrap();
        assert_eq!(in_container[0].row.quantity, 50);
        assert!(site.warehouse.validate_integrity().await.unwrap().is_consistent());

        let moved = site.warehouse.relocate_container(id, "WH-B").await.unwrap();
        assert_eq!(moved.location_id(), Some(site.bin_b.id));
    }

    #[tokio::test]
    async fn relocation_transfers_every_line() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 30).await;

        let moved = site.warehouse.relocate_container(id, "WH-B").await.unwrap();
        assert_eq!(moved.location_id(), Some(site.bin_b.id));

        let at_a = site.warehouse.stock_by_location(site.bin_a.id).await.unwrap();
        assert!(at_a.is_empty());
        let at_b = site.warehouse.stock_by_location(site.bin_b.id).await.unwrap();
        assert_eq!(at_b.len(), 1);
        assert_eq!(at_b[0].row.quantity, 30);

        let history = site.warehouse.container_history("QR-100").await.unwrap();
        assert_eq!(history[0].movement_type, MovementType::Transfer);
        assert_eq!(history[0].from_location_id, Some(site.bin_a.id));
        assert_eq!(history[0].to_location_id, Some(site.bin_b.id));

        let in_b = site
            .warehouse
            .containers_in_location(site.bin_b.id, None, None)
            .await
            .unwrap();
        assert_eq!(in_b.len(), 1);
        assert_eq!(in_b[0].total_units, 30);

        // same location: nothing to record
        let before = movement_count(&site).await;
        site.warehouse.relocate_container(id, "WH-B").await.unwrap();
        assert_eq!(movement_count(&site).await, before);
    }

    #[tokio::test]
    async fn inactive_locations_refuse_stock_and_containers() {
        let site = site().await;
        site.warehouse.deactivate_location(site.bin_b.id).await.unwrap();

        let err = site
            .warehouse
            .create_movement(NewMovement::receive(sku("SKU1"), site.bin_b.id, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, WmsError::Ledger(LedgerError::LocationInactive(_))));

        let err = site
            .warehouse
            .register_container(RegisterRequest {
                qr_code: "QR-200".to_string(),
                container_type: ContainerType::Box,
                location_code: "WH-B".to_string(),
                contents: vec![NewContentLine::new(sku("SKU1"), 1)],
                parent_container_id: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(movement_count(&site).await, 0);
    }

    #[tokio::test]
    async fn stale_container_version_is_rejected() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 30).await;
        let stale = site.store.container(id).await.unwrap().unwrap();

        site.warehouse
            .update_container_status(id, ContainerStatus::InTransit)
            .await
            .unwrap();

        let err = site
            .store
            .save_container(&stale, ExpectedVersion::Exact(stale.version()), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        let current = site.warehouse.container(id).await.unwrap();
        assert_eq!(current.status(), ContainerStatus::InTransit);
    }

    #[tokio::test]
    async fn drifted_projection_is_reported_then_repaired() {
        let site = site().await;
        site.warehouse
            .create_movement(NewMovement::receive(sku("SKU1"), site.bin_a.id, 10))
            .await
            .unwrap();

        site.store
            .force_projection_row(ProjectionKey::loose(sku("SKU1"), site.bin_a.id, None), 7)
            .unwrap();

        let report = site.warehouse.validate_integrity().await.unwrap();
        assert_eq!(report.issues.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.from_ledger, 10);
        assert_eq!(issue.from_projection, 7);
        assert_eq!(issue.difference, 3);
        assert_eq!(issue.location_code.as_deref(), Some("WH-A"));

        let stats = site.warehouse.recalculate_inventory(RecomputeScope::all()).await.unwrap();
        assert_eq!(stats.row_count, 1);
        assert_eq!(stats.total_units, 10);
        assert!(site.warehouse.validate_integrity().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn unprojected_ledger_entry_is_reported_then_repaired() {
        let site = site().await;
        let id = register_pallet(&site, "QR-100", 30).await;
        site.store
            .force_ledger_entry(NewMovement::receive(sku("SKU1"), site.bin_b.id, 4))
            .unwrap();

        let report = site.warehouse.validate_integrity().await.unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].key.location_id, site.bin_b.id);
        assert_eq!(report.issues[0].difference, 4);

        site.warehouse.recalculate_inventory(RecomputeScope::all()).await.unwrap();
        assert!(site.warehouse.validate_integrity().await.unwrap().is_consistent());
        assert_eq!(site.warehouse.stock_by_location(site.bin_b.id).await.unwrap()[0].row.quantity, 4);
        assert_eq!(site.warehouse.container(id).await.unwrap().total_units(), 30);
    }

    #[tokio::test]
    async fn shipping_more_than_on_hand_fails() {
        let site = site().await;
        site.warehouse
            .create_movement(NewMovement::receive(sku("SKU1"), site.bin_a.id, 4))
            .await
            .unwrap();

        let err = site
            .warehouse
            .create_movement(NewMovement::ship(sku("SKU1"), site.bin_a.id, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, WmsError::Ledger(LedgerError::InsufficientStock { .. })));

        let rows = site.warehouse.stock_by_product(&sku("SKU1")).await.unwrap();
        assert_eq!(rows[0].row.quantity, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_movements_conserve_totals() {
        let site = Arc::new(site().await);

        let mut tasks = Vec::new();
        for i in 0..40 {
            let site = Arc::clone(&site);
            tasks.push(tokio::spawn(async move {
                let to = if i % 2 == 0 { site.bin_a.id } else { site.bin_b.id };
                site.warehouse
                    .create_movement(NewMovement::receive(sku("SKU1"), to, 3))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let site = Arc::clone(&site);
            tasks.push(tokio::spawn(async move {
                site.warehouse
                    .create_movement(NewMovement::transfer(sku("SKU1"), site.bin_a.id, site.bin_b.id, 2))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let rows = site.warehouse.stock_by_product(&sku("SKU1")).await.unwrap();
        let total: i64 = rows.iter().map(|r| r.row.quantity).sum();
        assert_eq!(total, 120);
        let at_b: i64 = rows
            .iter()
            .filter(|r| r.row.key.location_id == site.bin_b.id)
            .map(|r| r.row.quantity)
            .sum();
        assert_eq!(at_b, 80);
        assert_eq!(movement_count(&site).await, 50);
        assert!(site.warehouse.validate_integrity().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn snapshot_for_the_same_date_replaces_the_previous_one() {
        let site = site().await;
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        site.warehouse
            .create_movement(NewMovement::receive(sku("SKU1"), site.bin_a.id, 10))
            .await
            .unwrap();

        let first = site.warehouse.create_snapshot(Some(date)).await.unwrap();
        assert_eq!(first.records_count, 1);
        assert_eq!(first.total_units, 10);

        site.warehouse
            .create_movement(NewMovement::receive(sku("SKU2"), site.bin_b.id, 5))
            .await
            .unwrap();
        let second = site.warehouse.create_snapshot(Some(date)).await.unwrap();
        assert_eq!(second.records_count, 2);
        assert_eq!(second.total_units, 15);

        let rows = site.warehouse.snapshot_rows(date).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn aggregate_is_empty_until_refreshed() {
        let site = site().await;
        register_pallet(&site, "QR-100", 30).await;
        site.warehouse
            .create_movement(NewMovement::receive(sku("SKU1"), site.bin_b.id, 5))
            .await
            .unwrap();

        let before = site.warehouse.product_summary().unwrap();
        assert!(before.rows.is_empty());
        assert!(before.refreshed_at.is_none());

        let refresh = site.warehouse.refresh_aggregate().await.unwrap();
        assert_eq!(refresh.records_count, 1);
        assert_eq!(refresh.total_units, 35);

        let aggregate = site.warehouse.product_summary().unwrap();
        let row = aggregate.product(&sku("SKU1")).unwrap();
        assert_eq!(row.total_quantity, 35);
        assert_eq!(row.in_containers, 30);
        assert_eq!(row.loose, 5);
        assert_eq!(row.locations_count, 2);
        assert_eq!(row.product_name.as_deref(), Some("Blue widget"));
        assert_eq!(row.category.as_deref(), Some("widgets"));
    }

    #[tokio::test]
    async fn placement_prefers_the_least_loaded_bin() {
        let site = site().await;
        // 10 units × 2 kg = 20 kg in WH-A
        site.warehouse
            .create_movement(NewMovement::receive(sku("SKU1"), site.bin_a.id, 10))
            .await
            .unwrap();

        let request = PlacementRequest {
            product_id: sku("SKU1"),
            quantity: 5,
            zone_type: ZoneType::Storage,
        };
        let candidate = site.warehouse.find_available_location(&request).await.unwrap();
        assert_eq!(candidate.code, "WH-B");

        let too_big = PlacementRequest {
            quantity: 60,
            ..request
        };
        let err = site.warehouse.find_available_location(&too_big).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
