//! Idempotent DDL for the Postgres backend.
//!
//! `inventory` and `inventory_snapshots` key on `''` for a missing batch or
//! container so the composite primary key stays total.

pub(super) const STATEMENTS: &[(&str, &str)] = &[
    (
        "locations",
        r#"
        CREATE TABLE IF NOT EXISTS locations (
            id          BIGSERIAL PRIMARY KEY,
            code        TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            zone_type   TEXT NOT NULL,
            level       SMALLINT NOT NULL CHECK (level BETWEEN 1 AND 5),
            path        TEXT NOT NULL,
            parent_id   BIGINT NULL REFERENCES locations (id),
            max_weight  DOUBLE PRECISION NULL,
            max_volume  DOUBLE PRECISION NULL,
            is_active   BOOLEAN NOT NULL DEFAULT TRUE,
            is_pickable BOOLEAN NOT NULL DEFAULT FALSE,
            metadata    JSONB NULL,
            created_at  TIMESTAMPTZ NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "locations_path_idx",
        "CREATE INDEX IF NOT EXISTS locations_path_idx ON locations (path text_pattern_ops)",
    ),
    (
        "locations_parent_idx",
        "CREATE INDEX IF NOT EXISTS locations_parent_idx ON locations (parent_id)",
    ),
    (
        "movements",
        r#"
        CREATE TABLE IF NOT EXISTS movements (
            id               BIGSERIAL PRIMARY KEY,
            event_id         UUID NOT NULL UNIQUE,
            movement_type    TEXT NOT NULL,
            product_id       TEXT NOT NULL,
            from_location_id BIGINT NULL REFERENCES locations (id),
            to_location_id   BIGINT NULL REFERENCES locations (id),
            quantity         BIGINT NOT NULL CHECK (quantity > 0),
            batch_number     TEXT NULL,
            container_code   TEXT NULL,
            user_name        TEXT NULL,
            reason           TEXT NULL,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CHECK (from_location_id IS NOT NULL OR to_location_id IS NOT NULL),
            CHECK (from_location_id IS DISTINCT FROM to_location_id)
        )
        "#,
    ),
    (
        "movements_product_idx",
        "CREATE INDEX IF NOT EXISTS movements_product_idx ON movements (product_id, created_at)",
    ),
    (
        "movements_container_idx",
        "CREATE INDEX IF NOT EXISTS movements_container_idx ON movements (container_code) WHERE container_code IS NOT NULL",
    ),
    (
        "movements_created_idx",
        "CREATE INDEX IF NOT EXISTS movements_created_idx ON movements (created_at DESC, id DESC)",
    ),
    (
        "inventory",
        r#"
        CREATE TABLE IF NOT EXISTS inventory (
            product_id     TEXT NOT NULL,
            location_id    BIGINT NOT NULL REFERENCES locations (id),
            batch_number   TEXT NOT NULL DEFAULT '',
            container_code TEXT NOT NULL DEFAULT '',
            quantity       BIGINT NOT NULL CHECK (quantity > 0),
            status         TEXT NOT NULL DEFAULT 'available',
            updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (product_id, location_id, batch_number, container_code)
        )
        "#,
    ),
    (
        "inventory_location_idx",
        "CREATE INDEX IF NOT EXISTS inventory_location_idx ON inventory (location_id)",
    ),
    (
        "containers_id_seq",
        "CREATE SEQUENCE IF NOT EXISTS containers_id_seq",
    ),
    (
        "containers",
        r#"
        CREATE TABLE IF NOT EXISTS containers (
            id                  BIGINT PRIMARY KEY,
            qr_code             TEXT NOT NULL UNIQUE,
            container_type      TEXT NOT NULL,
            status              TEXT NOT NULL,
            location_id         BIGINT NOT NULL REFERENCES locations (id),
            parent_container_id BIGINT NULL REFERENCES containers (id),
            metadata            JSONB NULL,
            version             BIGINT NOT NULL,
            created_at          TIMESTAMPTZ NOT NULL,
            updated_at          TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "containers_location_idx",
        "CREATE INDEX IF NOT EXISTS containers_location_idx ON containers (location_id, status)",
    ),
    (
        "container_contents",
        r#"
        CREATE TABLE IF NOT EXISTS container_contents (
            container_id BIGINT NOT NULL REFERENCES containers (id) ON DELETE CASCADE,
            line_no      INTEGER NOT NULL,
            product_id   TEXT NOT NULL,
            batch_number TEXT NULL,
            quantity     BIGINT NOT NULL CHECK (quantity >= 0),
            is_scanned   BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (container_id, line_no)
        )
        "#,
    ),
    (
        "inventory_snapshots",
        r#"
        CREATE TABLE IF NOT EXISTS inventory_snapshots (
            snapshot_date  DATE NOT NULL,
            product_id     TEXT NOT NULL,
            location_id    BIGINT NOT NULL,
            batch_number   TEXT NOT NULL DEFAULT '',
            container_code TEXT NOT NULL DEFAULT '',
            quantity       BIGINT NOT NULL,
            status         TEXT NOT NULL,
            PRIMARY KEY (snapshot_date, product_id, location_id, batch_number, container_code)
        )
        "#,
    ),
    (
        "movement_sides",
        r#"
        CREATE OR REPLACE VIEW movement_sides AS
            SELECT id, product_id, to_location_id AS location_id,
                   COALESCE(batch_number, '') AS batch_number,
                   COALESCE(container_code, '') AS container_code,
                   quantity AS delta, created_at
            FROM movements
            WHERE to_location_id IS NOT NULL
            UNION ALL
            SELECT id, product_id, from_location_id AS location_id,
                   COALESCE(batch_number, '') AS batch_number,
                   COALESCE(container_code, '') AS container_code,
                   -quantity AS delta, created_at
            FROM movements
            WHERE from_location_id IS NOT NULL
        "#,
    ),
];
