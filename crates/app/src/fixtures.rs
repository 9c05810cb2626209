//! Shared scaffolding for the crate's integration-style tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use talento_storage::Database;

/// Connects an isolated in-memory database with the schema applied and a
/// small world seeded: one organization (user 1), two applicants (María,
/// user 2, with guardian Rosa; Pedro, user 3, without) and two campaigns.
pub async fn seeded_database() -> Database {
    let db = Database::connect("sqlite::memory:?cache=shared")
        .await
        .expect("connect");
    db.run_migrations().await.expect("migrations");

    sqlx::query(
        "INSERT INTO users (id, name, email, phone, created_at) VALUES \
         (1, 'Fundación Manos', 'contacto@manos.org', NULL, '2024-01-01T00:00:00Z'), \
         (2, 'María González', 'maria@example.com', '+56911111111', '2024-01-01T00:00:00Z'), \
         (3, 'Pedro Soto', 'pedro@example.com', NULL, '2024-01-01T00:00:00Z')",
    )
    .execute(db.pool())
    .await
    .expect("insert users");

    sqlx::query("INSERT INTO organizations (id, user_id, name) VALUES (1, 1, 'Fundación Manos')")
        .execute(db.pool())
        .await
        .expect("insert organization");

    sqlx::query(
        "INSERT INTO guardians (id, user_id, name, phone, relationship) \
         VALUES (1, NULL, 'Rosa González', '+56922222222', 'madre')",
    )
    .execute(db.pool())
    .await
    .expect("insert guardian");

    sqlx::query(
        "INSERT INTO applicants (id, user_id, guardian_id, name, accumulated_hours) VALUES \
         (1, 2, 1, 'María González', 12), \
         (2, 3, NULL, 'Pedro Soto', 0)",
    )
    .execute(db.pool())
    .await
    .expect("insert applicants");

    sqlx::query(
        "INSERT INTO campaigns (id, organization_id, name, description, capacity, status, starts_at, ends_at) VALUES \
         (1, 1, 'Reforestación Cerro Verde', 'Plantación de árboles nativos', 20, 'open', '2024-06-01T09:00:00Z', '2024-06-30T18:00:00Z'), \
         (2, 1, 'Comedor Solidario', NULL, 10, 'open', '2024-07-01T09:00:00Z', '2024-07-31T18:00:00Z')",
    )
    .execute(db.pool())
    .await
    .expect("insert campaigns");

    db
}

/// A clock frozen at `at`, for deterministic timestamps.
pub fn fixed_clock(at: DateTime<Utc>) -> Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> {
    Arc::new(move || at)
}
