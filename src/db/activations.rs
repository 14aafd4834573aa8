//! Activation flag reads and writes

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{format_ts, parse_ts};
use crate::activation::{activated_state, ActivationBatch, BatchOutcome, CohortActivation, IdentifierActivation};
use crate::error::Result;

/// Cohort state; a missing row reads as inactive
pub fn get_cohort(conn: &Connection, cohort: u32) -> Result<CohortActivation> {
    let row: Option<(bool, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT activated, activated_at, released_at FROM cohort_activations WHERE cohort = ?",
            params![cohort],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    match row {
        Some((activated, activated_at, released_at)) => Ok(CohortActivation {
            activated,
            activated_at: parse_ts(activated_at)?,
            released_at: parse_ts(released_at)?,
        }),
        None => Ok(CohortActivation::inactive()),
    }
}

pub fn get_identifier(conn: &Connection, cohort: u32, identifier: &str) -> Result<Option<IdentifierActivation>> {
    let row: Option<(bool, Option<String>)> = conn
        .query_row(
            "SELECT activated, activated_at FROM identifier_activations WHERE cohort = ? AND identifier = ?",
            params![cohort, identifier],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(activated, activated_at)| {
        Ok(IdentifierActivation {
            activated,
            activated_at: parse_ts(activated_at)?,
        })
    })
    .transpose()
}

pub fn list_active_identifiers(conn: &Connection, cohort: u32) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT identifier FROM identifier_activations WHERE cohort = ? AND activated = 1 ORDER BY identifier",
    )?;
    let ids = stmt
        .query_map(params![cohort], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Write the full cohort transition in one statement
pub fn put_cohort(conn: &Connection, cohort: u32, state: &CohortActivation) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO cohort_activations (cohort, activated, activated_at, released_at, updated_at)
        VALUES (?, ?, ?, ?, datetime('now'))
        ON CONFLICT(cohort) DO UPDATE SET
            activated = excluded.activated,
            activated_at = excluded.activated_at,
            released_at = excluded.released_at,
            updated_at = excluded.updated_at
        "#,
        params![
            cohort,
            state.activated,
            state.activated_at.map(format_ts),
            state.released_at.map(format_ts),
        ],
    )?;
    Ok(())
}

/// Apply a validated batch inside one transaction
///
/// The transaction takes the write lock before reading the cohort row, so
/// the existing activation timestamp is read and kept atomically.
pub fn apply_batch(conn: &mut Connection, batch: &ActivationBatch) -> Result<BatchOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut outcome = BatchOutcome::default();

    if batch.activate_cohort {
        let state = activated_state(get_cohort(&tx, batch.cohort)?, batch.at);
        put_cohort(&tx, batch.cohort, &state)?;
        outcome.cohort_activated_at = state.activated_at;
    }

    let at = format_ts(batch.at);
    for identifier in &batch.identifiers {
        let already: bool = tx
            .query_row(
                "SELECT activated FROM identifier_activations WHERE cohort = ? AND identifier = ?",
                params![batch.cohort, identifier],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(false);

        if already {
            outcome.skipped.push(identifier.clone());
            continue;
        }

        tx.execute(
            r#"
            INSERT INTO identifier_activations (cohort, identifier, activated, activated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(cohort, identifier) DO UPDATE SET
                activated = 1,
                activated_at = excluded.activated_at
            "#,
            params![batch.cohort, identifier, at],
        )?;
        outcome.activated.push(identifier.clone());
    }

    tx.commit()?;
    debug!(
        "Applied activation batch for cohort {} ({} new, {} skipped)",
        batch.cohort,
        outcome.activated.len(),
        outcome.skipped.len()
    );
    Ok(outcome)
}

/// Active cohorts and active identifiers
pub fn count_active(conn: &Connection) -> Result<(u64, u64)> {
    let cohorts: i64 = conn.query_row(
        "SELECT COUNT(*) FROM cohort_activations WHERE activated = 1",
        [],
        |row| row.get(0),
    )?;
    let identifiers: i64 = conn.query_row(
        "SELECT COUNT(*) FROM identifier_activations WHERE activated = 1",
        [],
        |row| row.get(0),
    )?;
    Ok((cohorts as u64, identifiers as u64))
}
