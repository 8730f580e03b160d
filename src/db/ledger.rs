//! Ledger tables: attendance, performance, verified sets.
//!
//! Absent records are final at the storage level too: the attendance
//! upsert refuses to overwrite a row whose status is `absent`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use opentelemetry::KeyValue;

use super::Db;
use crate::error::{Error, Result};
use crate::ledger::{AttendanceLedger, PerformanceLedger, VerificationLedger};
use crate::model::{AttendanceRecord, AttendanceStatus, PerformanceRecord, Rating, UserId, VerifiedSet};
use crate::telemetry::metrics;

// Ids are BIGINT columns.
fn to_db(id: UserId) -> Result<i64> {
    i64::try_from(id.0)
        .map_err(|_| Error::InvalidInput(format!("user id {id} is out of the storable range")))
}

fn ids_to_db(ids: &[UserId]) -> Result<Vec<i64>> {
    ids.iter().copied().map(to_db).collect()
}

fn from_db(raw: i64) -> Result<UserId> {
    u64::try_from(raw)
        .map(UserId)
        .map_err(|_| Error::LedgerUnavailable(format!("bad stored user id {raw}")))
}

fn record_write(ledger: &'static str) {
    metrics::ledger_writes().add(1, &[KeyValue::new("ledger", ledger)]);
}

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct AttendanceRow {
    user_id: i64,
    status: String,
    marked_by: String,
    marked_at: DateTime<Utc>,
    verified_by: Option<i64>,
    verified_at: Option<DateTime<Utc>>,
}

impl AttendanceRow {
    fn try_into_record(self) -> Result<(UserId, AttendanceRecord)> {
        Ok((
            from_db(self.user_id)?,
            AttendanceRecord {
                status: self.status.parse()?,
                marked_by: self.marked_by.parse()?,
                marked_at: self.marked_at,
                verified_by: self.verified_by.map(from_db).transpose()?,
                verified_at: self.verified_at,
            },
        ))
    }
}

#[async_trait]
impl AttendanceLedger for Db {
    async fn get_attendance(&self, date: NaiveDate, user: UserId) -> Result<Option<AttendanceRecord>> {
        let row: Option<AttendanceRow> = sqlx::query_as(
            "SELECT user_id, status, marked_by, marked_at, verified_by, verified_at
             FROM attendance WHERE date = $1 AND user_id = $2",
        )
        .bind(date)
        .bind(to_db(user)?)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| r.try_into_record().map(|(_, rec)| rec))
            .transpose()
    }

    async fn put_attendance(&self, date: NaiveDate, user: UserId, record: AttendanceRecord) -> Result<()> {
        let rows_affected = sqlx::query(
            "INSERT INTO attendance (date, user_id, status, marked_by, marked_at, verified_by, verified_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (date, user_id) DO UPDATE SET
                status = EXCLUDED.status,
                marked_by = EXCLUDED.marked_by,
                marked_at = EXCLUDED.marked_at,
                verified_by = EXCLUDED.verified_by,
                verified_at = EXCLUDED.verified_at
             WHERE attendance.status <> 'absent'",
        )
        .bind(date)
        .bind(to_db(user)?)
        .bind(record.status.to_string())
        .bind(record.marked_by.to_string())
        .bind(record.marked_at)
        .bind(record.verified_by.map(to_db).transpose()?)
        .bind(record.verified_at)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::AttendanceFinal {
                date,
                user,
                status: AttendanceStatus::Absent,
            });
        }
        record_write("attendance");
        Ok(())
    }

    async fn list_attendance(
        &self,
        date: NaiveDate,
        ids: &[UserId],
    ) -> Result<Vec<(UserId, AttendanceRecord)>> {
        let rows: Vec<AttendanceRow> = sqlx::query_as(
            "SELECT user_id, status, marked_by, marked_at, verified_by, verified_at
             FROM attendance WHERE date = $1 AND user_id = ANY($2)
             ORDER BY user_id",
        )
        .bind(date)
        .bind(ids_to_db(ids)?)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(AttendanceRow::try_into_record).collect()
    }
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct PerformanceRow {
    worker_id: i64,
    rating: i16,
    notes: String,
    marked_by: i64,
    marked_at: DateTime<Utc>,
}

impl PerformanceRow {
    fn try_into_record(self) -> Result<(UserId, PerformanceRecord)> {
        let rating = u8::try_from(self.rating)
            .map_err(|_| Error::LedgerUnavailable(format!("bad stored rating {}", self.rating)))
            .and_then(Rating::try_from)?;
        Ok((
            from_db(self.worker_id)?,
            PerformanceRecord {
                rating,
                notes: self.notes,
                marked_by: from_db(self.marked_by)?,
                marked_at: self.marked_at,
            },
        ))
    }
}

#[async_trait]
impl PerformanceLedger for Db {
    async fn get_performance(&self, date: NaiveDate, worker: UserId) -> Result<Option<PerformanceRecord>> {
        let row: Option<PerformanceRow> = sqlx::query_as(
            "SELECT worker_id, rating, notes, marked_by, marked_at
             FROM performance WHERE date = $1 AND worker_id = $2",
        )
        .bind(date)
        .bind(to_db(worker)?)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| r.try_into_record().map(|(_, rec)| rec))
            .transpose()
    }

    async fn put_performance(
        &self,
        date: NaiveDate,
        worker: UserId,
        record: PerformanceRecord,
    ) -> Result<()> {
        // Records are write-once per day.
        let rows_affected = sqlx::query(
            "INSERT INTO performance (date, worker_id, rating, notes, marked_by, marked_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (date, worker_id) DO NOTHING",
        )
        .bind(date)
        .bind(to_db(worker)?)
        .bind(i16::from(record.rating.value()))
        .bind(&record.notes)
        .bind(to_db(record.marked_by)?)
        .bind(record.marked_at)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::AlreadyRecorded { date, user: worker });
        }
        record_write("performance");
        Ok(())
    }

    async fn list_performance(
        &self,
        date: NaiveDate,
        ids: &[UserId],
    ) -> Result<Vec<(UserId, PerformanceRecord)>> {
        let rows: Vec<PerformanceRow> = sqlx::query_as(
            "SELECT worker_id, rating, notes, marked_by, marked_at
             FROM performance WHERE date = $1 AND worker_id = ANY($2)
             ORDER BY worker_id",
        )
        .bind(date)
        .bind(ids_to_db(ids)?)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(PerformanceRow::try_into_record).collect()
    }
}

// ---------------------------------------------------------------------------
// Verified sets
// ---------------------------------------------------------------------------

#[async_trait]
impl VerificationLedger for Db {
    async fn get_verified(&self, verifier: UserId, date: NaiveDate) -> Result<Option<VerifiedSet>> {
        let row: Option<(Vec<i64>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT subject_ids, verified_at FROM verified_sets
             WHERE date = $1 AND verifier_id = $2",
        )
        .bind(date)
        .bind(to_db(verifier)?)
        .fetch_optional(self.pool())
        .await?;

        let Some((subjects, verified_at)) = row else {
            return Ok(None);
        };
        let subjects = subjects.into_iter().map(from_db).collect::<Result<Vec<_>>>()?;
        Ok(Some(VerifiedSet::new(verifier, date, subjects, verified_at)))
    }

    async fn put_verified(&self, set: VerifiedSet) -> Result<()> {
        let subjects = set.subject_ids.iter().copied().map(to_db).collect::<Result<Vec<i64>>>()?;
        sqlx::query(
            "INSERT INTO verified_sets (date, verifier_id, subject_ids, verified_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (date, verifier_id) DO UPDATE SET
                subject_ids = EXCLUDED.subject_ids,
                verified_at = EXCLUDED.verified_at",
        )
        .bind(set.date)
        .bind(to_db(set.verifier_id)?)
        .bind(subjects)
        .bind(set.verified_at)
        .execute(self.pool())
        .await?;

        record_write("verification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_outside_bigint_are_refused() {
        assert_eq!(to_db(UserId(42)).unwrap(), 42);
        assert_eq!(to_db(UserId(i64::MAX as u64)).unwrap(), i64::MAX);
        assert!(matches!(to_db(UserId(u64::MAX)), Err(Error::InvalidInput(_))));
        assert!(matches!(
            ids_to_db(&[UserId(1), UserId(1 << 63)]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn negative_stored_ids_are_unreadable() {
        assert_eq!(from_db(7).unwrap(), UserId(7));
        assert!(matches!(from_db(-1), Err(Error::LedgerUnavailable(_))));
    }
}
