use crate::customer::Customer;
use crate::error::{PipelineError, PipelineResult};
use crate::sources::SourceFingerprint;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Stamp written on every row of one load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStamp {
    pub batch_id: String,
    pub loaded_at: DateTime<Utc>,
}

impl BatchStamp {
    pub fn new() -> Self {
        BatchStamp {
            batch_id: uuid::Uuid::new_v4().to_string(),
            loaded_at: Utc::now(),
        }
    }
}

impl Default for BatchStamp {
    fn default() -> Self {
        Self::new()
    }
}

/// One committed batch, as recorded in `batch_loads`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLoad {
    pub batch_id: String,
    pub loaded_at: DateTime<Utc>,
    pub customers: usize,
    pub warnings: usize,
    /// Every input file the batch read, with its SHA-256
    pub sources: Vec<SourceFingerprint>,
}

impl BatchLoad {
    pub fn new(
        stamp: &BatchStamp,
        customers: usize,
        warnings: usize,
        sources: Vec<SourceFingerprint>,
    ) -> Self {
        BatchLoad {
            batch_id: stamp.batch_id.clone(),
            loaded_at: stamp.loaded_at,
            customers,
            warnings,
            sources,
        }
    }
}

/// Open the database, hand the connection to `f`, and close it on every path.
pub fn with_connection<T, F>(db_path: &Path, f: F) -> PipelineResult<T>
where
    F: FnOnce(&mut Connection) -> PipelineResult<T>,
{
    let mut conn = Connection::open(db_path).map_err(|e| {
        PipelineError::Persist(format!("cannot open {}: {}", db_path.display(), e))
    })?;
    debug!(path = %db_path.display(), "database connection opened");

    let result = f(&mut conn);

    let closed = conn
        .close()
        .map_err(|(_, e)| PipelineError::Persist(format!("cannot close database: {}", e)));
    debug!(path = %db_path.display(), "database connection closed");

    // The work's own error wins over a close error
    let value = result?;
    closed?;
    Ok(value)
}

pub fn setup_database(conn: &Connection) -> PipelineResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Customers Table
    // Surrogate id; full_name and the card/bank identifiers stay UNIQUE
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            full_name TEXT NOT NULL UNIQUE,
            age INTEGER NOT NULL,
            sex TEXT,
            vehicle_make TEXT NOT NULL,
            vehicle_model TEXT NOT NULL,
            vehicle_year INTEGER NOT NULL,
            vehicle_type TEXT,
            retired BOOLEAN NOT NULL,
            dependants INTEGER NOT NULL,
            marital_status TEXT NOT NULL,
            salary INTEGER NOT NULL,
            pension INTEGER NOT NULL,
            company TEXT NOT NULL,
            commute_distance REAL,
            address_postcode TEXT NOT NULL,
            iban TEXT NOT NULL UNIQUE,
            credit_card_number INTEGER NOT NULL UNIQUE,
            credit_card_security_code INTEGER NOT NULL UNIQUE,
            credit_card_start_date TEXT NOT NULL,
            credit_card_end_date TEXT NOT NULL,
            address_main TEXT,
            address_city TEXT,
            debt REAL NOT NULL,
            batch_id TEXT NOT NULL,
            loaded_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Batch Loads Table (audit trail, one row per committed batch)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS batch_loads (
            batch_id TEXT PRIMARY KEY,
            loaded_at TEXT NOT NULL,
            customer_count INTEGER NOT NULL,
            warning_count INTEGER NOT NULL,
            source_fingerprints TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_customers_postcode ON customers(address_postcode)",
        [],
    )?;

    Ok(())
}

/// Insert every customer in one transaction.
///
/// All-or-nothing: the first constraint violation rolls back the whole batch
/// and is reported with the offending full_name.
pub fn insert_customers(
    conn: &mut Connection,
    customers: &[Customer],
    stamp: &BatchStamp,
) -> PipelineResult<usize> {
    let tx = conn.transaction()?;
    let loaded_at = stamp.loaded_at.to_rfc3339();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO customers (
                first_name, last_name, full_name, age, sex,
                vehicle_make, vehicle_model, vehicle_year, vehicle_type,
                retired, dependants, marital_status, salary, pension, company,
                commute_distance, address_postcode, iban,
                credit_card_number, credit_card_security_code,
                credit_card_start_date, credit_card_end_date,
                address_main, address_city, debt, batch_id, loaded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        )?;

        for c in customers {
            let result = stmt.execute(params![
                c.first_name,
                c.last_name,
                c.full_name,
                c.age,
                c.sex,
                c.vehicle_make,
                c.vehicle_model,
                c.vehicle_year,
                c.vehicle_type,
                c.retired,
                c.dependants,
                c.marital_status,
                c.salary,
                c.pension,
                c.company,
                c.commute_distance,
                c.address_postcode,
                c.iban,
                c.credit_card_number,
                c.credit_card_security_code,
                c.credit_card_start_date,
                c.credit_card_end_date,
                c.address_main,
                c.address_city,
                c.debt,
                stamp.batch_id,
                loaded_at,
            ]);

            match result {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, msg))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    // tx drops here without commit → rollback
                    return Err(PipelineError::UniqueViolation {
                        full_name: c.full_name.clone(),
                        message: msg.unwrap_or_else(|| err.to_string()),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    tx.commit()?;
    info!(rows = customers.len(), batch = %stamp.batch_id, "customers committed");

    Ok(customers.len())
}

/// Record a committed batch
pub fn record_batch_load(conn: &Connection, load: &BatchLoad) -> PipelineResult<()> {
    let sources_json = serde_json::to_string(&load.sources)
        .map_err(|e| PipelineError::Persist(format!("cannot serialize fingerprints: {}", e)))?;

    conn.execute(
        "INSERT INTO batch_loads (
            batch_id, loaded_at, customer_count, warning_count, source_fingerprints
        ) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            load.batch_id,
            load.loaded_at.to_rfc3339(),
            load.customers as i64,
            load.warnings as i64,
            sources_json,
        ],
    )?;

    Ok(())
}

pub fn get_batch_load(conn: &Connection, batch_id: &str) -> PipelineResult<Option<BatchLoad>> {
    let load = conn
        .query_row(
            "SELECT batch_id, loaded_at, customer_count, warning_count, source_fingerprints
             FROM batch_loads
             WHERE batch_id = ?1",
            params![batch_id],
            batch_load_from_row,
        )
        .optional()?;

    Ok(load)
}

/// Every recorded batch, oldest first
pub fn list_batch_loads(conn: &Connection) -> PipelineResult<Vec<BatchLoad>> {
    let mut stmt = conn.prepare(
        "SELECT batch_id, loaded_at, customer_count, warning_count, source_fingerprints
         FROM batch_loads
         ORDER BY loaded_at",
    )?;

    let loads = stmt
        .query_map([], batch_load_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(loads)
}

fn batch_load_from_row(row: &Row<'_>) -> rusqlite::Result<BatchLoad> {
    let loaded_at: String = row.get(1)?;
    let customers: i64 = row.get(2)?;
    let warnings: i64 = row.get(3)?;
    let sources_json: String = row.get(4)?;

    Ok(BatchLoad {
        batch_id: row.get(0)?,
        loaded_at: DateTime::parse_from_rfc3339(&loaded_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
            .with_timezone(&Utc),
        customers: customers as usize,
        warnings: warnings as usize,
        sources: serde_json::from_str(&sources_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
    })
}

pub fn get_all_customers(conn: &Connection) -> PipelineResult<Vec<Customer>> {
    let mut stmt = conn.prepare(
        "SELECT first_name, last_name, full_name, age, sex,
                vehicle_make, vehicle_model, vehicle_year, vehicle_type,
                retired, dependants, marital_status, salary, pension, company,
                commute_distance, address_postcode, iban,
                credit_card_number, credit_card_security_code,
                credit_card_start_date, credit_card_end_date,
                address_main, address_city, debt
         FROM customers
         ORDER BY id",
    )?;

    let customers = stmt
        .query_map([], |row| {
            Ok(Customer {
                first_name: row.get(0)?,
                last_name: row.get(1)?,
                full_name: row.get(2)?,
                age: row.get(3)?,
                sex: row.get(4)?,
                vehicle_make: row.get(5)?,
                vehicle_model: row.get(6)?,
                vehicle_year: row.get(7)?,
                vehicle_type: row.get(8)?,
                retired: row.get(9)?,
                dependants: row.get(10)?,
                marital_status: row.get(11)?,
                salary: row.get(12)?,
                pension: row.get(13)?,
                company: row.get(14)?,
                commute_distance: row.get(15)?,
                address_postcode: row.get(16)?,
                iban: row.get(17)?,
                credit_card_number: row.get(18)?,
                credit_card_security_code: row.get(19)?,
                credit_card_start_date: row.get(20)?,
                credit_card_end_date: row.get(21)?,
                address_main: row.get(22)?,
                address_city: row.get(23)?,
                debt: row.get(24)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(customers)
}

pub fn verify_count(conn: &Connection) -> PipelineResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?;

    Ok(count)
}
