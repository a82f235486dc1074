//! SQLite store: users, practitioners, the appointment ledger, prescriptions and the
//! pharmacy catalog.

use std::str::FromStr;

use async_trait::async_trait;
use booking_flow::{
    AppointmentLedger, FlowError, NewAppointment, Practitioner, PractitionerDirectory, Specialty,
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{AppointmentRow, Medication, Prescription, User};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Referenced user or practitioner does not exist")]
    UnknownReference,

    #[error("Practitioner {doctor_id} is already booked at {date}")]
    SlotTaken { doctor_id: String, date: String },
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotTaken { doctor_id, date } => FlowError::SlotTaken { doctor_id, date },
            other => FlowError::StorageError(other.to_string()),
        }
    }
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT UNIQUE NOT NULL,
        role TEXT NOT NULL,
        wallet_balance REAL NOT NULL DEFAULT 0.0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS practitioners (
        id TEXT PRIMARY KEY REFERENCES users(id),
        specialty TEXT NOT NULL,
        price INTEGER NOT NULL CHECK (price >= 0)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS appointments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id TEXT NOT NULL REFERENCES users(id),
        doctor_id TEXT NOT NULL REFERENCES users(id),
        specialty TEXT NOT NULL,
        date TEXT NOT NULL,
        status TEXT NOT NULL
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS appointments_doctor_slot
        ON appointments (doctor_id, date) WHERE status <> 'cancelled'"#,
    r#"CREATE TABLE IF NOT EXISTS prescriptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id TEXT NOT NULL REFERENCES users(id),
        doctor_id TEXT NOT NULL REFERENCES users(id),
        content TEXT NOT NULL,
        date TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS medications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        price REAL NOT NULL,
        pharmacy_name TEXT NOT NULL,
        lat REAL NOT NULL,
        lng REAL NOT NULL
    )"#,
];

struct SeedUser {
    id: &'static str,
    name: &'static str,
    email: &'static str,
    role: &'static str,
    wallet_balance: f64,
}

const SEED_USERS: &[SeedUser] = &[
    SeedUser {
        id: "p1",
        name: "João Silva",
        email: "joao@example.com",
        role: "patient",
        wallet_balance: 25000.0,
    },
    SeedUser {
        id: "d1",
        name: "Dra. Ana Paula",
        email: "ana@kudimed.ao",
        role: "doctor",
        wallet_balance: 0.0,
    },
    SeedUser {
        id: "d2",
        name: "Dr. Manuel Bento",
        email: "manuel@kudimed.ao",
        role: "doctor",
        wallet_balance: 0.0,
    },
    SeedUser {
        id: "f1",
        name: "Farmácia Central",
        email: "central@farmacia.ao",
        role: "pharmacist",
        wallet_balance: 0.0,
    },
];

const SEED_PRACTITIONERS: &[(&str, Specialty, i64)] = &[
    ("d1", Specialty::GeneralPractice, 15000),
    ("d2", Specialty::Pediatrics, 18000),
];

const SEED_MEDICATIONS: &[(&str, f64, &str, f64, f64)] = &[
    ("Paracetamol 500mg", 1200.0, "Farmácia Prenda", -8.8383, 13.2344),
    ("Amoxicilina 1g", 4500.0, "Farmácia Talatona", -8.9167, 13.1833),
];

const SEED_PRESCRIPTIONS: &[(&str, &str, &str, &str)] = &[(
    "p1",
    "d1",
    "Paracetamol 500mg, 1 comprimido de 8 em 8 horas durante 3 dias",
    "2025-04-20",
)];

const APPOINTMENT_COLUMNS: &str =
    "a.id, a.patient_id, a.doctor_id, a.specialty, a.date, a.status";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // every connection to :memory: is its own database, so keep exactly one alive
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Database schema ready");
        Ok(())
    }

    /// Inserts the reference data when the users table is empty.
    pub async fn seed(&self) -> Result<(), StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for user in SEED_USERS {
            sqlx::query(
                "INSERT INTO users (id, name, email, role, wallet_balance) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(user.id)
            .bind(user.name)
            .bind(user.email)
            .bind(user.role)
            .bind(user.wallet_balance)
            .execute(&mut *tx)
            .await?;
        }
        for (id, specialty, price) in SEED_PRACTITIONERS {
            sqlx::query("INSERT INTO practitioners (id, specialty, price) VALUES (?, ?, ?)")
                .bind(*id)
                .bind(specialty.label())
                .bind(*price)
                .execute(&mut *tx)
                .await?;
        }
        for (name, price, pharmacy, lat, lng) in SEED_MEDICATIONS {
            sqlx::query(
                "INSERT INTO medications (name, price, pharmacy_name, lat, lng) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(*name)
            .bind(*price)
            .bind(*pharmacy)
            .bind(*lat)
            .bind(*lng)
            .execute(&mut *tx)
            .await?;
        }
        for (patient, doctor, content, date) in SEED_PRESCRIPTIONS {
            sqlx::query(
                "INSERT INTO prescriptions (patient_id, doctor_id, content, date) VALUES (?, ?, ?, ?)",
            )
            .bind(*patient)
            .bind(*doctor)
            .bind(*content)
            .bind(*date)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!("Seeded reference data");
        Ok(())
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, role, wallet_balance FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn list_practitioners(
        &self,
        specialty: Option<Specialty>,
    ) -> Result<Vec<Practitioner>, StoreError> {
        let practitioners = sqlx::query_as::<_, Practitioner>(
            r#"
            SELECT p.id, u.name, p.specialty, p.price
            FROM practitioners p
            JOIN users u ON p.id = u.id
            WHERE ?1 IS NULL OR p.specialty = ?1
            ORDER BY p.id
            "#,
        )
        .bind(specialty.map(|s| s.label()))
        .fetch_all(&self.pool)
        .await?;
        Ok(practitioners)
    }

    /// Writes a `scheduled` appointment, refusing a second booking of the same slot.
    pub async fn create_appointment(&self, appointment: &NewAppointment) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (taken,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM appointments WHERE doctor_id = ? AND date = ? AND status <> 'cancelled'",
        )
        .bind(&appointment.doctor_id)
        .bind(&appointment.date)
        .fetch_one(&mut *tx)
        .await?;
        if taken > 0 {
            return Err(StoreError::SlotTaken {
                doctor_id: appointment.doctor_id.clone(),
                date: appointment.date.clone(),
            });
        }

        let result = sqlx::query(
            "INSERT INTO appointments (patient_id, doctor_id, specialty, date, status) VALUES (?, ?, ?, ?, 'scheduled')",
        )
        .bind(&appointment.patient_id)
        .bind(&appointment.doctor_id)
        .bind(&appointment.specialty)
        .bind(&appointment.date)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_write_error(e, appointment))?;
        tx.commit().await?;

        let id = result.last_insert_rowid();
        info!(
            appointment_id = id,
            patient_id = %appointment.patient_id,
            doctor_id = %appointment.doctor_id,
            date = %appointment.date,
            "Appointment recorded"
        );
        Ok(id)
    }

    pub async fn list_for_patient(&self, patient_id: &str) -> Result<Vec<AppointmentRow>, StoreError> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS}, u.name AS doctor_name \
             FROM appointments a JOIN users u ON a.doctor_id = u.id \
             WHERE a.patient_id = ? ORDER BY a.id"
        );
        let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn list_for_practitioner(
        &self,
        practitioner_id: &str,
    ) -> Result<Vec<AppointmentRow>, StoreError> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS}, u.name AS patient_name \
             FROM appointments a JOIN users u ON a.patient_id = u.id \
             WHERE a.doctor_id = ? ORDER BY a.id"
        );
        let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(practitioner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Full catalog, or the entries whose name contains `search` (case-insensitive).
    pub async fn list_medications(&self, search: Option<&str>) -> Result<Vec<Medication>, StoreError> {
        let medications = sqlx::query_as::<_, Medication>(
            "SELECT id, name, price, pharmacy_name, lat, lng FROM medications ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let Some(needle) = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
        else {
            return Ok(medications);
        };
        Ok(medications
            .into_iter()
            .filter(|m| m.name.to_lowercase().contains(&needle))
            .collect())
    }

    pub async fn list_prescriptions(&self, patient_id: &str) -> Result<Vec<Prescription>, StoreError> {
        let prescriptions = sqlx::query_as::<_, Prescription>(
            r#"
            SELECT p.id, p.patient_id, p.doctor_id, p.content, p.date, u.name AS doctor_name
            FROM prescriptions p
            JOIN users u ON p.doctor_id = u.id
            WHERE p.patient_id = ?
            ORDER BY p.id
            "#,
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(prescriptions)
    }
}

fn classify_write_error(err: sqlx::Error, appointment: &NewAppointment) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::SlotTaken {
                doctor_id: appointment.doctor_id.clone(),
                date: appointment.date.clone(),
            };
        }
        if db_err.is_foreign_key_violation() {
            return StoreError::UnknownReference;
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl AppointmentLedger for Database {
    async fn create(&self, appointment: NewAppointment) -> booking_flow::Result<i64> {
        Ok(self.create_appointment(&appointment).await?)
    }

    async fn slot_taken(&self, doctor_id: &str, date: &str) -> booking_flow::Result<bool> {
        let (taken,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM appointments WHERE doctor_id = ? AND date = ? AND status <> 'cancelled'",
        )
        .bind(doctor_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken > 0)
    }
}

#[async_trait]
impl PractitionerDirectory for Database {
    async fn find_practitioner(&self, id: &str) -> booking_flow::Result<Option<Practitioner>> {
        let practitioner = sqlx::query_as::<_, Practitioner>(
            r#"
            SELECT p.id, u.name, p.specialty, p.price
            FROM practitioners p
            JOIN users u ON p.id = u.id
            WHERE p.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(practitioner)
    }
}
