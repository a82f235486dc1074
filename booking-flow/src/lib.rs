pub mod catalog;
pub mod error;
pub mod flow;
pub mod ledger;
pub mod payment;
pub mod runner;
pub mod storage;
pub mod storage_sqlite;

// Re-export commonly used types
pub use catalog::{Practitioner, PractitionerDirectory, Specialty, StaticDirectory};
pub use error::{FlowError, Result};
pub use flow::{BookingAction, BookingFlow, BookingSummary, Selection, Step};
pub use ledger::{
    AppointmentLedger, AppointmentRecord, AppointmentStatus, InMemoryLedger, NewAppointment,
};
pub use payment::{
    PaymentGateway, PaymentOutcome, PaymentRequest, PhoneNumber, SimulatedPaymentGateway,
};
pub use runner::FlowRunner;
pub use storage::{InMemorySessionStorage, Session, SessionStorage};
pub use storage_sqlite::SqliteSessionStorage;
