use std::sync::Arc;

use booking_flow::{FlowRunner, SessionStorage, SimulatedPaymentGateway};

use crate::{config::ServiceConfig, db::Database};

/// The store doubles as practitioner directory and appointment ledger.
pub fn create_flow_runner(
    db: &Database,
    session_storage: Arc<dyn SessionStorage>,
    config: &ServiceConfig,
) -> FlowRunner {
    let store = Arc::new(db.clone());
    let gateway = Arc::new(SimulatedPaymentGateway::new(config.payment_delay));

    FlowRunner::new(session_storage, store.clone(), gateway, store)
        .with_payment_timeout(config.payment_timeout)
}
