//! Bundled transaction strategies and the backend contract they use.

mod service;
pub mod vessel_registration;

pub use service::{CompanyRecord, RegistryService, StepReceipt, VesselCheck, VesselStatus};
pub use vessel_registration::VesselRegistrationStrategy;

use std::sync::Arc;

use crate::{StrategyRegistry, TransactionStrategy};

/// Registry with every bundled strategy, all backed by `service`.
pub fn default_registry(service: Arc<dyn RegistryService>) -> StrategyRegistry {
    StrategyRegistry::new().with(VesselRegistrationStrategy::TRANSACTION_TYPE, move || {
        Arc::new(VesselRegistrationStrategy::new(service.clone())) as Arc<dyn TransactionStrategy>
    })
}
