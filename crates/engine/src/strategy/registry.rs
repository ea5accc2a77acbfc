use std::{fmt, sync::Arc};

use formflow_types::TransactionType;
use indexmap::IndexMap;

use super::TransactionStrategy;

/// Builds a fresh strategy instance for one session.
pub type StrategyFactory = Arc<dyn Fn() -> Arc<dyn TransactionStrategy> + Send + Sync>;

/// Maps transaction types to strategy factories.
///
/// Each `initialize` call gets a new instance so strategies never share accumulated state
/// across sessions.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: IndexMap<TransactionType, StrategyFactory>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("transaction_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the same type.
    pub fn register<F>(&mut self, transaction_type: impl Into<TransactionType>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn TransactionStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(transaction_type.into(), Arc::new(factory));
        self
    }

    /// Builder-style variant of [`StrategyRegistry::register`].
    pub fn with<F>(mut self, transaction_type: impl Into<TransactionType>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn TransactionStrategy> + Send + Sync + 'static,
    {
        self.register(transaction_type, factory);
        self
    }

    pub fn create(&self, transaction_type: &TransactionType) -> Option<Arc<dyn TransactionStrategy>> {
        self.factories.get(transaction_type).map(|factory| factory())
    }

    pub fn transaction_types(&self) -> impl Iterator<Item = &TransactionType> {
        self.factories.keys()
    }

    pub fn contains(&self, transaction_type: &TransactionType) -> bool {
        self.factories.contains_key(transaction_type)
    }
}
