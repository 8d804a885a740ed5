// Instance container: type-keyed shared instances resolved for scheduled method parameters

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Shared instance handed to a scheduled method
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Declared type of one scheduled method parameter
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamType {
    type_id: TypeId,
    type_name: &'static str,
}

impl ParamType {
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Type-based instance lookup used when binding fire-time arguments
#[cfg_attr(test, mockall::automock)]
pub trait InstanceResolver: Send + Sync {
    fn resolve(&self, param: &ParamType) -> Option<Instance>;
}

/// Thread-safe registry holding at most one instance per type
#[derive(Default)]
pub struct Container {
    instances: RwLock<HashMap<TypeId, Instance>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instance`, replacing any earlier instance of the same type
    pub fn insert<T: Any + Send + Sync>(&self, instance: Arc<T>) {
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        instances.insert(TypeId::of::<T>(), instance);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resolve(&ParamType::of::<T>())?.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstanceResolver for Container {
    fn resolve(&self, param: &ParamType) -> Option<Instance> {
        self.instances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&param.type_id())
            .cloned()
    }
}
