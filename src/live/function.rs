use std::{collections::HashMap, sync::Arc};

use sha2::{Digest, Sha256};

use crate::live::types::DEFAULT_UNIT_FUNCTION;

pub const FUNCTION_HASH: &str = DEFAULT_UNIT_FUNCTION;
pub const FUNCTION_MODULO: &str = "modulo";

/// Maps a routing variable into `[0, modulo)`.
///
/// Implementations must be pure: the same variable always lands on the same
/// index, across calls and across processes.
pub trait UnitFunction: Send + Sync {
    fn compute(&self, variable: &str, modulo: u32) -> u32;
}

pub struct HashUnitFunction;

impl UnitFunction for HashUnitFunction {
    fn compute(&self, variable: &str, modulo: u32) -> u32 {
        if modulo == 0 {
            return 0;
        }
        let digest = Sha256::digest(variable.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % u64::from(modulo)) as u32
    }
}

/// Uses the trailing decimal digits of the variable (e.g. a numeric user id).
/// Variables without trailing digits are hashed instead.
pub struct ModuloUnitFunction;

impl UnitFunction for ModuloUnitFunction {
    fn compute(&self, variable: &str, modulo: u32) -> u32 {
        if modulo == 0 {
            return 0;
        }
        let digits: String = variable
            .trim()
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .take(18)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        match digits.parse::<u64>() {
            Ok(number) => (number % u64::from(modulo)) as u32,
            Err(_) => HashUnitFunction.compute(variable, modulo),
        }
    }
}

#[derive(Clone)]
pub struct UnitFunctionRegistry {
    functions: HashMap<String, Arc<dyn UnitFunction>>,
}

impl UnitFunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(FUNCTION_HASH, Arc::new(HashUnitFunction));
        registry.register(FUNCTION_MODULO, Arc::new(ModuloUnitFunction));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn UnitFunction>) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UnitFunction>> {
        self.functions.get(name).cloned()
    }
}

impl Default for UnitFunctionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
