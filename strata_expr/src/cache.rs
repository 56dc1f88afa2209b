use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::Expr;

/// A cache for expression compilation, keyed by source text.
#[derive(Debug, Default)]
pub struct ExprCache {
    exprs: Mutex<HashMap<String, Arc<Expr>>>,
}

impl ExprCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled expression for `source`, compiling it on first use.
    pub fn get(&self, source: &str) -> Arc<Expr> {
        let mut cache = self.exprs.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.get(source) {
            Some(expr) => Arc::clone(expr),
            None => {
                let expr = Arc::new(Expr::compile(source));
                cache.insert(source.to_string(), expr.clone());
                expr
            }
        }
    }

    /// The number of cached expressions.
    pub fn len(&self) -> usize {
        self.exprs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Return true if nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
