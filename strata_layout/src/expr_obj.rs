use std::{fmt, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strata_expr::{Expr, VariableSource};

/// An expression stored in a schema, kept together with its source text.
///
/// Serializes as the source text. Deserializing compiles the text, logging any errors;
/// a malformed expression evaluates to 0 rather than rejecting the schema.
#[derive(Clone)]
pub struct ExprObj {
    source: String,
    expr: Arc<Expr>,
}

impl ExprObj {
    /// Compile `source`.
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let expr = Arc::new(Expr::compile(&source));
        Self { source, expr }
    }

    /// The source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compiled expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate the expression.
    pub fn evaluate<V: VariableSource>(&self, vs: &V) -> i64 {
        self.expr.evaluate(vs)
    }
}

impl PartialEq for ExprObj {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for ExprObj {}

impl fmt::Debug for ExprObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprObj({:?})", self.source)
    }
}

impl fmt::Display for ExprObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl From<&str> for ExprObj {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl Serialize for ExprObj {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for ExprObj {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        Ok(Self::new(source))
    }
}
