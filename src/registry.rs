use crate::config::BinderConfig;
use crate::error::{Error, Result};
use crate::query::{PreparedQuery, QueryDefinition};
use crate::schema::SchemaSource;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Compiles query methods once and hands out the shared result.
///
/// Registering the same definition twice returns the cached query. A different
/// definition under an already registered method name is rejected.
pub struct QueryRegistry {
    schema: Arc<dyn SchemaSource>,
    config: BinderConfig,
    queries: RwLock<HashMap<String, Arc<PreparedQuery>>>,
}

impl QueryRegistry {
    pub fn new(schema: Arc<dyn SchemaSource>, config: BinderConfig) -> Self {
        Self {
            schema,
            config,
            queries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    /// Compiles and caches `definition`.
    ///
    /// # Errors
    ///
    /// `DuplicateMethod` when the method name is taken by another definition, or
    /// any compile error. A failed compile caches nothing.
    pub fn register(&self, definition: QueryDefinition) -> Result<Arc<PreparedQuery>> {
        if let Some(existing) = self.lookup(&definition)? {
            return Ok(existing);
        }

        let method = definition.method.clone();
        let compiled = Arc::new(PreparedQuery::compile(
            definition,
            self.schema.as_ref(),
            &self.config,
        )?);

        let mut queries = self.queries.write();
        // another thread may have won the race
        if let Some(existing) = queries.get(&method) {
            return if existing.definition() == compiled.definition() {
                Ok(Arc::clone(existing))
            } else {
                Err(Error::DuplicateMethod(method))
            };
        }
        debug!(method = %method, "registered query");
        queries.insert(method, Arc::clone(&compiled));
        Ok(compiled)
    }

    fn lookup(&self, definition: &QueryDefinition) -> Result<Option<Arc<PreparedQuery>>> {
        match self.queries.read().get(&definition.method) {
            Some(existing) if existing.definition() == definition => Ok(Some(Arc::clone(existing))),
            Some(_) => Err(Error::DuplicateMethod(definition.method.clone())),
            None => Ok(None),
        }
    }

    pub fn get(&self, method: &str) -> Option<Arc<PreparedQuery>> {
        self.queries.read().get(method).cloned()
    }

    pub fn len(&self) -> usize {
        self.queries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.read().is_empty()
    }
}

impl fmt::Debug for QueryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queries = self.queries.read();
        let mut methods: Vec<&str> = queries.keys().map(String::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("QueryRegistry")
            .field("config", &self.config)
            .field("methods", &methods)
            .finish()
    }
}
