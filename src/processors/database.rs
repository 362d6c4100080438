//! Export adapter: hand image headers to the relational store and write
//! back the generated key fields.

use crate::error::ProcessingError;
use crate::image::Image;
use crate::processors::UnitProcessor;
use crate::store::RelationalStore;
use std::sync::Arc;

/// Sends each image's header to a table and records the store's generated
/// keys (e.g. the assigned primary key) back into the header. Batch arity
/// is unchanged.
///
/// The store call is atomic per image: keys are only written back after
/// the store accepts the row, so a rejected export never leaves partial
/// key assignments behind.
pub struct DatabaseImageExporter {
    store: Arc<dyn RelationalStore>,
    table: String,
}

impl DatabaseImageExporter {
    pub fn new(store: Arc<dyn RelationalStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }
}

impl UnitProcessor for DatabaseImageExporter {
    fn name(&self) -> &'static str {
        "dbexporter"
    }

    fn process(&self, image: &mut Image) -> Result<(), ProcessingError> {
        let generated = self.store.export(&self.table, &image.header)?;
        for (key, value) in generated {
            image.header.set(key, value);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DatabaseImageExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseImageExporter")
            .field("table", &self.table)
            .finish()
    }
}
