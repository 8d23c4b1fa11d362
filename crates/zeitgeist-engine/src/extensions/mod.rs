//! The extensions shipped with the engine.

pub mod blacklist;
pub mod datasource_registry;
pub mod storage_monitor;

pub use blacklist::Blacklist;
pub use datasource_registry::DataSourceRegistry;
pub use storage_monitor::StorageMonitor;

use crate::extension::{Extension, loader::Catalog};

/// A catalog holding every built-in extension.
pub fn builtin_catalog() -> Catalog {
  let mut catalog = Catalog::new();
  catalog.register(datasource_registry::NAME, |ctx| {
    Ok(Box::new(DataSourceRegistry::new(ctx)) as Box<dyn Extension>)
  });
  catalog.register(storage_monitor::NAME, |ctx| {
    Ok(Box::new(StorageMonitor::new(ctx)) as Box<dyn Extension>)
  });
  catalog.register(blacklist::NAME, |ctx| Ok(Box::new(Blacklist::new(ctx)) as Box<dyn Extension>));
  catalog
}

/// Load order used when no manifest names any extension.
pub fn default_extensions() -> Vec<String> {
  [datasource_registry::NAME, storage_monitor::NAME, blacklist::NAME]
    .into_iter()
    .map(String::from)
    .collect()
}
