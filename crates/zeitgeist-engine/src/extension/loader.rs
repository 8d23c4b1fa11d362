//! Extension discovery.
//!
//! Extensions are compiled in and looked up by fully qualified name in a
//! [`Catalog`]. Which names get loaded, and in what order, is decided by
//! [`Discovery`]:
//!
//! 1. `ZEITGEIST_DEFAULT_EXTENSIONS`, when set (even to the empty string),
//!    is the exact list.
//! 2. Otherwise the `*.toml` manifests of the user directory, then those of
//!    the system directory, each sorted by file name. A user manifest masks
//!    the system manifest with the same stem. When neither directory holds a
//!    manifest the built-in default list is used.
//! 3. `ZEITGEIST_EXTRA_EXTENSIONS` is always appended.
//!
//! A manifest looks like:
//!
//! ```toml
//! extensions = ["zeitgeist.extensions.Blacklist"]
//! ```

use std::{
  collections::HashSet,
  fs,
  path::{Path, PathBuf},
};

use serde::Deserialize;

use super::{Extension, ExtensionCollection, ExtensionContext};
use crate::{Error, Result};

pub const DEFAULT_EXTENSIONS_VAR: &str = "ZEITGEIST_DEFAULT_EXTENSIONS";
pub const EXTRA_EXTENSIONS_VAR: &str = "ZEITGEIST_EXTRA_EXTENSIONS";

// ─── Catalog ─────────────────────────────────────────────────────────────────

pub type Factory = Box<dyn Fn(&ExtensionContext) -> Result<Box<dyn Extension>> + Send + Sync>;

/// Extension factories by fully qualified name.
#[derive(Default)]
pub struct Catalog {
  entries: Vec<(String, Factory)>,
}

impl Catalog {
  pub fn new() -> Self { Self::default() }

  /// Add a factory. A later registration under the same name replaces the
  /// earlier one.
  pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
  where
    F: Fn(&ExtensionContext) -> Result<Box<dyn Extension>> + Send + Sync + 'static,
  {
    let name = name.into();
    self.entries.retain(|(n, _)| *n != name);
    self.entries.push((name, Box::new(factory)));
  }

  pub fn contains(&self, name: &str) -> bool { self.entries.iter().any(|(n, _)| n == name) }

  /// Registered names, in registration order.
  pub fn names(&self) -> Vec<String> { self.entries.iter().map(|(n, _)| n.clone()).collect() }

  pub fn instantiate(&self, name: &str, ctx: &ExtensionContext) -> Result<Box<dyn Extension>> {
    let (_, factory) = self
      .entries
      .iter()
      .find(|(n, _)| n == name)
      .ok_or_else(|| Error::UnknownExtension(name.to_owned()))?;
    factory(ctx)
  }
}

// ─── Manifests ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct Manifest {
  #[serde(default)]
  extensions: Vec<String>,
}

fn manifest_files(dir: &Path) -> Vec<PathBuf> {
  let Ok(entries) = fs::read_dir(dir) else {
    tracing::debug!(?dir, "extension directory not readable");
    return Vec::new();
  };
  let mut files: Vec<PathBuf> = entries
    .filter_map(|e| e.ok().map(|e| e.path()))
    .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
    .collect();
  files.sort();
  files
}

fn read_manifest(path: &Path) -> Result<Vec<String>> {
  let text = fs::read_to_string(path)?;
  let manifest: Manifest = toml::from_str(&text)?;
  Ok(manifest.extensions)
}

fn split_names(list: &str) -> impl Iterator<Item = String> + '_ {
  list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

// ─── Discovery ───────────────────────────────────────────────────────────────

/// Inputs to extension discovery.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
  pub user_dir:         Option<PathBuf>,
  pub system_dir:       Option<PathBuf>,
  /// Value of `ZEITGEIST_DEFAULT_EXTENSIONS`, if set.
  pub default_override: Option<String>,
  /// Value of `ZEITGEIST_EXTRA_EXTENSIONS`, if set.
  pub extras:           Option<String>,
  /// Used when no manifest is found.
  pub defaults:         Vec<String>,
}

impl Discovery {
  /// Discovery over the given directories, with overrides read from the
  /// process environment.
  pub fn from_env(
    user_dir: Option<PathBuf>,
    system_dir: Option<PathBuf>,
    defaults: Vec<String>,
  ) -> Self {
    Self {
      user_dir,
      system_dir,
      default_override: std::env::var(DEFAULT_EXTENSIONS_VAR).ok(),
      extras: std::env::var(EXTRA_EXTENSIONS_VAR).ok(),
      defaults,
    }
  }

  /// Extension names in load order.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = match &self.default_override {
      Some(list) => split_names(list).collect(),
      None => self.manifest_names(),
    };
    if let Some(extras) = &self.extras {
      names.extend(split_names(extras));
    }
    names
  }

  fn manifest_names(&self) -> Vec<String> {
    let user = self.user_dir.as_deref().map(manifest_files).unwrap_or_default();
    let system = self.system_dir.as_deref().map(manifest_files).unwrap_or_default();

    let user_stems: HashSet<_> = user.iter().filter_map(|p| p.file_stem().map(ToOwned::to_owned)).collect();
    let system: Vec<PathBuf> = system
      .into_iter()
      .filter(|p| {
        let masked = p.file_stem().is_some_and(|stem| user_stems.contains(stem));
        if masked {
          tracing::info!(path = ?p, "system extension manifest masked by user manifest");
        }
        !masked
      })
      .collect();

    if user.is_empty() && system.is_empty() {
      return self.defaults.clone();
    }

    user
      .iter()
      .chain(system.iter())
      .flat_map(|path| match read_manifest(path) {
        Ok(names) => names,
        Err(error) => {
          tracing::warn!(?path, %error, "skipping unreadable extension manifest");
          Vec::new()
        }
      })
      .collect()
  }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Instantiate and load `names` in order. Unknown names, failing factories
/// and method conflicts are logged and skipped. Returns how many loaded.
pub fn load_extensions(
  collection: &mut ExtensionCollection,
  catalog: &Catalog,
  names: &[String],
  ctx: &ExtensionContext,
) -> usize {
  let mut loaded = 0;
  for name in names {
    let result = catalog
      .instantiate(name, ctx)
      .and_then(|extension| collection.load(extension));
    match result {
      Ok(()) => loaded += 1,
      Err(error) => tracing::warn!(extension = %name, %error, "failed to load extension"),
    }
  }
  tracing::info!(loaded, requested = names.len(), "extensions loaded");
  loaded
}
