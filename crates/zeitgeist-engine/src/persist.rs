//! Sidecar state files owned by extensions.

use std::{
  fs,
  io::{self, Write as _},
  path::Path,
};

use serde::{Serialize, de::DeserializeOwned};

/// Replace `path` with `bytes` by writing a sibling temp file and renaming
/// it over the target. Readers never observe a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let mut tmp_name = path.as_os_str().to_owned();
  tmp_name.push(".tmp");
  let tmp = Path::new(&tmp_name);

  let mut file = fs::File::create(tmp)?;
  file.write_all(bytes)?;
  file.sync_all()?;
  drop(file);
  fs::rename(tmp, path)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> crate::Result<()> {
  let bytes = serde_json::to_vec_pretty(value)?;
  write_atomic(path, &bytes)?;
  Ok(())
}

/// Load a JSON state file. A missing file yields `None`; unreadable or
/// corrupt files are logged and also yield `None`, so the caller starts
/// cold.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
  let bytes = match fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      tracing::debug!(?path, "no existing state file");
      return None;
    }
    Err(error) => {
      tracing::warn!(?path, %error, "failed to read state file");
      return None;
    }
  };
  match serde_json::from_slice(&bytes) {
    Ok(value) => {
      tracing::debug!(?path, "loaded state file");
      Some(value)
    }
    Err(error) => {
      tracing::warn!(?path, %error, "corrupt state file; starting empty");
      None
    }
  }
}
