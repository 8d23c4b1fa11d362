//! The blacklist: templates of events that must never enter the log.
//!
//! Events already in the log are not affected by later additions.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use serde::Deserialize;
use serde_json::Value;
use zeitgeist_core::Event;

use crate::{
  Error, Result,
  bus::{SessionBus, Signal},
  extension::{Extension, ExtensionContext, parse_args},
  persist,
};

pub const NAME: &str = "zeitgeist.extensions.Blacklist";
pub const FILE_NAME: &str = "blacklist.json";

pub const ADD_BLACKLIST: &str = "add_blacklist";
pub const REMOVE_BLACKLIST: &str = "remove_blacklist";
pub const GET_BLACKLIST: &str = "get_blacklist";

#[derive(Deserialize)]
struct AddArgs {
  id:       String,
  template: Event,
}

#[derive(Deserialize)]
struct RemoveArgs {
  id: String,
}

pub struct Blacklist {
  path:      PathBuf,
  bus:       Arc<dyn SessionBus>,
  templates: BTreeMap<String, Event>,
}

impl Blacklist {
  pub fn new(ctx: &ExtensionContext) -> Self {
    let path = ctx.data_path.join(FILE_NAME);
    let templates = persist::read_json(&path).unwrap_or_default();
    Self { path, bus: ctx.bus.clone(), templates }
  }

  /// Add or replace the template stored under `id`.
  pub fn add(&mut self, id: String, template: Event) {
    self.templates.insert(id.clone(), template.clone());
    self.write();
    tracing::debug!(%id, "blacklist template added");
    self.bus.emit(Signal::TemplateAdded { id, template });
  }

  pub fn remove(&mut self, id: &str) -> Result<Event> {
    let template = self
      .templates
      .remove(id)
      .ok_or_else(|| Error::BlacklistNotFound(id.to_owned()))?;
    self.write();
    tracing::debug!(%id, "blacklist template removed");
    self.bus.emit(Signal::TemplateRemoved { id: id.to_owned(), template: template.clone() });
    Ok(template)
  }

  pub fn templates(&self) -> &BTreeMap<String, Event> { &self.templates }

  fn write(&self) {
    if let Err(error) = persist::write_json(&self.path, &self.templates) {
      tracing::warn!(path = ?self.path, %error, "failed to write blacklist");
    }
  }
}

impl Extension for Blacklist {
  fn name(&self) -> &'static str { NAME }

  fn public_methods(&self) -> &'static [&'static str] {
    &[ADD_BLACKLIST, REMOVE_BLACKLIST, GET_BLACKLIST]
  }

  fn pre_insert_event(&mut self, event: Event, _sender: &str) -> Result<Option<Event>> {
    if self.templates.values().any(|t| event.matches_template(t)) {
      tracing::debug!(actor = %event.actor, "event blocked by blacklist");
      return Ok(None);
    }
    Ok(Some(event))
  }

  fn call(&mut self, method: &str, args: Value, _sender: &str) -> Result<Value> {
    match method {
      ADD_BLACKLIST => {
        let AddArgs { id, template } = parse_args(args)?;
        self.add(id, template);
        Ok(Value::Null)
      }
      REMOVE_BLACKLIST => {
        let RemoveArgs { id } = parse_args(args)?;
        Ok(serde_json::to_value(self.remove(&id)?)?)
      }
      GET_BLACKLIST => Ok(serde_json::to_value(&self.templates)?),
      _ => Err(Error::UnknownMethod(method.to_owned())),
    }
  }
}
