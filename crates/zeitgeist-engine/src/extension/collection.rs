//! [`ExtensionCollection`]: ordered hook dispatch and the method table.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use zeitgeist_core::{Event, EventId};

use super::{Extension, Notification};
use crate::{Error, Result};

struct Loaded {
  extension: Box<dyn Extension>,
  /// Hook calls that returned an error.
  failures:  u64,
}

impl Loaded {
  fn record_failure(&mut self, hook: &'static str, error: &Error) {
    self.failures += 1;
    tracing::warn!(
      extension = self.extension.name(),
      hook,
      %error,
      failures = self.failures,
      "extension hook failed; passing input through"
    );
  }
}

/// The loaded extensions, in registration order.
///
/// A hook error is logged and the failing stage is skipped: transforms pass
/// their input on unchanged, post-hooks are treated as having returned.
#[derive(Default)]
pub struct ExtensionCollection {
  loaded:  Vec<Loaded>,
  /// Method name → index into `loaded`.
  methods: HashMap<String, usize>,
}

impl ExtensionCollection {
  pub fn new() -> Self { Self::default() }

  /// Append `extension` to the pipeline and bind its public methods.
  ///
  /// Fails without side effects when a method name is already bound or an
  /// extension with the same name is loaded.
  pub fn load(&mut self, extension: Box<dyn Extension>) -> Result<()> {
    let name = extension.name();
    if self.loaded.iter().any(|l| l.extension.name() == name) {
      return Err(Error::InvalidArguments(format!("extension {name} is already loaded")));
    }
    for method in extension.public_methods() {
      if let Some(&index) = self.methods.get(*method) {
        return Err(Error::MethodConflict {
          method: (*method).to_owned(),
          owner:  self.loaded[index].extension.name().to_owned(),
        });
      }
    }

    let index = self.loaded.len();
    for method in extension.public_methods() {
      self.methods.insert((*method).to_owned(), index);
    }
    tracing::debug!(extension = name, "extension loaded");
    self.loaded.push(Loaded { extension, failures: 0 });
    Ok(())
  }

  pub fn len(&self) -> usize { self.loaded.len() }

  pub fn is_empty(&self) -> bool { self.loaded.is_empty() }

  /// Extension names in registration order.
  pub fn names(&self) -> Vec<&'static str> {
    self.loaded.iter().map(|l| l.extension.name()).collect()
  }

  /// How often `extension`'s hooks have failed so far.
  pub fn failures(&self, extension: &str) -> Option<u64> {
    self
      .loaded
      .iter()
      .find(|l| l.extension.name() == extension)
      .map(|l| l.failures)
  }

  pub fn has_method(&self, method: &str) -> bool { self.methods.contains_key(method) }

  // ─── Hooks ─────────────────────────────────────────────────────────────────

  /// Run `pre_insert_event` through every extension. `None` means some stage
  /// dropped the event; later stages never saw it.
  pub fn apply_pre_insert(&mut self, mut event: Event, sender: &str) -> Option<Event> {
    for loaded in &mut self.loaded {
      let input = event.clone();
      match loaded.extension.pre_insert_event(event, sender) {
        Ok(Some(next)) => event = next,
        Ok(None) => {
          tracing::debug!(extension = loaded.extension.name(), "event dropped before insert");
          return None;
        }
        Err(error) => {
          loaded.record_failure("pre_insert_event", &error);
          event = input;
        }
      }
    }
    Some(event)
  }

  pub fn apply_post_insert(&mut self, event: &Event, sender: &str) {
    for loaded in &mut self.loaded {
      if let Err(error) = loaded.extension.post_insert_event(event, sender) {
        loaded.record_failure("post_insert_event", &error);
      }
    }
  }

  pub fn apply_get_hooks(&mut self, event: Option<Event>, sender: &str) -> Option<Event> {
    let mut event = event?;
    for loaded in &mut self.loaded {
      let input = event.clone();
      match loaded.extension.get_event(event, sender) {
        Ok(Some(next)) => event = next,
        Ok(None) => return None,
        Err(error) => {
          loaded.record_failure("get_event", &error);
          event = input;
        }
      }
    }
    Some(event)
  }

  /// Ids surviving every `pre_delete_events` stage. A stage can only remove
  /// ids; anything it adds is ignored.
  pub fn apply_pre_delete(&mut self, mut ids: Vec<EventId>, sender: &str) -> Vec<EventId> {
    for loaded in &mut self.loaded {
      let input = ids.clone();
      match loaded.extension.pre_delete_events(ids, sender) {
        Ok(kept) => ids = input.iter().copied().filter(|id| kept.contains(id)).collect(),
        Err(error) => {
          loaded.record_failure("pre_delete_events", &error);
          ids = input;
        }
      }
    }
    ids
  }

  pub fn apply_post_delete(&mut self, ids: &[EventId], sender: &str) {
    for loaded in &mut self.loaded {
      if let Err(error) = loaded.extension.post_delete_events(ids, sender) {
        loaded.record_failure("post_delete_events", &error);
      }
    }
  }

  pub fn notify(&mut self, notification: &Notification) {
    for loaded in &mut self.loaded {
      if let Err(error) = loaded.extension.notify(notification) {
        loaded.record_failure("notify", &error);
      }
    }
  }

  /// Every bus connection some extension keeps state for, deduplicated.
  pub fn bus_clients(&self) -> BTreeSet<String> {
    self.loaded.iter().flat_map(|l| l.extension.bus_clients()).collect()
  }

  // ─── Methods ───────────────────────────────────────────────────────────────

  /// Invoke a published method. Errors from the method are the caller's.
  pub fn call_method(&mut self, method: &str, args: Value, sender: &str) -> Result<Value> {
    let index = *self
      .methods
      .get(method)
      .ok_or_else(|| Error::UnknownMethod(method.to_owned()))?;
    self.loaded[index].extension.call(method, args, sender)
  }

  /// Unload every extension in reverse registration order and clear the
  /// method table.
  pub fn unload_all(&mut self) {
    self.methods.clear();
    while let Some(mut loaded) = self.loaded.pop() {
      tracing::debug!(extension = loaded.extension.name(), "unloading extension");
      loaded.extension.unload();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use proptest::prelude::*;
  use serde_json::json;
  use zeitgeist_core::Subject;

  use super::*;
  use crate::testing::{DropActor, FillInterpretation, Recorder};

  fn event(actor: &str) -> Event {
    Event::new(10).with_actor(actor).with_subject(Subject::new("file:///x"))
  }

  /// Fails every hook.
  struct Broken;

  impl Extension for Broken {
    fn name(&self) -> &'static str { "test.Broken" }

    fn pre_insert_event(&mut self, _event: Event, _sender: &str) -> Result<Option<Event>> {
      Err(Error::Bus("boom".into()))
    }

    fn get_event(&mut self, _event: Event, _sender: &str) -> Result<Option<Event>> {
      Err(Error::Bus("boom".into()))
    }

    fn pre_delete_events(&mut self, _ids: Vec<EventId>, _sender: &str) -> Result<Vec<EventId>> {
      Err(Error::Bus("boom".into()))
    }
  }

  struct Methods(&'static str, &'static [&'static str]);

  impl Extension for Methods {
    fn name(&self) -> &'static str { self.0 }

    fn public_methods(&self) -> &'static [&'static str] { self.1 }

    fn call(&mut self, method: &str, args: Value, _sender: &str) -> Result<Value> {
      Ok(json!({ "by": self.0, "method": method, "args": args }))
    }
  }

  #[test]
  fn drop_stops_the_pipeline() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut c = ExtensionCollection::new();
    c.load(Box::new(DropActor("app://spam"))).unwrap();
    c.load(Box::new(Recorder::new("test.After", log.clone()))).unwrap();

    assert!(c.apply_pre_insert(event("app://spam"), ":1.1").is_none());
    assert!(log.lock().unwrap().is_empty());

    assert!(c.apply_pre_insert(event("app://ok"), ":1.1").is_some());
    assert_eq!(log.lock().unwrap().as_slice(), ["pre_insert app://ok"]);
  }

  #[test]
  fn stages_see_the_previous_output() {
    let mut c = ExtensionCollection::new();
    c.load(Box::new(FillInterpretation::on_insert("u:First"))).unwrap();
    c.load(Box::new(FillInterpretation::on_get("u:Second"))).unwrap();

    let inserted = c.apply_pre_insert(event("app://a"), ":1.1").unwrap();
    assert_eq!(inserted.interpretation, "u:First");

    let fetched = c.apply_get_hooks(Some(event("app://a")), ":1.1").unwrap();
    assert_eq!(fetched.interpretation, "u:Second");
  }

  #[test]
  fn hook_errors_pass_input_through_and_are_counted() {
    let mut c = ExtensionCollection::new();
    c.load(Box::new(Broken)).unwrap();
    c.load(Box::new(FillInterpretation::on_insert("u:Filled"))).unwrap();

    let out = c.apply_pre_insert(event("app://a"), ":1.1").unwrap();
    assert_eq!(out.actor, "app://a");
    assert_eq!(out.interpretation, "u:Filled");
    assert!(c.apply_get_hooks(Some(event("app://a")), ":1.1").is_some());
    assert_eq!(c.apply_pre_delete(vec![1, 2], ":1.1"), vec![1, 2]);

    assert_eq!(c.failures("test.Broken"), Some(3));
    assert_eq!(c.failures(FillInterpretation::ON_INSERT), Some(0));
  }

  #[test]
  fn get_hooks_keep_none() {
    let mut c = ExtensionCollection::new();
    c.load(Box::new(FillInterpretation::on_get("u:X"))).unwrap();
    assert!(c.apply_get_hooks(None, ":1.1").is_none());
  }

  #[test]
  fn pre_delete_can_only_shrink() {
    struct Sneaky;
    impl Extension for Sneaky {
      fn name(&self) -> &'static str { "test.Sneaky" }

      fn pre_delete_events(&mut self, mut ids: Vec<EventId>, _: &str) -> Result<Vec<EventId>> {
        ids.retain(|id| *id != 2);
        ids.push(99);
        Ok(ids)
      }
    }

    let mut c = ExtensionCollection::new();
    c.load(Box::new(Sneaky)).unwrap();
    assert_eq!(c.apply_pre_delete(vec![1, 2, 3], ":1.1"), vec![1, 3]);
  }

  #[test]
  fn method_collisions_reject_the_second_extension() {
    let mut c = ExtensionCollection::new();
    c.load(Box::new(Methods("test.A", &["ping", "pong"]))).unwrap();

    let err = c.load(Box::new(Methods("test.B", &["other", "pong"]))).unwrap_err();
    assert!(matches!(err, Error::MethodConflict { ref method, ref owner }
      if method == "pong" && owner == "test.A"));
    assert!(!c.has_method("other"));
    assert_eq!(c.names(), ["test.A"]);

    let reply = c.call_method("pong", json!([1]), ":1.1").unwrap();
    assert_eq!(reply["by"], "test.A");
    assert!(matches!(c.call_method("nope", json!(null), ":1.1"), Err(Error::UnknownMethod(_))));
  }

  #[test]
  fn unload_runs_in_reverse_order_and_clears_methods() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut c = ExtensionCollection::new();
    c.load(Box::new(Recorder::new("test.First", log.clone()))).unwrap();
    c.load(Box::new(Recorder::new("test.Second", log.clone()))).unwrap();
    c.load(Box::new(Methods("test.M", &["ping"]))).unwrap();

    c.unload_all();
    assert!(c.is_empty());
    assert!(!c.has_method("ping"));
    assert_eq!(
      log.lock().unwrap().as_slice(),
      ["unload test.Second", "unload test.First"]
    );
  }

  proptest! {
    #[test]
    fn pre_insert_is_idempotent(
      actor in prop_oneof![Just("app://spam".to_owned()), "app://[a-z]{1,6}"],
      interpretation in prop_oneof![Just(String::new()), "u:[A-Z][a-z]{1,6}"],
    ) {
      let mut c = ExtensionCollection::new();
      c.load(Box::new(DropActor("app://spam"))).unwrap();
      c.load(Box::new(FillInterpretation::on_insert("u:Filled"))).unwrap();

      let input = event(&actor).with_interpretation(interpretation);
      let once = c.apply_pre_insert(input, ":1.1");
      let twice = once.clone().and_then(|e| c.apply_pre_insert(e, ":1.1"));
      prop_assert_eq!(once, twice);
    }
  }
}
