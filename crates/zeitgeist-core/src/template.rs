//! Template matching.
//!
//! A template is an [`Event`] whose empty fields mean "match anything". A
//! non-empty field must match the corresponding field of the candidate:
//!
//! - `!value` negates the comparison on fields that support negation;
//! - `value*` is a prefix match on fields that support wildcards;
//! - interpretation and manifestation also match descendant symbols.
//!
//! Template subjects match when every template subject is matched by at least
//! one subject of the event. The template `id`, `timestamp` and `payload` are
//! not considered.

use crate::{
  event::{Event, Subject},
  symbol,
};

pub const NEGATION_OPERATOR: char = '!';
pub const WILDCARD: char = '*';

#[derive(Clone, Copy)]
struct Rule {
  negation: bool,
  wildcard: bool,
  symbolic: bool,
}

const SYMBOL:  Rule = Rule { negation: true, wildcard: false, symbolic: true };
const URI:     Rule = Rule { negation: true, wildcard: true, symbolic: false };
const STORAGE: Rule = Rule { negation: true, wildcard: false, symbolic: false };
const TEXT:    Rule = Rule { negation: false, wildcard: false, symbolic: false };

fn field_matches(value: &str, template: &str, rule: Rule) -> bool {
  if template.is_empty() {
    return true;
  }

  let (template, negated) = match template.strip_prefix(NEGATION_OPERATOR) {
    Some(rest) if rule.negation => (rest, true),
    _ => (template, false),
  };
  let (template, prefix) = match template.strip_suffix(WILDCARD) {
    Some(rest) if rule.wildcard => (rest, true),
    _ => (template, false),
  };

  let hit = if prefix {
    value.starts_with(template)
  } else if rule.symbolic {
    symbol::is_a(value, template)
  } else {
    value == template
  };
  hit != negated
}

impl Subject {
  pub fn matches_template(&self, template: &Subject) -> bool {
    field_matches(&self.uri, &template.uri, URI)
      && field_matches(&self.interpretation, &template.interpretation, SYMBOL)
      && field_matches(&self.manifestation, &template.manifestation, SYMBOL)
      && field_matches(&self.origin, &template.origin, URI)
      && field_matches(&self.mimetype, &template.mimetype, URI)
      && field_matches(&self.text, &template.text, TEXT)
      && field_matches(&self.storage, &template.storage, STORAGE)
      && field_matches(&self.current_uri, &template.current_uri, URI)
  }
}

impl Event {
  pub fn matches_template(&self, template: &Event) -> bool {
    field_matches(&self.interpretation, &template.interpretation, SYMBOL)
      && field_matches(&self.manifestation, &template.manifestation, SYMBOL)
      && field_matches(&self.actor, &template.actor, URI)
      && field_matches(&self.origin, &template.origin, URI)
      && template
        .subjects
        .iter()
        .all(|ts| self.subjects.iter().any(|s| s.matches_template(ts)))
  }

  /// True when `templates` is empty or at least one template matches.
  pub fn matches_any(&self, templates: &[Event]) -> bool {
    templates.is_empty() || templates.iter().any(|t| self.matches_template(t))
  }
}
