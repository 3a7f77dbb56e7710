use crate::{Error, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// A test against one candidate. All string comparisons are case-insensitive.
///
/// In YAML every predicate is a single-key map, except the bare string
/// `text_empty`:
///
/// ```yaml
/// when:
///   all:
///     - tag_in: [button, div]
///     - size_within: { min_width: 20, max_width: 80 }
///     - text_empty
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Visible text contains any of these.
    TextContains(Vec<String>),
    /// Visible text, trimmed, equals one of these.
    TextEquals(Vec<String>),
    /// Text plus class, title, aria-label, onclick, alt and data-* values
    /// contains any of these.
    CombinedContains(Vec<String>),
    ClassContains(Vec<String>),
    /// Attribute `name` contains any of `any`; an empty list only requires
    /// the attribute to be present.
    AttrContains { name: String, any: Vec<String> },
    TagIn(Vec<String>),
    /// `role` attribute is one of these.
    RoleIn(Vec<String>),
    /// More than this many characters of visible text.
    TextLongerThan(usize),
    TextEmpty,
    SizeWithin(SizeRange),
    /// Left edge beyond this fraction of the viewport width.
    RightOf(f64),
    /// Left edge before this fraction of the viewport width.
    LeftOf(f64),
    /// Top edge beyond this fraction of the viewport height.
    Below(f64),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

const PREDICATE_NAMES: &[&str] = &[
    "text_contains",
    "text_equals",
    "combined_contains",
    "class_contains",
    "attr_contains",
    "tag_in",
    "role_in",
    "text_longer_than",
    "text_empty",
    "size_within",
    "right_of",
    "left_of",
    "below",
    "all",
    "any",
    "not",
];

impl Predicate {
    fn check(&self, path: &str) -> Result<()> {
        match self {
            Predicate::RightOf(f) | Predicate::LeftOf(f) | Predicate::Below(f) => {
                if !(0.0..=1.0).contains(f) {
                    return Err(Error::Config(format!(
                        "{}: viewport fraction {} must be within [0, 1]",
                        path, f
                    )));
                }
            }
            Predicate::SizeWithin(range) => {
                if range.min_width > range.max_width || range.min_height > range.max_height {
                    return Err(Error::Config(format!("{}: size_within has min > max", path)));
                }
            }
            Predicate::All(items) | Predicate::Any(items) => {
                if items.is_empty() {
                    return Err(Error::Config(format!("{}: empty predicate list", path)));
                }
                for p in items {
                    p.check(path)?;
                }
            }
            Predicate::Not(inner) => inner.check(path)?,
            _ => {}
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PredicateVisitor)
    }
}

struct PredicateVisitor;

impl<'de> Visitor<'de> for PredicateVisitor {
    type Value = Predicate;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a predicate map with a single key, or 'text_empty'")
    }

    fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        match value {
            "text_empty" => Ok(Predicate::TextEmpty),
            other => Err(de::Error::unknown_variant(other, &["text_empty"])),
        }
    }

    fn visit_map<M>(self, mut map: M) -> std::result::Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let key: String = map
            .next_key()?
            .ok_or_else(|| de::Error::custom("expected predicate type key"))?;

        let predicate = match key.as_str() {
            "text_contains" => Predicate::TextContains(map.next_value()?),
            "text_equals" => Predicate::TextEquals(map.next_value()?),
            "combined_contains" => Predicate::CombinedContains(map.next_value()?),
            "class_contains" => Predicate::ClassContains(map.next_value()?),
            "attr_contains" => {
                let a: AttrContains = map.next_value()?;
                Predicate::AttrContains {
                    name: a.name,
                    any: a.any,
                }
            }
            "tag_in" => Predicate::TagIn(map.next_value()?),
            "role_in" => Predicate::RoleIn(map.next_value()?),
            "text_longer_than" => Predicate::TextLongerThan(map.next_value()?),
            "text_empty" => {
                let _: serde_yaml::Value = map.next_value()?;
                Predicate::TextEmpty
            }
            "size_within" => Predicate::SizeWithin(map.next_value()?),
            "right_of" => Predicate::RightOf(map.next_value()?),
            "left_of" => Predicate::LeftOf(map.next_value()?),
            "below" => Predicate::Below(map.next_value()?),
            "all" => Predicate::All(map.next_value()?),
            "any" => Predicate::Any(map.next_value()?),
            "not" => Predicate::Not(Box::new(map.next_value()?)),
            other => return Err(de::Error::unknown_variant(other, PREDICATE_NAMES)),
        };

        Ok(predicate)
    }
}

#[derive(Deserialize)]
struct AttrContains {
    name: String,
    #[serde(default)]
    any: Vec<String>,
}

fn unbounded() -> f64 {
    f64::MAX
}

/// Bounding-box size range in CSS pixels, inclusive.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct SizeRange {
    #[serde(default)]
    pub min_width: f64,
    #[serde(default = "unbounded")]
    pub max_width: f64,
    #[serde(default)]
    pub min_height: f64,
    #[serde(default = "unbounded")]
    pub max_height: f64,
}

/// One row of a role's rule table.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    /// Reported in `ScoredCandidate::matched` when the rule fires.
    pub id: String,

    /// Category the weight counts toward. Only the best matching weight per
    /// category is added. Defaults to `id`.
    #[serde(default)]
    pub signal: Option<String>,

    /// Contribution in [0, 1]. Ignored for exclusion rules.
    #[serde(default)]
    pub weight: f64,

    /// A match rejects the candidate outright.
    #[serde(default)]
    pub exclude: bool,

    pub when: Predicate,
}

impl Rule {
    pub fn signal(&self) -> &str {
        self.signal.as_deref().unwrap_or(&self.id)
    }
}

fn default_max_candidates() -> usize {
    200
}
fn default_confident() -> f64 {
    0.6
}
fn default_acceptable() -> f64 {
    0.3
}

/// How to find and rank elements playing one role (trigger, panel, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct RoleSpec {
    /// CSS selectors tried in order.
    pub patterns: Vec<String>,

    /// Scan stops accumulating once this many candidates are collected.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    #[serde(default = "default_confident")]
    pub confident: f64,

    /// Minimum score for a candidate to be used at all.
    #[serde(default = "default_acceptable")]
    pub acceptable: f64,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RoleSpec {
    pub(crate) fn validate(&self, role: &str) -> Result<()> {
        if self.patterns.is_empty() {
            return Err(Error::Config(format!("{}.patterns must not be empty", role)));
        }
        if self.max_candidates == 0 {
            return Err(Error::Config(format!(
                "{}.max_candidates must be at least 1",
                role
            )));
        }
        for (name, value) in [("confident", self.confident), ("acceptable", self.acceptable)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{}.{} must be within [0, 1], got {}",
                    role, name, value
                )));
            }
        }
        if self.acceptable > self.confident {
            return Err(Error::Config(format!(
                "{}: acceptable ({}) exceeds confident ({})",
                role, self.acceptable, self.confident
            )));
        }
        for rule in &self.rules {
            let path = format!("{}.rules.{}", role, rule.id);
            if rule.id.is_empty() {
                return Err(Error::Config(format!("{}.rules: rule id is required", role)));
            }
            if !(0.0..=1.0).contains(&rule.weight) {
                return Err(Error::Config(format!(
                    "{}: weight {} must be within [0, 1]",
                    path, rule.weight
                )));
            }
            rule.when.check(&path)?;
        }
        Ok(())
    }
}
