use std::fmt;

use slotkeep_codec::{Record, Snapshot, Value, ValueKind};
use tracing::warn;

use crate::error::{ContainerError, ContainerResult};

/// What to do when a rule fails, instead of reporting a violation.
#[derive(Clone, Debug, PartialEq)]
pub enum Correction {
    /// Clamp an out-of-range number to the nearest bound.
    Clamp,
    /// Replace a missing, mistyped or out-of-range value.
    Default(Value),
}

/// Constraint on one field, addressed by a dotted path (`inventory.gold`).
#[derive(Clone, Debug, PartialEq)]
pub struct FieldRule {
    pub path: String,
    pub required: bool,
    pub kind: Option<ValueKind>,
    pub range: Option<(f64, f64)>,
    pub correction: Option<Correction>,
}

impl FieldRule {
    pub fn required(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required: true,
            kind: None,
            range: None,
            correction: None,
        }
    }

    pub fn optional(path: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(path)
        }
    }

    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Inclusive numeric range.
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn correct(mut self, correction: Correction) -> Self {
        self.correction = Some(correction);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    MissingField,
    WrongKind,
    OutOfRange,
}

/// A rule that failed and had no correction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub kind: ViolationKind,
    pub description: String,
}

/// A rule that failed and was corrected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedCorrection {
    pub path: String,
    pub kind: ViolationKind,
    pub description: String,
}

/// Outcome of one validation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub corrections: Vec<AppliedCorrection>,
}

impl ValidationReport {
    /// Returns `true` if no uncorrected violation remains.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| format!("{}: {}", v.path, v.description))
            .collect();
        write!(f, "{} violation(s): {}", self.violations.len(), parts.join("; "))
    }
}

/// Runs field rules against a decoded snapshot.
#[derive(Clone, Debug, Default)]
pub struct Validator {
    rules: Vec<FieldRule>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Check every rule. Corrections are applied in place and recorded; any
    /// remaining violation fails the whole pass with the full report.
    pub fn validate(&self, mut snapshot: Snapshot) -> ContainerResult<(Snapshot, ValidationReport)> {
        let mut report = ValidationReport::default();
        for rule in &self.rules {
            check_rule(rule, &mut snapshot, &mut report);
        }
        for c in &report.corrections {
            warn!(path = %c.path, correction = %c.description, "validation correction applied");
        }
        if report.is_valid() {
            Ok((snapshot, report))
        } else {
            Err(ContainerError::Validation(report))
        }
    }
}

fn check_rule(rule: &FieldRule, snapshot: &mut Snapshot, report: &mut ValidationReport) {
    let Some(slot) = lookup_mut(snapshot, &rule.path) else {
        if !rule.required {
            return;
        }
        if let Some(Correction::Default(default)) = &rule.correction {
            if insert_path(snapshot, &rule.path, default.clone()) {
                report.corrections.push(AppliedCorrection {
                    path: rule.path.clone(),
                    kind: ViolationKind::MissingField,
                    description: "inserted default".into(),
                });
                return;
            }
        }
        report.violations.push(Violation {
            path: rule.path.clone(),
            kind: ViolationKind::MissingField,
            description: "required field is missing".into(),
        });
        return;
    };

    if let Some(expected) = rule.kind {
        if !kind_matches(expected, slot.kind()) {
            let found = slot.kind();
            if let Some(Correction::Default(default)) = &rule.correction {
                *slot = default.clone();
                report.corrections.push(AppliedCorrection {
                    path: rule.path.clone(),
                    kind: ViolationKind::WrongKind,
                    description: format!("replaced {found} with default"),
                });
            } else {
                report.violations.push(Violation {
                    path: rule.path.clone(),
                    kind: ViolationKind::WrongKind,
                    description: format!("expected {expected}, found {found}"),
                });
            }
            return;
        }
    }

    let Some((min, max)) = rule.range else {
        return;
    };
    let Some(number) = slot.as_f64() else {
        report.violations.push(Violation {
            path: rule.path.clone(),
            kind: ViolationKind::WrongKind,
            description: format!("range check needs a number, found {}", slot.kind()),
        });
        return;
    };
    if (min..=max).contains(&number) {
        return;
    }
    match &rule.correction {
        Some(Correction::Clamp) => {
            let clamped = clamp_value(slot, min, max);
            report.corrections.push(AppliedCorrection {
                path: rule.path.clone(),
                kind: ViolationKind::OutOfRange,
                description: format!("clamped {number} into [{min}, {max}]"),
            });
            *slot = clamped;
        }
        Some(Correction::Default(default)) => {
            *slot = default.clone();
            report.corrections.push(AppliedCorrection {
                path: rule.path.clone(),
                kind: ViolationKind::OutOfRange,
                description: format!("replaced out-of-range {number} with default"),
            });
        }
        None => report.violations.push(Violation {
            path: rule.path.clone(),
            kind: ViolationKind::OutOfRange,
            description: format!("{number} outside [{min}, {max}]"),
        }),
    }
}

fn kind_matches(expected: ValueKind, found: ValueKind) -> bool {
    use ValueKind::{Int, UInt};
    expected == found || matches!((expected, found), (Int, UInt) | (UInt, Int))
}

fn clamp_value(value: &Value, min: f64, max: f64) -> Value {
    match value {
        Value::Int(i) => Value::Int((*i).clamp(min.ceil() as i64, max.floor() as i64)),
        Value::UInt(u) => Value::UInt((*u).clamp(min.max(0.0).ceil() as u64, max.max(0.0).floor() as u64)),
        other => Value::Float(other.as_f64().unwrap_or(min).clamp(min, max)),
    }
}

fn lookup_mut<'a>(record: &'a mut Record, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = record.get_mut(first)?;
    for segment in segments {
        current = match { current } {
            Value::Struct(inner) => inner.get_mut(segment)?,
            Value::Map(map) => map.get_mut(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Insert at `path`; every parent must already exist.
fn insert_path(record: &mut Record, path: &str, value: Value) -> bool {
    match path.rsplit_once('.') {
        None => {
            record.insert(path, value);
            true
        }
        Some((parent, leaf)) => match lookup_mut(record, parent) {
            Some(Value::Struct(inner)) => {
                inner.insert(leaf, value);
                true
            }
            Some(Value::Map(map)) => {
                map.insert(leaf.to_string(), value);
                true
            }
            _ => false,
        },
    }
}
