//! Entity validation before writes.
//!
//! The repository calls a [`Validator`] before every insert and update.
//! [`RuleValidator`] covers the common per-property rules; anything more
//! involved implements the trait directly.

use std::collections::HashMap;

use regex::Regex;

use crate::entity::{Entity, EntityValue};
use crate::error::{ValidationError, ValidationErrorKind};
use crate::{Error, Result};

/// Checks an entity and reports every failed rule.
pub trait Validator: Send + Sync {
    fn validate(&self, entity: &Entity) -> std::result::Result<(), ValidationError>;
}

/// A single property rule.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Property must be set.
    Required,
    /// String value must match.
    Pattern(Regex),
    MinLength(usize),
    MaxLength(usize),
    /// Numeric lower bound, inclusive.
    Min(f64),
    /// Numeric upper bound, inclusive.
    Max(f64),
    Custom {
        message: String,
        check: fn(&EntityValue) -> bool,
    },
}

impl Rule {
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Rule::Pattern)
            .map_err(|e| Error::InvalidArgument(format!("invalid regex pattern: {e}")))
    }

    fn check(&self, value: Option<&EntityValue>) -> Option<(ValidationErrorKind, String)> {
        let Some(value) = value else {
            return matches!(self, Rule::Required)
                .then(|| (ValidationErrorKind::Required, "is required".to_string()));
        };
        match (self, value) {
            (Rule::Pattern(re), EntityValue::Text(s)) if !re.is_match(s) => Some((
                ValidationErrorKind::Pattern,
                format!("does not match pattern {}", re.as_str()),
            )),
            (Rule::MinLength(min), EntityValue::Text(s)) if s.chars().count() < *min => Some((
                ValidationErrorKind::MinLength,
                format!("must be at least {} characters", min),
            )),
            (Rule::MaxLength(max), EntityValue::Text(s)) if s.chars().count() > *max => Some((
                ValidationErrorKind::MaxLength,
                format!("must be at most {} characters", max),
            )),
            (Rule::Min(min), v) if numeric(v).is_some_and(|n| n < *min) => Some((
                ValidationErrorKind::Min,
                format!("must be greater than or equal to {}", min),
            )),
            (Rule::Max(max), v) if numeric(v).is_some_and(|n| n > *max) => Some((
                ValidationErrorKind::Max,
                format!("must be less than or equal to {}", max),
            )),
            (Rule::Custom { message, check }, v) if !check(v) => {
                Some((ValidationErrorKind::Custom, message.clone()))
            }
            _ => None,
        }
    }
}

fn numeric(value: &EntityValue) -> Option<f64> {
    match value {
        EntityValue::Int(v) => Some(*v as f64),
        EntityValue::Float(v) => Some(*v),
        _ => None,
    }
}

/// Rules keyed by entity and property name.
#[derive(Debug, Clone, Default)]
pub struct RuleValidator {
    rules: HashMap<String, Vec<(String, Rule)>>,
}

impl RuleValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, entity: &str, property: &str, rule: Rule) -> Self {
        self.rules
            .entry(entity.to_string())
            .or_default()
            .push((property.to_string(), rule));
        self
    }
}

impl Validator for RuleValidator {
    fn validate(&self, entity: &Entity) -> std::result::Result<(), ValidationError> {
        let Some(rules) = self.rules.get(entity.name()) else {
            return Ok(());
        };
        let mut errors = ValidationError::new(entity.name());
        for (property, rule) in rules {
            let value = entity.get(property).ok().flatten();
            if let Some((kind, message)) = rule.check(value.as_ref()) {
                errors.add(property.as_str(), kind, message);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            tracing::debug!(
                entity = entity.name(),
                failures = errors.errors.len(),
                "Entity failed validation"
            );
            Err(errors)
        }
    }
}
