//! Condition evaluation and ordering over in-memory rows.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use relmap_core::{Condition, Joiner, Operator, OrderBy, Record, Value};

/// Compiled LIKE patterns, shared by every adapter in the process.
struct LikeCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl LikeCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(&like_to_regex(pattern))?;
        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

fn like_cache() -> &'static LikeCache {
    static CACHE: OnceLock<LikeCache> = OnceLock::new();
    CACHE.get_or_init(LikeCache::new)
}

/// Translate a LIKE pattern (`%` any run, `_` one character, `\` escapes)
/// into an anchored case-insensitive regex.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?is)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// `value LIKE pattern`. Invalid patterns never match.
pub(crate) fn like(value: &str, pattern: &str) -> bool {
    match like_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid LIKE pattern, treating as non-match"
            );
            false
        }
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !matches!(v, Value::Null))
}

fn contains(candidates: &Value, value: &Value) -> bool {
    match candidates {
        Value::Array(items) => items.iter().any(|item| item.loosely_equals(value)),
        single => single.loosely_equals(value),
    }
}

fn compare(row: &Record, name: &str, operator: Operator, expected: &Value) -> bool {
    let actual = present(row.get(name));
    match operator {
        Operator::IsNull => actual.is_none(),
        Operator::IsNotNull => actual.is_some(),
        Operator::Eq => match actual {
            Some(actual) => actual.loosely_equals(expected),
            None => matches!(expected, Value::Null),
        },
        Operator::NotEq => match actual {
            Some(actual) => !actual.loosely_equals(expected),
            None => !matches!(expected, Value::Null),
        },
        Operator::In => actual.is_some_and(|v| contains(expected, v)),
        Operator::NotIn => actual.is_none_or(|v| !contains(expected, v)),
        Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
            let Some(ordering) = actual.and_then(|v| v.compare(expected)) else {
                return false;
            };
            match operator {
                Operator::Lt => ordering == Ordering::Less,
                Operator::Lte => ordering != Ordering::Greater,
                Operator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
        Operator::Like => match (actual, expected) {
            (Some(Value::Text(actual)), Value::Text(pattern)) => like(actual, pattern),
            _ => false,
        },
    }
}

fn matches(row: &Record, condition: &Condition) -> bool {
    match condition {
        Condition::Compare {
            name,
            operator,
            value,
            ..
        } => compare(row, name, *operator, value),
        Condition::Group { conditions, .. } => matches_all(row, conditions),
    }
}

/// Evaluate a condition list. AND binds tighter than OR; the joiner of the
/// first condition is ignored.
pub(crate) fn matches_all(row: &Record, conditions: &[Condition]) -> bool {
    let mut any = false;
    let mut all = true;
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 && condition.joiner() == Joiner::Or {
            any |= all;
            all = true;
        }
        all = all && matches(row, condition);
    }
    any || all
}

fn compare_column(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (present(a), present(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

/// Stable sort by each key in turn. Nulls sort first ascending.
pub(crate) fn sort(rows: &mut [Record], order_by: &[OrderBy]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for order in order_by {
            let ordering = compare_column(a.get(&order.name), b.get(&order.name));
            let ordering = match order.direction {
                relmap_core::Direction::Asc => ordering,
                relmap_core::Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Record {
        Record::new()
            .with("id", 3)
            .with("name", "Ada Lovelace")
            .with("score", 7.5)
            .with("team_id", Value::Null)
    }

    #[test]
    fn comparisons() {
        let row = row();
        assert!(compare(&row, "id", Operator::Eq, &Value::Text("3".into())));
        assert!(compare(&row, "id", Operator::NotEq, &Value::BigInt(4)));
        assert!(compare(&row, "score", Operator::Gt, &Value::BigInt(7)));
        assert!(compare(&row, "score", Operator::Lte, &Value::Double(7.5)));
        assert!(!compare(&row, "score", Operator::Lt, &Value::Double(7.5)));
        assert!(!compare(&row, "name", Operator::Gt, &Value::BigInt(1)));
        assert!(compare(&row, "team_id", Operator::IsNull, &Value::Null));
        assert!(compare(&row, "missing", Operator::IsNull, &Value::Null));
        assert!(compare(&row, "id", Operator::IsNotNull, &Value::Null));
        assert!(compare(&row, "team_id", Operator::Eq, &Value::Null));
    }

    #[test]
    fn membership() {
        let row = row();
        let ids = Value::Array(vec![Value::BigInt(1), Value::BigInt(3)]);
        assert!(compare(&row, "id", Operator::In, &ids));
        assert!(!compare(&row, "id", Operator::NotIn, &ids));
        assert!(!compare(&row, "team_id", Operator::In, &ids));
        assert!(compare(&row, "team_id", Operator::NotIn, &ids));
    }

    #[test]
    fn like_patterns() {
        assert!(like("Ada Lovelace", "ada%"));
        assert!(like("Ada Lovelace", "%love%"));
        assert!(like("Ada", "A_a"));
        assert!(!like("Ada", "A_"));
        assert!(like("50% off", "50\\%%"));
        assert!(!like("50 off", "50\\%%"));
        assert!(like("a.b", "a.b"));
        assert!(!like("axb", "a.b"));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let row = row();
        // id = 1 AND name = x OR id = 3
        let conditions = vec![
            Condition::eq("id", 1),
            Condition::eq("name", "x"),
            Condition::eq("id", 3).or(),
        ];
        assert!(matches_all(&row, &conditions));

        // id = 3 AND (name = x OR score > 100)
        let conditions = vec![
            Condition::eq("id", 3),
            Condition::group(vec![
                Condition::eq("name", "x"),
                Condition::new("score", Operator::Gt, 100).or(),
            ]),
        ];
        assert!(!matches_all(&row, &conditions));
        assert!(matches_all(&row, &[]));
    }

    #[test]
    fn sorting_is_stable_with_nulls_first() {
        let mut rows = vec![
            Record::new().with("id", 1).with("rank", 2),
            Record::new().with("id", 2),
            Record::new().with("id", 3).with("rank", 1),
            Record::new().with("id", 4).with("rank", 2),
        ];
        sort(&mut rows, &[OrderBy::asc("rank")]);
        let ids: Vec<_> = rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);

        sort(&mut rows, &[OrderBy::desc("rank"), OrderBy::desc("id")]);
        let ids: Vec<_> = rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect();
        assert_eq!(ids, vec![4, 1, 3, 2]);
    }
}
