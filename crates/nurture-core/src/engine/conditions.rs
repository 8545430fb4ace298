//! Rule evaluation for condition and filter nodes and trigger filters.
//!
//! Field paths:
//! - `user.lifecycleState`, `user.email`, `user.id`, `user.accountId`,
//!   `user.segments`, `user.tags`, `user.properties.<path>` or `user.<path>`
//! - `event.name`, `event.timestamp`, `event.properties.<path>` or `event.<path>`
//! - `variables.<path>` (alias `vars.<path>`)
//! - bare `lifecycleState`; any other bare path reads user properties

use super::delay::parse_date_string;
use crate::models::{
    ConditionGroup, ConditionLogic, ConditionOperator, ConditionRule, EventSnapshot, UserProfile,
};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub user: Option<&'a UserProfile>,
    pub event: Option<&'a EventSnapshot>,
    pub variables: Option<&'a Map<String, Value>>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(user: Option<&'a UserProfile>, event: Option<&'a EventSnapshot>) -> Self {
        Self {
            user,
            event,
            variables: None,
        }
    }

    pub fn with_variables(mut self, variables: &'a Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }
}

/// Evaluate a group. A group without rules always matches.
pub fn evaluate_group(group: &ConditionGroup, ctx: &EvaluationContext<'_>) -> bool {
    if group.rules.is_empty() {
        return true;
    }
    match group.logic {
        ConditionLogic::And => group.rules.iter().all(|rule| evaluate_rule(rule, ctx)),
        ConditionLogic::Or => group.rules.iter().any(|rule| evaluate_rule(rule, ctx)),
    }
}

pub fn evaluate_rule(rule: &ConditionRule, ctx: &EvaluationContext<'_>) -> bool {
    let actual = resolve_field(&rule.field, ctx);
    let actual = actual.as_ref().filter(|value| !value.is_null());
    let expected = rule.value.as_ref();

    match rule.operator {
        ConditionOperator::IsSet => actual.is_some_and(is_present),
        ConditionOperator::IsNotSet => !actual.is_some_and(is_present),
        ConditionOperator::Equals => matches_pair(actual, expected, values_equal),
        ConditionOperator::NotEquals => !matches_pair(actual, expected, values_equal),
        ConditionOperator::Contains => matches_pair(actual, expected, contains),
        ConditionOperator::NotContains => !matches_pair(actual, expected, contains),
        ConditionOperator::StartsWith => matches_pair(actual, expected, |a, e| {
            text_pair(a, e).is_some_and(|(a, e)| a.starts_with(&e))
        }),
        ConditionOperator::EndsWith => matches_pair(actual, expected, |a, e| {
            text_pair(a, e).is_some_and(|(a, e)| a.ends_with(&e))
        }),
        ConditionOperator::GreaterThan => compare_is(actual, expected, |o| o == Ordering::Greater),
        ConditionOperator::LessThan => compare_is(actual, expected, |o| o == Ordering::Less),
        ConditionOperator::GreaterOrEqual => {
            compare_is(actual, expected, |o| o != Ordering::Less)
        }
        ConditionOperator::LessOrEqual => compare_is(actual, expected, |o| o != Ordering::Greater),
        ConditionOperator::In => matches_pair(actual, expected, is_member),
        ConditionOperator::NotIn => !matches_pair(actual, expected, is_member),
    }
}

/// Resolve a dotted field path against the context.
pub fn resolve_field(field: &str, ctx: &EvaluationContext<'_>) -> Option<Value> {
    let field = field.trim();
    let (root, rest) = match field.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (field, None),
    };

    match (root, rest) {
        ("user", Some(path)) => resolve_user(ctx.user?, path),
        ("event", Some(path)) => resolve_event(ctx.event?, path),
        ("variables" | "vars", Some(path)) => lookup_path(ctx.variables?, path),
        ("lifecycleState" | "lifecycle_state", None) => {
            ctx.user?.lifecycle_state.clone().map(Value::String)
        }
        _ => lookup_path(&ctx.user?.properties, field),
    }
}

fn resolve_user(user: &UserProfile, path: &str) -> Option<Value> {
    match path {
        "id" | "userId" | "user_id" => Some(Value::String(user.user_id.clone())),
        "accountId" | "account_id" => user.account_id.clone().map(Value::String),
        "email" => user.email.clone().map(Value::String),
        "lifecycleState" | "lifecycle_state" => user.lifecycle_state.clone().map(Value::String),
        "segments" => Some(Value::from(user.segments.iter().cloned().collect::<Vec<_>>())),
        "tags" => Some(Value::from(user.tags.iter().cloned().collect::<Vec<_>>())),
        _ => {
            let path = path.strip_prefix("properties.").unwrap_or(path);
            lookup_path(&user.properties, path)
        }
    }
}

fn resolve_event(event: &EventSnapshot, path: &str) -> Option<Value> {
    match path {
        "name" => Some(Value::String(event.name.clone())),
        "timestamp" => Some(Value::from(event.timestamp)),
        _ => {
            let path = path.strip_prefix("properties.").unwrap_or(path);
            lookup_path(&event.properties, path)
        }
    }
}

fn lookup_path(map: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(object) => object.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

fn matches_pair(
    actual: Option<&Value>,
    expected: Option<&Value>,
    predicate: impl Fn(&Value, &Value) -> bool,
) -> bool {
    match (actual, expected) {
        (Some(actual), Some(expected)) => predicate(actual, expected),
        _ => false,
    }
}

fn compare_is(actual: Option<&Value>, expected: Option<&Value>, accept: impl Fn(Ordering) -> bool) -> bool {
    matches_pair(actual, expected, |a, e| compare(a, e).is_some_and(&accept))
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(e)) = (as_number(actual), as_number(expected)) {
        return a == e;
    }
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => a == e,
        (Value::Bool(a), Value::String(e)) | (Value::String(e), Value::Bool(a)) => {
            e.parse::<bool>().is_ok_and(|e| e == *a)
        }
        _ => actual == expected,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        Value::Object(object) => expected.as_str().is_some_and(|key| object.contains_key(key)),
        _ => text_pair(actual, expected).is_some_and(|(a, e)| a.contains(&e)),
    }
}

fn is_member(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(options) => options.iter().any(|option| values_equal(actual, option)),
        Value::String(list) => list
            .split(',')
            .any(|option| values_equal(actual, &Value::String(option.trim().to_string()))),
        _ => values_equal(actual, expected),
    }
}

/// Numbers compare numerically, dates chronologically, anything else as text.
fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    if let (Some(a), Some(e)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&e);
    }
    if let (Some(a), Some(e)) = (
        actual.as_str().and_then(parse_date_string),
        expected.as_str().and_then(parse_date_string),
    ) {
        return Some(a.cmp(&e));
    }
    text_pair(actual, expected).map(|(a, e)| a.cmp(&e))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn text_pair(actual: &Value, expected: &Value) -> Option<(String, String)> {
    Some((as_text(actual)?, as_text(expected)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> UserProfile {
        let mut user = UserProfile::new("u1").with_lifecycle("AtRisk");
        user.email = Some("ada@example.com".to_string());
        user.segments.insert("beta".to_string());
        user.properties.insert("plan".to_string(), json!("pro"));
        user.properties.insert("seats".to_string(), json!(12));
        user.properties
            .insert("company".to_string(), json!({"size": "enterprise"}));
        user
    }

    fn rule(field: &str, operator: ConditionOperator, value: Option<Value>) -> ConditionRule {
        ConditionRule::new(field, operator, value)
    }

    #[test]
    fn test_lifecycle_equals() {
        let user = user();
        let ctx = EvaluationContext::new(Some(&user), None);

        assert!(evaluate_rule(
            &rule("user.lifecycleState", ConditionOperator::Equals, Some(json!("AtRisk"))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule("lifecycleState", ConditionOperator::NotEquals, Some(json!("Active"))),
            &ctx
        ));
    }

    #[test]
    fn test_numeric_and_nested() {
        let user = user();
        let ctx = EvaluationContext::new(Some(&user), None);

        assert!(evaluate_rule(
            &rule("user.seats", ConditionOperator::GreaterThan, Some(json!("10"))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule("seats", ConditionOperator::LessOrEqual, Some(json!(12))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule(
                "user.properties.company.size",
                ConditionOperator::Equals,
                Some(json!("enterprise"))
            ),
            &ctx
        ));
    }

    #[test]
    fn test_string_and_membership_operators() {
        let user = user();
        let ctx = EvaluationContext::new(Some(&user), None);

        assert!(evaluate_rule(
            &rule("user.email", ConditionOperator::EndsWith, Some(json!("@example.com"))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule("user.segments", ConditionOperator::Contains, Some(json!("beta"))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule("plan", ConditionOperator::In, Some(json!(["pro", "team"]))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule("plan", ConditionOperator::NotIn, Some(json!("free, starter"))),
            &ctx
        ));
    }

    #[test]
    fn test_set_operators_and_missing_fields() {
        let user = user();
        let ctx = EvaluationContext::new(Some(&user), None);

        assert!(evaluate_rule(&rule("user.email", ConditionOperator::IsSet, None), &ctx));
        assert!(evaluate_rule(&rule("user.phone", ConditionOperator::IsNotSet, None), &ctx));
        // Missing fields never satisfy positive comparisons
        assert!(!evaluate_rule(
            &rule("user.phone", ConditionOperator::Equals, Some(json!("x"))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule("user.phone", ConditionOperator::NotEquals, Some(json!("x"))),
            &ctx
        ));
        // Without a user every user field is unset
        let empty = EvaluationContext::new(None, None);
        assert!(evaluate_rule(&rule("user.email", ConditionOperator::IsNotSet, None), &empty));
    }

    #[test]
    fn test_event_and_variables() {
        let event = EventSnapshot::new(
            "purchase",
            json!({"amount": 49.5}).as_object().unwrap().clone(),
            1_000,
        );
        let variables = json!({"score": {"value": 7}}).as_object().unwrap().clone();
        let ctx = EvaluationContext::new(None, Some(&event)).with_variables(&variables);

        assert!(evaluate_rule(
            &rule("event.name", ConditionOperator::Equals, Some(json!("purchase"))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule("event.properties.amount", ConditionOperator::GreaterOrEqual, Some(json!(49.5))),
            &ctx
        ));
        assert!(evaluate_rule(
            &rule("variables.score.value", ConditionOperator::Equals, Some(json!(7))),
            &ctx
        ));
    }

    #[test]
    fn test_group_logic() {
        let user = user();
        let ctx = EvaluationContext::new(Some(&user), None);
        let hit = rule("plan", ConditionOperator::Equals, Some(json!("pro")));
        let miss = rule("plan", ConditionOperator::Equals, Some(json!("free")));

        assert!(!evaluate_group(&ConditionGroup::all(vec![hit.clone(), miss.clone()]), &ctx));
        assert!(evaluate_group(&ConditionGroup::any(vec![hit, miss]), &ctx));
        assert!(evaluate_group(&ConditionGroup::default(), &ctx));
    }

    #[test]
    fn test_date_comparison() {
        let mut user = UserProfile::new("u1");
        user.properties
            .insert("trialEndsAt".to_string(), json!("2030-02-01T00:00:00Z"));
        let ctx = EvaluationContext::new(Some(&user), None);

        assert!(evaluate_rule(
            &rule("trialEndsAt", ConditionOperator::GreaterThan, Some(json!("2030-01-15"))),
            &ctx
        ));
    }
}
