use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the rules of a group combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    In,
    NotIn,
    IsSet,
    IsNotSet,
}

impl ConditionOperator {
    /// `is_set` and `is_not_set` only inspect the field.
    pub fn requires_value(self) -> bool {
        !matches!(self, ConditionOperator::IsSet | ConditionOperator::IsNotSet)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRule {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ConditionRule {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Rule set shared by `condition` and `filter` nodes and by trigger filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionGroup {
    #[serde(default)]
    pub logic: ConditionLogic,
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
}

impl ConditionGroup {
    pub fn all(rules: Vec<ConditionRule>) -> Self {
        Self {
            logic: ConditionLogic::And,
            rules,
        }
    }

    pub fn any(rules: Vec<ConditionRule>) -> Self {
        Self {
            logic: ConditionLogic::Or,
            rules,
        }
    }
}
