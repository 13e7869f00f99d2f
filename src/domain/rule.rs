//! Rule entity, template catalog types, and rule typing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Error, ErrorCode};

/// Regex a template-form rule targeting device tables materializes to.
pub const DEVICE_TABLE_PATTERN: &str = "^device:.{22}_service:.{22}$";
/// Regex a template-form rule targeting export tables materializes to.
pub const EXPORT_TABLE_PATTERN: &str = "^userid:.{22}_export:.{22}$";

/// Declarative schema rule: a table-name regex and owner filter paired with
/// a create/delete SQL template.
///
/// `id` is generated server-side; requests carrying one are rejected.
/// `errors` holds the per-table failures of the most recent run and
/// `completed_run` flips to true only after a clean pass over every
/// matching table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub table_reg_ex: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub command_template: String,
    #[serde(default)]
    pub delete_template: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub completed_run: bool,
}

impl Rule {
    fn matches_template(&self, template: &Template) -> bool {
        template.group == self.group
            && template.command_template == self.command_template
            && template.delete_template == self.delete_template
    }
}

/// Named SQL template bundle loaded from the template directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Template {
    #[serde(default)]
    pub command_template: String,
    #[serde(default)]
    pub delete_template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub group: String,
}

/// Classification of a stored rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Custom,
    Template,
}

/// Table class a template-form rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateTarget {
    Device,
    Export,
}

/// A rule together with its classification against the template catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TypedRule {
    #[serde(flatten)]
    pub rule: Rule,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TemplateTarget>,
}

impl TypedRule {
    /// Classify `rule` against the catalog: it instantiates a template iff
    /// some entry's (group, command template, delete template) triple equals
    /// the rule's. The target tag is derived from the two canonical table
    /// patterns.
    pub fn classify(rule: Rule, templates: &HashMap<String, Template>) -> Self {
        for (name, template) in templates {
            if rule.matches_template(template) {
                let target = match rule.table_reg_ex.as_str() {
                    DEVICE_TABLE_PATTERN => Some(TemplateTarget::Device),
                    EXPORT_TABLE_PATTERN => Some(TemplateTarget::Export),
                    _ => None,
                };
                return Self {
                    rule,
                    rule_type: RuleType::Template,
                    template: Some(name.clone()),
                    target,
                };
            }
        }
        Self {
            rule,
            rule_type: RuleType::Custom,
            template: None,
            target: None,
        }
    }
}

/// Template-form rule as accepted by the `/template-rules` endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TemplateRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub template: String,
    pub target: TemplateTarget,
}

impl TemplateRule {
    /// Inflate into a full [`Rule`] by pulling description, priority, group,
    /// and both templates from the named catalog entry and synthesizing the
    /// table regex from the target.
    pub fn into_rule(self, templates: &HashMap<String, Template>) -> Result<Rule, Error> {
        let template = templates.get(&self.template).ok_or_else(|| {
            Error::new(
                ErrorCode::InvalidRequest,
                format!("unknown template {:?}", self.template),
            )
        })?;
        let table_reg_ex = match self.target {
            TemplateTarget::Device => DEVICE_TABLE_PATTERN,
            TemplateTarget::Export => EXPORT_TABLE_PATTERN,
        };
        Ok(Rule {
            id: self.id,
            description: template.description.clone(),
            priority: template.priority,
            group: template.group.clone(),
            table_reg_ex: table_reg_ex.to_string(),
            users: self.users,
            roles: self.roles,
            command_template: template.command_template.clone(),
            delete_template: template.delete_template.clone(),
            errors: Vec::new(),
            completed_run: false,
        })
    }
}

/// Rendering environment derived from a physical table's name and owners.
///
/// Ephemeral: populated once per reconciliation call and handed to the SQL
/// template engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableInfo {
    pub table: String,
    pub user_ids: Vec<String>,
    pub roles: Vec<String>,
    pub short_user_id: String,
    pub device_id: String,
    pub short_device_id: String,
    pub service_id: String,
    pub short_service_id: String,
    pub export_id: String,
    pub short_export_id: String,
    pub columns: Vec<String>,
    pub timezone: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn catalog() -> HashMap<String, Template> {
        let mut templates = HashMap::new();
        templates.insert(
            "downsample".to_string(),
            Template {
                command_template: "CREATE MATERIALIZED VIEW IF NOT EXISTS \"{{.Table}}_ld\" AS SELECT 1".into(),
                delete_template: "DROP MATERIALIZED VIEW IF EXISTS \"{{.Table}}_ld\"".into(),
                description: "low resolution downsampling".into(),
                priority: 10,
                group: "downsampling".into(),
            },
        );
        templates
    }

    fn downsample_rule(table_reg_ex: &str) -> Rule {
        let templates = catalog();
        let template = &templates["downsample"];
        Rule {
            id: "r1".into(),
            description: "whatever the client sent".into(),
            priority: 3,
            group: template.group.clone(),
            table_reg_ex: table_reg_ex.into(),
            command_template: template.command_template.clone(),
            delete_template: template.delete_template.clone(),
            ..Rule::default()
        }
    }

    #[rstest]
    #[case(DEVICE_TABLE_PATTERN, Some(TemplateTarget::Device))]
    #[case(EXPORT_TABLE_PATTERN, Some(TemplateTarget::Export))]
    #[case("^custom_regex$", None)]
    fn template_rules_are_classified_with_target(
        #[case] pattern: &str,
        #[case] target: Option<TemplateTarget>,
    ) {
        let typed = TypedRule::classify(downsample_rule(pattern), &catalog());
        assert_eq!(typed.rule_type, RuleType::Template);
        assert_eq!(typed.template.as_deref(), Some("downsample"));
        assert_eq!(typed.target, target);
    }

    #[test]
    fn rules_without_matching_template_are_custom() {
        let mut rule = downsample_rule(DEVICE_TABLE_PATTERN);
        rule.command_template = "SELECT 2".into();
        let typed = TypedRule::classify(rule, &catalog());
        assert_eq!(typed.rule_type, RuleType::Custom);
        assert!(typed.template.is_none());
        assert!(typed.target.is_none());
    }

    #[test]
    fn template_rule_inflates_from_catalog() {
        let template_rule = TemplateRule {
            id: String::new(),
            users: vec!["u1".into()],
            roles: vec![],
            template: "downsample".into(),
            target: TemplateTarget::Device,
        };
        let rule = template_rule.into_rule(&catalog()).expect("inflate");
        assert_eq!(rule.table_reg_ex, DEVICE_TABLE_PATTERN);
        assert_eq!(rule.group, "downsampling");
        assert_eq!(rule.priority, 10);
        assert_eq!(rule.description, "low resolution downsampling");
        assert!(!rule.completed_run);
    }

    #[test]
    fn inflation_round_trips_through_classification() {
        let template_rule = TemplateRule {
            id: String::new(),
            users: vec!["u1".into()],
            roles: vec![],
            template: "downsample".into(),
            target: TemplateTarget::Export,
        };
        let rule = template_rule.into_rule(&catalog()).expect("inflate");
        let typed = TypedRule::classify(rule, &catalog());
        assert_eq!(typed.rule_type, RuleType::Template);
        assert_eq!(typed.target, Some(TemplateTarget::Export));
    }

    #[test]
    fn unknown_template_is_rejected() {
        let template_rule = TemplateRule {
            id: String::new(),
            users: vec![],
            roles: vec![],
            template: "nope".into(),
            target: TemplateTarget::Device,
        };
        let err = template_rule.into_rule(&catalog()).expect_err("must fail");
        assert_eq!(err.code(), crate::domain::ErrorCode::InvalidRequest);
    }

    #[test]
    fn typed_rule_serializes_flattened() {
        let typed = TypedRule::classify(downsample_rule(DEVICE_TABLE_PATTERN), &catalog());
        let json = serde_json::to_value(&typed).expect("serialize");
        assert_eq!(json["type"], "template");
        assert_eq!(json["template"], "downsample");
        assert_eq!(json["target"], "device");
        assert_eq!(json["group"], "downsampling");
        assert_eq!(json["id"], "r1");
    }
}
