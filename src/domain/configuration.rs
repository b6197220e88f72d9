//! Tagged configuration schema for templates and content schema for reports.
//!
//! Every structured field that participates in a snapshot is modelled as a closed
//! set of variants so that two snapshots compare equal exactly when they describe
//! the same configuration. Maps are `BTreeMap` and tag sets are `BTreeSet`, which
//! makes equality independent of the order in which keys or tags were written.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::types::Severity;

/// Ordered list of sections a template renders into a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfiguration {
    #[serde(default)]
    pub sections: Vec<TemplateSection>,
    #[serde(default)]
    pub settings: BTreeMap<String, SettingValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateSection {
    /// Free text written by the author.
    Text { title: String, body: String },
    /// Narrative section produced from instructions.
    Narrative {
        title: String,
        instructions: String,
        max_words: Option<u32>,
    },
    /// Findings filtered by a minimum severity.
    Findings {
        title: String,
        min_severity: Severity,
        #[serde(default)]
        group_by: Option<String>,
    },
    /// Tabular section with a fixed column set.
    Table { title: String, columns: Vec<String> },
    /// Key/value metadata block.
    Metadata {
        title: String,
        #[serde(default)]
        fields: BTreeMap<String, SettingValue>,
    },
}

impl TemplateSection {
    pub fn title(&self) -> &str {
        match self {
            TemplateSection::Text { title, .. }
            | TemplateSection::Narrative { title, .. }
            | TemplateSection::Findings { title, .. }
            | TemplateSection::Table { title, .. }
            | TemplateSection::Metadata { title, .. } => title,
        }
    }
}

/// Scalar or list setting value. Numbers are integral so equality is exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    Text(String),
    Integer(i64),
    Flag(bool),
    List(Vec<String>),
    Set(BTreeSet<String>),
}

/// Rendered body of a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportContent {
    #[serde(default)]
    pub sections: Vec<ReportSection>,
    #[serde(default)]
    pub metadata: BTreeMap<String, SettingValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub key: String,
    pub heading: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_compare_equal_regardless_of_insertion_order() {
        let mut first = BTreeMap::new();
        first.insert("a".to_string(), SettingValue::Integer(1));
        first.insert("b".to_string(), SettingValue::Integer(2));

        let mut second = BTreeMap::new();
        second.insert("b".to_string(), SettingValue::Integer(2));
        second.insert("a".to_string(), SettingValue::Integer(1));

        let left = TemplateConfiguration {
            sections: Vec::new(),
            settings: first,
        };
        let right = TemplateConfiguration {
            sections: Vec::new(),
            settings: second,
        };
        assert_eq!(left, right);
    }

    #[test]
    fn json_key_order_does_not_affect_equality() {
        let left: TemplateConfiguration = serde_json::from_str(
            r#"{"sections":[{"kind":"table","title":"Hosts","columns":["ip","port"]}],"settings":{"x":{"type":"flag","value":true},"y":{"type":"integer","value":3}}}"#,
        )
        .expect("parse left");
        let right: TemplateConfiguration = serde_json::from_str(
            r#"{"settings":{"y":{"value":3,"type":"integer"},"x":{"value":true,"type":"flag"}},"sections":[{"columns":["ip","port"],"title":"Hosts","kind":"table"}]}"#,
        )
        .expect("parse right");
        assert_eq!(left, right);
    }

    #[test]
    fn integer_and_text_settings_are_distinct() {
        assert_ne!(
            SettingValue::Integer(1),
            SettingValue::Text("1".to_string())
        );
    }

    #[test]
    fn section_title_is_exposed_for_every_kind() {
        let section = TemplateSection::Findings {
            title: "Findings".to_string(),
            min_severity: Severity::High,
            group_by: None,
        };
        assert_eq!(section.title(), "Findings");
    }
}
