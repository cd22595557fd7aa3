use std::collections::BTreeSet;

use regex::Regex;

use crate::errors::{OrmError, Result};
use crate::model::{Value, ValueType};
use crate::validation::Violation;

/// How a requested tag set is matched against an attribute's tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMatch {
    /// Every requested tag is present
    #[default]
    All,
    /// At least one requested tag is present
    Any,
    /// No requested tag is present
    None,
}

/// Static description of one persistent attribute
#[derive(Debug, Clone)]
pub struct AttributeDescription {
    name: String,
    column: String,
    value_type: ValueType,
    default_value: Value,
    tags: BTreeSet<String>,
    pattern: Option<Regex>,
    required: bool,
    editable: bool,
    input_type: Option<String>,
    display_type: Option<String>,
}

impl AttributeDescription {
    /// Attribute stored in a column of the same name
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            value_type,
            default_value: Value::Null,
            tags: BTreeSet::new(),
            pattern: None,
            required: false,
            editable: true,
            input_type: None,
            display_type: None,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Restrict text values to a regular expression
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the pattern does not compile.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| OrmError::InvalidConfiguration {
            reason: format!("attribute '{}': invalid pattern: {}", self.name, e),
        })?;
        self.pattern = Some(regex);
        Ok(self)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn with_input_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    pub fn with_display_type(mut self, display_type: impl Into<String>) -> Self {
        self.display_type = Some(display_type.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn input_type(&self) -> Option<&str> {
        self.input_type.as_deref()
    }

    pub fn display_type(&self) -> Option<&str> {
        self.display_type.as_deref()
    }

    /// Check a candidate value against type, requiredness and pattern
    pub fn check(&self, value: &Value) -> std::result::Result<(), Violation> {
        if value.is_null() {
            if self.required {
                return Err(Violation::new(&self.name, "is required"));
            }
            return Ok(());
        }
        if !self.value_type.accepts(value) {
            return Err(Violation::new(
                &self.name,
                format!("expected {:?} value, got '{}'", self.value_type, value),
            ));
        }
        if let (Some(pattern), Value::Text(text)) = (&self.pattern, value) {
            if !pattern.is_match(text) {
                return Err(Violation::new(
                    &self.name,
                    format!("does not match pattern '{}'", pattern.as_str()),
                ));
            }
        }
        Ok(())
    }

    /// Whether the attribute's tags satisfy `requested` under `mode`
    ///
    /// An empty request matches every attribute.
    pub fn matches_tags(&self, requested: &BTreeSet<String>, mode: TagMatch) -> bool {
        if requested.is_empty() {
            return true;
        }
        match mode {
            TagMatch::All => requested.iter().all(|t| self.tags.contains(t)),
            TagMatch::Any => requested.iter().any(|t| self.tags.contains(t)),
            TagMatch::None => !requested.iter().any(|t| self.tags.contains(t)),
        }
    }
}

/// Attributes whose tags satisfy `requested` under `mode`, in declaration order
pub fn filter_by_tags<'a>(
    attributes: &'a [AttributeDescription],
    requested: &BTreeSet<String>,
    mode: TagMatch,
) -> Vec<&'a AttributeDescription> {
    attributes
        .iter()
        .filter(|a| a.matches_tags(requested, mode))
        .collect()
}
