//! Strongly typed step and field schema definitions shared by the engine, strategies, and CLI.
//!
//! A transaction is rendered as an ordered list of [`StepDefinition`]s, each holding the
//! [`FieldDefinition`]s the user fills in. Definitions are pure data: they are rebuilt by a
//! strategy whenever the accumulated form data changes shape, so field identifiers must stay
//! stable across rebuilds.
//!
//! Every field value travels through the engine as a string (see [`FormData`]). Structured
//! kinds encode their value as JSON text under a single key; [`FieldKind::decode`] in the
//! [`value`] module documents the contract for each kind.

pub mod validation;
pub mod value;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Flat mapping from field identifier to its string-encoded value.
pub type FormData = IndexMap<String, String>;

/// Mapping from field identifier to a human-readable validation message.
pub type FieldErrors = IndexMap<String, String>;

/// Built-in step kinds. Most steps are [`StepKind::Custom`]; the others carry engine semantics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Ordinary data-entry step.
    #[default]
    Custom,
    /// Step where the user picks a real-world entity (for example, a vessel). Leaving it
    /// backwards gives the strategy a chance to drop its cached selection.
    EntitySelection,
    /// Upload step for supporting documents.
    Documents,
    /// Fee summary built from computed line items.
    Payment,
    /// Read-only summary shown before final submission.
    Review,
}

/// An ordered group of fields plus display metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Kind tag distinguishing built-in steps from custom ones.
    #[serde(default)]
    pub kind: StepKind,
    /// Title rendered in the step header.
    pub title: String,
    /// Optional explanatory copy rendered under the title.
    #[serde(default)]
    pub description: Option<String>,
    /// Fields in display order.
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    /// Lookup keys that must be fetched the first time the step is opened.
    #[serde(default)]
    pub required_lookups: Vec<String>,
}

impl StepDefinition {
    /// Creates an empty custom step with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Custom,
            title: title.into(),
            description: None,
            fields: Vec::new(),
            required_lookups: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: StepKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDefinition>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn with_lookup(mut self, lookup_key: impl Into<String>) -> Self {
        self.required_lookups.push(lookup_key.into());
        self
    }

    /// Returns the field with the given identifier, if the step owns it.
    pub fn field(&self, field_id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.id == field_id)
    }

    /// Returns true when the step owns a field with the given identifier.
    pub fn contains_field(&self, field_id: &str) -> bool {
        self.field(field_id).is_some()
    }

    /// Iterates the identifiers of the fields owned by this step.
    pub fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.id.as_str())
    }

    /// Extracts only this step's values from the full form data, preserving field order.
    pub fn extract_values(&self, form_data: &FormData) -> FormData {
        self.fields
            .iter()
            .filter_map(|field| form_data.get(&field.id).map(|value| (field.id.clone(), value.clone())))
            .collect()
    }
}

/// Declares that a field only becomes mandatory when another field holds a given value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldCondition {
    /// Identifier of the controlling field.
    pub field: String,
    /// Value the controlling field must hold for the condition to apply.
    pub equals: String,
}

impl FieldCondition {
    pub fn new(field: impl Into<String>, equals: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            equals: equals.into(),
        }
    }

    /// Evaluates the condition against the current form data.
    pub fn holds(&self, form_data: &FormData) -> bool {
        form_data.get(&self.field).is_some_and(|value| value == &self.equals)
    }
}

/// Description of a single input. Common attributes live here; kind-specific attributes
/// live in [`FieldKind`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDefinition {
    /// Identifier, unique within the transaction and stable across step rebuilds.
    pub id: String,
    /// Label rendered next to the input.
    pub label: String,
    /// Whether a value must be supplied before the step can be left.
    #[serde(default)]
    pub mandatory: bool,
    /// Conditional mandatory rule evaluated against the rest of the form.
    #[serde(default)]
    pub mandatory_when: Option<FieldCondition>,
    /// Placeholder text rendered when the field is empty.
    #[serde(default)]
    pub placeholder: Option<String>,
    /// Kind-specific attributes.
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldDefinition {
    fn with_kind(id: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            mandatory: false,
            mandatory_when: None,
            placeholder: None,
            kind,
        }
    }

    pub fn text(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::with_kind(id, label, FieldKind::Text(TextField::default()))
    }

    pub fn text_of(id: impl Into<String>, label: impl Into<String>, input: TextInputKind) -> Self {
        Self::with_kind(
            id,
            label,
            FieldKind::Text(TextField {
                input,
                ..TextField::default()
            }),
        )
    }

    pub fn drop_down(id: impl Into<String>, label: impl Into<String>, options: Vec<String>) -> Self {
        Self::with_kind(id, label, FieldKind::DropDown { options, lookup_key: None })
    }

    /// Drop-down whose options come from a remote lookup.
    pub fn lookup_drop_down(id: impl Into<String>, label: impl Into<String>, lookup_key: impl Into<String>, options: Vec<String>) -> Self {
        Self::with_kind(
            id,
            label,
            FieldKind::DropDown {
                options,
                lookup_key: Some(lookup_key.into()),
            },
        )
    }

    pub fn check_box(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::with_kind(id, label, FieldKind::CheckBox)
    }

    pub fn date(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            label,
            FieldKind::DatePicker {
                allow_past: true,
                allow_future: true,
            },
        )
    }

    pub fn file_upload(id: impl Into<String>, label: impl Into<String>, allowed_types: Vec<String>, max_size_mb: u32) -> Self {
        Self::with_kind(id, label, FieldKind::FileUpload { allowed_types, max_size_mb })
    }

    pub fn multi_select(id: impl Into<String>, label: impl Into<String>, options: Vec<String>) -> Self {
        Self::with_kind(id, label, FieldKind::MultiSelect { options, lookup_key: None })
    }

    pub fn radio_group(id: impl Into<String>, label: impl Into<String>, options: Vec<String>) -> Self {
        Self::with_kind(id, label, FieldKind::RadioGroup { options })
    }

    pub fn record_list(id: impl Into<String>, label: impl Into<String>, schema: Vec<FieldDefinition>, min_records: usize) -> Self {
        Self::with_kind(id, label, FieldKind::RecordList { schema, min_records })
    }

    pub fn line_item(id: impl Into<String>, label: impl Into<String>, amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            label,
            FieldKind::ComputedLineItem {
                amount: amount.into(),
                currency: currency.into(),
            },
        )
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn mandatory_when(mut self, condition: FieldCondition) -> Self {
        self.mandatory_when = Some(condition);
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// Returns true when the field must hold a value given the current form data.
    pub fn is_required(&self, form_data: &FormData) -> bool {
        if self.mandatory {
            return true;
        }
        self.mandatory_when.as_ref().is_some_and(|condition| condition.holds(form_data))
    }

    /// Returns the lookup key feeding this field's options, when it has one.
    pub fn lookup_key(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::DropDown { lookup_key, .. } | FieldKind::MultiSelect { lookup_key, .. } => lookup_key.as_deref(),
            _ => None,
        }
    }

    /// Replaces the option list of a choice field. Other kinds are left untouched.
    pub fn set_options(&mut self, new_options: Vec<String>) {
        match &mut self.kind {
            FieldKind::DropDown { options, .. } | FieldKind::MultiSelect { options, .. } | FieldKind::RadioGroup { options } => {
                *options = new_options;
            }
            _ => {}
        }
    }

    /// Computed line items are display-only and never typed by the user.
    pub fn is_read_only(&self) -> bool {
        matches!(self.kind, FieldKind::ComputedLineItem { .. })
    }
}

/// Semantic flavour of a free-text input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextInputKind {
    #[default]
    Plain,
    /// Digits only.
    Numeric,
    /// Digits with an optional fractional part.
    Decimal,
    Email,
    Phone,
}

/// Free-text attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TextField {
    #[serde(default)]
    pub input: TextInputKind,
    /// Regular expression the value must match.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

/// Closed set of field kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text(TextField),
    DropDown {
        #[serde(default)]
        options: Vec<String>,
        /// Lookup whose results replace `options` once loaded.
        #[serde(default)]
        lookup_key: Option<String>,
    },
    CheckBox,
    DatePicker {
        #[serde(default = "default_true")]
        allow_past: bool,
        #[serde(default = "default_true")]
        allow_future: bool,
    },
    FileUpload {
        /// Accepted MIME types; empty accepts anything.
        #[serde(default)]
        allowed_types: Vec<String>,
        max_size_mb: u32,
    },
    MultiSelect {
        #[serde(default)]
        options: Vec<String>,
        #[serde(default)]
        lookup_key: Option<String>,
    },
    RadioGroup {
        #[serde(default)]
        options: Vec<String>,
    },
    /// Nested list of records (owners, engines, crew members) sharing one schema.
    RecordList {
        schema: Vec<FieldDefinition>,
        #[serde(default)]
        min_records: usize,
    },
    /// Fee line computed by the strategy and shown on payment steps.
    ComputedLineItem { amount: String, currency: String },
}

const fn default_true() -> bool {
    true
}
