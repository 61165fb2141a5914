//! Field schema resolution and input filtering
//!
//! Every loaded resource owns one [`FieldResource`]. It maps field names to
//! identifiers (and back), drops input keys that do not resolve to a field,
//! and casts raw input values to the optype of the field they feed.

use crate::errors::{PredictError, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// Tokens treated as missing values when they appear as text input
pub const DEFAULT_MISSING_TOKENS: &[&str] = &[
    "", "N/A", "n/a", "NULL", "null", "-", "#DIV/0", "#REF!", "#NAME?", "NIL", "nil", "NA", "na",
    "#VALUE!", "#NULL!", "NaN", "#N/A", "#NUM!", "?",
];

/// Field optype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Categorical,
    Numeric,
    Text,
    Items,
    Datetime,
}

impl OpType {
    /// Text and items fields hold bags of terms rather than scalars
    pub fn is_term_based(self) -> bool {
        matches!(self, OpType::Text | OpType::Items)
    }
}

/// A scalar input value, or an explicit missing marker
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Missing,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    fn from_json(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Ok(FieldValue::Missing),
            Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Number)
                .ok_or_else(|| format!("number {n} is not representable as f64")),
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            other => Err(format!("expected a scalar value, found {other}")),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => f.write_str(&format_number(*n)),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::Missing => f.write_str("missing"),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let value = Value::deserialize(deserializer)?;
        FieldValue::from_json(&value).map_err(D::Error::custom)
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Number(n) => serializer.serialize_f64(*n),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Boolean(b) => serializer.serialize_bool(*b),
            FieldValue::Missing => serializer.serialize_none(),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// Input record keyed by field name or id
pub type InputRecord = BTreeMap<String, FieldValue>;

/// Build an input record from a JSON object
pub fn input_from_json(value: &Value) -> Result<InputRecord> {
    let object = value
        .as_object()
        .ok_or_else(|| PredictError::invalid_option("input data must be a JSON object"))?;
    object
        .iter()
        .map(|(key, val)| {
            FieldValue::from_json(val)
                .map(|v| (key.clone(), v))
                .map_err(|e| PredictError::InvalidOption(format!("input field {key}: {e}")))
        })
        .collect()
}

/// Render a number the way rules and categories print it
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

/// How text is split into terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMode {
    #[default]
    All,
    TokensOnly,
    FullTermsOnly,
}

/// Per-field text analysis settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermAnalysis {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub token_mode: TokenMode,
    /// Canonical term -> alternative forms
    #[serde(default)]
    pub term_forms: BTreeMap<String, Vec<String>>,
}

/// Alphanumeric runs of `text`
fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
}

impl TermAnalysis {
    fn normalize(&self, text: &str) -> String {
        if self.case_sensitive {
            text.to_string()
        } else {
            text.to_lowercase()
        }
    }

    /// Terms of `text` as seen by this field's tokenizer
    pub fn terms(&self, text: &str) -> Vec<String> {
        let mut terms: Vec<String> = if self.token_mode == TokenMode::FullTermsOnly {
            Vec::new()
        } else {
            tokens(text).map(|token| self.normalize(token)).collect()
        };
        if self.token_mode != TokenMode::TokensOnly {
            terms.push(self.normalize(text));
        }
        terms
    }

    /// Canonical term a token belongs to, honoring term forms
    pub fn canonical_term(&self, token: &str) -> String {
        let token = self.normalize(token);
        for (term, forms) in &self.term_forms {
            if forms.iter().any(|form| self.normalize(form) == token) {
                return self.normalize(term);
            }
        }
        token
    }

    /// Matcher counting `term` (or one of its forms) in a text
    pub fn matcher(&self, term: &str) -> Result<TermMatcher> {
        let mut forms = vec![term.to_string()];
        if let Some(extra) = self.term_forms.get(term) {
            forms.extend(extra.iter().cloned());
        }

        let full_term = self.token_mode == TokenMode::FullTermsOnly
            || (self.token_mode == TokenMode::All
                && forms.len() == 1
                && tokens(term).count() > 1);
        if full_term {
            return Ok(TermMatcher::FullTerm {
                term: self.normalize(term),
                case_sensitive: self.case_sensitive,
            });
        }

        let alternatives = forms
            .iter()
            .map(|form| regex::escape(form))
            .collect::<Vec<_>>()
            .join("|");
        RegexBuilder::new(&format!(r"(?:\b|_)(?:{alternatives})(?:\b|_)"))
            .case_insensitive(!self.case_sensitive)
            .build()
            .map(TermMatcher::Pattern)
            .map_err(|e| PredictError::malformed(format!("cannot match term {term:?}: {e}")))
    }

    /// Number of times `term` (or one of its forms) occurs in `text`
    ///
    /// Builds a fresh matcher; callers evaluating the same term repeatedly
    /// should keep the [`TermMatcher`] instead.
    pub fn count_occurrences(&self, text: &str, term: &str) -> usize {
        match self.matcher(term) {
            Ok(matcher) => matcher.count(text),
            Err(e) => {
                warn!("{e}");
                0
            }
        }
    }
}

/// Compiled occurrence counter for one term
#[derive(Debug, Clone)]
pub enum TermMatcher {
    /// The whole text must equal the term
    FullTerm { term: String, case_sensitive: bool },
    Pattern(Regex),
}

impl TermMatcher {
    pub fn count(&self, text: &str) -> usize {
        match self {
            TermMatcher::FullTerm {
                term,
                case_sensitive: true,
            } => usize::from(text == term),
            TermMatcher::FullTerm { term, .. } => usize::from(text.to_lowercase() == *term),
            TermMatcher::Pattern(re) => re.find_iter(text).count(),
        }
    }
}

/// Summary statistics shipped with a field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSummary {
    pub mean: Option<f64>,
    pub standard_deviation: Option<f64>,
    /// Categories, tag cloud terms or items, in summary order
    pub terms: Vec<String>,
}

/// A field of a resource schema
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: String,
    pub name: String,
    pub optype: OpType,
    pub summary: Option<FieldSummary>,
    pub term_analysis: Option<TermAnalysis>,
    pub item_separator: Option<String>,
}

impl Field {
    pub fn new(id: impl Into<String>, name: impl Into<String>, optype: OpType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            optype,
            summary: None,
            term_analysis: None,
            item_separator: None,
        }
    }

    pub fn with_summary(mut self, summary: FieldSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_term_analysis(mut self, analysis: TermAnalysis) -> Self {
        self.term_analysis = Some(analysis);
        self
    }

    /// Term analysis in effect (defaults when the description has none)
    pub fn analysis(&self) -> TermAnalysis {
        self.term_analysis.clone().unwrap_or_default()
    }

    /// Items of an items-field value
    pub fn split_items<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let separator = self.item_separator.as_deref().unwrap_or(",");
        text.split(separator)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect()
    }

    /// Vocabulary from the field summary
    pub fn vocabulary(&self) -> &[String] {
        self.summary
            .as_ref()
            .map(|s| s.terms.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    mean: Option<f64>,
    standard_deviation: Option<f64>,
    #[serde(default)]
    categories: Vec<(Value, f64)>,
    #[serde(default)]
    tag_cloud: Vec<(String, f64)>,
    #[serde(default)]
    items: Vec<(String, f64)>,
}

#[derive(Debug, Deserialize)]
struct RawItemAnalysis {
    separator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: Option<String>,
    optype: OpType,
    summary: Option<RawSummary>,
    term_analysis: Option<TermAnalysis>,
    item_analysis: Option<RawItemAnalysis>,
}

fn label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

/// Parse a `{field_id: field}` description map
pub(crate) fn parse_fields(value: &Value) -> Result<BTreeMap<String, Field>> {
    let raw: BTreeMap<String, RawField> = serde_json::from_value(value.clone())
        .map_err(|e| PredictError::MalformedModel(format!("invalid fields: {e}")))?;

    Ok(raw
        .into_iter()
        .map(|(id, field)| {
            let summary = field.summary.map(|s| {
                let mut terms: Vec<String> = s.categories.iter().map(|(c, _)| label(c)).collect();
                terms.extend(s.tag_cloud.into_iter().map(|(t, _)| t));
                terms.extend(s.items.into_iter().map(|(i, _)| i));
                FieldSummary {
                    mean: s.mean,
                    standard_deviation: s.standard_deviation,
                    terms,
                }
            });
            let parsed = Field {
                name: field.name.unwrap_or_else(|| id.clone()),
                id: id.clone(),
                optype: field.optype,
                summary,
                term_analysis: field.term_analysis,
                item_separator: field.item_analysis.and_then(|a| a.separator),
            };
            (id, parsed)
        })
        .collect())
}

/// Field lookup tables and input filtering for one resource
#[derive(Debug, Clone)]
pub struct FieldResource {
    fields: BTreeMap<String, Field>,
    id_by_name: HashMap<String, String>,
    name_by_id: HashMap<String, String>,
    objective_id: Option<String>,
    missing_tokens: Vec<String>,
}

impl FieldResource {
    /// Build lookup tables for a schema with no objective field
    pub fn new(fields: BTreeMap<String, Field>) -> Result<Self> {
        Self::with_objective(fields, None, None)
    }

    /// Build lookup tables, excluding `objective_id` from accepted input
    pub fn with_objective(
        fields: BTreeMap<String, Field>,
        objective_id: Option<String>,
        missing_tokens: Option<Vec<String>>,
    ) -> Result<Self> {
        let mut id_by_name = HashMap::with_capacity(fields.len());
        let mut name_by_id = HashMap::with_capacity(fields.len());

        for (id, field) in &fields {
            if id != &field.id {
                return Err(PredictError::malformed(format!(
                    "field keyed as {id} declares id {}",
                    field.id
                )));
            }
            if let Some(previous) = id_by_name.insert(field.name.clone(), id.clone()) {
                return Err(PredictError::malformed(format!(
                    "field name {:?} is shared by {previous} and {id}",
                    field.name
                )));
            }
            name_by_id.insert(id.clone(), field.name.clone());
        }

        let missing_tokens = missing_tokens.unwrap_or_else(|| {
            DEFAULT_MISSING_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect()
        });

        Ok(Self {
            fields,
            id_by_name,
            name_by_id,
            objective_id,
            missing_tokens,
        })
    }

    /// Union of several schemas; the first definition of an id wins
    pub fn merged<'a>(
        resources: impl IntoIterator<Item = &'a FieldResource>,
    ) -> Result<Self> {
        let mut fields = BTreeMap::new();
        let mut objective_id = None;
        let mut missing_tokens = None;
        for resource in resources {
            for (id, field) in &resource.fields {
                fields.entry(id.clone()).or_insert_with(|| field.clone());
            }
            if objective_id.is_none() {
                objective_id = resource.objective_id.clone();
            }
            if missing_tokens.is_none() {
                missing_tokens = Some(resource.missing_tokens.clone());
            }
        }
        Self::with_objective(fields, objective_id, missing_tokens)
    }

    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.get(id)
    }

    pub fn field_id(&self, name: &str) -> Option<&str> {
        self.id_by_name.get(name).map(String::as_str)
    }

    pub fn field_name(&self, id: &str) -> Option<&str> {
        self.name_by_id.get(id).map(String::as_str)
    }

    /// Field name when known, the id otherwise
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.field_name(id).unwrap_or(id)
    }

    pub fn objective_id(&self) -> Option<&str> {
        self.objective_id.as_deref()
    }

    pub fn is_missing_token(&self, text: &str) -> bool {
        self.missing_tokens.iter().any(|token| token == text)
    }

    /// Re-key `input` by field id, keeping only recognized, non-missing values
    ///
    /// Unknown keys are dropped unless `strict` is set, in which case the first
    /// one is reported as [`PredictError::UnknownField`].
    pub fn filter_input(
        &self,
        input: &InputRecord,
        by_name: bool,
        strict: bool,
    ) -> Result<InputRecord> {
        let mut filtered = InputRecord::new();

        for (key, value) in input {
            let resolved = if by_name {
                self.field_id(key)
            } else {
                self.fields.get_key_value(key.as_str()).map(|(id, _)| id.as_str())
            };

            let Some(id) = resolved else {
                if strict {
                    return Err(PredictError::UnknownField(key.clone()));
                }
                debug!(key = %key, "dropping input key with no matching field");
                continue;
            };

            if self.objective_id.as_deref() == Some(id) {
                continue;
            }

            if let Some(cast) = self.cast(id, value) {
                filtered.insert(id.to_string(), cast);
            }
        }

        Ok(filtered)
    }

    fn cast(&self, id: &str, value: &FieldValue) -> Option<FieldValue> {
        let field = self.fields.get(id)?;
        match value {
            FieldValue::Missing => None,
            FieldValue::Number(n) if !n.is_finite() => {
                debug!(field = %id, value = n, "non-finite number treated as missing");
                None
            }
            FieldValue::Text(text) if self.is_missing_token(text) => None,
            FieldValue::Text(text) if field.optype == OpType::Numeric => {
                match text.trim().parse::<f64>() {
                    Ok(number) if number.is_finite() => Some(FieldValue::Number(number)),
                    _ => {
                        debug!(field = %id, value = %text, "non-numeric text for numeric field");
                        None
                    }
                }
            }
            FieldValue::Boolean(b) if field.optype == OpType::Numeric => {
                Some(FieldValue::Number(if *b { 1.0 } else { 0.0 }))
            }
            FieldValue::Number(n) if field.optype != OpType::Numeric => {
                Some(FieldValue::Text(format_number(*n)))
            }
            FieldValue::Boolean(b) if field.optype != OpType::Numeric => {
                Some(FieldValue::Text(b.to_string()))
            }
            other => Some(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn iris_fields() -> FieldResource {
        let fields = parse_fields(&json!({
            "000000": {"name": "sepal length", "optype": "numeric"},
            "000003": {"name": "petal width", "optype": "numeric",
                       "summary": {"mean": 1.2, "standard_deviation": 0.76}},
            "000004": {"name": "species", "optype": "categorical",
                       "summary": {"categories": [["setosa", 50], ["versicolor", 50]]}}
        }))
        .unwrap();
        FieldResource::with_objective(fields, Some("000004".into()), None).unwrap()
    }

    #[test]
    fn test_lookup_tables() {
        let fields = iris_fields();
        assert_eq!(fields.field_id("petal width"), Some("000003"));
        assert_eq!(fields.field_name("000000"), Some("sepal length"));
        assert_eq!(fields.field_id("petal length"), None);
        let summary = fields.field("000004").unwrap().summary.as_ref().unwrap();
        assert_eq!(summary.terms, vec!["setosa", "versicolor"]);
    }

    #[test]
    fn test_filter_by_name_drops_unknown_and_objective() {
        let fields = iris_fields();
        let input = InputRecord::from([
            ("petal width".to_string(), FieldValue::from(0.5)),
            ("colour".to_string(), FieldValue::from("red")),
            ("species".to_string(), FieldValue::from("setosa")),
        ]);
        let filtered = fields.filter_input(&input, true, false).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("000003"), Some(&FieldValue::Number(0.5)));
    }

    #[test]
    fn test_strict_mode_rejects_unknown_key() {
        let fields = iris_fields();
        let input = InputRecord::from([("colour".to_string(), FieldValue::from("red"))]);
        let err = fields.filter_input(&input, true, true).unwrap_err();
        assert!(matches!(err, PredictError::UnknownField(key) if key == "colour"));
    }

    #[test]
    fn test_missing_tokens_and_casting() {
        let fields = iris_fields();
        let input = InputRecord::from([
            ("000000".to_string(), FieldValue::from("5.1")),
            ("000003".to_string(), FieldValue::from("N/A")),
        ]);
        let filtered = fields.filter_input(&input, false, false).unwrap();
        assert_eq!(filtered.get("000000"), Some(&FieldValue::Number(5.1)));
        assert!(!filtered.contains_key("000003"));
    }

    #[test]
    fn test_non_finite_numbers_are_missing() {
        let fields = iris_fields();
        for value in [
            FieldValue::from("inf"),
            FieldValue::from("NaN"),
            FieldValue::from("-infinity"),
            FieldValue::from(f64::INFINITY),
            FieldValue::from(f64::NAN),
        ] {
            let input = InputRecord::from([("000000".to_string(), value)]);
            assert!(fields.filter_input(&input, false, false).unwrap().is_empty());
        }
    }

    #[test]
    fn test_duplicate_names_are_malformed() {
        let fields = parse_fields(&json!({
            "000000": {"name": "a", "optype": "numeric"},
            "000001": {"name": "a", "optype": "numeric"}
        }))
        .unwrap();
        assert!(matches!(
            FieldResource::new(fields),
            Err(PredictError::MalformedModel(_))
        ));
    }

    #[test]
    fn test_term_occurrences() {
        let analysis = TermAnalysis {
            case_sensitive: false,
            token_mode: TokenMode::All,
            term_forms: BTreeMap::from([("great".to_string(), vec!["greatest".to_string()])]),
        };
        assert_eq!(analysis.count_occurrences("Great food, greatest service", "great"), 2);
        assert_eq!(analysis.count_occurrences("ingratiating", "great"), 0);
        assert_eq!(analysis.canonical_term("GREATEST"), "great");
    }

    #[test]
    fn test_term_matcher_reuse() {
        let analysis = TermAnalysis::default();
        let matcher = analysis.matcher("fish").unwrap();
        assert!(matches!(matcher, TermMatcher::Pattern(_)));
        assert_eq!(matcher.count("Fish and fish_cakes"), 2);
        assert_eq!(matcher.count("selfish"), 0);

        let full = analysis.matcher("New York").unwrap();
        assert!(matches!(full, TermMatcher::FullTerm { .. }));
        assert_eq!(full.count("new york"), 1);
        assert_eq!(full.count("New York City"), 0);

        let exact = TermAnalysis {
            case_sensitive: true,
            token_mode: TokenMode::FullTermsOnly,
            ..Default::default()
        };
        assert_eq!(exact.matcher("Paris").unwrap().count("paris"), 0);
        assert_eq!(exact.matcher("Paris").unwrap().count("Paris"), 1);
    }

    #[test]
    fn test_input_from_json() {
        let input = input_from_json(&json!({"a": 1, "b": "x", "c": null, "d": true})).unwrap();
        assert_eq!(input.get("a"), Some(&FieldValue::Number(1.0)));
        assert_eq!(input.get("c"), Some(&FieldValue::Missing));
        assert!(input_from_json(&json!({"a": [1, 2]})).is_err());
        assert!(input_from_json(&json!([1])).is_err());
    }
}
