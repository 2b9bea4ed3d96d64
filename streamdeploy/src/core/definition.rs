//! Pipeline definitions and their stages.
//!
//! A [`PipelineDefinition`] is what the DSL parser hands to the engine: a
//! name, the verbatim DSL text and an ordered list of [`Stage`]s whose
//! properties already carry the binding keys in [`binding`].

use crate::errors::{DeployError, InvalidDefinitionError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

/// Binding property keys set on stages by the parser.
pub mod binding {
    /// Destination the stage consumes from.
    pub const INPUT_DESTINATION: &str = "input.destination";
    /// Destination the stage publishes to.
    pub const OUTPUT_DESTINATION: &str = "output.destination";
    /// Consumer group for the input destination.
    pub const INPUT_GROUP: &str = "input.group";

    /// Returns true for keys that describe wiring rather than app config.
    #[must_use]
    pub fn is_binding_key(key: &str) -> bool {
        matches!(key, INPUT_DESTINATION | OUTPUT_DESTINATION | INPUT_GROUP)
    }
}

const MAX_NAME_LEN: usize = 255;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]*$").unwrap_or_else(|e| panic!("invalid name pattern: {e}"))
});

/// One application instance within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Unique label within the pipeline.
    pub label: String,
    /// The registered application name.
    pub app_name: String,
    /// App-level configuration, including binding keys.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Stage {
    /// Creates a stage labelled after its app.
    #[must_use]
    pub fn new(app_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            label: app_name.clone(),
            app_name,
            properties: BTreeMap::new(),
        }
    }

    /// Sets an explicit label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Adds an app property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the input destination.
    #[must_use]
    pub fn with_input(self, destination: impl Into<String>) -> Self {
        self.with_property(binding::INPUT_DESTINATION, destination)
    }

    /// Sets the output destination.
    #[must_use]
    pub fn with_output(self, destination: impl Into<String>) -> Self {
        self.with_property(binding::OUTPUT_DESTINATION, destination)
    }

    /// Returns true if the stage consumes from a destination.
    #[must_use]
    pub fn has_input_binding(&self) -> bool {
        self.properties.contains_key(binding::INPUT_DESTINATION)
    }

    /// Returns true if the stage publishes to a destination.
    #[must_use]
    pub fn has_output_binding(&self) -> bool {
        self.properties.contains_key(binding::OUTPUT_DESTINATION)
    }

    /// Returns the input destination if bound.
    #[must_use]
    pub fn input_destination(&self) -> Option<&str> {
        self.properties.get(binding::INPUT_DESTINATION).map(String::as_str)
    }

    /// Returns the output destination if bound.
    #[must_use]
    pub fn output_destination(&self) -> Option<&str> {
        self.properties.get(binding::OUTPUT_DESTINATION).map(String::as_str)
    }

    fn render(&self) -> String {
        let mut out = if self.label == self.app_name {
            self.app_name.clone()
        } else {
            format!("{}: {}", self.label, self.app_name)
        };

        for (key, value) in &self.properties {
            if binding::is_binding_key(key) {
                continue;
            }
            if value.chars().any(char::is_whitespace) {
                out.push_str(&format!(" --{key}='{value}'"));
            } else {
                out.push_str(&format!(" --{key}={value}"));
            }
        }
        out
    }
}

/// A named, ordered chain of stages.
///
/// Index 0 is the most upstream stage; stage order is deployment order.
/// Deserialized definitions are validated like built ones, but keep their
/// labels and bindings as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPipelineDefinition")]
pub struct PipelineDefinition {
    name: String,
    dsl_text: String,
    stages: Vec<Stage>,
}

#[derive(Deserialize)]
struct RawPipelineDefinition {
    name: String,
    dsl_text: String,
    #[serde(default)]
    stages: Vec<Stage>,
}

impl TryFrom<RawPipelineDefinition> for PipelineDefinition {
    type Error = DeployError;

    fn try_from(raw: RawPipelineDefinition) -> Result<Self, Self::Error> {
        check_shape(&raw.name, &raw.stages)?;
        let mut seen = HashSet::new();
        if let Some(dup) = raw.stages.iter().find(|s| !seen.insert(s.label.as_str())) {
            return Err(InvalidDefinitionError::new(&raw.name, format!("duplicate stage label '{}'", dup.label)).into());
        }
        Ok(Self {
            name: raw.name,
            dsl_text: raw.dsl_text,
            stages: raw.stages,
        })
    }
}

impl PipelineDefinition {
    /// Starts building a definition.
    #[must_use]
    pub fn builder(name: impl Into<String>, dsl_text: impl Into<String>) -> PipelineDefinitionBuilder {
        PipelineDefinitionBuilder::new(name, dsl_text)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the DSL text as submitted (or as last reconciled).
    #[must_use]
    pub fn dsl_text(&self) -> &str {
        &self.dsl_text
    }

    /// Returns the stages in deployment order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Looks up a stage by label.
    #[must_use]
    pub fn stage(&self, label: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.label == label)
    }

    /// Returns the stage labels in deployment order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.label.clone()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the definition has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Renders the definition back into pipe DSL form.
    ///
    /// Named destinations on the first stage's input and the last stage's
    /// output are rendered as `:dest >` and `> :dest`.
    #[must_use]
    pub fn render_dsl(&self) -> String {
        let body = self.stages.iter().map(Stage::render).collect::<Vec<_>>().join(" | ");

        let mut dsl = String::new();
        if let Some(dest) = self.stages.first().and_then(Stage::input_destination) {
            dsl.push_str(&format!(":{dest} > "));
        }
        dsl.push_str(&body);
        if let Some(dest) = self.stages.last().and_then(Stage::output_destination) {
            dsl.push_str(&format!(" > :{dest}"));
        }
        dsl
    }

    /// Returns a copy with app properties replaced per stage label.
    ///
    /// Binding keys of the existing stages are kept; labels not present in
    /// `updates` are left untouched. The DSL text is re-rendered.
    #[must_use]
    pub fn with_stage_properties(&self, updates: &BTreeMap<String, BTreeMap<String, String>>) -> Self {
        let stages = self
            .stages
            .iter()
            .map(|stage| match updates.get(&stage.label) {
                Some(props) => {
                    let mut properties: BTreeMap<String, String> = stage
                        .properties
                        .iter()
                        .filter(|(k, _)| binding::is_binding_key(k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    properties.extend(
                        props
                            .iter()
                            .filter(|(k, _)| !binding::is_binding_key(k))
                            .map(|(k, v)| (k.clone(), v.clone())),
                    );
                    Stage {
                        properties,
                        ..stage.clone()
                    }
                }
                None => stage.clone(),
            })
            .collect();

        let mut updated = Self {
            name: self.name.clone(),
            dsl_text: String::new(),
            stages,
        };
        updated.dsl_text = updated.render_dsl();
        updated
    }
}

/// Builder that validates and wires a [`PipelineDefinition`].
///
/// Consecutive stages are connected by pipe destinations named
/// `<pipeline>.<upstream label>` unless the stages already carry explicit
/// binding properties.
#[derive(Debug, Clone)]
pub struct PipelineDefinitionBuilder {
    name: String,
    dsl_text: String,
    stages: Vec<Stage>,
    from_destination: Option<String>,
    to_destination: Option<String>,
}

impl PipelineDefinitionBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>, dsl_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dsl_text: dsl_text.into(),
            stages: Vec::new(),
            from_destination: None,
            to_destination: None,
        }
    }

    /// Appends a stage downstream of the current last stage.
    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a stage for an app with default label.
    #[must_use]
    pub fn app(self, app_name: impl Into<String>) -> Self {
        self.stage(Stage::new(app_name))
    }

    /// Makes the first stage consume from a named destination.
    #[must_use]
    pub fn from_destination(mut self, destination: impl Into<String>) -> Self {
        self.from_destination = Some(destination.into());
        self
    }

    /// Makes the last stage publish to a named destination.
    #[must_use]
    pub fn to_destination(mut self, destination: impl Into<String>) -> Self {
        self.to_destination = Some(destination.into());
        self
    }

    /// Validates the definition and wires pipe bindings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for a bad name, an empty stage list, or
    /// duplicate explicit labels.
    pub fn build(self) -> Result<PipelineDefinition, DeployError> {
        check_shape(&self.name, &self.stages)?;

        let mut stages = assign_labels(&self.name, self.stages)?;

        let last = stages.len() - 1;
        for i in 0..last {
            let default_destination = format!("{}.{}", self.name, stages[i].label);
            let destination = stages[i]
                .properties
                .entry(binding::OUTPUT_DESTINATION.to_string())
                .or_insert(default_destination)
                .clone();
            let downstream = &mut stages[i + 1].properties;
            downstream
                .entry(binding::INPUT_DESTINATION.to_string())
                .or_insert(destination);
            downstream
                .entry(binding::INPUT_GROUP.to_string())
                .or_insert_with(|| self.name.clone());
        }
        if let Some(dest) = self.from_destination {
            stages[0].properties.insert(binding::INPUT_DESTINATION.to_string(), dest);
            stages[0]
                .properties
                .entry(binding::INPUT_GROUP.to_string())
                .or_insert_with(|| self.name.clone());
        }
        if let Some(dest) = self.to_destination {
            stages[last].properties.insert(binding::OUTPUT_DESTINATION.to_string(), dest);
        }

        Ok(PipelineDefinition {
            name: self.name,
            dsl_text: self.dsl_text,
            stages,
        })
    }
}

/// Checks the name pattern and that there is at least one stage.
fn check_shape(name: &str, stages: &[Stage]) -> Result<(), DeployError> {
    if name.len() > MAX_NAME_LEN || !NAME_PATTERN.is_match(name) {
        return Err(InvalidDefinitionError::new(
            name,
            format!(
                "name must match {} and be at most {MAX_NAME_LEN} characters",
                NAME_PATTERN.as_str()
            ),
        )
        .into());
    }
    if stages.is_empty() {
        return Err(InvalidDefinitionError::new(name, "a pipeline needs at least one stage").into());
    }
    Ok(())
}

/// Disambiguates default labels and rejects duplicate explicit ones.
fn assign_labels(pipeline: &str, stages: Vec<Stage>) -> Result<Vec<Stage>, DeployError> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(stages.len());

    for mut stage in stages {
        if used.contains(&stage.label) {
            if stage.label != stage.app_name {
                return Err(InvalidDefinitionError::new(
                    pipeline,
                    format!("duplicate stage label '{}'", stage.label),
                )
                .into());
            }
            let mut n = 2;
            while used.contains(&format!("{}-{n}", stage.app_name)) {
                n += 1;
            }
            stage.label = format!("{}-{n}", stage.app_name);
        }
        used.insert(stage.label.clone());
        out.push(stage);
    }

    Ok(out)
}
