use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A declared argument of a launch description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchArg {
    /// Argument name, also the key of its launch configuration.
    pub name: String,
    /// Default value for the argument, or empty if none is specified.
    pub default_value: String,
    /// Human-readable description shown by `show-args`.
    pub description: String,
}

impl LaunchArg {
    pub fn new(name: &str, default_value: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            default_value: default_value.to_string(),
            description: description.to_string(),
        }
    }
}

/// A ROS parameter value.
///
/// `Configuration` is a deferred reference to a launch configuration and is
/// only turned into a concrete value when the node is spawned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Configuration { configuration: String },
}

impl ParamValue {
    pub fn configuration(name: &str) -> Self {
        ParamValue::Configuration {
            configuration: name.to_string(),
        }
    }

    /// Resolves configuration references and coerces them like ROS parameter YAML.
    pub fn resolve(&self, configs: &LaunchConfigurations) -> Result<ParamValue> {
        match self {
            ParamValue::Configuration { configuration } => {
                let raw = configs.get(configuration).with_context(|| {
                    format!("Launch configuration '{configuration}' does not exist")
                })?;
                Ok(coerce(raw))
            }
            other => Ok(other.clone()),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

/// YAML 1.1 scalar resolution, as launch_ros applies to substituted values.
fn coerce(raw: &str) -> ParamValue {
    match raw.trim() {
        "true" | "True" | "TRUE" | "yes" | "Yes" | "YES" | "on" | "On" | "ON" => {
            ParamValue::Bool(true)
        }
        "false" | "False" | "FALSE" | "no" | "No" | "NO" | "off" | "Off" | "OFF" => {
            ParamValue::Bool(false)
        }
        trimmed => {
            if let Ok(i) = trimmed.parse::<i64>() {
                ParamValue::Integer(i)
            } else if let Ok(f) = trimmed.parse::<f64>()
                && f.is_finite()
            {
                ParamValue::Double(f)
            } else {
                ParamValue::String(raw.to_string())
            }
        }
    }
}

/// One entry of a node's parameter list. Later entries override earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    Inline(BTreeMap<String, ParamValue>),
    File(PathBuf),
}

impl ParameterSource {
    /// Builds an inline source from `(name, value)` pairs.
    pub fn inline<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        ParameterSource::Inline(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Looks up an inline parameter by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        match self {
            ParameterSource::Inline(map) => map.get(name),
            ParameterSource::File(_) => None,
        }
    }
}

/// Where a node's stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Streamed to the terminal (and the node's log file).
    Screen,
    /// Written only to the node's log file.
    Log,
}

/// A request to run one ROS 2 node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAction {
    pub package: String,
    pub executable: String,
    /// Node name remapping (`__node:=`), if any.
    pub name: Option<String>,
    pub output: OutputMode,
    pub parameters: Vec<ParameterSource>,
    /// Arguments passed before `--ros-args`.
    pub arguments: Vec<String>,
}

impl NodeAction {
    pub fn new(package: &str, executable: &str) -> Self {
        Self {
            package: package.to_string(),
            executable: executable.to_string(),
            name: None,
            output: OutputMode::Log,
            parameters: Vec::new(),
            arguments: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn parameter(mut self, source: ParameterSource) -> Self {
        self.parameters.push(source);
        self
    }

    pub fn arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// The node name if set, otherwise the executable name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.executable)
    }

    /// Returns the last inline value of a parameter, following override order.
    pub fn parameter_value(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.iter().rev().find_map(|p| p.get(name))
    }
}

/// An entry of a launch description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LaunchEntity {
    DeclareArgument(LaunchArg),
    Node(NodeAction),
}

/// An ordered list of argument declarations and node actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchDescription {
    pub entities: Vec<LaunchEntity>,
}

impl LaunchDescription {
    pub fn new(entities: Vec<LaunchEntity>) -> Self {
        Self { entities }
    }

    /// Declared arguments in declaration order.
    pub fn arguments(&self) -> impl Iterator<Item = &LaunchArg> {
        self.entities.iter().filter_map(|e| match e {
            LaunchEntity::DeclareArgument(arg) => Some(arg),
            LaunchEntity::Node(_) => None,
        })
    }

    /// Node actions in launch order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeAction> {
        self.entities.iter().filter_map(|e| match e {
            LaunchEntity::Node(node) => Some(node),
            LaunchEntity::DeclareArgument(_) => None,
        })
    }

    /// Finds the first node whose name (or executable, when unnamed) matches.
    pub fn node(&self, name: &str) -> Option<&NodeAction> {
        self.nodes().find(|n| n.display_name() == name)
    }

    /// Seeds a configuration store from the declared defaults, then applies overrides.
    pub fn configurations(&self, overrides: &[(String, String)]) -> Result<LaunchConfigurations> {
        let mut configs = LaunchConfigurations::default();
        for arg in self.arguments() {
            configs.set(&arg.name, &arg.default_value);
        }
        for (name, value) in overrides {
            if !self.arguments().any(|a| &a.name == name) {
                let declared: Vec<_> = self.arguments().map(|a| a.name.as_str()).collect();
                anyhow::bail!(
                    "Unknown launch argument '{name}' (declared: {})",
                    declared.join(", ")
                );
            }
            configs.set(name, value);
        }
        Ok(configs)
    }
}

/// Key-value store of launch configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LaunchConfigurations {
    values: BTreeMap<String, String>,
}

impl LaunchConfigurations {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }
}

/// Parses a `name:=value` launch argument override.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(":=")
        .with_context(|| format!("Invalid launch argument '{raw}', expected name:=value"))?;
    if name.is_empty() {
        anyhow::bail!("Invalid launch argument '{raw}', name is empty");
    }
    Ok((name.to_string(), value.to_string()))
}

/// Resolves every configuration reference of a node's inline parameters.
pub fn resolve_parameters(
    node: &NodeAction,
    configs: &LaunchConfigurations,
) -> Result<Vec<ParameterSource>> {
    node.parameters
        .iter()
        .map(|source| match source {
            ParameterSource::Inline(map) => map
                .iter()
                .map(|(k, v)| {
                    v.resolve(configs)
                        .with_context(|| format!("Failed to resolve parameter '{k}'"))
                        .map(|v| (k.clone(), v))
                })
                .collect::<Result<BTreeMap<_, _>>>()
                .map(ParameterSource::Inline),
            ParameterSource::File(path) => Ok(ParameterSource::File(path.clone())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LaunchDescription {
        LaunchDescription::new(vec![
            LaunchEntity::DeclareArgument(LaunchArg::new("use_sim_time", "false", "")),
            LaunchEntity::Node(
                NodeAction::new("rviz2", "rviz2")
                    .name("rviz2")
                    .parameter(ParameterSource::inline([(
                        "use_sim_time",
                        ParamValue::configuration("use_sim_time"),
                    )])),
            ),
        ])
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("use_sim_time:=true").unwrap(),
            ("use_sim_time".to_string(), "true".to_string())
        );
        assert_eq!(
            parse_override("rviz_config:=/a:=b").unwrap(),
            ("rviz_config".to_string(), "/a:=b".to_string())
        );
        assert!(parse_override("use_sim_time=true").is_err());
        assert!(parse_override(":=true").is_err());
    }

    #[test]
    fn test_configurations_defaults_and_overrides() {
        let desc = sample();
        let configs = desc.configurations(&[]).unwrap();
        assert_eq!(configs.get("use_sim_time"), Some("false"));

        let configs = desc
            .configurations(&[("use_sim_time".to_string(), "true".to_string())])
            .unwrap();
        assert_eq!(configs.get("use_sim_time"), Some("true"));

        assert!(desc.configurations(&[("gui".to_string(), "1".to_string())]).is_err());
    }

    #[test]
    fn test_resolve_coerces_like_yaml() {
        let mut configs = LaunchConfigurations::default();
        configs.set("a", "true");
        configs.set("b", "42");
        configs.set("c", "0.5");
        configs.set("d", "/tmp/x.rviz");

        let resolve = |name| ParamValue::configuration(name).resolve(&configs).unwrap();
        assert_eq!(resolve("a"), ParamValue::Bool(true));
        assert_eq!(resolve("b"), ParamValue::Integer(42));
        assert_eq!(resolve("c"), ParamValue::Double(0.5));
        assert_eq!(resolve("d"), ParamValue::String("/tmp/x.rviz".into()));
        assert!(ParamValue::configuration("missing").resolve(&configs).is_err());
    }

    #[test]
    fn test_resolve_accepts_yaml_bool_spellings() {
        let mut configs = LaunchConfigurations::default();
        for raw in ["TRUE", "yes", "On", "YES"] {
            configs.set("use_sim_time", raw);
            assert_eq!(
                ParamValue::configuration("use_sim_time")
                    .resolve(&configs)
                    .unwrap(),
                ParamValue::Bool(true),
                "{raw}"
            );
        }
        for raw in ["FALSE", "no", "off", "Off"] {
            configs.set("use_sim_time", raw);
            assert_eq!(
                ParamValue::configuration("use_sim_time")
                    .resolve(&configs)
                    .unwrap(),
                ParamValue::Bool(false),
                "{raw}"
            );
        }
        configs.set("use_sim_time", "y");
        assert_eq!(
            ParamValue::configuration("use_sim_time")
                .resolve(&configs)
                .unwrap(),
            ParamValue::String("y".into())
        );
    }

    #[test]
    fn test_resolve_parameters_keeps_order() {
        let node = NodeAction::new("controller_manager", "ros2_control_node")
            .parameter(ParameterSource::inline([("robot_description", "<robot/>")]))
            .parameter(ParameterSource::File(PathBuf::from("/share/control.yaml")))
            .parameter(ParameterSource::inline([(
                "use_sim_time",
                ParamValue::configuration("use_sim_time"),
            )]));
        let configs = sample().configurations(&[]).unwrap();

        let resolved = resolve_parameters(&node, &configs).unwrap();
        assert_eq!(resolved.len(), 3);
        assert_eq!(
            resolved[1],
            ParameterSource::File(PathBuf::from("/share/control.yaml"))
        );
        assert_eq!(resolved[2].get("use_sim_time"), Some(&ParamValue::Bool(false)));
    }

    #[test]
    fn test_parameter_value_last_source_wins() {
        let node = NodeAction::new("pkg", "exe")
            .parameter(ParameterSource::inline([("gui", false)]))
            .parameter(ParameterSource::inline([("gui", true)]));
        assert_eq!(node.parameter_value("gui"), Some(&ParamValue::Bool(true)));
        assert_eq!(node.display_name(), "exe");
    }

    #[test]
    fn test_description_serializes_to_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["entities"][0]["kind"], "declare_argument");
        assert_eq!(json["entities"][1]["kind"], "node");
        assert_eq!(
            json["entities"][1]["parameters"][0]["inline"]["use_sim_time"]["configuration"],
            "use_sim_time"
        );
    }
}
