//! Launch description for the differential-drive robot: state publishers,
//! RViz, the ros2_control controller manager and its two controller spawners.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::ament::Env;
use crate::description::RobotDescription;
use crate::launch::{
    LaunchArg, LaunchDescription, LaunchEntity, NodeAction, OutputMode, ParamValue,
    ParameterSource,
};

/// Package providing the URDF, RViz and controller configuration.
pub const DESCRIPTION_PACKAGE: &str = "my_robot_pkg";

pub const USE_SIM_TIME: &str = "use_sim_time";
pub const RVIZ_CONFIG: &str = "rviz_config";

/// Files of the description package that the launch depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffbotPaths {
    pub share_dir: PathBuf,
    pub urdf: PathBuf,
    pub rviz_config: PathBuf,
    pub controller_config: PathBuf,
}

impl DiffbotPaths {
    /// Resolves the share directory of `package` and joins the expected file layout onto it.
    pub fn resolve(env: &Env, package: &str) -> Result<Self> {
        Ok(Self::from_share_dir(&env.share_directory(package)?))
    }

    pub fn from_share_dir(share_dir: &Path) -> Self {
        Self {
            share_dir: share_dir.to_path_buf(),
            urdf: share_dir.join("urdf").join("diffbot_description.urdf"),
            rviz_config: share_dir.join("rviz").join("diffbot.rviz"),
            controller_config: share_dir.join("control").join("controller_manager.yaml"),
        }
    }
}

/// Builds the diffbot launch description from the installed description package.
pub fn generate_launch_description(env: &Env) -> Result<LaunchDescription> {
    let paths = DiffbotPaths::resolve(env, DESCRIPTION_PACKAGE)?;
    Ok(generate_from_paths(&paths))
}

/// Builds the launch description for an already resolved file layout.
///
/// The URDF is read and the RViz config probed here, at build time, not when
/// the nodes are spawned.
pub fn generate_from_paths(paths: &DiffbotPaths) -> LaunchDescription {
    let description = RobotDescription::load(&paths.urdf);
    if let Some(name) = description.robot_name() {
        tracing::info!(robot = %name, "Using robot description {}", paths.urdf.display());
    }
    build(paths, &description)
}

fn build(paths: &DiffbotPaths, description: &RobotDescription) -> LaunchDescription {
    let use_sim_time = ParamValue::configuration(USE_SIM_TIME);
    let rviz_config = paths.rviz_config.display().to_string();

    let declare_use_sim_time = LaunchArg::new(
        USE_SIM_TIME,
        "false",
        "Use simulation (Gazebo) clock if true",
    );
    let declare_rviz_config =
        LaunchArg::new(RVIZ_CONFIG, &rviz_config, "Path to the RViz config file");

    let robot_state_publisher = NodeAction::new("robot_state_publisher", "robot_state_publisher")
        .name("robot_state_publisher")
        .output(OutputMode::Screen)
        .parameter(ParameterSource::inline([(USE_SIM_TIME, use_sim_time.clone())]))
        .parameter(ParameterSource::inline([(
            "robot_description",
            description.content.as_str(),
        )]));

    let joint_state_publisher = NodeAction::new("joint_state_publisher", "joint_state_publisher")
        .name("joint_state_publisher")
        .output(OutputMode::Screen)
        .parameter(ParameterSource::inline([
            (USE_SIM_TIME, use_sim_time.clone()),
            ("gui", ParamValue::Bool(true)),
        ]));

    let rviz_arguments = if paths.rviz_config.exists() {
        vec!["-d".to_string(), rviz_config]
    } else {
        tracing::warn!(
            "RViz config {} not found, starting RViz without one",
            paths.rviz_config.display()
        );
        Vec::new()
    };

    let rviz = NodeAction::new("rviz2", "rviz2")
        .name("rviz2")
        .output(OutputMode::Screen)
        .arguments(rviz_arguments)
        .parameter(ParameterSource::inline([(USE_SIM_TIME, use_sim_time.clone())]));

    let controller_manager = NodeAction::new("controller_manager", "ros2_control_node")
        .output(OutputMode::Screen)
        .parameter(ParameterSource::inline([(
            "robot_description",
            description.content.as_str(),
        )]))
        .parameter(ParameterSource::File(paths.controller_config.clone()))
        .parameter(ParameterSource::inline([(USE_SIM_TIME, use_sim_time)]));

    let joint_state_broadcaster_spawner = NodeAction::new("controller_manager", "spawner")
        .output(OutputMode::Screen)
        .arguments(["joint_state_broadcaster"]);

    let diff_drive_controller_spawner = NodeAction::new("controller_manager", "spawner")
        .output(OutputMode::Screen)
        .arguments(["diff_drive_base_controller"]);

    // Publishers come before RViz so they are up when it subscribes.
    LaunchDescription::new(vec![
        LaunchEntity::DeclareArgument(declare_use_sim_time),
        LaunchEntity::DeclareArgument(declare_rviz_config),
        LaunchEntity::Node(robot_state_publisher),
        LaunchEntity::Node(joint_state_publisher),
        LaunchEntity::Node(rviz),
        LaunchEntity::Node(controller_manager),
        LaunchEntity::Node(joint_state_broadcaster_spawner),
        LaunchEntity::Node(diff_drive_controller_spawner),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ament::tests::install_package;

    fn share_dir_with(urdf: Option<&str>, rviz: bool) -> (tempfile::TempDir, Env) {
        let prefix = tempfile::tempdir().unwrap();
        let share = install_package(prefix.path(), DESCRIPTION_PACKAGE);
        if let Some(urdf) = urdf {
            std::fs::create_dir_all(share.join("urdf")).unwrap();
            std::fs::write(share.join("urdf").join("diffbot_description.urdf"), urdf).unwrap();
        }
        if rviz {
            std::fs::create_dir_all(share.join("rviz")).unwrap();
            std::fs::write(share.join("rviz").join("diffbot.rviz"), "Panels: []\n").unwrap();
        }
        let env = Env::from_path(&prefix.path().display().to_string());
        (prefix, env)
    }

    fn labels(desc: &LaunchDescription) -> Vec<String> {
        desc.entities
            .iter()
            .map(|e| match e {
                LaunchEntity::DeclareArgument(arg) => format!("arg:{}", arg.name),
                LaunchEntity::Node(node) => format!("{}/{}", node.package, node.executable),
            })
            .collect()
    }

    #[test]
    fn test_paths_layout() {
        let paths = DiffbotPaths::from_share_dir(Path::new("/opt/share/my_robot_pkg"));
        assert_eq!(
            paths.urdf,
            Path::new("/opt/share/my_robot_pkg/urdf/diffbot_description.urdf")
        );
        assert_eq!(
            paths.rviz_config,
            Path::new("/opt/share/my_robot_pkg/rviz/diffbot.rviz")
        );
        assert_eq!(
            paths.controller_config,
            Path::new("/opt/share/my_robot_pkg/control/controller_manager.yaml")
        );
    }

    #[test]
    fn test_missing_package_is_an_error() {
        let prefix = tempfile::tempdir().unwrap();
        let env = Env::from_path(&prefix.path().display().to_string());
        assert!(generate_launch_description(&env).is_err());
    }

    #[test]
    fn test_fixed_order_and_counts() {
        let (_prefix, env) = share_dir_with(Some("<robot name=\"x\"/>"), true);
        let desc = generate_launch_description(&env).unwrap();

        assert_eq!(
            labels(&desc),
            [
                "arg:use_sim_time",
                "arg:rviz_config",
                "robot_state_publisher/robot_state_publisher",
                "joint_state_publisher/joint_state_publisher",
                "rviz2/rviz2",
                "controller_manager/ros2_control_node",
                "controller_manager/spawner",
                "controller_manager/spawner",
            ]
        );
        assert_eq!(desc.arguments().count(), 2);
        assert_eq!(desc.nodes().count(), 7);
        assert!(desc.nodes().all(|n| n.output == OutputMode::Screen));
    }

    #[test]
    fn test_same_shape_without_any_files() {
        let (_prefix, env) = share_dir_with(None, false);
        let desc = generate_launch_description(&env).unwrap();
        assert_eq!(desc.arguments().count(), 2);
        assert_eq!(desc.nodes().count(), 7);
    }

    #[test]
    fn test_robot_description_passed_verbatim() {
        let (_prefix, env) = share_dir_with(Some("<robot name=\"x\"/>"), false);
        let desc = generate_launch_description(&env).unwrap();

        let expected = ParamValue::String("<robot name=\"x\"/>".into());
        let rsp = desc.node("robot_state_publisher").unwrap();
        assert_eq!(rsp.parameter_value("robot_description"), Some(&expected));
        let cm = desc.node("ros2_control_node").unwrap();
        assert_eq!(cm.parameter_value("robot_description"), Some(&expected));
    }

    #[test]
    fn test_unreadable_urdf_gives_empty_description() {
        let (_prefix, env) = share_dir_with(None, false);
        let desc = generate_launch_description(&env).unwrap();

        let rsp = desc.node("robot_state_publisher").unwrap();
        assert_eq!(
            rsp.parameter_value("robot_description"),
            Some(&ParamValue::String(String::new()))
        );
    }

    #[test]
    fn test_rviz_arguments_when_config_exists() {
        let (_prefix, env) = share_dir_with(None, true);
        let paths = DiffbotPaths::resolve(&env, DESCRIPTION_PACKAGE).unwrap();
        let desc = generate_from_paths(&paths);

        let rviz = desc.node("rviz2").unwrap();
        assert_eq!(
            rviz.arguments,
            ["-d".to_string(), paths.rviz_config.display().to_string()]
        );
    }

    #[test]
    fn test_rviz_arguments_empty_when_config_missing() {
        let (_prefix, env) = share_dir_with(Some("<robot name=\"x\"/>"), false);
        let desc = generate_launch_description(&env).unwrap();
        assert!(desc.node("rviz2").unwrap().arguments.is_empty());
    }

    #[test]
    fn test_arguments_and_defaults() {
        let (_prefix, env) = share_dir_with(None, false);
        let paths = DiffbotPaths::resolve(&env, DESCRIPTION_PACKAGE).unwrap();
        let desc = generate_from_paths(&paths);

        let args: Vec<_> = desc.arguments().collect();
        assert_eq!(args[0].name, USE_SIM_TIME);
        assert_eq!(args[0].default_value, "false");
        assert_eq!(args[1].name, RVIZ_CONFIG);
        assert_eq!(args[1].default_value, paths.rviz_config.display().to_string());
    }

    #[test]
    fn test_controller_manager_parameter_order() {
        let (_prefix, env) = share_dir_with(Some("<robot name=\"x\"/>"), false);
        let paths = DiffbotPaths::resolve(&env, DESCRIPTION_PACKAGE).unwrap();
        let desc = generate_from_paths(&paths);

        let cm = desc.node("ros2_control_node").unwrap();
        assert_eq!(cm.name, None);
        assert_eq!(cm.parameters.len(), 3);
        assert!(cm.parameters[0].get("robot_description").is_some());
        assert_eq!(
            cm.parameters[1],
            ParameterSource::File(paths.controller_config.clone())
        );
        assert_eq!(
            cm.parameters[2].get(USE_SIM_TIME),
            Some(&ParamValue::configuration(USE_SIM_TIME))
        );
    }

    #[test]
    fn test_spawners_and_joint_state_publisher() {
        let (_prefix, env) = share_dir_with(None, false);
        let desc = generate_launch_description(&env).unwrap();

        let spawners: Vec<_> = desc
            .nodes()
            .filter(|n| n.executable == "spawner")
            .map(|n| n.arguments.clone())
            .collect();
        assert_eq!(
            spawners,
            [
                vec!["joint_state_broadcaster".to_string()],
                vec!["diff_drive_base_controller".to_string()],
            ]
        );

        let jsp = desc.node("joint_state_publisher").unwrap();
        assert_eq!(jsp.parameter_value("gui"), Some(&ParamValue::Bool(true)));
        assert_eq!(
            jsp.parameter_value(USE_SIM_TIME),
            Some(&ParamValue::configuration(USE_SIM_TIME))
        );
    }
}
