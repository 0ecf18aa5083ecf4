//! Launch description and process runner for the diffbot robot stack.
//!
//! [`diffbot::generate_launch_description`] resolves the description package
//! through the ament index, reads its URDF and builds the ordered list of
//! argument declarations and nodes. [`process::Launcher`] spawns those nodes.

/// Ament environment lookup: installed packages, share directories, executables.
pub mod ament;
/// Robot description (URDF) loading.
pub mod description;
/// The diffbot launch description.
pub mod diffbot;
/// Launch description data model and launch configurations.
pub mod launch;
/// Node process launching, lifecycle management, and output streaming.
pub mod process;

pub use ament::{Env, Package};
pub use description::RobotDescription;
pub use diffbot::{DiffbotPaths, generate_from_paths, generate_launch_description};
pub use launch::{
    LaunchArg, LaunchConfigurations, LaunchDescription, LaunchEntity, NodeAction, OutputMode,
    ParamValue, ParameterSource,
};
pub use process::{LaunchResult, Launcher, NodeCommand};
