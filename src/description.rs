use std::path::{Path, PathBuf};

/// The URDF text handed to the state publisher and the controller manager.
///
/// Loading never fails: an unreadable file yields empty content and a
/// diagnostic, and the launch proceeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotDescription {
    pub path: PathBuf,
    pub content: String,
    /// Why the file could not be read, if it could not.
    pub diagnostic: Option<String>,
}

impl RobotDescription {
    /// Reads the description file at `path` as UTF-8 text.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                tracing::debug!(
                    path = %path.display(),
                    bytes = content.len(),
                    robot = ?robot_name(&content),
                    "Loaded robot description"
                );
                Self {
                    path: path.to_path_buf(),
                    content,
                    diagnostic: None,
                }
            }
            Err(e) => {
                let diagnostic = format!("Could not read URDF {}: {e}", path.display());
                tracing::error!("{diagnostic}");
                Self {
                    path: path.to_path_buf(),
                    content: String::new(),
                    diagnostic: Some(diagnostic),
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// The `name` attribute of the root `<robot>` element.
    pub fn robot_name(&self) -> Option<String> {
        robot_name(&self.content)
    }
}

fn robot_name(content: &str) -> Option<String> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(content);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() != b"robot" {
                    return None;
                }
                let attr = e.try_get_attribute("name").ok()??;
                return attr.unescape_value().ok().map(|v| v.into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}
