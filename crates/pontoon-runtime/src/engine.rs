//! The seam between the platform and a script engine.

use std::path::Path;

use pontoon_script::Location;

use crate::registry::ClassRegistry;

/// How a script's execution ended, when it did not simply return.
#[derive(Debug)]
pub enum EngineFault {
    /// The script called its `die` construct. Clean termination.
    Die,
    /// The script called its `exit` construct. Clean termination.
    Exit,
    /// A fault raised by script code, with the position it was raised at.
    Script { message: String, location: Location },
    /// An engine-level failure: parse errors, missing files, interpreter
    /// bugs.
    Other(anyhow::Error),
}

impl std::fmt::Display for EngineFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Die => f.write_str("script terminated via die"),
            Self::Exit => f.write_str("script terminated via exit"),
            Self::Script { message, location } => {
                write!(f, "{} in {}", message, location.describe())
            }
            Self::Other(err) => write!(f, "{err}"),
        }
    }
}

impl EngineFault {
    /// Die and exit end the script without being failures.
    pub fn is_clean_termination(&self) -> bool {
        matches!(self, Self::Die | Self::Exit)
    }
}

/// An embeddable script engine. The bootstrap drives it in two steps:
/// install the platform classes, then run the entry script.
pub trait ScriptEngine: Send {
    /// Make every class in the registry constructible from script code
    /// under its registered name.
    fn install_classes(&mut self, registry: &ClassRegistry) -> Result<(), EngineFault>;

    /// Execute the entry script to completion.
    fn execute(&mut self, script: &Path) -> Result<(), EngineFault>;
}
