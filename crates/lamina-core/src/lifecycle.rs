use crate::CoreError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    Unmounted,
    Mounted,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unmounted => "unmounted",
            Self::Mounted => "mounted",
        })
    }
}

pub fn validate_transition(from: MountState, to: MountState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (MountState::Unmounted, MountState::Mounted) | (MountState::Mounted, MountState::Unmounted)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::IllegalState(format!(
            "invalid mount state transition: {from} -> {to}"
        )))
    }
}
