//! Error types
//!
//! Three kinds of failure surface to callers: malformed configuration
//! (vehicle data, part catalog, collision event names), lifecycle
//! transitions requested out of turn, and misuse of pooled resources.
//! Routine conditions such as damaging an already destroyed atom are
//! absorbed silently and never reach this type.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ArenaError>;

/// Lifecycle transitions that can be rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Load,
    Spawn,
    Kill,
    Unload,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Transition::Load => "load",
            Transition::Spawn => "spawn",
            Transition::Kill => "kill",
            Transition::Unload => "unload",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ArenaError {
    // === Configuration ===
    #[error("loaded vehicle has no core")]
    MissingCore,
    #[error("loaded vehicle has more than one core (gizmo {index})")]
    MultipleCores { index: usize },
    #[error("unknown gizmo template '{0}'")]
    UnknownGizmoTemplate(String),
    #[error("unknown atom template id {0}")]
    UnknownAtomTemplate(u32),
    #[error("atom at ({i}, {j}) of size {w}x{h} does not fit the {grid}x{grid} grid")]
    AtomOutOfGrid {
        i: usize,
        j: usize,
        w: usize,
        h: usize,
        grid: usize,
    },
    #[error("cell ({i}, {j}) is covered by more than one atom")]
    AtomOverlap { i: usize, j: usize },
    #[error("no atom at ({i}, {j}) for gizmo '{gizmo}'")]
    MissingAtom { i: usize, j: usize, gizmo: String },
    #[error("atom at ({i}, {j}) is already claimed by another gizmo")]
    AtomAlreadyClaimed { i: usize, j: usize },
    #[error("core '{0}' must specify a non-zero base thruster force")]
    BadBaseForce(String),
    #[error("vehicle grid has {actual} cells, expected {expected}")]
    GridSizeMismatch { expected: usize, actual: usize },
    #[error("part catalog is frozen; cannot register '{0}'")]
    CatalogFrozen(String),
    #[error("part catalog JSON is missing keys: {0}")]
    CatalogMissingKeys(String),
    #[error("unexpected keys in part catalog JSON: {0}")]
    CatalogUnexpectedKeys(String),
    #[error("invalid collision argument name '{0}'")]
    UnknownCollisionArgument(String),
    #[error("unknown actor {0}")]
    UnknownActor(u32),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    // === Lifecycle ===
    #[error("cannot {transition} vehicle {vehicle}: {reason}")]
    Lifecycle {
        vehicle: u32,
        transition: Transition,
        reason: &'static str,
    },

    // === Resource pools ===
    #[error("pool misuse: {0}")]
    PoolMisuse(String),
}

impl ArenaError {
    /// True for configuration errors (category 1)
    pub fn is_configuration(&self) -> bool {
        !matches!(self, ArenaError::Lifecycle { .. } | ArenaError::PoolMisuse(_))
    }
}
