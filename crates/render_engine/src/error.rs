use projection::ProjectionError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::DriverError;

/// Misuse of the engine's pairing and ownership rules. The engine refuses the
/// call and leaves the group stack and binding state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("end_group called without a matching begin_group")]
    UnmatchedEndGroup,
    #[error("put_group received an invalid {width}x{height} group")]
    InvalidGroup { width: u32, height: u32 },
    #[error("put_group received the {width}x{height} group that is still on the group stack")]
    GroupInUse { width: u32, height: u32 },
    #[error("operation requires a viewport set by set_viewport_and_projection")]
    MissingViewport,
    #[error("an external image is already bound as the framebuffer")]
    ExternalTargetAlreadyBound,
    #[error("no external image is bound as the framebuffer")]
    NoActiveBinding,
    #[error("binding does not match the active external target")]
    BindingMismatch,
    #[error("{depth} group(s) are still active")]
    GroupsActive { depth: usize },
    #[error("mesh has {positions} positions but {tex_coords} texture coordinates")]
    MeshAttributeMismatch { positions: usize, tex_coords: usize },
    #[error("group scope expected depth {expected} but the stack is at {actual}")]
    GroupScopeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    TextureWidth,
    TextureHeight,
    ViewportWidth,
    ViewportHeight,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::TextureWidth => "texture width",
            ResourceKind::TextureHeight => "texture height",
            ResourceKind::ViewportWidth => "viewport width",
            ResourceKind::ViewportHeight => "viewport height",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
    #[error("{} {requested} exceeds the device maximum of {max}", .kind.label())]
    ResourceLimit {
        kind: ResourceKind,
        requested: u32,
        max: u32,
    },
    #[error("invalid projection: {0}")]
    Projection(#[from] ProjectionError),
    #[error("driver failure: {0}")]
    Driver(#[from] DriverError),
    #[error("invalid engine config: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn contract_violation(&self) -> Option<ContractViolation> {
        match self {
            EngineError::Contract(violation) => Some(*violation),
            _ => None,
        }
    }
}
