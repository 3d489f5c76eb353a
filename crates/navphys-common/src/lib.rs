//! Common utilities and data structures shared by the navphys crates
//!
//! Holds the fixed-point geometry primitives, the generation-checked handle
//! type, the pooled containers used for O(1) attach/detach bookkeeping and the
//! polygon soup that feeds the mesh loader.

mod geometry;
mod handle;
mod math;
mod pooled_list;
mod soup;
mod transform;

pub use geometry::*;
pub use handle::*;
pub use math::*;
pub use pooled_list::*;
pub use soup::*;
pub use transform::*;

/// Re-exported so the fail-fast macros resolve `log` from dependent crates.
pub use log;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("registry full: {0}")]
    RegistryFull(String),

    #[error("binary format error: {0}")]
    Format(String),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for navphys operations
pub type Result<T> = std::result::Result<T, Error>;

/// Logs and returns `Err($err)` if the condition holds
#[macro_export]
macro_rules! np_fail_cond {
    ($cond:expr, $err:expr) => {
        if $cond {
            let err = $err;
            $crate::log::error!("condition \"{}\" is true: {}", stringify!($cond), err);
            return Err(err);
        }
    };
}

/// Unwraps an `Option`, logging and returning `Err($err)` on `None`
#[macro_export]
macro_rules! np_unwrap {
    ($expr:expr, $err:expr) => {
        match $expr {
            Some(val) => val,
            None => {
                let err = $err;
                $crate::log::error!("{}", err);
                return Err(err);
            }
        }
    };
}
