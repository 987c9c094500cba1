//! Instruments, holdings and the immutable snapshots the margin engine reads.
//!
//! Live [`Security`] values are owned by the caller and updated on every
//! price tick or fill. Margin computations never touch them directly; they
//! operate on a [`PositionSnapshot`] captured with [`Security::snapshot`].

mod types;

pub use types::*;
