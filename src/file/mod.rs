//! Backing-store layer: the flat volume-file format and the binding
//! that pages cache blocks to and from it.

mod binding;
mod raw;

pub(crate) use binding::FileBinding;
pub use raw::RawVolumeFile;
