//! The `TiledSource` abstraction: a format-agnostic interface over every
//! kind of pyramid this crate can read tiles out of.
//!
//! Generalizes the teacher's `SlideReader` trait (`slide::SlideReader`,
//! generic over `RangeReader`) from "SVS or generic TIFF over an S3/local
//! range reader" to five source kinds: DICOM pyramids, hierarchical TIFF,
//! plain TIFF/PNG/JPEG, external slide libraries, and remote tile servers.
//!
//! A trait generic over its I/O type cannot be boxed into a trait object, so
//! - exactly as the teacher dispatches `SlideReaderInner` in
//! `slide::registry` - per-source dispatch here goes through
//! `PyramidSourceInner`, a closed enum with one variant per source kind.

mod dicom_source;
mod dyn_reader;
mod external_source;
mod hierarchical_tiff;
mod plain_image;
mod remote_tile;
mod resampling;
mod source;

pub use dyn_reader::DynRangeReader;

pub use dicom_source::DicomPyramidSource;
pub use external_source::ExternalSlideSource;
pub use hierarchical_tiff::HierarchicalTiffSource;
pub use plain_image::PlainImageSource;
pub use remote_tile::RemoteTileSource;
pub use resampling::{ResamplingParameters, ResamplingReader};
pub use source::{
    DecodedTile, ImagedVolumeParameters, PyramidSourceInner, TiledSource, TiledSourceLevel,
};
