//! Point cloud file formats

pub mod xyz;

pub use self::xyz::{write_values, XyzDataset};
