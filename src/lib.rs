//! Resolution of DICOMweb series into image identifiers for a rendering engine, together with
//! the pixel spacing and SUV scaling metadata of every identifier.

pub mod api;
pub mod archive;
pub mod calibration;
pub mod config;
pub mod frames;
pub mod metadata;
pub mod pet;
pub mod resolver;
pub mod types;
