//! Small signal processing blocks used by the nodes and meters
pub mod biquad;
pub mod peak_detector;
pub mod power_meter;
pub mod smoothing_filter;
