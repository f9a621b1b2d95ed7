//! interval_jam - interval synchronized online jamming engine
//!
//! Everybody hears everybody else one interval late.  Local inputs are mixed, encoded and
//! uploaded one interval at a time, remote intervals are downloaded, decoded and played back
//! starting at the next interval boundary.
extern crate json;
#[macro_use]
extern crate num_derive;

pub mod common;
pub mod dsp;
pub mod session;
pub mod sound;
pub mod utils;
