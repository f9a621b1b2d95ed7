//! Interval-synchronized session: the clock, the controller running on the audio thread and
//! the messages it exchanges with the control thread and the session server.
pub mod clock;
pub mod controller;
pub mod events;
pub mod service;
