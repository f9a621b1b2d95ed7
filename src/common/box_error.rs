//! Crate wide error type.
//!
//! Everything that can fail returns a `Result<_, BoxError>` so errors can travel between the
//! control thread, the encode worker and the audio thread.
pub type BoxError = std::boxed::Box<
    dyn std::error::Error // must implement Error to satisfy ?
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;
