//! Backend wire formats.
//!
//! This namespace groups the payloads exchanged with the session backend:
//! - [`constants`]: header names, liveness frames, and endpoint defaults.
//! - [`identity`]: identity endpoint body and its validated [`identity::Identity`] form.
//! - [`envelope`]: `{topic, data}` channel envelopes.

pub mod constants;
pub mod envelope;
pub mod identity;
