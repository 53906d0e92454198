//! ECR (Electronic Cash Register) journal feed.
//!
//! The register prints its journal down a serial line as it trades. This
//! module turns that byte stream into classified lines: [`transport`] delivers
//! raw bytes, [`lines`] reassembles them into lines, and [`protocol`] knows
//! what each line means.

pub mod lines;
pub mod protocol;
pub mod transport;

pub use transport::{create_transport, EcrTransport};
