//! Core logic of the recognition stream client.
//!
//! Collaborators sit behind traits: the backend behind [`backend::Backend`]
//! (with [`backend::HttpBackend`] as the HTTP implementation), the push
//! channel behind [`stream::PushChannel`] and speech behind
//! [`voice::SpeechSynthesizer`].
//! The runtime (see the `facewatch-viewer` service) supplies concrete
//! implementations and owns the Session that ties them together.

pub mod announce;
pub mod backend;
pub mod error;
pub mod event;
pub mod health;
pub mod stream;
pub mod voice;

pub use error::{BackendError, ControlError, MalformedEvent, SpeechError};
pub use event::{Identity, RecognitionEvent};
