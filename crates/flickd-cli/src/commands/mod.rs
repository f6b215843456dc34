//! Command implementations for flickd

pub mod authorize;
pub mod login;
pub mod upload;
pub mod verify;

pub use authorize::authorize;
pub use login::login;
pub use upload::{upload, UploadOptions};
pub use verify::verify;
