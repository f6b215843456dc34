//! Media upload
//!
//! An [`UploadClient`] turns an [`UploadJob`] (media bytes, metadata, token)
//! into a signed multipart POST, streams it through the transport and resolves
//! the job to a media identifier or a classified [`UploadError`].
//!
//! [`UploadError`]: crate::UploadError

mod client;
mod job;
pub mod multipart;

pub use client::{TokenStatus, UploadClient, UploadHandle};
pub use job::{join_tags, JobState, JobStateKind, MediaKind, UploadJob, UploadJobBuilder};
pub use multipart::{FilePart, MultipartBody};
