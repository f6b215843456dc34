//! Upload jobs and their states

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::UploadSettings;
use crate::error::UploadError;
use crate::token::Token;

/// Kind of media carried by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    /// Guess the kind from a file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mov" | "mp4" | "m4v" | "avi" | "3gp" => Self::Video,
            _ => Self::Image,
        }
    }

    /// Default content type for this kind
    pub fn content_type<'a>(&self, settings: &'a UploadSettings) -> &'a str {
        match self {
            Self::Image => &settings.image_content_type,
            Self::Video => &settings.video_content_type,
        }
    }

    fn default_filename(&self) -> &'static str {
        match self {
            Self::Image => "photo.jpg",
            Self::Video => "video.mov",
        }
    }
}

/// One media upload: bytes, metadata and the token that authorizes it
///
/// The media buffer is immutable for the lifetime of the job; `Bytes` makes
/// the frames handed to the transport zero-copy views into it.
#[derive(Clone)]
pub struct UploadJob {
    media: Bytes,
    metadata: BTreeMap<String, String>,
    token: Token,
    kind: MediaKind,
    content_type: Option<String>,
    filename: Option<String>,
}

impl fmt::Debug for UploadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadJob")
            .field("media_len", &self.media.len())
            .field("metadata", &self.metadata)
            .field("token", &self.token)
            .field("kind", &self.kind)
            .finish()
    }
}

impl UploadJob {
    pub fn new(media: impl Into<Bytes>, metadata: BTreeMap<String, String>, token: Token) -> Self {
        Self {
            media: media.into(),
            metadata,
            token,
            kind: MediaKind::Image,
            content_type: None,
            filename: None,
        }
    }

    pub fn builder(media: impl Into<Bytes>, token: Token) -> UploadJobBuilder {
        UploadJobBuilder::new(media, token)
    }

    pub fn media(&self) -> &Bytes {
        &self.media
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Content type of the media part
    pub fn content_type<'a>(&'a self, settings: &'a UploadSettings) -> &'a str {
        self.content_type
            .as_deref()
            .unwrap_or_else(|| self.kind.content_type(settings))
    }

    /// Filename of the media part
    pub fn filename(&self) -> &str {
        self.filename
            .as_deref()
            .unwrap_or_else(|| self.kind.default_filename())
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), UploadError> {
        if self.media.is_empty() {
            return Err(UploadError::InvalidJob("media is empty".into()));
        }
        if self.token.value().is_empty() {
            return Err(UploadError::InvalidJob("token is empty".into()));
        }
        Ok(())
    }
}

/// Join tags the way photo services expect: space separated, multi-word tags quoted
pub fn join_tags<I, S>(tags: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().replace('"', ""))
        .filter(|tag| !tag.is_empty())
        .map(|tag| {
            if tag.contains(char::is_whitespace) {
                format!("\"{}\"", tag)
            } else {
                tag
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builder for jobs with the usual photo metadata
#[derive(Debug)]
pub struct UploadJobBuilder {
    job: UploadJob,
    tags: Vec<String>,
}

impl UploadJobBuilder {
    pub fn new(media: impl Into<Bytes>, token: Token) -> Self {
        Self {
            job: UploadJob::new(media, BTreeMap::new(), token),
            tags: Vec::new(),
        }
    }

    pub fn title(self, title: impl Into<String>) -> Self {
        self.field("title", title)
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        self.field("description", description)
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Visibility flags, sent as `1`/`0`
    pub fn visibility(self, public: bool, friends: bool, family: bool) -> Self {
        let flag = |on: bool| if on { "1" } else { "0" };
        self.field("is_public", flag(public))
            .field("is_friend", flag(friends))
            .field("is_family", flag(family))
    }

    /// Arbitrary metadata field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.job.metadata.insert(key.into(), value.into());
        self
    }

    pub fn kind(mut self, kind: MediaKind) -> Self {
        self.job.kind = kind;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.job.content_type = Some(content_type.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.job.filename = Some(filename.into());
        self
    }

    pub fn build(mut self) -> UploadJob {
        let tags = join_tags(&self.tags);
        if !tags.is_empty() {
            self.job.metadata.insert("tags".into(), tags);
        }
        self.job
    }
}

/// Lifecycle of an upload job
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Created,
    Signing,
    Transferring,
    Completed(String),
    Failed(UploadError),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Cancelled)
    }

    pub fn kind(&self) -> JobStateKind {
        match self {
            Self::Created => JobStateKind::Created,
            Self::Signing => JobStateKind::Signing,
            Self::Transferring => JobStateKind::Transferring,
            Self::Completed(_) => JobStateKind::Completed,
            Self::Failed(_) => JobStateKind::Failed,
            Self::Cancelled => JobStateKind::Cancelled,
        }
    }

    /// Whether `next` is the one legal successor of this state
    ///
    /// Any non-terminal state may also end early in `Failed` or `Cancelled`.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Created, Signing) | (Signing, Transferring) | (Transferring, Completed(_)) => true,
            (state, Failed(_) | Cancelled) => !state.is_terminal(),
            _ => false,
        }
    }

    /// The terminal result, if any
    pub fn result(&self) -> Option<Result<String, UploadError>> {
        match self {
            Self::Completed(id) => Some(Ok(id.clone())),
            Self::Failed(err) => Some(Err(err.clone())),
            Self::Cancelled => Some(Err(UploadError::Cancelled)),
            _ => None,
        }
    }
}

/// Payload-free job state, for logging and display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStateKind {
    Created,
    Signing,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for JobStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Signing => "signing",
            Self::Transferring => "transferring",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_join_tags() {
        assert_eq!(join_tags(["beach", "summer holiday", " ", "sun"]), r#"beach "summer holiday" sun"#);
        assert_eq!(join_tags(Vec::<String>::new()), "");
        assert_eq!(join_tags([r#"odd "quote""#]), r#""odd quote""#);
    }

    #[test]
    fn test_builder_metadata() {
        let job = UploadJob::builder(vec![1u8, 2, 3], Token::new("tok"))
            .title("Sunset")
            .description("From the pier")
            .tags(["sea", "golden hour"])
            .visibility(true, false, false)
            .build();

        let expected: BTreeMap<String, String> = [
            ("title", "Sunset"),
            ("description", "From the pier"),
            ("tags", r#"sea "golden hour""#),
            ("is_public", "1"),
            ("is_friend", "0"),
            ("is_family", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(job.metadata(), &expected);
    }

    #[test]
    fn test_content_type_and_filename() {
        let settings = UploadSettings::default();
        let image = UploadJob::new(vec![1u8], BTreeMap::new(), Token::new("t"));
        assert_eq!(image.content_type(&settings), "image/jpeg");
        assert_eq!(image.filename(), "photo.jpg");

        let video = image.clone().with_kind(MediaKind::Video);
        assert_eq!(video.content_type(&settings), "video/quicktime");

        let png = image.with_content_type("image/png").with_filename("a.png");
        assert_eq!(png.content_type(&settings), "image/png");
        assert_eq!(png.filename(), "a.png");

        assert_eq!(MediaKind::from_extension("MOV"), MediaKind::Video);
        assert_eq!(MediaKind::from_extension("jpeg"), MediaKind::Image);
    }

    #[test]
    fn test_validate() {
        let empty = UploadJob::new(Bytes::new(), BTreeMap::new(), Token::new("t"));
        assert!(matches!(empty.validate(), Err(UploadError::InvalidJob(_))));
        let no_token = UploadJob::new(vec![1u8], BTreeMap::new(), Token::new(""));
        assert!(matches!(no_token.validate(), Err(UploadError::InvalidJob(_))));
    }

    #[test]
    fn test_transitions() {
        use JobState::*;
        assert!(Created.can_transition_to(&Signing));
        assert!(Signing.can_transition_to(&Transferring));
        assert!(Transferring.can_transition_to(&Completed("1".into())));
        assert!(Transferring.can_transition_to(&Cancelled));
        assert!(!Created.can_transition_to(&Transferring));
        assert!(!Completed("1".into()).can_transition_to(&Cancelled));
        assert!(!Cancelled.can_transition_to(&Failed(UploadError::Cancelled)));
        assert_eq!(Cancelled.result(), Some(Err(UploadError::Cancelled)));
        assert_eq!(Transferring.result(), None);
    }
}
