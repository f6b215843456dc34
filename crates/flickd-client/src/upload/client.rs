//! Upload client: token verification and signed multipart submission

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use super::job::{JobState, UploadJob};
use super::multipart::{FilePart, MultipartBody};
use crate::config::ServiceConfig;
use crate::error::UploadError;
use crate::observer::{NoopObserver, UploadObserver};
use crate::response::Reply;
use crate::signing::{NonceSource, RequestSigner};
use crate::token::Token;
use crate::transport::{
    TransferHandle, TransportAdapter, TransportCall, TransportError, TransportEvent,
    TransportRequest,
};

/// Result of checking a token with the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// The service accepted the token
    Valid,
    /// The service rejected the token; run the credential exchange again
    Expired,
    /// The service could not be asked
    Unreachable,
}

impl TokenStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Client for the upload side of the service
#[derive(Clone)]
pub struct UploadClient {
    config: Arc<ServiceConfig>,
    transport: Arc<dyn TransportAdapter>,
    signer: RequestSigner,
}

impl fmt::Debug for UploadClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadClient")
            .field("base_url", &self.config.connection.base_url)
            .finish_non_exhaustive()
    }
}

impl UploadClient {
    pub fn new(
        config: Arc<ServiceConfig>,
        transport: Arc<dyn TransportAdapter>,
        nonces: Arc<dyn NonceSource>,
    ) -> Self {
        let signer = RequestSigner::new(Arc::clone(&config), nonces);
        Self {
            config,
            transport,
            signer,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Ask the service whether a token is still accepted
    #[instrument(skip(self, token), fields(token = ?token))]
    pub async fn verify_token(&self, token: &Token) -> TokenStatus {
        let mut params = BTreeMap::new();
        params.insert(
            self.config.fields.auth_token.clone(),
            token.value().to_string(),
        );
        let signed = match self.signer.sign(params) {
            Ok(signed) => signed,
            Err(err) => {
                warn!(error = %err, "Token could not be signed for verification");
                return TokenStatus::Expired;
            }
        };
        let url = match self.config.endpoint_url(&self.config.endpoints.check_token) {
            Ok(url) => url,
            Err(err) => {
                // Rejected up front by `FlickdClient::new`; only reachable with a hand-built config
                tracing::error!(error = %err, "Invalid verification endpoint");
                return TokenStatus::Unreachable;
            }
        };

        let call = self
            .transport
            .send_streaming(TransportRequest::get(url, &self.signer.wire_pairs(&signed)));
        let handle = call.handle().clone();
        let limit = Duration::from_millis(self.config.timeouts.verify_ms);

        let (status, body) = match tokio::time::timeout(limit, call.response()).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                debug!(error = %err, "Token verification unreachable");
                return TokenStatus::Unreachable;
            }
            Err(_) => {
                handle.cancel();
                debug!("Token verification timed out");
                return TokenStatus::Unreachable;
            }
        };

        let status = token_status(&self.config, &Reply::new(status, &body));
        debug!(?status, "Token verified");
        status
    }

    /// Start uploading a job
    ///
    /// Signing happens before this returns; the transfer runs on a spawned
    /// task, so this must be called from within a Tokio runtime. A job that
    /// cannot be signed or encoded fails with `InvalidJob` and the observer is
    /// told before `submit` returns.
    pub fn submit(&self, job: UploadJob, observer: impl UploadObserver + 'static) -> UploadHandle {
        let shared = Arc::new(JobShared::new(Box::new(observer)));
        let span = tracing::info_span!("upload", job = %shared.id);
        let _entered = span.enter();

        shared.transition(JobState::Signing);
        let call = match self.prepare(&job) {
            Ok(request) => self.transport.send_streaming(request),
            Err(err) => {
                warn!(error = %err, "Upload job rejected before transfer");
                shared.transition(JobState::Failed(err));
                return UploadHandle { shared };
            }
        };

        *shared.transfer.lock() = Some(call.handle().clone());
        if !shared.transition(JobState::Transferring) {
            // Cancelled from inside an observer callback while signing
            call.handle().cancel();
            return UploadHandle { shared };
        }

        let limit = Duration::from_millis(self.config.timeouts.upload_ms);
        let task = tokio::spawn(
            drive(Arc::clone(&shared), call, Arc::clone(&self.config), limit)
                .instrument(span.clone()),
        );
        *shared.task.lock() = Some(task.abort_handle());
        UploadHandle { shared }
    }

    /// Upload a job and wait for the media identifier
    pub async fn upload(&self, job: UploadJob) -> Result<String, UploadError> {
        self.submit(job, NoopObserver).outcome().await
    }

    fn prepare(&self, job: &UploadJob) -> Result<TransportRequest, UploadError> {
        job.validate()?;

        let fields = &self.config.fields;
        let mut params = job.metadata().clone();
        params.insert(fields.auth_token.clone(), job.token().value().to_string());
        let signed = self
            .signer
            .sign(params)
            .map_err(|e| UploadError::InvalidJob(e.to_string()))?;

        let file = FilePart {
            name: fields.media.clone(),
            filename: job.filename().to_string(),
            content_type: job.content_type(&self.config.upload).to_string(),
            data: job.media().clone(),
        };
        let body = MultipartBody::build(
            &self.signer.wire_pairs(&signed),
            file,
            self.config.upload.chunk_size,
        )
        .ok_or_else(|| {
            UploadError::InvalidJob("no multipart boundary avoids the payload".into())
        })?;

        let url = self
            .config
            .endpoint_url(&self.config.endpoints.upload)
            .map_err(|e| UploadError::InvalidJob(format!("invalid upload endpoint: {}", e)))?;
        debug!(
            %url,
            boundary = body.boundary(),
            bytes = body.len(),
            "Upload request prepared"
        );

        let content_type = body.content_type();
        let length = body.len();
        Ok(TransportRequest::post_stream(
            url,
            content_type,
            body.into_stream(),
            length,
        ))
    }
}

fn token_status(config: &ServiceConfig, reply: &Reply) -> TokenStatus {
    if is_transient_status(reply.status) {
        return TokenStatus::Unreachable;
    }
    if !reply.is_success() || reply.failure(&config.response).is_some() {
        return TokenStatus::Expired;
    }
    TokenStatus::Valid
}

fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Map a transport failure to the upload taxonomy
fn classify_transport(err: TransportError) -> UploadError {
    match err {
        TransportError::Cancelled => UploadError::Cancelled,
        TransportError::InvalidRequest(message) => UploadError::InvalidJob(message),
        other => UploadError::TransientNetwork(other.to_string()),
    }
}

/// Map a service reply to a media identifier or the upload taxonomy
fn classify_reply(config: &ServiceConfig, reply: &Reply) -> Result<String, UploadError> {
    if reply.status == 401 || reply.status == 403 {
        return Err(UploadError::AuthRejected(reply.message(&config.response)));
    }
    if let Some(failure) = reply.failure(&config.response) {
        let auth = failure
            .code
            .as_deref()
            .map(|code| config.is_auth_error_code(code))
            .unwrap_or(false);
        return Err(if auth {
            UploadError::AuthRejected(failure.message)
        } else if is_transient_status(reply.status) {
            UploadError::TransientNetwork(failure.message)
        } else {
            UploadError::server_rejected(reply.status, failure.code, failure.message)
        });
    }
    if is_transient_status(reply.status) {
        return Err(UploadError::TransientNetwork(format!(
            "HTTP {}: {}",
            reply.status,
            reply.message(&config.response)
        )));
    }
    if !reply.is_success() {
        return Err(UploadError::server_rejected(
            reply.status,
            None,
            reply.message(&config.response),
        ));
    }
    reply.field(&config.response.media_id).ok_or_else(|| {
        UploadError::server_rejected(
            reply.status,
            None,
            format!("missing '{}' in upload response", config.response.media_id),
        )
    })
}

async fn drive(
    shared: Arc<JobShared>,
    mut call: TransportCall,
    config: Arc<ServiceConfig>,
    limit: Duration,
) {
    let handle = call.handle().clone();
    let transfer = async {
        while let Some(event) = call.next_event().await {
            match event {
                TransportEvent::Progress(fraction) => shared.report_progress(fraction),
                TransportEvent::Complete { status, body } => {
                    return classify_reply(&config, &Reply::new(status, &body));
                }
                TransportEvent::Failed(err) => return Err(classify_transport(err)),
            }
        }
        Err(classify_transport(TransportError::ConnectionClosed))
    };

    let result = match tokio::time::timeout(limit, transfer).await {
        Ok(result) => result,
        Err(_) => {
            handle.cancel();
            Err(UploadError::TransientNetwork(format!(
                "upload did not finish within {:?}",
                limit
            )))
        }
    };

    match &result {
        Ok(id) => info!(media_id = %id, "Upload completed"),
        Err(UploadError::Cancelled) => info!("Upload cancelled"),
        Err(err) => warn!(error = %err, "Upload failed"),
    }
    shared.finish(result);
}

type Outcome = Option<Result<String, UploadError>>;

/// State shared by a job's driver task and its handles
///
/// Every state change and every observer call happens under `state`, so a
/// `cancel()` racing with the driver either lands before the terminal callback
/// or is a no-op. The lock is reentrant so observers may call back into the
/// handle.
struct JobShared {
    id: Uuid,
    state: ReentrantMutex<RefCell<JobState>>,
    observer: Box<dyn UploadObserver>,
    progress_tx: watch::Sender<f64>,
    outcome_tx: watch::Sender<Outcome>,
    transfer: Mutex<Option<TransferHandle>>,
    task: Mutex<Option<AbortHandle>>,
}

impl JobShared {
    fn new(observer: Box<dyn UploadObserver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ReentrantMutex::new(RefCell::new(JobState::Created)),
            observer,
            progress_tx: watch::channel(0.0).0,
            outcome_tx: watch::channel(None).0,
            transfer: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    fn state(&self) -> JobState {
        self.state.lock().borrow().clone()
    }

    /// Apply a legal transition; illegal ones are ignored
    fn transition(&self, next: JobState) -> bool {
        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            if !state.can_transition_to(&next) {
                debug!(from = %state.kind(), to = %next.kind(), "Ignoring transition");
                return false;
            }
            debug!(from = %state.kind(), to = %next.kind(), "Job state");
            *state = next;
        }

        let result = guard.borrow().result();
        if let Some(result) = result {
            self.observer.on_upload_result(result.clone());
            self.outcome_tx.send_replace(Some(result));
        }
        true
    }

    /// Forward a progress value if it advances and the job is still transferring
    fn report_progress(&self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let guard = self.state.lock();
        if *guard.borrow() != JobState::Transferring {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction <= *self.progress_tx.borrow() {
            return;
        }
        self.progress_tx.send_replace(fraction);
        self.observer.on_upload_progress(fraction);
    }

    fn finish(&self, result: Result<String, UploadError>) {
        let _guard = self.state.lock();
        match result {
            Ok(id) => {
                if *self.progress_tx.borrow() != 1.0 {
                    self.report_progress(1.0);
                }
                self.transition(JobState::Completed(id));
            }
            Err(UploadError::Cancelled) => {
                self.transition(JobState::Cancelled);
            }
            Err(err) => {
                self.transition(JobState::Failed(err));
            }
        }
    }

    fn cancel(&self) {
        let _guard = self.state.lock();
        if !self.transition(JobState::Cancelled) {
            return;
        }
        if let Some(transfer) = self.transfer.lock().as_ref() {
            transfer.cancel();
        }
        if let Some(task) = self.task.lock().as_ref() {
            task.abort();
        }
    }
}

/// Handle to a submitted upload job
///
/// Clones refer to the same job.
#[derive(Clone)]
pub struct UploadHandle {
    shared: Arc<JobShared>,
}

impl fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state().kind())
            .finish()
    }
}

impl UploadHandle {
    /// Identifier used in log spans
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// Cancel the job; a no-op once it has finished
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Latest progress fraction
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.shared.progress_tx.subscribe()
    }

    /// Progress fractions as a stream, starting with the current one
    pub fn progress_stream(&self) -> WatchStream<f64> {
        WatchStream::new(self.progress())
    }

    /// Wait for the terminal result
    pub async fn outcome(&self) -> Result<String, UploadError> {
        let mut rx = self.shared.outcome_tx.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(UploadError::Cancelled);
            }
        }
    }
}
