//! Email verification with a one-time passcode.
//!
//! [`OtpSession`] is a pure state machine: events in, effects out. [`OtpFlow`]
//! drives it, performing the API calls, running the resend countdown, and
//! publishing [`OtpSnapshot`]s on a `watch` channel.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiResult, PendingRegistration, VerifyOtpResponse};
use crate::auth::AuthService;
use crate::registry::lock;
use crate::session::SessionStore;

/// Digits in a verification code.
pub const CODE_LENGTH: usize = 6;

const DEFAULT_LOGIN_MESSAGE: &str = "Registration completed! Please log in with your credentials.";

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPhase {
    /// Collecting digits
    Entering,
    /// A verify call is in flight
    AutoSubmitting,
    Verified,
    Rejected,
}

/// Where the UI should go once the code is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationIntent {
    /// The server signed the user in
    Dashboard,
    /// The account exists; the user still has to sign in
    Login { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpEvent {
    CodeChanged { input: String },
    SubmitRequested,
    ResendRequested,
    CountdownTick,
    VerifySucceeded { intent: NavigationIntent },
    VerifyFailed { message: String },
    ResendSucceeded { message: String },
    ResendFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpEffect {
    Verify { code: String },
    Resend,
    StartCountdown,
}

/// What a verification page renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpSnapshot {
    pub email: String,
    pub digits: String,
    pub phase: OtpPhase,
    pub countdown_secs: u32,
    pub can_resend: bool,
    pub auto_submitted: bool,
    pub resending: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub intent: Option<NavigationIntent>,
}

/// Verification state for one pending registration.
#[derive(Debug, Clone)]
pub struct OtpSession {
    email: String,
    digits: String,
    phase: OtpPhase,
    countdown_secs: u32,
    resend_secs: u32,
    auto_submitted: bool,
    resending: bool,
    error: Option<String>,
    notice: Option<String>,
    intent: Option<NavigationIntent>,
}

/// Keeps digits only, at most [`CODE_LENGTH`] of them.
pub fn sanitize_code(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_digit)
        .take(CODE_LENGTH)
        .collect()
}

impl OtpSession {
    /// A new session; resend is available right away.
    pub fn new(email: impl Into<String>, resend_secs: u32) -> Self {
        Self {
            email: email.into(),
            digits: String::new(),
            phase: OtpPhase::Entering,
            countdown_secs: 0,
            resend_secs,
            auto_submitted: false,
            resending: false,
            error: None,
            notice: None,
            intent: None,
        }
    }

    pub fn can_resend(&self) -> bool {
        self.countdown_secs == 0
    }

    pub fn phase(&self) -> OtpPhase {
        self.phase
    }

    pub fn countdown_secs(&self) -> u32 {
        self.countdown_secs
    }

    pub fn snapshot(&self) -> OtpSnapshot {
        OtpSnapshot {
            email: self.email.clone(),
            digits: self.digits.clone(),
            phase: self.phase,
            countdown_secs: self.countdown_secs,
            can_resend: self.can_resend(),
            auto_submitted: self.auto_submitted,
            resending: self.resending,
            error: self.error.clone(),
            notice: self.notice.clone(),
            intent: self.intent.clone(),
        }
    }

    /// Applies `event` and returns the effects to run.
    pub fn update(&mut self, event: OtpEvent) -> Vec<OtpEffect> {
        match event {
            OtpEvent::CodeChanged { input } => self.code_changed(&input),
            OtpEvent::SubmitRequested => self.submit(),
            OtpEvent::ResendRequested => self.resend(),
            OtpEvent::CountdownTick => {
                self.countdown_secs = self.countdown_secs.saturating_sub(1);
                vec![]
            }
            OtpEvent::VerifySucceeded { intent } => {
                if self.phase == OtpPhase::AutoSubmitting {
                    self.phase = OtpPhase::Verified;
                    self.error = None;
                    self.notice = Some("Email verified successfully!".to_string());
                    self.intent = Some(intent);
                }
                vec![]
            }
            OtpEvent::VerifyFailed { message } => {
                if self.phase == OtpPhase::AutoSubmitting {
                    self.phase = OtpPhase::Rejected;
                    self.error = Some(message);
                    self.auto_submitted = false;
                }
                vec![]
            }
            OtpEvent::ResendSucceeded { message } => {
                self.resending = false;
                self.digits.clear();
                self.auto_submitted = false;
                if self.phase == OtpPhase::Rejected {
                    self.phase = OtpPhase::Entering;
                    self.error = None;
                }
                self.notice = Some(message);
                vec![]
            }
            OtpEvent::ResendFailed { message } => {
                self.resending = false;
                self.countdown_secs = 0;
                self.error = Some(message);
                vec![]
            }
        }
    }

    fn code_changed(&mut self, input: &str) -> Vec<OtpEffect> {
        if matches!(self.phase, OtpPhase::AutoSubmitting | OtpPhase::Verified) {
            return vec![];
        }

        let digits = sanitize_code(input);
        if self.phase == OtpPhase::Rejected {
            self.phase = OtpPhase::Entering;
            self.error = None;
            self.auto_submitted = false;
        }
        if digits != self.digits {
            self.digits = digits;
            self.auto_submitted = false;
        }

        if self.digits.len() == CODE_LENGTH && !self.auto_submitted {
            self.begin_verify()
        } else {
            vec![]
        }
    }

    fn submit(&mut self) -> Vec<OtpEffect> {
        if matches!(self.phase, OtpPhase::AutoSubmitting | OtpPhase::Verified) {
            return vec![];
        }
        if self.digits.len() != CODE_LENGTH {
            self.error = Some(format!("Please enter a {CODE_LENGTH}-digit code"));
            return vec![];
        }
        self.begin_verify()
    }

    fn begin_verify(&mut self) -> Vec<OtpEffect> {
        self.phase = OtpPhase::AutoSubmitting;
        self.auto_submitted = true;
        self.error = None;
        self.notice = None;
        vec![OtpEffect::Verify {
            code: self.digits.clone(),
        }]
    }

    fn resend(&mut self) -> Vec<OtpEffect> {
        if !self.can_resend() || self.resending || self.phase == OtpPhase::Verified {
            return vec![];
        }
        self.resending = true;
        self.countdown_secs = self.resend_secs;
        self.error = None;
        self.notice = None;
        vec![OtpEffect::StartCountdown, OtpEffect::Resend]
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Verification calls used by [`OtpFlow`].
pub trait OtpBackend: Send + Sync + 'static {
    fn verify(
        &self,
        registration: &PendingRegistration,
        code: &str,
    ) -> impl Future<Output = ApiResult<VerifyOtpResponse>> + Send;

    fn resend(&self, email: &str, username: &str) -> impl Future<Output = ApiResult<String>> + Send;
}

impl OtpBackend for AuthService {
    fn verify(
        &self,
        registration: &PendingRegistration,
        code: &str,
    ) -> impl Future<Output = ApiResult<VerifyOtpResponse>> + Send {
        self.verify_otp(registration, code)
    }

    fn resend(&self, email: &str, username: &str) -> impl Future<Output = ApiResult<String>> + Send {
        self.resend_otp(email, username)
    }
}

struct FlowState {
    session: OtpSession,
    ticking: bool,
}

struct FlowInner<B> {
    backend: B,
    store: SessionStore,
    registration: PendingRegistration,
    state: Mutex<FlowState>,
    snapshots: watch::Sender<OtpSnapshot>,
    cancel: CancellationToken,
}

impl<B> FlowInner<B> {
    fn apply(&self, event: OtpEvent) -> Vec<OtpEffect> {
        let mut state = lock(&self.state);
        let effects = state.session.update(event);
        self.snapshots.send_replace(state.session.snapshot());
        effects
    }
}

impl<B> Drop for FlowInner<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Runs an [`OtpSession`] against a backend.
///
/// Must be used inside a tokio runtime; the countdown runs as a spawned task
/// that stops on [`OtpFlow::close`] or when the flow is dropped.
pub struct OtpFlow<B = AuthService> {
    inner: Arc<FlowInner<B>>,
}

impl<B: OtpBackend> OtpFlow<B> {
    pub fn new(
        backend: B,
        store: SessionStore,
        registration: PendingRegistration,
        resend_secs: u32,
    ) -> Self {
        let session = OtpSession::new(registration.email.clone(), resend_secs);
        let (snapshots, _) = watch::channel(session.snapshot());
        Self {
            inner: Arc::new(FlowInner {
                backend,
                store,
                registration,
                state: Mutex::new(FlowState {
                    session,
                    ticking: false,
                }),
                snapshots,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> OtpSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OtpSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Handles an edit of the code field. Completing the code verifies it.
    pub async fn input(&self, raw: &str) {
        self.dispatch(OtpEvent::CodeChanged {
            input: raw.to_string(),
        })
        .await;
    }

    /// Handles an explicit submit.
    pub async fn submit(&self) {
        self.dispatch(OtpEvent::SubmitRequested).await;
    }

    /// Requests a new code. Does nothing while the countdown runs or after
    /// [`close`](Self::close).
    pub async fn resend(&self) {
        if self.inner.cancel.is_cancelled() {
            tracing::debug!("resend ignored on a closed verification flow");
            return;
        }
        self.dispatch(OtpEvent::ResendRequested).await;
    }

    /// Stops the countdown. The flow cannot request new codes afterwards.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    async fn dispatch(&self, event: OtpEvent) {
        let effects = self.inner.apply(event);
        for effect in effects {
            self.run_effect(effect).await;
        }
    }

    async fn run_effect(&self, effect: OtpEffect) {
        match effect {
            OtpEffect::Verify { code } => {
                let event = match self.inner.backend.verify(&self.inner.registration, &code).await {
                    Ok(response) => OtpEvent::VerifySucceeded {
                        intent: self.finish_registration(response),
                    },
                    Err(e) => {
                        tracing::debug!(kind = %e.kind, "verification code rejected");
                        OtpEvent::VerifyFailed { message: e.message }
                    }
                };
                self.inner.apply(event);
            }
            OtpEffect::Resend => {
                let registration = &self.inner.registration;
                let event = match self
                    .inner
                    .backend
                    .resend(&registration.email, &registration.username)
                    .await
                {
                    Ok(message) => OtpEvent::ResendSucceeded { message },
                    Err(e) => OtpEvent::ResendFailed { message: e.message },
                };
                self.inner.apply(event);
            }
            OtpEffect::StartCountdown => self.start_countdown(),
        }
    }

    fn finish_registration(&self, response: VerifyOtpResponse) -> NavigationIntent {
        let message = response.msg.clone();
        match response.into_session() {
            Some((tokens, user)) => {
                tracing::info!(username = %user.username, "registration verified; signed in");
                self.inner.store.save(tokens, user);
                NavigationIntent::Dashboard
            }
            None => {
                tracing::info!("registration verified");
                NavigationIntent::Login {
                    message: message
                        .filter(|m| !m.trim().is_empty())
                        .map_or_else(|| DEFAULT_LOGIN_MESSAGE.to_string(), |m| {
                            format!("{m}. Please log in with your credentials.")
                        }),
                }
            }
        }
    }

    fn start_countdown(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.ticking || self.inner.cancel.is_cancelled() {
                return;
            }
            state.ticking = true;
        }

        let weak: Weak<FlowInner<B>> = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticks.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let finished = {
                            let mut state = lock(&inner.state);
                            state.session.update(OtpEvent::CountdownTick);
                            inner.snapshots.send_replace(state.session.snapshot());
                            let finished = state.session.countdown_secs() == 0;
                            if finished {
                                state.ticking = false;
                            }
                            finished
                        };
                        if finished {
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl<B> Clone for OtpFlow<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> std::fmt::Debug for OtpFlow<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpFlow")
            .field("snapshot", &*self.inner.snapshots.borrow())
            .finish_non_exhaustive()
    }
}
