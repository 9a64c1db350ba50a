//! Session router: drives [`RouterMachine`] from identity events.

use super::machine::{ResolutionTicket, RouterMachine, Transition};
use super::resolver::RoleResolver;
use super::types::{DeniedReason, RoutingState};
use crate::backend::{IdentityProvider, ListenerId};
use crate::error::{CoreError, Result};
use crate::observe::{Broadcaster, Observer, ObserverId};
use crate::types::{Profile, Session};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs on the thread that changed the routing state, under the machine lock.
type TransitionHook = Box<dyn Fn(&RoutingState) + Send + Sync>;

struct RouterShared {
    machine: Mutex<RouterMachine>,
    resolver: RoleResolver,
    observers: Broadcaster<RoutingState>,
    hooks: RwLock<Vec<TransitionHook>>,
    /// Resolutions started but not yet fed back.
    in_flight: Mutex<usize>,
    idle: Condvar,
}

impl RouterShared {
    /// Publish under the machine lock so observers see transitions in order.
    fn apply<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut RouterMachine) -> Transition,
    {
        let ticket = {
            let mut machine = self.machine.lock();
            let transition = f(&mut machine);
            if transition.changed {
                info!(state = ?machine.state(), "routing state changed");
                self.observers.publish(machine.state().clone());
                for hook in self.hooks.read().iter() {
                    hook(machine.state());
                }
            }
            transition.resolve
        };

        if let Some(ticket) = ticket {
            self.spawn_resolution(ticket);
        }
    }

    fn spawn_resolution(self: &Arc<Self>, ticket: ResolutionTicket) {
        *self.in_flight.lock() += 1;

        let shared = Arc::clone(self);
        let job = ticket.clone();
        let spawned = thread::Builder::new()
            .name("role-resolve".into())
            .spawn(move || {
                debug!(user = %job.user_id, epoch = job.epoch, "resolving role");
                let outcome = shared.resolver.resolve(&job.user_id);
                shared.finish(&job, outcome);
            });

        if let Err(e) = spawned {
            warn!(error = %e, "could not start role resolution");
            self.finish(&ticket, Err(DeniedReason::LookupFailed(e.to_string())));
        }
    }

    fn finish(self: &Arc<Self>, ticket: &ResolutionTicket, outcome: std::result::Result<Profile, DeniedReason>) {
        self.apply(|machine| machine.on_resolved(ticket, outcome));

        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }
}

/// Resolves who the current user is and which screen set they get.
///
/// Session events are applied synchronously; role lookups run on a
/// background thread and their results are fed back through the machine,
/// which discards any that no longer match the current session.
pub struct SessionRouter {
    shared: Arc<RouterShared>,
    attachment: Mutex<Option<(Arc<dyn IdentityProvider>, ListenerId)>>,
}

impl SessionRouter {
    pub fn new(resolver: RoleResolver, observer_buffer: usize) -> Self {
        Self {
            shared: Arc::new(RouterShared {
                machine: Mutex::new(RouterMachine::new()),
                resolver,
                observers: Broadcaster::new(observer_buffer),
                hooks: RwLock::new(Vec::new()),
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
            }),
            attachment: Mutex::new(None),
        }
    }

    /// Follow `identity`: seed from its current session, then apply every
    /// session change it reports. Replaces any previous attachment.
    pub fn attach(&self, identity: Arc<dyn IdentityProvider>) -> Result<()> {
        self.detach();

        let weak: Weak<RouterShared> = Arc::downgrade(&self.shared);
        let listener = identity.on_session_change(Box::new(move |session| {
            if let Some(shared) = weak.upgrade() {
                shared.apply(|machine| machine.on_session(&session));
            }
        }));
        *self.attachment.lock() = Some((Arc::clone(&identity), listener));

        let session = identity.get_session()?;
        self.handle_session(session);
        Ok(())
    }

    /// Stop following the identity provider.
    pub fn detach(&self) {
        if let Some((identity, listener)) = self.attachment.lock().take() {
            identity.remove_session_listener(listener);
        }
    }

    /// Apply a session-changed event.
    pub fn handle_session(&self, session: Session) {
        self.shared.apply(|machine| machine.on_session(&session));
    }

    /// Re-resolve after a denial while the session is still valid.
    pub fn retry(&self) {
        self.shared.apply(|machine| machine.retry());
    }

    /// Current routing state.
    pub fn state(&self) -> RoutingState {
        self.shared.machine.lock().state().clone()
    }

    /// The authenticated profile, or the error the current state stands for.
    pub fn require_profile(&self) -> Result<Profile> {
        match self.state() {
            RoutingState::Authenticated { profile } => Ok(profile),
            RoutingState::Denied { user_id, reason } => Err(reason.into_error(user_id)),
            RoutingState::Unauthenticated | RoutingState::Resolving => {
                Err(CoreError::SessionInvalid)
            }
        }
    }

    /// Observe routing states. The current state is queued first.
    pub fn subscribe(&self) -> Observer<RoutingState> {
        let machine = self.shared.machine.lock();
        self.shared.observers.subscribe_with(machine.state().clone())
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.shared.observers.unsubscribe(id);
    }

    /// Run `hook` after every routing change, before the call that caused the
    /// change returns. Hooks must not call back into the router.
    pub fn on_transition<F>(&self, hook: F)
    where
        F: Fn(&RoutingState) + Send + Sync + 'static,
    {
        self.shared.hooks.write().push(Box::new(hook));
    }

    /// Wait until no role resolution is in flight. Returns false on timeout.
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.shared.in_flight.lock();
        while *in_flight > 0 {
            if self.shared.idle.wait_until(&mut in_flight, deadline).timed_out() {
                return *in_flight == 0;
            }
        }
        true
    }
}

impl Drop for SessionRouter {
    fn drop(&mut self) {
        self.detach();
    }
}
