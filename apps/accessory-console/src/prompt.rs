use std::{
    collections::HashSet,
    fmt::{Debug, Display},
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, info};
use uart_accessory_core::host::{PermissionAuthority, PermissionNotifier};

#[derive(Debug)]
struct PromptState<A> {
    granted: HashSet<A>,
    pending: Option<PermissionNotifier<A>>,
}

/// Asks the person at the console, who answers with `allow` or `deny`.
///
/// Clones share state: the connection owns one and the command loop answers
/// through another.
#[derive(Debug)]
pub struct PromptPermissions<A> {
    state: Arc<Mutex<PromptState<A>>>,
}

impl<A> Clone for PromptPermissions<A> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<A> Default for PromptPermissions<A> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(PromptState {
                granted: HashSet::new(),
                pending: None,
            })),
        }
    }
}

impl<A> PromptPermissions<A>
where
    A: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PromptState<A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn grant(&self, accessory: A) {
        self.lock().granted.insert(accessory);
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Answers the outstanding prompt. Returns `false` if there was none.
    pub fn answer(&self, granted: bool) -> bool {
        let mut state = self.lock();
        let Some(notifier) = state.pending.take() else {
            return false;
        };
        if granted {
            state.granted.insert(notifier.accessory().clone());
        }
        drop(state);
        notifier.respond(granted)
    }
}

impl<A> PermissionAuthority<A> for PromptPermissions<A>
where
    A: Clone + Eq + Hash + Display + Debug,
{
    fn has_permission(&self, accessory: &A) -> bool {
        self.lock().granted.contains(accessory)
    }

    fn request_permission(&mut self, accessory: &A, notifier: PermissionNotifier<A>) {
        println!("Allow access to accessory {accessory}? Type 'allow' or 'deny'.");
        if self.lock().pending.replace(notifier).is_some() {
            debug!("Replaced an unanswered permission prompt");
        }
    }

    fn cancel_request(&mut self, accessory: &A) {
        let mut state = self.lock();
        if state
            .pending
            .as_ref()
            .is_some_and(|notifier| notifier.accessory() == accessory)
        {
            state.pending = None;
            info!("Permission prompt for {accessory} withdrawn");
        }
    }
}
