use log::debug;

use crate::events::{ConnectionEvent, EventSender, RequestId};

/// The gatekeeper that must authorize access to an accessory before a
/// channel to it can be opened.
pub trait PermissionAuthority<A> {
    fn has_permission(&self, accessory: &A) -> bool;

    /// Starts an asynchronous request. The answer is delivered later, from any
    /// thread, through `notifier`.
    fn request_permission(&mut self, accessory: &A, notifier: PermissionNotifier<A>);

    /// Withdraws an outstanding request. An answer that still arrives after
    /// this is ignored by the connection.
    fn cancel_request(&mut self, accessory: &A);
}

/// One-shot reply channel for a permission request.
#[derive(Debug)]
pub struct PermissionNotifier<A> {
    request: RequestId,
    accessory: A,
    events: EventSender<A>,
}

impl<A> PermissionNotifier<A> {
    pub fn new(request: RequestId, accessory: A, events: EventSender<A>) -> Self {
        Self {
            request,
            accessory,
            events,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request
    }

    pub fn accessory(&self) -> &A {
        &self.accessory
    }

    pub fn grant(self) -> bool {
        self.respond(true)
    }

    pub fn deny(self) -> bool {
        self.respond(false)
    }

    /// Returns `false` if the connection owner is already gone.
    pub fn respond(self, granted: bool) -> bool {
        debug!(
            "Permission request {} answered: granted = {}",
            self.request, granted
        );
        self.events.send(ConnectionEvent::PermissionResult {
            request: self.request,
            accessory: self.accessory,
            granted,
        })
    }
}
