use std::fmt::Debug;

/// Lists the accessories currently attached to this device.
pub trait AccessoryEnumerator {
    /// Opaque handle for one attached accessory.
    type Accessory: Clone + Debug + PartialEq + Send + 'static;

    /// Possibly empty. Order is whatever the platform reports.
    fn attached_accessories(&self) -> Vec<Self::Accessory>;
}
