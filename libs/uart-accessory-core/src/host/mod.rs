mod channel_factory;
mod enumerator;
mod permission;

pub use channel_factory::*;
pub use enumerator::*;
pub use permission::*;
