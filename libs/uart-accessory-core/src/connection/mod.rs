mod accessory_connection;
mod state;

pub use accessory_connection::*;
pub use state::*;
