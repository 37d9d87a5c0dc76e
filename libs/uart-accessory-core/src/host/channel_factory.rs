use std::io;

use crate::channel::AccessoryChannel;

/// Opens the byte stream of an accessory we hold permission for.
pub trait ChannelFactory<A> {
    fn open_channel(&mut self, accessory: &A) -> io::Result<AccessoryChannel>;
}
