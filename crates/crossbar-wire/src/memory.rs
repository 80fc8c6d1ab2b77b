//! In-process channels.

use crate::channel::{ChannelLink, QueueTransport};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Create two connected channel ends.
///
/// Whatever is sent on the first link's transport arrives on the second
/// link's inbound queue and vice versa. Closing (or dropping) one transport
/// ends the other side's inbound stream.
pub fn pair() -> (ChannelLink, ChannelLink) {
    let (to_a, a_inbound) = mpsc::unbounded_channel();
    let (to_b, b_inbound) = mpsc::unbounded_channel();
    let a = ChannelLink::new(Arc::new(QueueTransport::new(to_b)), a_inbound);
    let b = ChannelLink::new(Arc::new(QueueTransport::new(to_a)), b_inbound);
    (a, b)
}
