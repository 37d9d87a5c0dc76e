use std::time::Duration;

use log::{debug, info};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use uart_accessory_comm::device::DeviceNode;
use uart_accessory_core::events::{ConnectionEvent, EventSender};

/// Polls `node` and reports its removal to the connection owner.
pub async fn watch_node(
    node: DeviceNode,
    period: Duration,
    events: EventSender<DeviceNode>,
    token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut present = node.is_present();
    debug!(
        "Watching {} (present: {})",
        node.path().display(),
        present
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now_present = node.is_present();
        match (present, now_present) {
            (false, true) => info!("Accessory attached at {}", node.path().display()),
            (true, false) => {
                info!("Accessory at {} went away", node.path().display());
                if !events.send(ConnectionEvent::Detached(node.clone())) {
                    break;
                }
            }
            _ => {}
        }
        present = now_present;
    }
    debug!("Stopped watching {}", node.path().display());
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use uart_accessory_comm::device::DeviceNode;
    use uart_accessory_core::events::{ConnectionEvent, event_queue};

    use super::watch_node;

    #[tokio::test]
    async fn test_removal_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb_accessory");
        std::fs::write(&path, b"").unwrap();
        let node = DeviceNode::new(&path);

        let (events, mut rx) = event_queue();
        let token = CancellationToken::new();
        let watcher = tokio::spawn(watch_node(
            node.clone(),
            Duration::from_millis(5),
            events,
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::remove_file(&path).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ConnectionEvent::Detached(node));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        token.cancel();
        watcher.await.unwrap();
    }
}
