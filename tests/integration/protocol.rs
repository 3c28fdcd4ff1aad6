use crate::*;

use meshhub_overlay::link;
use meshhub_overlay::ClientListSelector;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_hub_connection_lifecycle() -> Result<()> {
    let hub = start_hub(&[]).await?;
    let fake_addr = Address::from("127.0.0.1:1");

    let (mut fake, reply) = FakeHub::connect(&hub, &fake_addr).await?;
    assert_eq!(reply, Opcode::ConnectionAccepted);

    // The first frame after the handshake is the hub's initial gossip.
    let frame = fake.next_frame().await?;
    assert_eq!(frame.opcode, Opcode::Gossip);
    let gossip: Gossip = frame.decode()?;
    assert_eq!(&gossip.sender, hub.address());
    let own = gossip.sender_summary().context("hub left itself out")?;
    assert_eq!(own.hops, 0);
    assert_eq!(own.connected_to, vec![fake_addr.to_string()]);

    let d = view(&hub, &fake_addr).context("fake hub not registered")?;
    assert!(d.have_connection());
    assert_eq!(d.can_reach_me(), meshhub_overlay::Reachability::Reachable);

    // A second connection under the same address is refused.
    let (_dup, reply) = FakeHub::connect(&hub, &fake_addr).await?;
    assert_eq!(reply, Opcode::ConnectionRefused);

    fake.gossip(3, vec![client_with("cam@10.1.1.1:5000", "video", "rtsp")])
        .await?;
    wait_for("fake client", || d.has_client(&Address::from("cam@10.1.1.1:5000"))).await?;
    assert_eq!(d.home_state(), 3);
    assert_eq!(d.name(), "fake");

    let mut sel = ClientListSelector::default();
    hub.hub_list().select(&mut sel);
    assert_eq!(sel.clients.len(), 1);
    assert_eq!(sel.clients[0].0, fake_addr);
    assert_eq!(sel.clients[0].1.service("video"), Some("rtsp"));

    fake.disconnect().await?;
    wait_for("teardown", || !d.have_connection()).await?;
    wait_for("connection map cleared", || hub.connections().hub_count() == 0).await?;
    wait_for("connected_to cleared", || hub.local().connected_to().is_empty()).await?;

    hub.end().await;
    Ok(())
}

#[tokio::test]
async fn hub_claiming_our_address_is_refused() -> Result<()> {
    let hub = start_hub(&[]).await?;
    let me = hub.address().clone();
    let (_fake, reply) = FakeHub::connect(&hub, &me).await?;
    assert_eq!(reply, Opcode::ConnectionRefused);
    assert_eq!(hub.connections().hub_count(), 0);
    hub.end().await;
    Ok(())
}

#[tokio::test]
async fn splice_info_reports_our_source() -> Result<()> {
    let hub = start_hub(&[]).await?;
    let (ip, port) = link::query_splice_info(hub.address(), CONNECT_TIMEOUT).await?;
    assert_eq!(ip, "127.0.0.1");
    assert_ne!(port, 0);
    hub.end().await;
    Ok(())
}

#[tokio::test]
async fn ping_opens_nothing() -> Result<()> {
    let hub = start_hub(&[]).await?;
    link::ping(hub.address(), &Address::from("127.0.0.1:2"), CONNECT_TIMEOUT).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.connections().hub_count(), 0);
    assert_eq!(hub.connections().client_count(), 0);
    hub.end().await;
    Ok(())
}

#[tokio::test]
async fn bad_handshake_is_dropped() -> Result<()> {
    let hub = start_hub(&[]).await?;

    for first in [Opcode::ConnectionAccepted as u8, 0xEE] {
        let mut stream = TcpStream::connect(hub.address().as_str()).await?;
        stream.write_u8(first).await?;
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(SETTLE, stream.read(&mut buf))
            .await
            .context("hub kept the socket open")??;
        assert_eq!(n, 0, "opcode {first:#x}");
    }

    // The hub keeps serving afterwards.
    link::query_splice_info(hub.address(), CONNECT_TIMEOUT).await?;
    hub.end().await;
    Ok(())
}
