use crate::*;

use meshhub_overlay::{ClientLink, ClientSelector, Reachability};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn seed_that_comes_up_late_is_retried() -> Result<()> {
    let port = reserve_port()?;
    let late = loopback(port);

    let h1 = start_hub(&[&late]).await?;
    let d = view(&h1, &late).context("seed not registered")?;
    wait_for("seed marked unreachable", || d.reachable() == Reachability::Unreachable).await?;

    let h2 = start_hub_on(port, &[]).await?;
    assert_eq!(h2.address(), &late);

    wait_for("link", || linked(&h1, &h2)).await?;
    wait_for("h1 reaches h2", || d.is_reachable()).await?;
    wait_for("h2 sees h1 reaching it", || {
        view(&h2, h1.address())
            .map(|d| d.can_reach_me() == Reachability::Reachable)
            .unwrap_or(false)
    })
    .await?;

    // A client on h2 shows up at h1 through gossip, services included.
    let client = Address::from("sensor@10.9.0.1:4000");
    let mut link = ClientLink::connect(h2.address(), &client, CONNECT_TIMEOUT).await?;
    link.add_service("temp", "celsius").await?;

    wait_for("client gossiped to h1", || {
        d.client(&client)
            .map(|c| c.service("temp") == Some("celsius"))
            .unwrap_or(false)
    })
    .await?;
    let mut sel = ClientSelector::new(client.clone());
    h1.hub_list().select(&mut sel);
    assert_eq!(sel.hub.as_ref(), Some(h2.address()));

    // Deregistering travels the same way.
    link.close().await?;
    wait_for("client gone at h1", || !d.has_client(&client)).await?;

    h2.end().await;
    h1.end().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hubs_are_discovered_through_gossip() -> Result<()> {
    let h1 = start_hub(&[]).await?;
    let h2 = start_hub(&[h1.address()]).await?;
    wait_for("h1-h2 link", || linked(&h1, &h2)).await?;

    // h3 only knows h2 and learns h1 from it.
    let h3 = start_hub(&[h2.address()]).await?;
    wait_for("h3 learns h1", || h3.hub_list().contains(h1.address())).await?;
    wait_for("h3-h1 link", || linked(&h3, &h1)).await?;

    for hub in [&h1, &h2, &h3] {
        let known = hub.hub_list().known_hubs();
        assert_eq!(known.len(), 3, "{} knows {known:?}", hub.address());
    }

    // Every hub's connected_to eventually lists the other two.
    wait_for("full mesh reported", || {
        [&h1, &h2, &h3].iter().all(|hub| hub.local().connected_to().len() == 2)
    })
    .await?;
    wait_for("h1 hears about h3's links", || {
        view(&h1, h3.address())
            .map(|d| d.connected_to().len() == 2)
            .unwrap_or(false)
    })
    .await?;

    h3.end().await;
    h2.end().await;
    h1.end().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_hub_is_routed_through_a_neighbour() -> Result<()> {
    let h2 = start_hub(&[]).await?;

    // A peer nobody can dial back, attached to h2 only.
    let hidden = Address::from("127.0.0.1:1");
    let (mut fake, reply) = FakeHub::connect(&h2, &hidden).await?;
    assert_eq!(reply, Opcode::ConnectionAccepted);
    fake.gossip(7, vec![client_with("cam@192.168.5.5:554", "video", "h264")])
        .await?;
    wait_for("h2 has hidden client", || {
        view(&h2, &hidden)
            .map(|d| d.has_client(&Address::from("cam@192.168.5.5:554")))
            .unwrap_or(false)
    })
    .await?;

    let h3 = start_hub(&[h2.address()]).await?;
    wait_for("h3 learns hidden hub", || {
        view(&h3, &hidden).map(|d| d.home_state() == 7).unwrap_or(false)
    })
    .await?;
    let d = view(&h3, &hidden).context("hidden hub missing")?;
    wait_for("h3 gives up dialing", || d.reachable() == Reachability::Unreachable).await?;

    assert_eq!(d.indirection().as_ref(), Some(h2.address()));
    assert_eq!(d.hops(), 1);
    assert!(!d.have_connection());
    assert_eq!(
        d.client(&Address::from("cam@192.168.5.5:554"))
            .and_then(|c| c.service("video").map(str::to_string))
            .as_deref(),
        Some("h264")
    );

    fake.disconnect().await?;
    h3.end().await;
    h2.end().await;
    Ok(())
}
