use crate::*;

/// Both sides hold exactly one connection, and it is the same socket.
fn assert_single_link(a: &Hub, b: &Hub) -> Result<()> {
    assert_eq!(a.connections().hub_count(), 1, "{} hub connections", a.address());
    assert_eq!(b.connections().hub_count(), 1, "{} hub connections", b.address());

    let ab = a
        .connections()
        .get_hub(b.address())
        .context("a has no connection to b")?;
    let ba = b
        .connections()
        .get_hub(a.address())
        .context("b has no connection to a")?;

    assert_eq!(ab.local_socket(), ba.remote_socket());
    assert_eq!(ab.remote_socket(), ba.local_socket());
    assert_ne!(ab.origin(), ba.origin());

    let da = view(a, b.address()).context("a does not know b")?;
    assert_eq!(da.connection().map(|c| c.id()), Some(ab.id()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_connect_leaves_one_connection() -> Result<()> {
    for round in 0..3 {
        let (pa, pb) = (reserve_port()?, reserve_port()?);
        let (addr_a, addr_b) = (loopback(pa), loopback(pb));

        let (peers_a, peers_b) = ([&addr_b], [&addr_a]);
        let (a, b) = tokio::join!(start_hub_on(pa, &peers_a), start_hub_on(pb, &peers_b));
        let (a, b) = (a?, b?);

        wait_for(&format!("round {round} link"), || linked(&a, &b)).await?;
        // Let several retry periods pass; losers of the race must not leave
        // a second connection behind.
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_single_link(&a, &b)?;

        a.end().await;
        b.end().await;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_mutual_seed_links_once() -> Result<()> {
    let a = start_hub(&[]).await?;
    let b = start_hub(&[a.address()]).await?;
    a.add_hub(b.address());

    wait_for("link", || linked(&a, &b)).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_single_link(&a, &b)?;

    // Whoever opened the surviving socket, each side sees its peer as
    // reachable once the connectors have probed it.
    wait_for("mutual reachability", || {
        view(&a, b.address()).map(|d| d.is_reachable()).unwrap_or(false)
            && view(&b, a.address()).map(|d| d.is_reachable()).unwrap_or(false)
    })
    .await?;

    assert_eq!(a.local().connected_to(), vec![b.address().to_string()]);
    assert_eq!(b.local().connected_to(), vec![a.address().to_string()]);

    a.end().await;
    b.end().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lost_connection_is_retried() -> Result<()> {
    let a = start_hub(&[]).await?;
    let b = start_hub(&[a.address()]).await?;
    wait_for("link", || linked(&a, &b)).await?;

    // Drop the link from a's side only; b's connector brings it back.
    let conn = a
        .connections()
        .get_hub(b.address())
        .context("a has no connection")?;
    let first_id = conn.id();
    conn.disconnect().await?;

    wait_for("relink", || {
        linked(&a, &b)
            && a
                .connections()
                .get_hub(b.address())
                .map(|c| c.id() != first_id)
                .unwrap_or(false)
    })
    .await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_single_link(&a, &b)?;

    a.end().await;
    b.end().await;
    Ok(())
}
