use crate::*;

use meshhub_overlay::{ClientLink, ClientListSelector, HubError, Reachability};

fn client_list(hub: &Hub) -> Vec<(Address, Address)> {
    let mut sel = ClientListSelector::default();
    hub.hub_list().select(&mut sel);
    let mut out: Vec<(Address, Address)> = sel
        .clients
        .into_iter()
        .map(|(hub, c)| (hub, c.address().clone()))
        .collect();
    out.sort();
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_client_is_refused_per_hub() -> Result<()> {
    let h1 = start_hub(&[]).await?;
    let h2 = start_hub(&[h1.address()]).await?;
    let client = Address::from("printer@10.0.0.50:631");

    let first = ClientLink::connect(h1.address(), &client, CONNECT_TIMEOUT).await?;
    let again = ClientLink::connect(h1.address(), &client, CONNECT_TIMEOUT).await;
    assert!(matches!(again, Err(HubError::Refused(_))));

    // Another hub has its own client table.
    let elsewhere = ClientLink::connect(h2.address(), &client, CONNECT_TIMEOUT).await?;
    assert_eq!(h1.connections().client_count(), 1);
    assert_eq!(h2.connections().client_count(), 1);

    // Once the first link closes, the address is free again.
    first.close().await?;
    wait_for("client released", || !h1.connections().has_client(&client)).await?;
    let reopened = ClientLink::connect(h1.address(), &client, CONNECT_TIMEOUT).await?;

    reopened.close().await?;
    elsewhere.close().await?;
    h2.end().await;
    h1.end().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_listing_spans_the_overlay() -> Result<()> {
    let h1 = start_hub(&[]).await?;
    let h2 = start_hub(&[h1.address()]).await?;
    wait_for("link", || linked(&h1, &h2)).await?;

    let a = Address::from("a@10.0.0.1:1000");
    let b = Address::from("b@10.0.0.2:2000");
    let mut la = ClientLink::connect(h1.address(), &a, CONNECT_TIMEOUT).await?;
    let lb = ClientLink::connect(h2.address(), &b, CONNECT_TIMEOUT).await?;

    let mut expected = vec![
        (h1.address().clone(), a.clone()),
        (h2.address().clone(), b.clone()),
    ];
    expected.sort();
    wait_for("both hubs list both clients", || {
        client_list(&h1) == expected && client_list(&h2) == expected
    })
    .await?;

    // Service changes replace the remote copy wholesale.
    la.add_service("http", "port=80").await?;
    la.add_service("http", "port=8080").await?;
    la.add_service("ssh", "port=22").await?;
    la.remove_service("ssh").await?;
    let at_h2 = view(&h2, h1.address()).context("h2 does not know h1")?;
    wait_for("service update at h2", || {
        at_h2
            .client(&a)
            .map(|c| c.service("http") == Some("port=8080") && !c.has_service("ssh"))
            .unwrap_or(false)
    })
    .await?;

    lb.close().await?;
    wait_for("b dropped at h1", || {
        client_list(&h1) == vec![(h1.address().clone(), a.clone())]
    })
    .await?;

    la.close().await?;
    h2.end().await;
    h1.end().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ending_a_hub_drops_it_from_the_mesh() -> Result<()> {
    let h1 = start_hub(&[]).await?;
    let h2 = start_hub(&[h1.address()]).await?;
    wait_for("link", || linked(&h1, &h2)).await?;

    let client = Address::from("c@10.0.0.3:3000");
    let _link = ClientLink::connect(h2.address(), &client, CONNECT_TIMEOUT).await?;
    let d = view(&h1, h2.address()).context("h1 does not know h2")?;
    wait_for("client at h1", || d.has_client(&client)).await?;

    h2.end().await;

    wait_for("h1 notices", || !d.have_connection()).await?;
    wait_for("h2 unreachable", || {
        d.reachable() == Reachability::Unreachable
    })
    .await?;
    wait_for("connection map cleared", || h1.connections().hub_count() == 0).await?;
    wait_for("connected_to cleared", || h1.local().connected_to().is_empty()).await?;

    h1.end().await;
    Ok(())
}
