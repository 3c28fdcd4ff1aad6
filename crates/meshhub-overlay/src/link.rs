//! Client side of a service link.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use meshhub_core::wire::{self, Opcode};
use meshhub_core::{Address, ServiceAdd, ServiceRemove};

use crate::error::HubError;
use crate::transport::with_timeout;

/// A client registered at a hub. Services added here show up in the hub's
/// local description and travel with its gossip.
pub struct ClientLink {
    hub: Address,
    client: Address,
    stream: TcpStream,
}

impl ClientLink {
    /// Open a service link to `hub` as `client`. Fails with
    /// `HubError::Refused` if the hub already has a client by that address.
    pub async fn connect(
        hub: &Address,
        client: &Address,
        timeout: Duration,
    ) -> Result<Self, HubError> {
        let mut stream = with_timeout(timeout, async {
            Ok(TcpStream::connect(hub.as_str()).await?)
        })
        .await?;
        stream.set_nodelay(true)?;

        let reply = with_timeout(timeout, async {
            wire::write_handshake(&mut stream, Opcode::ServicelinkConnect, &[client.as_str()])
                .await?;
            Ok(wire::read_opcode(&mut stream).await?)
        })
        .await?;

        match reply {
            Opcode::ConnectionAccepted => {
                tracing::debug!(hub = %hub, client = %client, "service link open");
                Ok(Self {
                    hub: hub.clone(),
                    client: client.clone(),
                    stream,
                })
            }
            Opcode::ConnectionRefused => Err(HubError::Refused(hub.clone())),
            other => Err(HubError::UnexpectedOpcode(other)),
        }
    }

    pub fn hub(&self) -> &Address {
        &self.hub
    }

    pub fn client(&self) -> &Address {
        &self.client
    }

    /// Add a service, or replace its info if the tag exists.
    pub async fn add_service(&mut self, tag: &str, info: &str) -> Result<(), HubError> {
        let add = ServiceAdd {
            tag: tag.to_string(),
            info: info.to_string(),
        };
        wire::write_frame(&mut self.stream, Opcode::ServiceAdd, Some(&add)).await?;
        Ok(())
    }

    pub async fn remove_service(&mut self, tag: &str) -> Result<(), HubError> {
        let rm = ServiceRemove {
            tag: tag.to_string(),
        };
        wire::write_frame(&mut self.stream, Opcode::ServiceRemove, Some(&rm)).await?;
        Ok(())
    }

    /// Deregister from the hub.
    pub async fn close(mut self) -> Result<(), HubError> {
        wire::write_frame::<_, ()>(&mut self.stream, Opcode::Disconnect, None).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Ask a hub how it sees us: our public IP and source port.
pub async fn query_splice_info(
    hub: &Address,
    timeout: Duration,
) -> Result<(String, u16), HubError> {
    with_timeout(timeout, async {
        let mut stream = TcpStream::connect(hub.as_str()).await?;
        wire::write_opcode(&mut stream, Opcode::GetSpliceInfo).await?;
        let ip = wire::read_string(&mut stream).await?;
        let port = stream.read_u16().await?;
        Ok((ip, port))
    })
    .await
}

/// Tell a hub we exist without opening a connection.
pub async fn ping(hub: &Address, from: &Address, timeout: Duration) -> Result<(), HubError> {
    with_timeout(timeout, async {
        let mut stream = TcpStream::connect(hub.as_str()).await?;
        wire::write_handshake(&mut stream, Opcode::Ping, &[from.as_str()]).await?;
        stream.shutdown().await?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn services_reach_the_local_description() {
        let hub = Hub::start(HubConfig::loopback()).await.unwrap();
        let client = Address::from("client-7");

        let mut link = ClientLink::connect(hub.address(), &client, TIMEOUT)
            .await
            .unwrap();
        assert!(hub.local().has_client(&client));

        link.add_service("echo", "port=7").await.unwrap();
        let local = hub.local().clone();
        wait_until(|| {
            local
                .client(&client)
                .and_then(|c| c.service("echo").map(str::to_string))
                .as_deref()
                == Some("port=7")
        })
        .await;

        link.remove_service("echo").await.unwrap();
        wait_until(|| !local.client(&client).map(|c| c.has_service("echo")).unwrap_or(true)).await;

        assert!(matches!(
            ClientLink::connect(hub.address(), &client, TIMEOUT).await,
            Err(HubError::Refused(_))
        ));

        link.close().await.unwrap();
        wait_until(|| !local.has_client(&client)).await;
        hub.end().await;
    }

    #[tokio::test]
    async fn splice_info_and_ping() {
        let hub = Hub::start(HubConfig::loopback()).await.unwrap();
        let (ip, port) = query_splice_info(hub.address(), TIMEOUT).await.unwrap();
        assert_eq!(ip, "127.0.0.1");
        assert_ne!(port, 0);

        ping(hub.address(), &Address::from("127.0.0.1:1"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(hub.hub_list().len(), 1);
        hub.end().await;
    }
}
