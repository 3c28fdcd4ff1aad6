//! meshhub-overlay: hub membership, gossip and connection arbitration.

pub mod acceptor;
pub mod connection;
pub mod connections;
pub mod connector;
pub mod description;
pub mod error;
pub mod gossip;
pub mod hub;
pub mod hub_list;
pub mod link;
pub mod selector;
pub mod transport;

pub use connection::{ClientConnection, HubConnection, Origin};
pub use connections::{Connection, Connections};
pub use description::{HubDescription, HubInfo, Reachability, INFINITE_HOPS};
pub use error::HubError;
pub use hub::{Hub, HubConfig, HubContext};
pub use hub_list::HubList;
pub use link::ClientLink;
pub use selector::{
    ClientListSelector, ClientSelector, ConnectedSelector, HubDetailsSelector, HubInfoSelector,
    LocalSelector, Selector, StateSelector,
};
pub use transport::SocketFactory;
