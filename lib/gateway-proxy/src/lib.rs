//! Request path of the API gateway
//!
//! Requests flow through an ordered [`StageChain`] (ownership rewrite,
//! prefix strip, admission filter) into the [`UpgradeAwareProxy`], which
//! either forwards them over the pooled round-trip transport or, for
//! protocol upgrades, relays raw bytes over a dedicated connection.

pub mod body;
pub mod chain;
pub mod connector;
pub mod error;
pub mod filter;
pub mod headers;
pub mod ownership;
pub mod pipeline;
pub mod prefix;
pub mod proxy;
pub mod relay;
pub mod server;
pub mod static_files;
pub mod tls;
pub mod transport;

pub use body::ProxyBody;
pub use chain::{Flow, Handler, Stage, StageChain};
pub use connector::UpstreamConnector;
pub use error::{ProxyError, ProxyResult};
pub use filter::AdmissionFilter;
pub use ownership::OwnershipRewriter;
pub use pipeline::ApiPipeline;
pub use prefix::StripPrefix;
pub use proxy::UpgradeAwareProxy;
pub use relay::relay;
pub use server::{serve, Listener};
pub use static_files::StaticFiles;
pub use transport::{
    AuthWrapper, CredentialProvider, RoundTripTransport, TransportPair, UpgradeTransport,
    UpstreamTarget, UpstreamTransportBuilder,
};
