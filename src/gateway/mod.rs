//! HTTP listeners: the proxy and the monitoring interface.

pub mod server;
pub mod status_page;

pub use server::{monitoring_router, proxy_router, GatewayServer, MonitoringState, ProxyState};
pub use status_page::{RemoteView, StatusPage};
