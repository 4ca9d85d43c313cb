//! mDNS service advertisement and local address discovery.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use mdns_sd::{ServiceDaemon, ServiceInfo};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;

/// What gets announced on the local network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRecord {
    pub instance_name: String,
    /// e.g. `_http._tcp`
    pub service_type: String,
    /// e.g. `local`
    pub domain: String,
    pub port: u16,
    /// Announced address; the responder also adds its interface addresses.
    pub ip: Option<Ipv4Addr>,
}

impl ServiceRecord {
    /// Fully qualified service type, `_http._tcp.local.`.
    pub fn service_domain(&self) -> String {
        format!("{}.{}.", self.service_type, self.domain)
    }

    /// Host label clients resolve, `iellaurel.local.`.
    pub fn host_name(&self) -> String {
        format!("{}.{}.", self.instance_name, self.domain)
    }
}

/// Publishes and retracts one service record.
///
/// Implementations must make `publish` a no-op while published and
/// `retract` a no-op while not.
pub trait Advertiser: Send + Sync {
    fn publish(&self, record: &ServiceRecord) -> Result<(), DiscoveryError>;
    fn retract(&self);
    fn is_published(&self) -> bool;
}

struct Published {
    daemon: ServiceDaemon,
    fullname: String,
}

/// Multicast DNS responder backed by `mdns-sd`. The daemon thread only
/// lives while a record is published.
#[derive(Default)]
pub struct MdnsAdvertiser {
    state: Mutex<Option<Published>>,
}

impl MdnsAdvertiser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Advertiser for MdnsAdvertiser {
    fn publish(&self, record: &ServiceRecord) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock();
        if state.is_some() {
            debug!("mDNS record already published");
            return Ok(());
        }

        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Daemon(e.to_string()))?;

        let ip = record.ip.map(|ip| ip.to_string()).unwrap_or_default();
        let properties: HashMap<String, String> =
            HashMap::from([("path".to_string(), "/index.html".to_string())]);
        let service = match ServiceInfo::new(
            &record.service_domain(),
            &record.instance_name,
            &record.host_name(),
            ip.as_str(),
            record.port,
            properties,
        ) {
            Ok(service) => service.enable_addr_auto(),
            Err(e) => {
                let _ = daemon.shutdown();
                return Err(DiscoveryError::Record(e.to_string()));
            }
        };
        let fullname = service.get_fullname().to_string();

        if let Err(e) = daemon.register(service) {
            let _ = daemon.shutdown();
            return Err(DiscoveryError::Register(e.to_string()));
        }

        info!(
            fullname = %fullname,
            host = %record.host_name(),
            port = record.port,
            "mDNS service published"
        );
        *state = Some(Published { daemon, fullname });
        Ok(())
    }

    fn retract(&self) {
        let Some(published) = self.state.lock().take() else {
            return;
        };
        if let Err(e) = published.daemon.unregister(&published.fullname) {
            debug!(error = %e, "mDNS unregister failed");
        }
        if let Err(e) = published.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }
        info!(fullname = %published.fullname, "mDNS service retracted");
    }

    fn is_published(&self) -> bool {
        self.state.lock().is_some()
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.retract();
    }
}

/// First non-loopback IPv4 address of this host.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "failed to enumerate network interfaces");
            return None;
        }
    };

    for iface in &interfaces {
        debug!(name = %iface.name, ip = %iface.ip(), loopback = iface.is_loopback(), "interface");
    }

    interfaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
}

/// `http://<host>:<port> (http://<ip>:<port>)`, without the fallback when
/// no IP is known.
pub fn format_address(mdns_host: &str, port: u16, ip: Option<Ipv4Addr>) -> String {
    match ip {
        Some(ip) => format!("http://{mdns_host}:{port} (http://{ip}:{port})"),
        None => format!("http://{mdns_host}:{port}"),
    }
}
