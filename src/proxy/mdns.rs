//! mDNS advertisement of the proxy as an `_http._tcp` service on `local.`.

use std::fmt;
use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceInfo};

use crate::error::SyncError;
use crate::proxy::rc;

/// Service type the proxy is published under.
pub const SERVICE_TYPE: &str = "_http._tcp.local.";

/// Host label for `service`: lowercase, with anything outside
/// `[a-z0-9-]` replaced by `-`.
pub fn host_name(service: &str) -> String {
    let label: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{label}.local.")
}

/// Builds the service record for `service` at `ip:port`.
///
/// # Errors
///
/// Returns [`SyncError::Discovery`] if the name is not a valid instance
/// name.
pub fn service_info(service: &str, ip: IpAddr, port: u16) -> Result<ServiceInfo, SyncError> {
    let info = format!(
        "REAPER web interface via wwr-proxy {}",
        env!("CARGO_PKG_VERSION")
    );
    let txt = [("info", info.as_str())];
    let ip = ip.to_string();
    Ok(ServiceInfo::new(
        SERVICE_TYPE,
        service,
        &host_name(service),
        ip.as_str(),
        port,
        &txt[..],
    )?)
}

/// A registered mDNS service. Call [`MdnsAdvertiser::shutdown`] to withdraw
/// it.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl fmt::Debug for MdnsAdvertiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdnsAdvertiser")
            .field("fullname", &self.fullname)
            .finish_non_exhaustive()
    }
}

impl MdnsAdvertiser {
    /// Starts a responder and registers `service` at `ip:port`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Discovery`] if the daemon cannot start or the
    /// record is rejected.
    pub fn register(service: &str, ip: IpAddr, port: u16) -> Result<Self, SyncError> {
        let info = service_info(service, ip, port)?;
        let fullname = info.get_fullname().to_string();
        let daemon = ServiceDaemon::new()?;
        daemon.register(info)?;
        Ok(Self { daemon, fullname })
    }

    /// Full instance name, e.g. `REAPER._http._tcp.local.`.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Sends the goodbye record and stops the responder.
    pub fn shutdown(self) {
        if let Err(err) = self.daemon.unregister(&self.fullname) {
            tracing::warn!(service = %self.fullname, error = %err, "mdns unregister failed");
        }
        if let Err(err) = self.daemon.shutdown() {
            tracing::warn!(error = %err, "mdns daemon shutdown failed");
        }
        tracing::info!(service = %self.fullname, "mdns service withdrawn");
    }
}

/// Advertises `service` on `port`. An empty name disables advertisement;
/// failures are logged and leave the proxy running without it.
pub fn advertise(service: &str, port: u16) -> Option<MdnsAdvertiser> {
    if service.is_empty() {
        tracing::info!("MDNS_SERVICE is empty, mdns advertisement disabled");
        return None;
    }

    let advertiser = rc::local_ip().and_then(|ip| MdnsAdvertiser::register(service, ip, port));
    match advertiser {
        Ok(advertiser) => {
            tracing::info!(service = %advertiser.fullname(), port, "mdns service registered");
            Some(advertiser)
        }
        Err(err) => {
            tracing::warn!(service, code = err.error_code(), error = %err, "mdns registration failed");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn host_name_is_a_lowercase_local_label() {
        assert_eq!(host_name("REAPER"), "reaper.local.");
        assert_eq!(host_name("Studio A"), "studio-a.local.");
    }

    #[test]
    fn service_info_names_the_instance_and_port() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        let Ok(info) = service_info("REAPER", ip, 8080) else {
            panic!("valid service info");
        };
        assert_eq!(info.get_fullname(), "REAPER._http._tcp.local.");
        assert_eq!(info.get_hostname(), "reaper.local.");
        assert_eq!(info.get_port(), 8080);
        assert!(info.get_addresses().contains(&ip));
        let Some(txt) = info.get_property_val_str("info") else {
            panic!("info txt record");
        };
        assert!(txt.contains("wwr-proxy"));
    }

    #[test]
    fn empty_service_name_disables_advertisement() {
        assert!(advertise("", 8080).is_none());
    }
}
