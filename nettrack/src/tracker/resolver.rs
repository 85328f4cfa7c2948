use std::net::IpAddr;

use dns_lookup::lookup_addr;
use tracing::debug;

/// Reverse-DNS seam. The tracker resolves each address once per mirror
/// entry; `None` degrades to the `unknown` sentinel, never an error.
pub trait HostResolver: Send + Sync + 'static {
    fn resolve(&self, addr: IpAddr) -> Option<Vec<String>>;
}

/// Resolution through the system resolver. Blocking; the tracker runs it
/// off the async runtime.
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, addr: IpAddr) -> Option<Vec<String>> {
        match lookup_addr(&addr) {
            Ok(name) => Some(vec![name]),
            Err(e) => {
                debug!("Reverse lookup for {} failed: {}", addr, e);
                None
            }
        }
    }
}
