use super::util;
use gethostname::gethostname;
use std::fmt;
use std::process;

const BUS_ADDR_NAMESPACE: &str = "opensrf";

/// Models a bus-level address providing access to indivual components
/// of each address.
///
/// Examples:
///
/// opensrf:router:$username:$domain
/// opensrf:service:$username:$domain:$service
/// opensrf:client:$username:$domain:$hostname:$pid:$random
#[derive(Debug, Clone)]
pub struct BusAddress {
    /// Full raw address string
    full: String,

    domain: String,
    username: String,

    /// Only service addresses have a service name
    service: Option<String>,

    is_client: bool,
    is_service: bool,
    is_router: bool,
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address={}", &self.full)
    }
}

impl BusAddress {
    /// Creates a new BusAddress from a bus address string.
    ///
    /// ```
    /// let addr =
    ///   opensrf::addr::BusAddress::from_str("opensrf:client:foobar:localhost:12345")
    ///   .expect("Error creating address from string");
    ///
    /// assert!(addr.is_client());
    /// assert_eq!(addr.domain(), "localhost");
    /// ```
    pub fn from_str(full: &str) -> Result<Self, String> {
        if !full.starts_with(BUS_ADDR_NAMESPACE) {
            if let Some(addr) = Self::from_legacy_jid(full) {
                return Ok(addr);
            }
        }

        let parts: Vec<&str> = full.split(':').collect();

        // Every address has 4 well-known parts, so we need that many at minimum.
        if parts.len() < 4 {
            return Err(format!("BusAddress bad format: {}", full));
        }

        let purpose = parts[1];
        let username = parts[2].to_owned();
        let domain = parts[3].to_owned();

        let mut addr = BusAddress {
            full: full.to_string(),
            domain,
            username,
            service: None,
            is_client: false,
            is_service: false,
            is_router: false,
        };

        if purpose.eq("service") {
            if let Some(service) = parts.get(4) {
                addr.service = Some(service.to_string());
                addr.is_service = true;
            } else {
                return Err(format!("Invalid service address: {full}"));
            }
        } else if purpose.eq("client") {
            addr.is_client = true;
        } else if purpose.eq("router") {
            addr.is_router = true;
        } else {
            return Err(format!("Invalid bus address: {full}"));
        }

        Ok(addr)
    }

    /// Alias for [`BusAddress::from_str`], kept for callers that prefer
    /// an explicit "parse from wire string" name.
    pub fn new_from_string(full: &str) -> Result<Self, String> {
        Self::from_str(full)
    }

    /// Parses the legacy XMPP-style `user@domain/resource` address form.
    ///
    /// The role is inferred from the resource: a resource of `router`
    /// yields a router address; a resource containing a `.` is assumed to
    /// be a service name (OpenSRF service classes are always dotted, e.g.
    /// `opensrf.settings`); anything else is treated as an opaque client
    /// resource.
    ///
    /// ```
    /// let addr = opensrf::addr::BusAddress::from_legacy_jid(
    ///     "opensrf@private.localhost/router").unwrap();
    /// assert!(addr.is_router());
    /// assert_eq!(addr.domain(), "private.localhost");
    /// ```
    pub fn from_legacy_jid(jid: &str) -> Option<Self> {
        let (user_domain, resource) = jid.split_once('/')?;
        let (username, domain) = user_domain.split_once('@')?;

        if resource == "router" {
            Some(Self::for_router(username, domain))
        } else if resource.contains('.') {
            Some(Self::for_service(username, domain, resource))
        } else {
            let mut addr = Self::for_client(username, domain);
            addr.full = format!(
                "{}:client:{}:{}:{}",
                BUS_ADDR_NAMESPACE, username, domain, resource
            );
            Some(addr)
        }
    }

    /// Renders this address using the legacy `user@domain/resource` form.
    ///
    /// ```
    /// let addr = opensrf::addr::BusAddress::for_router("opensrf", "private.localhost");
    /// assert_eq!(addr.to_legacy_jid(), "opensrf@private.localhost/router");
    /// ```
    pub fn to_legacy_jid(&self) -> String {
        let resource = if self.is_router {
            "router".to_string()
        } else if let Some(s) = &self.service {
            s.to_string()
        } else {
            self.full.rsplit(':').next().unwrap_or("client").to_string()
        };

        format!("{}@{}/{}", self.username, self.domain, resource)
    }

    /// Builds a client address for the given username/domain, appended
    /// with this process's hostname, pid, and a random suffix.
    ///
    /// ```
    /// let addr = opensrf::addr::BusAddress::for_client("opensrf", "private.localhost");
    /// assert!(addr.is_client());
    /// ```
    pub fn for_client(username: &str, domain: &str) -> Self {
        let full = format!(
            "{}:client:{}:{}:{}:{}:{}",
            BUS_ADDR_NAMESPACE,
            username,
            domain,
            &gethostname().into_string().unwrap_or_else(|_| "unknown-host".to_string()),
            process::id(),
            &util::random_number(6)
        );

        Self::from_str(&full).unwrap()
    }

    /// Builds a service address tied to a specific username/domain (the
    /// address a given node of a service class listens on).
    ///
    /// ```
    /// let addr = opensrf::addr::BusAddress::for_service(
    ///     "opensrf", "private.localhost", "opensrf.settings");
    /// assert_eq!(addr.service(), Some("opensrf.settings"));
    /// ```
    pub fn for_service(username: &str, domain: &str, service: &str) -> Self {
        let full = format!(
            "{}:service:{}:{}:{}",
            BUS_ADDR_NAMESPACE, username, domain, service
        );
        Self::from_str(&full).unwrap()
    }

    /// Builds a user/domain-agnostic service address, used by clients
    /// that want to address "any node of this service" and let the Router
    /// pick one.
    ///
    /// ```
    /// let addr = opensrf::addr::BusAddress::for_bare_service("opensrf.settings");
    /// assert!(addr.is_service());
    /// ```
    pub fn for_bare_service(service: &str) -> Self {
        Self::for_service("_", "_", service)
    }

    /// Builds a router listen address for a domain.
    ///
    /// ```
    /// let addr = opensrf::addr::BusAddress::for_router("opensrf", "private.localhost");
    /// assert!(addr.is_router());
    /// ```
    pub fn for_router(username: &str, domain: &str) -> Self {
        let full = format!("{}:router:{}:{}", BUS_ADDR_NAMESPACE, username, domain);
        Self::from_str(&full).unwrap()
    }

    /// Full address string
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Alias for [`BusAddress::as_str`].
    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
    pub fn username(&self) -> &str {
        &self.username
    }
    pub fn set_domain(&mut self, s: &str) {
        self.domain = s.to_string();
    }
    pub fn set_username(&mut self, s: &str) {
        self.username = s.to_string();
    }
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }
    pub fn is_client(&self) -> bool {
        self.is_client
    }
    pub fn is_service(&self) -> bool {
        self.is_service
    }
    pub fn is_router(&self) -> bool {
        self.is_router
    }
}

#[derive(Debug, Clone)]
pub struct ClientAddress {
    addr: BusAddress,
}

impl ClientAddress {
    pub fn from_addr(addr: BusAddress) -> Result<Self, String> {
        if addr.is_client() {
            Ok(ClientAddress { addr })
        } else {
            Err("Cannot create a ClientAddress from a non-client BusAddress".to_string())
        }
    }

    pub fn from_string(full: &str) -> Result<Self, String> {
        let addr = BusAddress::from_str(full)?;
        if !addr.is_client() {
            return Err(format!("Invalid ClientAddress string: {full}"));
        }
        Ok(ClientAddress { addr })
    }

    pub fn as_str(&self) -> &str {
        self.addr.as_str()
    }

    pub fn full(&self) -> &str {
        self.addr.as_str()
    }

    /// Create a new ClientAddress for a domain.
    ///
    /// ```
    /// let username = "opensrf";
    /// let domain = "private.localhost";
    /// let addr = opensrf::addr::ClientAddress::new(username, domain);
    /// assert_eq!(addr.domain(), domain);
    /// assert!(addr.addr().is_client());
    /// ```
    pub fn new(username: &str, domain: &str) -> Self {
        ClientAddress {
            addr: BusAddress::for_client(username, domain),
        }
    }

    /// Allow the caller to provide the address content after the domain.
    ///
    /// ```
    /// let username = "opensrf";
    /// let domain = "private.localhost";
    /// let mut addr = opensrf::addr::ClientAddress::new(username, domain);
    /// assert_eq!(addr.domain(), domain);
    ///
    /// let remainder = "HELLO123";
    /// addr.set_remainder(remainder);
    /// assert!(addr.addr().is_client());
    /// assert!(addr.as_str().ends_with(remainder));
    /// ```
    pub fn set_remainder(&mut self, remainder: &str) {
        self.addr.full = format!(
            "{}:client:{}:{}:{}",
            BUS_ADDR_NAMESPACE,
            self.addr().username(),
            self.addr().domain(),
            remainder,
        );
    }

    pub fn domain(&self) -> &str {
        self.addr.domain()
    }

    pub fn addr(&self) -> &BusAddress {
        &self.addr
    }
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ClientAddress={}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ServiceAddress {
    addr: BusAddress,
}

impl ServiceAddress {
    pub fn from_addr(addr: BusAddress) -> Result<Self, String> {
        if addr.is_service() {
            Ok(ServiceAddress { addr })
        } else {
            Err("Cannot create a ServiceAddress from a non-service BusAddress".to_string())
        }
    }

    pub fn from_string(full: &str) -> Result<Self, String> {
        let addr = BusAddress::from_str(full)?;
        if !addr.is_service() {
            return Err(format!("Invalid ServiceAddress string: {full}"));
        }
        Ok(ServiceAddress { addr })
    }

    pub fn as_str(&self) -> &str {
        self.addr.as_str()
    }

    pub fn full(&self) -> &str {
        self.addr.as_str()
    }

    /// Create a user/domain-agnostic service address.
    ///
    /// Service address are non domain-specific and refer generically
    /// to a service.
    ///
    /// ```
    /// let service = "opensrf.settings";
    /// let mut addr = opensrf::addr::ServiceAddress::new(service);
    /// assert_eq!(addr.service(), service);
    /// assert!(addr.addr().is_service());
    /// ```
    pub fn new(service: &str) -> Self {
        ServiceAddress {
            addr: BusAddress::for_bare_service(service),
        }
    }

    pub fn addr(&self) -> &BusAddress {
        &self.addr
    }

    pub fn addr_mut(&mut self) -> &mut BusAddress {
        &mut self.addr
    }

    pub fn service(&self) -> &str {
        self.addr().service().unwrap()
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServiceAddress={}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RouterAddress {
    addr: BusAddress,
}

impl RouterAddress {
    pub fn from_addr(addr: BusAddress) -> Result<Self, String> {
        if addr.is_router() {
            Ok(RouterAddress { addr })
        } else {
            Err("Cannot create a RouterAddress from a non-router BusAddress".to_string())
        }
    }

    /// Create a new router address from a string
    ///
    /// ```
    /// let addr_res = opensrf::addr::RouterAddress::from_string("foo:bar");
    /// assert!(addr_res.is_err());
    ///
    /// let addr_res = opensrf::addr::RouterAddress::from_string("opensrf:router:opensrf:localhost");
    /// assert!(addr_res.is_ok());
    /// assert!(addr_res.unwrap().domain().eq("localhost"));
    /// ```
    pub fn from_string(full: &str) -> Result<Self, String> {
        let addr = BusAddress::from_str(full)?;
        if !addr.is_router() {
            return Err(format!("Invalid RouterAddress string: {full}"));
        }
        Ok(RouterAddress { addr })
    }

    pub fn as_str(&self) -> &str {
        self.addr.as_str()
    }

    pub fn full(&self) -> &str {
        self.addr.as_str()
    }

    /// Create a new router address on a domain, using "router" as the
    /// conventional login username for the Router process.
    ///
    /// ```
    /// let addr = opensrf::addr::RouterAddress::new("localhost");
    /// assert_eq!(addr.as_str(), "opensrf:router:router:localhost");
    /// ```
    pub fn new(domain: &str) -> Self {
        RouterAddress {
            addr: BusAddress::for_router("router", domain),
        }
    }

    pub fn domain(&self) -> &str {
        self.addr.domain()
    }

    pub fn addr(&self) -> &BusAddress {
        &self.addr
    }
}

impl fmt::Display for RouterAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RouterAddress={}", self.as_str())
    }
}
