use {
    super::{LedgerError, LedgerResult},
    std::{
        fmt::{self, Debug, Display},
        hash::Hash,
        net::{IpAddr, SocketAddr},
        str::FromStr,
    },
};

/// Identity of a cluster member that can hold a partition replica.
///
/// The ledger never looks inside an address: it only compares, hashes and
/// renders it. Any type with those capabilities can be used, which keeps the
/// ledger independent of how the membership layer names its members.
pub trait Address: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> Address for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Network endpoint of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterAddress(SocketAddr);

impl ClusterAddress {
    /// Creates an address from host IP and port.
    pub fn new(ip: impl Into<IpAddr>, port: u16) -> Self {
        Self(SocketAddr::new(ip.into(), port))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// Returns the underlying socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for ClusterAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for ClusterAddress {
    type Err = LedgerError;

    fn from_str(s: &str) -> LedgerResult<Self> {
        s.parse::<SocketAddr>()
            .map(Self)
            .map_err(|_| LedgerError::InvalidAddress(s.to_string()))
    }
}

impl Display for ClusterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
