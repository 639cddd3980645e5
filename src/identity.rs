//! Node identifiers.
//!
//! Identifiers are never random: every node derives its own and its peers'
//! identifiers from configured addresses, so all members agree on the same
//! total order and the highest identifier is a stable election tie-breaker.

/// Cluster-unique node identifier. Higher wins elections.
pub type NodeId = u64;

/// How a node identifier is derived from a configured `host` and `port`.
#[derive(Debug, Clone, Copy)]
pub enum IdScheme {
    /// Sum of every run of decimal digits in the host string
    /// (`"10.0.0.12"` derives `10 + 0 + 0 + 12 = 22`).
    DigitSum,
    /// `port - base_port`, used when many nodes share one host.
    PortOffset { base_port: u16 },
    /// Caller-supplied derivation.
    Custom(fn(&str, u16) -> NodeId),
}

impl IdScheme {
    pub fn derive(&self, host: &str, port: u16) -> NodeId {
        match self {
            IdScheme::DigitSum => digit_sum(host),
            IdScheme::PortOffset { base_port } => port_offset(port, *base_port),
            IdScheme::Custom(f) => f(host, port),
        }
    }
}

impl Default for IdScheme {
    fn default() -> Self {
        IdScheme::PortOffset { base_port: 5000 }
    }
}

/// Sum the numeric runs of an address string. Hosts without digits map to 0.
pub fn digit_sum(host: &str) -> NodeId {
    let mut total: NodeId = 0;
    let mut run: Option<NodeId> = None;

    for c in host.chars() {
        match c.to_digit(10) {
            Some(d) => {
                let current = run.unwrap_or(0);
                run = Some(current.saturating_mul(10).saturating_add(d as NodeId));
            }
            None => {
                if let Some(value) = run.take() {
                    total = total.saturating_add(value);
                }
            }
        }
    }
    if let Some(value) = run {
        total = total.saturating_add(value);
    }

    total
}

/// Port distance from the cluster's base port.
pub fn port_offset(port: u16, base_port: u16) -> NodeId {
    port.saturating_sub(base_port) as NodeId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_sum_adds_numeric_runs() {
        assert_eq!(digit_sum("10.0.0.12"), 22);
        assert_eq!(digit_sum("127.0.0.1"), 128);
        assert_eq!(digit_sum("drone-7.swarm-3"), 10);
    }

    #[test]
    fn digit_sum_without_digits_is_zero() {
        assert_eq!(digit_sum("localhost"), 0);
        assert_eq!(digit_sum(""), 0);
    }

    #[test]
    fn digit_sum_is_deterministic() {
        assert_eq!(digit_sum("192.168.1.40"), digit_sum("192.168.1.40"));
    }

    #[test]
    fn digit_sum_saturates_on_huge_runs() {
        assert_eq!(digit_sum("99999999999999999999999999"), NodeId::MAX);
    }

    #[test]
    fn port_offset_scheme() {
        let scheme = IdScheme::PortOffset { base_port: 5000 };
        assert_eq!(scheme.derive("localhost", 5000), 0);
        assert_eq!(scheme.derive("localhost", 5007), 7);
        assert_eq!(scheme.derive("localhost", 4000), 0);
    }

    #[test]
    fn custom_scheme_is_called() {
        fn by_port(_host: &str, port: u16) -> NodeId {
            port as NodeId * 2
        }
        let scheme = IdScheme::Custom(by_port);
        assert_eq!(scheme.derive("ignored", 21), 42);
    }

    #[test]
    fn default_scheme_is_port_offset_from_5000() {
        assert_eq!(IdScheme::default().derive("127.0.0.1", 5003), 3);
    }
}
