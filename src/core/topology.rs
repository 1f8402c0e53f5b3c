// src/core/topology.rs

//! Pure topology assignment for a cluster's member hosts (spec §3, §4.5).
//!
//! Given the set of hosts chosen for a cluster, deterministically assigns a
//! leader, a set of servers, and a set of agents, with the bootstrap-expect
//! count each role should be attached with. Does no I/O.

use crate::core::errors::HaMgrError;
use crate::core::types::Role;

/// The minimum number of hosts a cluster may be formed from.
pub const MIN_HOSTS: usize = 3;

/// The maximum number of hosts that hold the `server` role (leader included).
const MAX_SERVERS: usize = 5;

/// `bootstrap_expect` attached with every server-role host (leader included).
pub const SERVER_BOOTSTRAP_EXPECT: u32 = 3;

/// `bootstrap_expect` attached with every agent-role host.
pub const AGENT_BOOTSTRAP_EXPECT: u32 = 0;

/// One host's place in the assigned topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub host: String,
    pub role: Role,
    pub bootstrap_expect: u32,
}

/// The full topology computed for a cluster: leader, servers (including the
/// leader), and agents, each sorted lexicographically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub leader: String,
    /// All server-role hosts, leader included, sorted lexicographically.
    pub servers: Vec<String>,
    /// All agent-role hosts, sorted lexicographically.
    pub agents: Vec<String>,
}

impl Topology {
    /// Every host in the topology along with its assigned role and bootstrap count.
    pub fn assignments(&self) -> Vec<Assignment> {
        let mut out = Vec::with_capacity(self.servers.len() + self.agents.len());
        for host in &self.servers {
            out.push(Assignment {
                host: host.clone(),
                role: Role::Server,
                bootstrap_expect: SERVER_BOOTSTRAP_EXPECT,
            });
        }
        for host in &self.agents {
            out.push(Assignment {
                host: host.clone(),
                role: Role::Agent,
                bootstrap_expect: AGENT_BOOTSTRAP_EXPECT,
            });
        }
        out
    }

    /// All member hosts of this topology, leader + servers + agents.
    pub fn all_hosts(&self) -> Vec<String> {
        let mut hosts = self.servers.clone();
        hosts.extend(self.agents.iter().cloned());
        hosts
    }
}

/// Computes the topology for an unordered set of host names, requiring at
/// least `MIN_HOSTS` members (spec §4.5's own fixed precondition).
pub fn plan<I, S>(hosts: I) -> Result<Topology, HaMgrError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    plan_with_minimum(hosts, MIN_HOSTS)
}

/// As `plan`, but with the minimum host count configurable (spec §6's
/// `min_host_count`, which the Controller enforces on top of the planner's
/// own fixed §4.5 precondition).
///
/// `leader = H[0]`, `servers = H[1..min(5,n)-1]` (so the server count
/// including the leader is `min(5, n)`), `agents = H[min(5,n)..]`, where `H`
/// is `hosts` sorted lexicographically. Fails with `InsufficientHosts` when
/// fewer than `min_hosts` hosts are given.
pub fn plan_with_minimum<I, S>(hosts: I, min_hosts: usize) -> Result<Topology, HaMgrError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut sorted: Vec<String> = hosts.into_iter().map(Into::into).collect();
    if sorted.len() < min_hosts.max(MIN_HOSTS) {
        return Err(HaMgrError::InsufficientHosts(sorted.len()));
    }
    sorted.sort();

    let leader = sorted[0].clone();
    let server_count = MAX_SERVERS.min(sorted.len());
    let servers = sorted[..server_count].to_vec();
    let agents = sorted[server_count..].to_vec();

    Ok(Topology {
        leader,
        servers,
        agents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("h{i:02}")).collect()
    }

    #[test]
    fn rejects_fewer_than_three_hosts() {
        let err = plan(names(2)).unwrap_err();
        assert!(matches!(err, HaMgrError::InsufficientHosts(2)));
    }

    #[test]
    fn three_hosts_all_servers_no_agents() {
        let topo = plan(names(3)).unwrap();
        assert_eq!(topo.leader, "h00");
        assert_eq!(topo.servers, vec!["h00", "h01", "h02"]);
        assert!(topo.agents.is_empty());
    }

    #[test]
    fn five_hosts_all_servers() {
        let topo = plan(names(5)).unwrap();
        assert_eq!(topo.servers.len(), 5);
        assert!(topo.agents.is_empty());
        assert_eq!(topo.leader, "h00");
    }

    #[test]
    fn six_hosts_one_agent() {
        let topo = plan(names(6)).unwrap();
        assert_eq!(topo.servers.len(), 5);
        assert_eq!(topo.agents, vec!["h05"]);
    }

    #[test]
    fn ten_hosts_five_agents() {
        let topo = plan(names(10)).unwrap();
        assert_eq!(topo.servers.len(), 5);
        assert_eq!(topo.agents.len(), 5);
    }

    #[test]
    fn assignments_carry_correct_bootstrap_expect() {
        let topo = plan(names(6)).unwrap();
        let assignments = topo.assignments();
        for a in &assignments {
            match a.role {
                Role::Server => assert_eq!(a.bootstrap_expect, SERVER_BOOTSTRAP_EXPECT),
                Role::Agent => assert_eq!(a.bootstrap_expect, AGENT_BOOTSTRAP_EXPECT),
            }
        }
    }

    #[test]
    fn unsorted_input_is_sorted_before_assignment() {
        let shuffled = vec!["h02", "h00", "h01"];
        let topo = plan(shuffled).unwrap();
        assert_eq!(topo.leader, "h00");
    }

    proptest::proptest! {
        #[test]
        fn partition_is_exhaustive_and_disjoint(n in 3usize..40) {
            let topo = plan(names(n)).unwrap();
            let total = topo.servers.len() + topo.agents.len();
            prop_assert_eq!(total, n);
            prop_assert_eq!(topo.servers.len(), 5usize.min(n));
            prop_assert_eq!(topo.agents.len(), n.saturating_sub(5));
            prop_assert!(topo.servers.contains(&topo.leader));
            let mut all: Vec<&String> = topo.servers.iter().chain(topo.agents.iter()).collect();
            let unique: std::collections::BTreeSet<&&String> = all.iter().collect();
            prop_assert_eq!(unique.len(), all.len());
            all.sort();
            prop_assert!(topo.servers.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(topo.agents.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
