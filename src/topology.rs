//! Hardware topology detection and the thread-to-node layout of a pool.

use crate::context::ThreadIdentity;
use crate::range::split;
use std::collections::HashMap;
use std::ops::Range;
use sysinfo::{CpuRefreshKind, System};
use tracing::{debug, warn};

/// Largest number of nodes a pool distinguishes.
pub const MAX_NODES: usize = 8;

#[derive(Debug, Clone)]
pub struct Topology {
    pub core_to_node: HashMap<usize, usize>,
    pub node_cores: HashMap<usize, Vec<usize>>,
    pub num_nodes: usize,
}

impl Topology {
    /// Detects the NUMA layout of the machine.
    ///
    /// On Linux the node cpulists under `/sys/devices/system/node` are used.
    /// Everywhere else, or when sysfs is unavailable, all logical CPUs are
    /// reported as a single node.
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_cpu_specifics(CpuRefreshKind::everything());
        let num_cpus = system.cpus().len().max(1);

        let topology = match read_node_cpulists() {
            Some(lists) => Topology::from_node_lists(num_cpus, lists),
            None => Topology::uniform(num_cpus),
        };
        debug!(
            cpus = num_cpus,
            nodes = topology.num_nodes,
            "detected hardware topology"
        );
        topology
    }

    /// A single node holding `num_cpus` cores.
    pub fn uniform(num_cpus: usize) -> Self {
        Topology::from_node_lists(num_cpus, Vec::new())
    }

    /// Builds a topology from per-node core lists.
    ///
    /// Nodes without cores are skipped. Nodes beyond [`MAX_NODES`] are
    /// folded onto the last supported node.
    pub fn from_node_lists(num_cpus: usize, lists: Vec<Vec<usize>>) -> Self {
        let mut lists: Vec<Vec<usize>> = lists.into_iter().filter(|l| !l.is_empty()).collect();
        if lists.is_empty() {
            lists.push((0..num_cpus.max(1)).collect());
        }
        if lists.len() > MAX_NODES {
            warn!(
                detected = lists.len(),
                max = MAX_NODES,
                "more NUMA nodes than supported, folding the rest onto the last node"
            );
            let extra: Vec<usize> = lists.drain(MAX_NODES..).flatten().collect();
            lists[MAX_NODES - 1].extend(extra);
        }

        let mut core_to_node = HashMap::new();
        let mut node_cores = HashMap::new();
        for (node_id, cores) in lists.iter().enumerate() {
            for &core in cores {
                core_to_node.insert(core, node_id);
            }
            node_cores.insert(node_id, cores.clone());
        }

        Topology {
            core_to_node,
            node_cores,
            num_nodes: lists.len(),
        }
    }

    /// Cores sharing a node with `core`.
    pub fn get_siblings(&self, core: usize) -> Option<&Vec<usize>> {
        let node = self.core_to_node.get(&core)?;
        self.node_cores.get(node)
    }

    /// Cores of `node`, empty for unknown nodes.
    pub fn cores_of(&self, node: usize) -> &[usize] {
        self.node_cores.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(target_os = "linux")]
fn read_node_cpulists() -> Option<Vec<Vec<usize>>> {
    use std::fs;

    let mut nodes: Vec<(usize, Vec<usize>)> = fs::read_dir("/sys/devices/system/node")
        .ok()?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name();
            let id = name.to_str()?.strip_prefix("node")?.parse::<usize>().ok()?;
            let cpulist = fs::read_to_string(entry.path().join("cpulist")).ok()?;
            Some((id, parse_cpulist(&cpulist)))
        })
        .collect();
    if nodes.is_empty() {
        return None;
    }
    nodes.sort_by_key(|(id, _)| *id);
    Some(nodes.into_iter().map(|(_, cores)| cores).collect())
}

#[cfg(not(target_os = "linux"))]
fn read_node_cpulists() -> Option<Vec<Vec<usize>>> {
    None
}

/// Parses a kernel cpulist such as `0-3,8,10-11`. Malformed pieces are skipped.
pub fn parse_cpulist(list: &str) -> Vec<usize> {
    let mut cores = Vec::new();
    for piece in list.trim().split(',').filter(|p| !p.is_empty()) {
        match piece.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) {
                    cores.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(core) = piece.trim().parse::<usize>() {
                    cores.push(core);
                }
            }
        }
    }
    cores
}

/// Assignment of pool threads to nodes.
///
/// Node `k` owns the contiguous thread range `split(0..nthreads, k, nnodes)`,
/// so every node has at least one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    thread_node: Vec<usize>,
    nnodes: usize,
}

impl NodeLayout {
    /// Lays out `nthreads` threads over at most `nnodes` nodes.
    pub fn new(nthreads: usize, nnodes: usize) -> Self {
        let nthreads = nthreads.max(1);
        let nnodes = nnodes.clamp(1, nthreads);
        let mut thread_node = vec![0; nthreads];
        for node in 0..nnodes {
            for thread in split(0..nthreads, node, nnodes) {
                thread_node[thread] = node;
            }
        }
        NodeLayout {
            thread_node,
            nnodes,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.thread_node.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nnodes
    }

    pub fn node_of(&self, thread_nr: usize) -> usize {
        self.thread_node.get(thread_nr).copied().unwrap_or(0)
    }

    pub fn threads_of(&self, node_nr: usize) -> Range<usize> {
        split(0..self.num_threads(), node_nr, self.nnodes)
    }

    pub fn identity(&self, thread_nr: usize) -> ThreadIdentity {
        ThreadIdentity {
            thread_nr,
            nthreads: self.num_threads(),
            node_nr: self.node_of(thread_nr),
            nnodes: self.nnodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpulist() {
        assert_eq!(parse_cpulist("0-3,8,10-11\n"), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(parse_cpulist(""), Vec::<usize>::new());
        assert_eq!(parse_cpulist("4,x,6"), vec![4, 6]);
    }

    #[test]
    fn test_uniform_topology() {
        let topo = Topology::uniform(4);
        assert_eq!(topo.num_nodes, 1);
        assert_eq!(topo.cores_of(0), &[0, 1, 2, 3]);
        assert_eq!(topo.get_siblings(2), Some(&vec![0, 1, 2, 3]));
    }

    #[test]
    fn test_empty_nodes_are_skipped() {
        let topo = Topology::from_node_lists(4, vec![vec![0, 1], vec![], vec![2, 3]]);
        assert_eq!(topo.num_nodes, 2);
        assert_eq!(topo.core_to_node[&3], 1);
    }

    #[test]
    fn test_nodes_are_folded_at_max() {
        let lists: Vec<Vec<usize>> = (0..MAX_NODES + 3).map(|n| vec![n]).collect();
        let topo = Topology::from_node_lists(MAX_NODES + 3, lists);
        assert_eq!(topo.num_nodes, MAX_NODES);
        assert_eq!(topo.cores_of(MAX_NODES - 1).len(), 4);
        assert_eq!(topo.core_to_node[&(MAX_NODES + 2)], MAX_NODES - 1);
    }

    #[test]
    fn test_layout_assigns_contiguous_threads() {
        let layout = NodeLayout::new(5, 2);
        assert_eq!(layout.threads_of(0), 0..3);
        assert_eq!(layout.threads_of(1), 3..5);
        assert_eq!(layout.node_of(2), 0);
        assert_eq!(layout.node_of(3), 1);
        assert_eq!(layout.identity(4).node_nr, 1);
    }

    #[test]
    fn test_layout_never_has_more_nodes_than_threads() {
        let layout = NodeLayout::new(2, 4);
        assert_eq!(layout.num_nodes(), 2);
        assert_eq!(layout.threads_of(1), 1..2);
    }
}
