use nodepool::PoolConfig;
use nodepool::topology::Topology;

fn main() {
    let topo = Topology::detect();
    println!("Detected {} NUMA nodes", topo.num_nodes);
    println!("Core -> Node map: {:?}", topo.core_to_node);
    println!("Node -> Cores map: {:?}", topo.node_cores);

    let config = PoolConfig::default();
    match config.resolve() {
        Ok((layout, _)) => {
            for node in 0..layout.num_nodes() {
                println!("Node {node} runs pool threads {:?}", layout.threads_of(node));
            }
        }
        Err(e) => eprintln!("Invalid default config: {e}"),
    }
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("Default pool config:\n{json}"),
        Err(e) => eprintln!("Failed to serialize config: {e}"),
    }
}
