//! Constant cleanup (`spec.md` §4.2.5): the pipeline's final pass. Counts
//! references to each constant-pool entry, discards unreferenced entries,
//! and rewrites every surviving `Constant` node's `imm` to the compacted
//! index. Purely a pool-size reduction; no node is added, removed, or
//! reordered.
//!
//! Grounded in
//! `original_source/src/graph/optimizations/constant_cleanup.cpp`'s
//! `countConstantReferences` / `buildConstantMapping` two-step shape.

use forge_ir::{ConstantPool, Graph, Node};
use tracing::debug;

use crate::PassStats;

pub fn apply(graph: &Graph) -> (Graph, PassStats) {
    let pool = &graph.const_pool;
    let mut ref_counts = vec![0u32; pool.len()];
    for node in &graph.nodes {
        if node.op == forge_ir::OpCode::Constant {
            if let Some(slot) = ref_counts.get_mut(node.imm as usize) {
                *slot += 1;
            }
        }
    }

    let mut index_map = vec![u32::MAX; pool.len()];
    let mut compacted = Vec::new();
    for (old_index, &count) in ref_counts.iter().enumerate() {
        if count > 0 {
            index_map[old_index] = compacted.len() as u32;
            compacted.push(pool.get(old_index as u32).expect("index in range"));
        }
    }

    let removed = ref_counts.iter().filter(|&&c| c == 0).count();
    if removed > 0 {
        debug!(removed, "constant_cleanup: discarded unreferenced pool entries");
    }

    let new_pool = ConstantPool::from_values(compacted);

    let nodes = graph
        .nodes
        .iter()
        .map(|node| {
            let mut n = *node;
            if n.op == forge_ir::OpCode::Constant {
                let mapped = index_map[n.imm as usize];
                n.imm = if mapped == u32::MAX { 0 } else { mapped };
            }
            n
        })
        .collect::<Vec<Node>>();

    let result = Graph {
        nodes,
        const_pool: new_pool,
        outputs: graph.outputs.clone(),
        diff_inputs: graph.diff_inputs.clone(),
    };

    (result, PassStats { rewrites: removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_ir::OpCode;

    #[test]
    fn drops_unreferenced_constants() {
        let mut g = Graph::new();
        let x = g.create_input();
        let used = g.create_constant(3.0);
        let _unused = g.create_constant(99.0);
        let y = g.create_binary(OpCode::Add, x, used).unwrap();
        g.mark_output(y);

        assert_eq!(g.const_pool.len(), 2);
        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        assert_eq!(out.const_pool.len(), 1);
        assert_eq!(out.const_pool.get(0), Some(3.0));

        let add = out.node(out.outputs[0]);
        let const_node = out.node(add.b);
        assert_eq!(out.const_pool.get(const_node.imm), Some(3.0));
    }

    #[test]
    fn leaves_fully_referenced_pool_untouched() {
        let mut g = Graph::new();
        let a = g.create_constant(1.0);
        let b = g.create_constant(2.0);
        let y = g.create_binary(OpCode::Add, a, b).unwrap();
        g.mark_output(y);

        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 0);
        assert_eq!(out.const_pool.len(), 2);
    }
}
