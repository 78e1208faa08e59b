//! JSON wire format for a [`Graph`] (`spec.md` §6).
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "nodes": [{"op": "Add", "dst": 2, "a": 0, "b": 1, "c": 4294967295,
//!              "flags": 1, "imm": 0, "isActive": true, "isDead": false,
//!              "needsGradient": false}],
//!   "constPool": [1.0, "NaN"],
//!   "outputs": [2],
//!   "diff_inputs": [0]
//! }
//! ```
//!
//! `0xFFFFFFFF` is the sentinel for an absent operand. Non-finite constant
//! pool entries serialize as the strings `"NaN"`, `"Infinity"`, and
//! `"-Infinity"` because standard JSON has no literal for them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constant_pool::ConstantPool;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeFlags, NodeId};
use crate::opcode::OpCode;

const NONE_SENTINEL: u32 = 0xFFFF_FFFF;
const WIRE_VERSION: &str = "1.0";

#[derive(Serialize, Deserialize)]
struct WireNode {
    op: OpCode,
    dst: u32,
    a: u32,
    b: u32,
    c: u32,
    imm: u32,
    #[serde(rename = "isActive")]
    is_active: bool,
    #[serde(rename = "isDead")]
    is_dead: bool,
    #[serde(rename = "needsGradient")]
    needs_gradient: bool,
}

#[derive(Serialize, Deserialize)]
struct WireGraph {
    version: String,
    nodes: Vec<WireNode>,
    #[serde(rename = "constPool")]
    const_pool: Vec<Value>,
    outputs: Vec<u32>,
    diff_inputs: Vec<u32>,
}

fn id_to_wire(id: NodeId) -> u32 {
    if id.is_none() {
        NONE_SENTINEL
    } else {
        id.0
    }
}

fn id_from_wire(v: u32) -> NodeId {
    if v == NONE_SENTINEL {
        NodeId::NONE
    } else {
        NodeId(v)
    }
}

fn const_to_wire(v: f64) -> Value {
    if v.is_nan() {
        Value::String("NaN".to_string())
    } else if v.is_infinite() {
        Value::String(if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
    } else {
        serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn const_from_wire(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

impl Graph {
    /// Serialize to the JSON wire format described in `spec.md` §6.
    pub fn to_json(&self) -> Result<String> {
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| WireNode {
                op: n.op,
                dst: i as u32,
                a: id_to_wire(n.a),
                b: id_to_wire(n.b),
                c: id_to_wire(n.c),
                imm: n.imm,
                is_active: n.is_active(),
                is_dead: n.is_dead(),
                needs_gradient: n.needs_gradient(),
            })
            .collect();

        let const_pool = self.const_pool.iter().map(const_to_wire).collect();

        let wire = WireGraph {
            version: WIRE_VERSION.to_string(),
            nodes,
            const_pool,
            outputs: self.outputs.iter().map(|&o| o.0).collect(),
            diff_inputs: self.diff_inputs.iter().map(|&d| d.0).collect(),
        };

        Ok(serde_json::to_string_pretty(&wire)?)
    }

    /// Parse from the JSON wire format, fully validating on return.
    pub fn from_json(s: &str) -> Result<Graph> {
        let wire: WireGraph = serde_json::from_str(s)?;

        let values: Vec<f64> = wire
            .const_pool
            .iter()
            .enumerate()
            .map(|(index, v)| {
                const_from_wire(v).ok_or(GraphError::InvalidConstantPoolEntry { index })
            })
            .collect::<std::result::Result<_, _>>()?;
        let const_pool = ConstantPool::from_values(values);

        let nodes = wire
            .nodes
            .iter()
            .map(|n| {
                let mut flags = NodeFlags::empty();
                flags.set(NodeFlags::ACTIVE, n.is_active);
                flags.set(NodeFlags::DEAD, n.is_dead);
                flags.set(NodeFlags::NEEDS_GRADIENT, n.needs_gradient);
                Node {
                    op: n.op,
                    a: id_from_wire(n.a),
                    b: id_from_wire(n.b),
                    c: id_from_wire(n.c),
                    imm: n.imm,
                    flags,
                }
            })
            .collect();

        let graph = Graph {
            nodes,
            const_pool,
            outputs: wire.outputs.into_iter().map(NodeId).collect(),
            diff_inputs: wire.diff_inputs.into_iter().map(NodeId).collect(),
        };

        graph.validate()?;
        Ok(graph)
    }
}
