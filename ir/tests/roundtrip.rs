use forge_ir::{Graph, OpCode};
use proptest::prelude::*;

fn build_small_graph(coeffs: &[f64]) -> Graph {
    let mut g = Graph::new();
    let x = g.create_input();
    let mut acc = g.create_constant(0.0);
    for &c in coeffs {
        let cnode = g.create_constant(c);
        let term = g.create_binary(OpCode::Mul, x, cnode).unwrap();
        acc = g.create_binary(OpCode::Add, acc, term).unwrap();
    }
    g.mark_output(acc);
    g.mark_diff_input(x);
    g
}

proptest! {
    #[test]
    fn json_roundtrip_preserves_structure(coeffs in prop::collection::vec(-1000.0f64..1000.0, 0..8)) {
        let g = build_small_graph(&coeffs);
        let json = g.to_json().unwrap();
        let g2 = Graph::from_json(&json).unwrap();

        prop_assert_eq!(g.nodes.len(), g2.nodes.len());
        prop_assert_eq!(g.outputs, g2.outputs);
        prop_assert_eq!(g.diff_inputs, g2.diff_inputs);
        prop_assert_eq!(g.const_pool.as_slice(), g2.const_pool.as_slice());
        prop_assert!(g2.validate().is_ok());
    }
}

#[test]
fn json_roundtrip_preserves_non_finite_values() {
    let mut g = Graph::new();
    let x = g.create_input();
    let nan = g.create_constant(f64::NAN);
    let inf = g.create_constant(f64::INFINITY);
    let ninf = g.create_constant(f64::NEG_INFINITY);
    let t1 = g.create_binary(OpCode::Add, x, nan).unwrap();
    let t2 = g.create_binary(OpCode::Add, t1, inf).unwrap();
    let y = g.create_binary(OpCode::Add, t2, ninf).unwrap();
    g.mark_output(y);

    let json = g.to_json().unwrap();
    let g2 = Graph::from_json(&json).unwrap();

    let pool = g2.const_pool.as_slice();
    assert!(pool[0].is_nan());
    assert_eq!(pool[1], f64::INFINITY);
    assert_eq!(pool[2], f64::NEG_INFINITY);
}
