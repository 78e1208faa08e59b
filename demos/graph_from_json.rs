//! Gradient-through-If demo
//!
//! Builds `y = if (x > 0) then x*x else -x`, serializes the graph to JSON
//! and back (`forge-ir`'s wire format), then compiles and evaluates the
//! round-tripped graph at two inputs straddling the branch.

use forge::{CompilerConfig, ForgeEngine};
use forge_ir::{Graph, OpCode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Forge Gradient-Through-If Demo ===\n");

    let mut graph = Graph::new();
    let x = graph.create_input();
    graph.mark_diff_input(x);
    let zero = graph.create_constant(0.0);
    let cond = graph.create_binary(OpCode::Gt, x, zero)?;
    let x2 = graph.create_binary(OpCode::Mul, x, x)?;
    let neg_x = graph.create_unary(OpCode::Neg, x)?;
    let y = graph.create_ternary(OpCode::If, cond, x2, neg_x)?;
    graph.mark_output(y);

    let json = graph.to_json()?;
    println!("Serialized graph:\n{json}\n");

    let roundtripped = Graph::from_json(&json)?;

    let engine = ForgeEngine::new(CompilerConfig::default())?;
    let program = engine.compile(&roundtripped)?;

    let mapped_x = program.mapping.get(x).unwrap_or(x);
    let mapped_y = program.mapping.get(y).unwrap_or(y);

    for input in [3.0, -2.0] {
        let (mut values, mut gradients) = program.allocate_buffers()?;
        values.set_value(mapped_x.0, program.vector_width(), input);
        unsafe { program.call(&mut values, gradients.as_mut()) };

        let result = values.get_value(mapped_y.0, program.vector_width());
        let grad = gradients
            .as_ref()
            .map(|g| g.get_value(mapped_x.0, program.vector_width()));

        println!("x = {input}: y = {result}, dy/dx = {grad:?}");
    }

    Ok(())
}
