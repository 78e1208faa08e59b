//! Quadratic demo
//!
//! Builds `y = x^2 + 1`, marks `x` as a differentiation input, compiles it
//! with the default backend and prints the value and gradient at two inputs.

use forge::{CompilerConfig, ForgeEngine};
use forge_ir::{Graph, OpCode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Forge Quadratic Demo ===\n");

    let mut graph = Graph::new();
    let x = graph.create_input();
    graph.mark_diff_input(x);
    let x2 = graph.create_binary(OpCode::Mul, x, x)?;
    let one = graph.create_constant(1.0);
    let y = graph.create_binary(OpCode::Add, x2, one)?;
    graph.mark_output(y);

    println!("Unoptimized graph:\n{graph}");

    let engine = ForgeEngine::new(CompilerConfig::default())?;
    let program = engine.compile(&graph)?;

    println!(
        "Compiled with backend {:?}, vector width {}",
        program.backend_name(),
        program.vector_width()
    );

    let mapped_x = program.mapping.get(x).unwrap_or(x);
    let mapped_y = program.mapping.get(y).unwrap_or(y);

    for input in [2.0, 0.0] {
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
