//! `kiln variant` - show which variant and endpoint a request would use

use anyhow::Result;
use kiln_gen::dispatch::route;
use kiln_gen::{best_variant, MeshModel, Variant};

pub fn run(model: &str, variant: Option<&str>, images: usize, prefer_fast: bool) -> Result<()> {
    let model: MeshModel = model.parse()?;
    let requested = variant.map(|v| v.parse::<Variant>()).transpose()?;

    let chosen = best_variant(model, requested, images, prefer_fast);
    let route = route(model, chosen)?;

    println!("Model: {}", model);
    println!("  Variant: {}", chosen);
    if let Some(req) = requested.filter(|r| *r != chosen) {
        println!("  Requested: {} (not supported, substituted)", req);
    }
    println!("  Provider: {}", route.provider);
    println!("  Endpoint: {}", route.endpoint);

    let supported: Vec<&str> = model.spec().variants.iter().map(|v| v.as_str()).collect();
    println!("  Supported: {}", supported.join(", "));
    Ok(())
}
